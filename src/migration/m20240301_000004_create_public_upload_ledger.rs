use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::ConnectionTrait;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PublicAnalysisUploads::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PublicAnalysisUploads::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PublicAnalysisUploads::IpAddress).string().not_null())
                    .col(ColumnDef::new(PublicAnalysisUploads::SessionId).string().not_null())
                    .col(
                        ColumnDef::new(PublicAnalysisUploads::FileSize)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PublicAnalysisUploads::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_public_analysis_uploads_ip_created")
                    .table(PublicAnalysisUploads::Table)
                    .col(PublicAnalysisUploads::IpAddress)
                    .col(PublicAnalysisUploads::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Seed the ledger with uploads that are still on record.
        manager
            .get_connection()
            .execute_unprepared(
                "INSERT INTO public_analysis_uploads (id, ip_address, session_id, file_size, created_at) \
                 SELECT id, ip_address, session_id, file_size, created_at FROM public_document_analyses",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PublicAnalysisUploads::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PublicAnalysisUploads {
    Table,
    Id,
    IpAddress,
    SessionId,
    FileSize,
    CreatedAt,
}
