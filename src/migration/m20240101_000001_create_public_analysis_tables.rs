use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PublicAnalysisSessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PublicAnalysisSessions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PublicAnalysisSessions::IpAddress).string().not_null())
                    .col(ColumnDef::new(PublicAnalysisSessions::UserAgent).string())
                    .col(
                        ColumnDef::new(PublicAnalysisSessions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PublicAnalysisSessions::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One row per address; concurrent inserts collapse onto it.
        manager
            .create_index(
                Index::create()
                    .name("uq_public_analysis_sessions_ip")
                    .table(PublicAnalysisSessions::Table)
                    .col(PublicAnalysisSessions::IpAddress)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_public_analysis_sessions_expires_at")
                    .table(PublicAnalysisSessions::Table)
                    .col(PublicAnalysisSessions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PublicDocumentAnalyses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PublicDocumentAnalyses::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PublicDocumentAnalyses::SessionId).string().not_null())
                    .col(ColumnDef::new(PublicDocumentAnalyses::IpAddress).string().not_null())
                    .col(ColumnDef::new(PublicDocumentAnalyses::FileName).string().not_null())
                    .col(ColumnDef::new(PublicDocumentAnalyses::ContentType).string())
                    .col(
                        ColumnDef::new(PublicDocumentAnalyses::FileSize)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PublicDocumentAnalyses::StoragePath)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PublicDocumentAnalyses::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PublicDocumentAnalyses::Result).json())
                    .col(ColumnDef::new(PublicDocumentAnalyses::ErrorMessage).string())
                    .col(
                        ColumnDef::new(PublicDocumentAnalyses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PublicDocumentAnalyses::CompletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(PublicDocumentAnalyses::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_public_document_analyses_session")
                            .from(PublicDocumentAnalyses::Table, PublicDocumentAnalyses::SessionId)
                            .to(PublicAnalysisSessions::Table, PublicAnalysisSessions::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // The rate limiter's hourly and daily counts
        manager
            .create_index(
                Index::create()
                    .name("idx_public_document_analyses_ip_created")
                    .table(PublicDocumentAnalyses::Table)
                    .col(PublicDocumentAnalyses::IpAddress)
                    .col(PublicDocumentAnalyses::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PublicDocumentAnalyses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PublicAnalysisSessions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PublicAnalysisSessions {
    Table,
    Id,
    IpAddress,
    UserAgent,
    CreatedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum PublicDocumentAnalyses {
    Table,
    Id,
    SessionId,
    IpAddress,
    FileName,
    ContentType,
    FileSize,
    StoragePath,
    Status,
    Result,
    ErrorMessage,
    CreatedAt,
    CompletedAt,
    ExpiresAt,
}
