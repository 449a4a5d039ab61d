use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserSessions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UserSessions::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(UserSessions::Data).blob().not_null())
                    .col(
                        ColumnDef::new(UserSessions::ExpiryDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserSessions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SecurityEvents::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SecurityEvents::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(SecurityEvents::EventType).string().not_null())
                    .col(ColumnDef::new(SecurityEvents::IpAddress).string())
                    .col(ColumnDef::new(SecurityEvents::UserAgent).string())
                    .col(ColumnDef::new(SecurityEvents::Details).json())
                    .col(
                        ColumnDef::new(SecurityEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AiUsageLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(AiUsageLogs::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(AiUsageLogs::UserId).string().not_null())
                    .col(ColumnDef::new(AiUsageLogs::Feature).string().not_null())
                    .col(ColumnDef::new(AiUsageLogs::ModelName).string().not_null())
                    .col(ColumnDef::new(AiUsageLogs::PromptTokens).big_integer().not_null())
                    .col(ColumnDef::new(AiUsageLogs::CompletionTokens).big_integer().not_null())
                    .col(
                        ColumnDef::new(AiUsageLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ai_usage_logs_user_created")
                    .table(AiUsageLogs::Table)
                    .col(AiUsageLogs::UserId)
                    .col(AiUsageLogs::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AiUsageLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SecurityEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserSessions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserSessions {
    Table,
    Id,
    Data,
    ExpiryDate,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SecurityEvents {
    Table,
    Id,
    EventType,
    IpAddress,
    UserAgent,
    Details,
    CreatedAt,
}

#[derive(DeriveIden)]
enum AiUsageLogs {
    Table,
    Id,
    UserId,
    Feature,
    ModelName,
    PromptTokens,
    CompletionTokens,
    CreatedAt,
}
