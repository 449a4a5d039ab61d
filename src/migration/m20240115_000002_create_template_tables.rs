use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Templates::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Templates::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Templates::Title).string().not_null())
                    .col(ColumnDef::new(Templates::Description).text())
                    .col(ColumnDef::new(Templates::Category).string().not_null())
                    .col(ColumnDef::new(Templates::Content).text().not_null())
                    .col(ColumnDef::new(Templates::CurrentVersion).integer().not_null())
                    .col(ColumnDef::new(Templates::AuthorId).string())
                    .col(ColumnDef::new(Templates::IsPublic).boolean().not_null())
                    .col(ColumnDef::new(Templates::RatingAverage).double().not_null())
                    .col(ColumnDef::new(Templates::RatingCount).integer().not_null())
                    .col(ColumnDef::new(Templates::DownloadCount).big_integer().not_null())
                    .col(
                        ColumnDef::new(Templates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Templates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_templates_category")
                    .table(Templates::Table)
                    .col(Templates::Category)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TemplateVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TemplateVersions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TemplateVersions::TemplateId).string().not_null())
                    .col(ColumnDef::new(TemplateVersions::Version).integer().not_null())
                    .col(ColumnDef::new(TemplateVersions::Content).text().not_null())
                    .col(ColumnDef::new(TemplateVersions::Changelog).text())
                    .col(
                        ColumnDef::new(TemplateVersions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_template_versions_template")
                            .from(TemplateVersions::Table, TemplateVersions::TemplateId)
                            .to(Templates::Table, Templates::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_template_versions_template_version")
                    .table(TemplateVersions::Table)
                    .col(TemplateVersions::TemplateId)
                    .col(TemplateVersions::Version)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TemplateCustomizations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TemplateCustomizations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TemplateCustomizations::TemplateId).string().not_null())
                    .col(
                        ColumnDef::new(TemplateCustomizations::TemplateVersion)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TemplateCustomizations::UserId).string().not_null())
                    .col(ColumnDef::new(TemplateCustomizations::FieldValues).json().not_null())
                    .col(
                        ColumnDef::new(TemplateCustomizations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TemplateCustomizations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_template_customizations_template")
                            .from(TemplateCustomizations::Table, TemplateCustomizations::TemplateId)
                            .to(Templates::Table, Templates::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TemplateCustomizations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TemplateVersions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Templates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Templates {
    Table,
    Id,
    Title,
    Description,
    Category,
    Content,
    CurrentVersion,
    AuthorId,
    IsPublic,
    RatingAverage,
    RatingCount,
    DownloadCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TemplateVersions {
    Table,
    Id,
    TemplateId,
    Version,
    Content,
    Changelog,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TemplateCustomizations {
    Table,
    Id,
    TemplateId,
    TemplateVersion,
    UserId,
    FieldValues,
    CreatedAt,
    UpdatedAt,
}
