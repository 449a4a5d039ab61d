//! Schema migrations.
//!
//! Run with `Migrator::up(&conn, None)` before serving requests.

pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_public_analysis_tables;
mod m20240115_000002_create_template_tables;
mod m20240201_000003_create_account_tables;
mod m20240301_000004_create_public_upload_ledger;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    // Own migration table so the schema can share a database with other tools
    fn migration_table_name() -> sea_orm::DynIden {
        Alias::new("craftchat_migrations").into_iden()
    }

    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_public_analysis_tables::Migration),
            Box::new(m20240115_000002_create_template_tables::Migration),
            Box::new(m20240201_000003_create_account_tables::Migration),
            Box::new(m20240301_000004_create_public_upload_ledger::Migration),
        ]
    }
}
