//! Cookie session entity.

use sea_orm::entity::prelude::*;

/// A MessagePack-encoded `tower_sessions` record.
///
/// | Column      | Type               | Description                    |
/// |-------------|--------------------|--------------------------------|
/// | id          | TEXT (Primary Key) | Session ID                     |
/// | data        | BYTEA              | Serialized session record      |
/// | expiry_date | TIMESTAMPTZ        | Expiry; rows past it are dead  |
/// | updated_at  | TIMESTAMPTZ        | Last write                     |
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    pub data: Vec<u8>,
    pub expiry_date: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
