//! Public upload ledger entity.

use sea_orm::entity::prelude::*;
use serde::Serialize;

/// One accepted public upload, kept for the rate-limit window.
///
/// Rows are independent of sessions and analyses: deleting an expired
/// session or analysis leaves the ledger untouched, so an address's history
/// survives until cleanup prunes entries older than a day.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "public_analysis_uploads")]
pub struct Model {
    /// Id of the analysis the upload created.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub ip_address: String,
    pub session_id: String,
    pub file_size: i64,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
