//! Public analysis session entity.

use sea_orm::entity::prelude::*;
use serde::Serialize;

/// A time-boxed session for one client IP.
///
/// `ip_address` is unique: there is at most one row per address. Once it
/// expires the row is renewed under a fresh `id`, so objects stored under the
/// old id's folder never mix with new uploads. Uploads are accepted only while
/// `expires_at` lies in the future.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "public_analysis_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::document_analysis::Entity")]
    DocumentAnalysis,
}

impl Related<super::document_analysis::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DocumentAnalysis.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
