//! Marketplace template entity.

use sea_orm::entity::prelude::*;
use serde::Serialize;

/// A document template offered in the marketplace.
///
/// `content` mirrors the version numbered `current_version`; older content
/// lives in `template_versions`. `rating_average` is the running mean of all
/// ratings received, `rating_count` their number.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "templates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub title: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub category: String,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub current_version: i32,
    pub author_id: Option<String>,
    pub is_public: bool,
    #[sea_orm(column_type = "Double")]
    pub rating_average: f64,
    pub rating_count: i32,
    pub download_count: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::template_version::Entity")]
    TemplateVersion,
}

impl Related<super::template_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TemplateVersion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
