//! Template marketplace: listing, search, ratings, downloads and versions.

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entity::template::{self, ActiveModel as TemplateActiveModel, Entity as TemplateEntity};
use crate::entity::template_version::{
    self, ActiveModel as VersionActiveModel, Entity as VersionEntity,
};
use crate::error::{ServiceError, ServiceResult};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Input for [`TemplateCatalog::create`]; `is_public` defaults to `true`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTemplate {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub content: String,
    pub author_id: Option<String>,
    #[serde(default = "default_public")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Rating,
    Downloads,
    Newest,
    Title,
}

/// Search parameters, also accepted as a query string (`q` for `text`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateQuery {
    #[serde(alias = "q")]
    pub text: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// The template marketplace over `templates` and `template_versions`.
///
/// # Examples
///
/// ```no_run
/// use craftchat_service::templates::{NewTemplate, SortBy, TemplateCatalog, TemplateQuery};
///
/// # async fn example(conn: sea_orm::DatabaseConnection) -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = TemplateCatalog::new(conn);
/// let now = chrono::Utc::now().fixed_offset();
///
/// let lease = catalog
///     .create(
///         NewTemplate {
///             title: "Residential Lease".into(),
///             description: None,
///             category: "property".into(),
///             content: "This lease is made between {{landlord}} and {{tenant}}.".into(),
///             author_id: None,
///             is_public: true,
///         },
///         now,
///     )
///     .await?;
/// catalog.rate(&lease.id, 5).await?;
///
/// let best = catalog
///     .search(&TemplateQuery {
///         category: Some("property".into()),
///         sort_by: SortBy::Rating,
///         ..TemplateQuery::default()
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    conn: DatabaseConnection,
}

impl TemplateCatalog {
    /// Creates a catalog over `conn`.
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Inserts a template together with its first version.
    pub async fn create(
        &self,
        new: NewTemplate,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<template::Model> {
        if new.title.trim().is_empty() {
            return Err(ServiceError::InvalidInput("title must not be empty".into()));
        }
        if new.category.trim().is_empty() {
            return Err(ServiceError::InvalidInput("category must not be empty".into()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let txn = self.conn.begin().await?;

        let created = TemplateActiveModel {
            id: Set(id.clone()),
            title: Set(new.title.trim().to_string()),
            description: Set(new.description),
            category: Set(new.category.trim().to_string()),
            content: Set(new.content.clone()),
            current_version: Set(1),
            author_id: Set(new.author_id),
            is_public: Set(new.is_public),
            rating_average: Set(0.0),
            rating_count: Set(0),
            download_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        VersionActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            template_id: Set(id),
            version: Set(1),
            content: Set(new.content),
            changelog: Set(Some("Initial version".to_string())),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        tracing::info!(template_id = %created.id, "template created");
        Ok(created)
    }

    /// Fetches one template, public or not. Unknown ids are `NotFound`.
    pub async fn get(&self, template_id: &str) -> ServiceResult<template::Model> {
        TemplateEntity::find_by_id(template_id.to_string())
            .one(&self.conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("template", template_id))
    }

    /// Searches public templates by title/description text and category.
    pub async fn search(&self, query: &TemplateQuery) -> ServiceResult<Vec<template::Model>> {
        let mut select = TemplateEntity::find().filter(template::Column::IsPublic.eq(true));

        if let Some(text) = query.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            select = select.filter(
                Condition::any()
                    .add(template::Column::Title.contains(text))
                    .add(template::Column::Description.contains(text)),
            );
        }
        if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
            select = select.filter(template::Column::Category.eq(category));
        }

        select = match query.sort_by {
            SortBy::Rating => select
                .order_by_desc(template::Column::RatingAverage)
                .order_by_desc(template::Column::RatingCount),
            SortBy::Downloads => select.order_by_desc(template::Column::DownloadCount),
            SortBy::Newest => select.order_by_desc(template::Column::CreatedAt),
            SortBy::Title => select.order_by_asc(template::Column::Title),
        };

        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Ok(select
            .order_by_asc(template::Column::Id)
            .limit(limit)
            .offset(query.offset.unwrap_or(0))
            .all(&self.conn)
            .await?)
    }

    /// Most downloaded public templates, best rated first among equals.
    pub async fn popular(&self, limit: u64) -> ServiceResult<Vec<template::Model>> {
        Ok(TemplateEntity::find()
            .filter(template::Column::IsPublic.eq(true))
            .order_by_desc(template::Column::DownloadCount)
            .order_by_desc(template::Column::RatingAverage)
            .limit(limit.clamp(1, MAX_PAGE_SIZE))
            .all(&self.conn)
            .await?)
    }

    /// Folds one rating of 1 to 5 stars into the running mean.
    pub async fn rate(&self, template_id: &str, stars: u8) -> ServiceResult<template::Model> {
        if !(1..=5).contains(&stars) {
            return Err(ServiceError::InvalidInput(format!(
                "rating must be between 1 and 5, got {stars}"
            )));
        }

        // A single UPDATE reads the old average and count, so concurrent
        // ratings cannot overwrite each other.
        let updated = TemplateEntity::update_many()
            .col_expr(
                template::Column::RatingAverage,
                Expr::col(template::Column::RatingAverage)
                    .mul(Expr::col(template::Column::RatingCount))
                    .add(f64::from(stars))
                    .div(Expr::col(template::Column::RatingCount).add(1)),
            )
            .col_expr(
                template::Column::RatingCount,
                Expr::col(template::Column::RatingCount).add(1),
            )
            .filter(template::Column::Id.eq(template_id))
            .exec(&self.conn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(ServiceError::not_found("template", template_id));
        }
        self.get(template_id).await
    }

    /// Counts one download; a single `UPDATE`, safe under concurrency.
    pub async fn record_download(&self, template_id: &str) -> ServiceResult<()> {
        let updated = TemplateEntity::update_many()
            .col_expr(
                template::Column::DownloadCount,
                Expr::col(template::Column::DownloadCount).add(1),
            )
            .filter(template::Column::Id.eq(template_id))
            .exec(&self.conn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(ServiceError::not_found("template", template_id));
        }
        Ok(())
    }

    /// Appends a new version and makes it current.
    pub async fn publish_version(
        &self,
        template_id: &str,
        content: String,
        changelog: Option<String>,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<template_version::Model> {
        let txn = self.conn.begin().await?;

        let template = TemplateEntity::find_by_id(template_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("template", template_id))?;

        let latest: Option<i32> = VersionEntity::find()
            .select_only()
            .column(template_version::Column::Version)
            .filter(template_version::Column::TemplateId.eq(template_id))
            .order_by_desc(template_version::Column::Version)
            .into_tuple()
            .one(&txn)
            .await?;
        let next = latest.unwrap_or(0) + 1;

        let version = VersionActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            template_id: Set(template.id.clone()),
            version: Set(next),
            content: Set(content.clone()),
            changelog: Set(changelog),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut active: TemplateActiveModel = template.into();
        active.content = Set(content);
        active.current_version = Set(next);
        active.updated_at = Set(now);
        active.update(&txn).await?;

        txn.commit().await?;
        tracing::info!(template_id, version = next, "template version published");
        Ok(version)
    }

    /// All versions of a template, oldest first.
    pub async fn versions(&self, template_id: &str) -> ServiceResult<Vec<template_version::Model>> {
        self.get(template_id).await?;
        Ok(VersionEntity::find()
            .filter(template_version::Column::TemplateId.eq(template_id))
            .order_by_asc(template_version::Column::Version)
            .all(&self.conn)
            .await?)
    }
}
