//! Filling template placeholders with user values.
//!
//! Placeholders look like `{{ name }}`; whitespace inside the braces is
//! ignored. A `{{` without a closing `}}`, or with an invalid name between
//! the braces, is kept as literal text.

use std::collections::{BTreeMap, BTreeSet};

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::template_customization::{
    self, ActiveModel as CustomizationActiveModel, Entity as CustomizationEntity,
};
use crate::entity::template_version::{self, Entity as VersionEntity};
use crate::error::{ServiceError, ServiceResult};
use crate::templates::TemplateCatalog;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("missing values for: {}", .0.join(", "))]
    MissingVariables(Vec<String>),
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Splits `content` into literal text and placeholder names.
fn tokens(content: &str) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    let mut rest = content;

    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            break;
        };

        let name = after_open[..close].trim();
        if name.is_empty() || !name.chars().all(is_name_char) {
            out.push(Token::Text(&rest[..open + 2]));
            rest = after_open;
            continue;
        }

        out.push(Token::Text(&rest[..open]));
        out.push(Token::Variable(name));
        rest = &after_open[close + 2..];
    }

    out.push(Token::Text(rest));
    out
}

enum Token<'a> {
    Text(&'a str),
    Variable(&'a str),
}

/// Distinct placeholder names in order of first appearance.
pub fn template_variables(content: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tokens(content)
        .into_iter()
        .filter_map(|token| match token {
            Token::Variable(name) if seen.insert(name) => Some(name.to_string()),
            _ => None,
        })
        .collect()
}

/// Replaces every placeholder with its value.
pub fn render_template(
    content: &str,
    values: &BTreeMap<String, String>,
) -> Result<String, RenderError> {
    let mut rendered = String::with_capacity(content.len());
    let mut missing = Vec::new();

    for token in tokens(content) {
        match token {
            Token::Text(text) => rendered.push_str(text),
            Token::Variable(name) => match values.get(name) {
                Some(value) => rendered.push_str(value),
                None => {
                    if !missing.iter().any(|m: &String| m == name) {
                        missing.push(name.to_string());
                    }
                }
            },
        }
    }

    if missing.is_empty() {
        Ok(rendered)
    } else {
        Err(RenderError::MissingVariables(missing))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCustomization {
    pub template_id: String,
    pub user_id: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// A document produced from a customization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedDocument {
    pub file_name: String,
    pub content: String,
}

/// Saved template customizations and their rendering.
///
/// # Examples
///
/// ```no_run
/// use std::collections::BTreeMap;
///
/// use craftchat_service::customization::{CustomizationService, NewCustomization};
/// use craftchat_service::templates::TemplateCatalog;
///
/// # async fn example(conn: sea_orm::DatabaseConnection, template_id: String) -> Result<(), Box<dyn std::error::Error>> {
/// let service = CustomizationService::new(conn.clone(), TemplateCatalog::new(conn));
/// let now = chrono::Utc::now().fixed_offset();
///
/// let values = BTreeMap::from([("tenant".to_string(), "Ada Lim".to_string())]);
/// let saved = service
///     .save(NewCustomization { template_id, user_id: "user-1".into(), values }, now)
///     .await?;
/// let document = service.render(&saved.id).await?;
/// println!("{}:\n{}", document.file_name, document.content);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CustomizationService {
    conn: DatabaseConnection,
    catalog: TemplateCatalog,
}

impl CustomizationService {
    pub fn new(conn: DatabaseConnection, catalog: TemplateCatalog) -> Self {
        Self { conn, catalog }
    }

    /// Stores the values against the template's current version.
    pub async fn save(
        &self,
        new: NewCustomization,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<template_customization::Model> {
        let template = self.catalog.get(&new.template_id).await?;

        let customization = CustomizationActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            template_id: Set(template.id),
            template_version: Set(template.current_version),
            user_id: Set(new.user_id),
            field_values: Set(serde_json::to_value(&new.values)?),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.conn)
        .await?;

        Ok(customization)
    }

    /// Replaces all stored values; the pinned version is unchanged.
    pub async fn update_values(
        &self,
        customization_id: &str,
        values: BTreeMap<String, String>,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<template_customization::Model> {
        let existing = self.get(customization_id).await?;
        let mut active: CustomizationActiveModel = existing.into();
        active.field_values = Set(serde_json::to_value(&values)?);
        active.updated_at = Set(now);
        Ok(active.update(&self.conn).await?)
    }

    pub async fn get(&self, customization_id: &str) -> ServiceResult<template_customization::Model> {
        CustomizationEntity::find_by_id(customization_id.to_string())
            .one(&self.conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("customization", customization_id))
    }

    /// Renders the pinned template version and counts it as a download.
    pub async fn render(&self, customization_id: &str) -> ServiceResult<GeneratedDocument> {
        let customization = self.get(customization_id).await?;
        let template = self.catalog.get(&customization.template_id).await?;

        let version = VersionEntity::find()
            .filter(template_version::Column::TemplateId.eq(customization.template_id.as_str()))
            .filter(template_version::Column::Version.eq(customization.template_version))
            .one(&self.conn)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(
                    "template version",
                    format!("{}@{}", customization.template_id, customization.template_version),
                )
            })?;

        let values: BTreeMap<String, String> =
            serde_json::from_value(customization.field_values)?;
        let content = render_template(&version.content, &values)?;

        self.catalog.record_download(&template.id).await?;

        Ok(GeneratedDocument {
            file_name: format!("{}.txt", slug(&template.title)),
            content,
        })
    }
}

fn slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn variables_are_listed_once_in_order() {
        let content = "Between {{ landlord }} and {{tenant}}; {{landlord}} agrees on {{ start_date }}.";
        assert_eq!(
            template_variables(content),
            vec!["landlord", "tenant", "start_date"]
        );
    }

    #[test]
    fn render_substitutes_every_placeholder() {
        let rendered = render_template(
            "Dear {{ name }}, your fee is {{fee}}. Regards, {{ name }}",
            &values(&[("name", "Ada"), ("fee", "$100")]),
        )
        .unwrap();
        assert_eq!(rendered, "Dear Ada, your fee is $100. Regards, Ada");
    }

    #[test]
    fn render_reports_all_missing_names() {
        let err = render_template("{{a}} {{b}} {{a}} {{c}}", &values(&[("b", "x")])).unwrap_err();
        assert_eq!(
            err,
            RenderError::MissingVariables(vec!["a".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn malformed_braces_stay_literal() {
        let map = values(&[("x", "1")]);
        assert_eq!(render_template("{{ x", &map).unwrap(), "{{ x");
        assert_eq!(render_template("{{ not a name }} {{x}}", &map).unwrap(), "{{ not a name }} 1");
        assert_eq!(render_template("{{}}", &map).unwrap(), "{{}}");
    }

    #[test]
    fn slugs_are_file_name_safe() {
        assert_eq!(slug("Residential Lease (Singapore)"), "residential-lease-singapore");
        assert_eq!(slug("!!!"), "document");
    }
}
