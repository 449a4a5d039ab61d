//! AI token metering per user and calendar month.

use chrono::{Datelike, TimeZone, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

use crate::entity::ai_usage_log::{self, ActiveModel as UsageActiveModel, Entity as UsageEntity};
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Deserialize)]
pub struct NewUsage {
    pub user_id: String,
    pub feature: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Token totals of one user for the current calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub user_id: String,
    pub period_start: DateTimeWithTimeZone,
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub limit: u64,
    pub remaining: u64,
}

/// Records AI token usage and reports it against a monthly allowance.
///
/// # Examples
///
/// ```no_run
/// use craftchat_service::usage::{NewUsage, UsageMeter};
///
/// # async fn example(conn: sea_orm::DatabaseConnection) -> Result<(), Box<dyn std::error::Error>> {
/// let meter = UsageMeter::new(conn, 100_000);
/// let now = chrono::Utc::now().fixed_offset();
///
/// meter
///     .record(
///         NewUsage {
///             user_id: "user-1".into(),
///             feature: "contract_review".into(),
///             model: "gpt-4o-mini".into(),
///             prompt_tokens: 1_200,
///             completion_tokens: 300,
///         },
///         now,
///     )
///     .await?;
///
/// let summary = meter.monthly_summary("user-1", now).await?;
/// println!("{} tokens left this month", summary.remaining);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct UsageMeter {
    conn: DatabaseConnection,
    monthly_token_limit: u64,
}

impl UsageMeter {
    /// Creates a meter allowing `monthly_token_limit` tokens per user and
    /// calendar month.
    pub fn new(conn: DatabaseConnection, monthly_token_limit: u64) -> Self {
        Self {
            conn,
            monthly_token_limit,
        }
    }

    /// Appends one usage row. Recording never fails because the allowance is
    /// used up; callers compare against [`monthly_summary`](Self::monthly_summary).
    pub async fn record(
        &self,
        usage: NewUsage,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<ai_usage_log::Model> {
        if usage.user_id.trim().is_empty() {
            return Err(ServiceError::InvalidInput("user_id must not be empty".into()));
        }

        Ok(UsageActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            user_id: Set(usage.user_id),
            feature: Set(usage.feature),
            model_name: Set(usage.model),
            prompt_tokens: Set(i64::from(usage.prompt_tokens)),
            completion_tokens: Set(i64::from(usage.completion_tokens)),
            created_at: Set(now),
        }
        .insert(&self.conn)
        .await?)
    }

    /// Totals for the calendar month (UTC) containing `now`.
    pub async fn monthly_summary(
        &self,
        user_id: &str,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<UsageSummary> {
        let period_start = month_start(now);

        let rows: Vec<(i64, i64)> = UsageEntity::find()
            .select_only()
            .column(ai_usage_log::Column::PromptTokens)
            .column(ai_usage_log::Column::CompletionTokens)
            .filter(ai_usage_log::Column::UserId.eq(user_id))
            .filter(ai_usage_log::Column::CreatedAt.gte(period_start))
            .filter(ai_usage_log::Column::CreatedAt.lte(now))
            .into_tuple()
            .all(&self.conn)
            .await?;

        let requests = rows.len() as u64;
        let (prompt_tokens, completion_tokens) =
            rows.into_iter().fold((0_u64, 0_u64), |(p, c), (prompt, completion)| {
                (p + prompt.max(0) as u64, c + completion.max(0) as u64)
            });
        let total_tokens = prompt_tokens + completion_tokens;

        Ok(UsageSummary {
            user_id: user_id.to_string(),
            period_start,
            requests,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            limit: self.monthly_token_limit,
            remaining: self.monthly_token_limit.saturating_sub(total_tokens),
        })
    }
}

fn month_start(now: DateTimeWithTimeZone) -> DateTimeWithTimeZone {
    let utc = now.with_timezone(&Utc);
    Utc.with_ymd_and_hms(utc.year(), utc.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(utc)
        .fixed_offset()
}
