//! Per-IP rate limiting for anonymous document analysis.
//!
//! Usage is derived from the upload ledger (`public_analysis_uploads`): the
//! number of uploads an address made in the trailing hour and the trailing
//! day is compared against the configured limits. Ledger rows outlive the
//! sessions and analyses they belong to, so expiring a session does not hand
//! its address a fresh quota.

use chrono::Duration;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::PublicLimits;
use crate::entity::analysis_session::{
    self, ActiveModel as SessionActiveModel, Entity as SessionEntity,
};
use crate::entity::public_upload::{self, Entity as UploadEntity};
use crate::error::{ServiceError, ServiceResult};
use crate::security::{SecurityEventLog, RATE_LIMIT_EXCEEDED};

/// What the caller asks the limiter to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitAction {
    /// Report the quota without side effects.
    Check,
    /// Report the quota and, when allowed, open a session.
    Increment,
}

/// A pair of hourly and daily analysis counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub hourly: u64,
    pub daily: u64,
}

/// Answer to a `check` or `increment`, serialized as the endpoint's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: Quota,
    pub limits: Quota,
    pub session_id: Option<String>,
    pub session_expires_at: Option<DateTimeWithTimeZone>,
}

/// Hourly and daily upload limits per client address.
///
/// # Examples
///
/// ```no_run
/// use craftchat_service::config::PublicLimits;
/// use craftchat_service::rate_limit::{PublicRateLimiter, RateLimitAction};
///
/// # async fn example(conn: sea_orm::DatabaseConnection) -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = PublicRateLimiter::new(conn, PublicLimits::default());
/// let now = chrono::Utc::now().fixed_offset();
///
/// let decision = limiter
///     .evaluate(RateLimitAction::Check, "203.0.113.7", None, now)
///     .await?;
/// println!("{} uploads left this hour", decision.remaining.hourly);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PublicRateLimiter {
    conn: DatabaseConnection,
    limits: PublicLimits,
    events: SecurityEventLog,
}

impl PublicRateLimiter {
    /// Creates a limiter enforcing `limits`; denied increments are written
    /// to the security event log on the same connection.
    pub fn new(conn: DatabaseConnection, limits: PublicLimits) -> Self {
        Self {
            events: SecurityEventLog::new(conn.clone()),
            conn,
            limits,
        }
    }

    /// The limits this limiter enforces. Upload handling reads size and
    /// quota limits from here too.
    pub fn limits(&self) -> &PublicLimits {
        &self.limits
    }

    /// Dispatches to [`check`](Self::check) or [`increment`](Self::increment).
    pub async fn evaluate(
        &self,
        action: RateLimitAction,
        ip_address: &str,
        user_agent: Option<&str>,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<RateLimitDecision> {
        match action {
            RateLimitAction::Check => self.check(ip_address, now).await,
            RateLimitAction::Increment => self.increment(ip_address, user_agent, now).await,
        }
    }

    /// Reports the remaining quota and any active session. Never writes.
    pub async fn check(
        &self,
        ip_address: &str,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<RateLimitDecision> {
        let remaining = self.remaining(ip_address, now).await?;
        let session = self.active_session(ip_address, now).await?;
        Ok(self.decision(remaining, session))
    }

    /// Like [`check`](Self::check), but opens (or renews) the address's
    /// session when the quota allows it.
    ///
    /// Concurrent calls for one address converge on a single session row: the
    /// insert ignores conflicts on the unique `ip_address` and renewal only
    /// touches rows that are already expired.
    pub async fn increment(
        &self,
        ip_address: &str,
        user_agent: Option<&str>,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<RateLimitDecision> {
        let remaining = self.remaining(ip_address, now).await?;

        if !is_allowed(remaining) {
            let details = json!({
                "hourly_limit": self.limits.hourly,
                "daily_limit": self.limits.daily,
                "remaining": remaining,
            });
            if let Err(e) = self
                .events
                .record(RATE_LIMIT_EXCEEDED, Some(ip_address), user_agent, Some(details), now)
                .await
            {
                tracing::warn!(error = %e, ip = ip_address, "failed to record rate limit event");
            }

            let session = self.active_session(ip_address, now).await?;
            return Ok(self.decision(remaining, session));
        }

        let session = self.ensure_session(ip_address, user_agent, now).await?;
        Ok(self.decision(remaining, Some(session)))
    }

    /// Quota left for an address at `now`.
    pub async fn remaining(
        &self,
        ip_address: &str,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<Quota> {
        let hourly = self.count_since(ip_address, now - Duration::hours(1)).await?;
        let daily = self.count_since(ip_address, now - Duration::days(1)).await?;

        Ok(Quota {
            hourly: self.limits.hourly.saturating_sub(hourly),
            daily: self.limits.daily.saturating_sub(daily),
        })
    }

    /// The address's session, if one exists and has not expired at `now`.
    pub async fn active_session(
        &self,
        ip_address: &str,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<Option<analysis_session::Model>> {
        Ok(SessionEntity::find()
            .filter(analysis_session::Column::IpAddress.eq(ip_address))
            .filter(analysis_session::Column::ExpiresAt.gt(now))
            .one(&self.conn)
            .await?)
    }

    async fn count_since(&self, ip_address: &str, since: DateTimeWithTimeZone) -> ServiceResult<u64> {
        Ok(UploadEntity::find()
            .filter(public_upload::Column::IpAddress.eq(ip_address))
            .filter(public_upload::Column::CreatedAt.gt(since))
            .count(&self.conn)
            .await?)
    }

    async fn ensure_session(
        &self,
        ip_address: &str,
        user_agent: Option<&str>,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<analysis_session::Model> {
        let expires_at = now
            .checked_add_signed(self.limits.session_ttl)
            .ok_or_else(|| ServiceError::InvalidInput("session lifetime is out of range".into()))?;
        let candidate = SessionActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            ip_address: Set(ip_address.to_string()),
            user_agent: Set(user_agent.map(str::to_string)),
            created_at: Set(now),
            expires_at: Set(expires_at),
        };

        let inserted = SessionEntity::insert(candidate)
            .on_conflict(
                OnConflict::column(analysis_session::Column::IpAddress)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        if inserted == 0 {
            // A renewed session gets a new id and with it a new storage
            // folder; cleanup may still be sweeping the old one.
            let renewed = SessionEntity::update_many()
                .col_expr(
                    analysis_session::Column::Id,
                    Expr::value(uuid::Uuid::new_v4().to_string()),
                )
                .col_expr(analysis_session::Column::CreatedAt, Expr::value(now))
                .col_expr(analysis_session::Column::ExpiresAt, Expr::value(expires_at))
                .col_expr(
                    analysis_session::Column::UserAgent,
                    Expr::value(user_agent.map(str::to_string)),
                )
                .filter(analysis_session::Column::IpAddress.eq(ip_address))
                .filter(analysis_session::Column::ExpiresAt.lte(now))
                .exec(&self.conn)
                .await?;
            if renewed.rows_affected > 0 {
                tracing::info!(ip = ip_address, "renewed expired public analysis session");
            }
        } else {
            tracing::info!(ip = ip_address, "opened public analysis session");
        }

        SessionEntity::find()
            .filter(analysis_session::Column::IpAddress.eq(ip_address))
            .one(&self.conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("public analysis session for", ip_address))
    }

    fn decision(
        &self,
        remaining: Quota,
        session: Option<analysis_session::Model>,
    ) -> RateLimitDecision {
        RateLimitDecision {
            allowed: is_allowed(remaining),
            remaining,
            limits: Quota {
                hourly: self.limits.hourly,
                daily: self.limits.daily,
            },
            session_expires_at: session.as_ref().map(|s| s.expires_at),
            session_id: session.map(|s| s.id),
        }
    }
}

fn is_allowed(remaining: Quota) -> bool {
    remaining.hourly > 0 && remaining.daily > 0
}
