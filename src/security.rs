//! Security event log.

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;

use crate::entity::security_event::{self, ActiveModel as EventActiveModel, Entity as EventEntity};
use crate::error::ServiceResult;

/// Event recorded when an `increment` is denied by the public rate limiter.
pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
/// Event recorded when an upload breaks a size or quota limit.
pub const UPLOAD_REJECTED: &str = "upload_rejected";

/// Append-only writer for the `security_events` table.
///
/// # Examples
///
/// ```no_run
/// use craftchat_service::security::{SecurityEventLog, RATE_LIMIT_EXCEEDED};
///
/// # async fn example(conn: sea_orm::DatabaseConnection) -> Result<(), Box<dyn std::error::Error>> {
/// let log = SecurityEventLog::new(conn);
/// let now = chrono::Utc::now().fixed_offset();
///
/// log.record(RATE_LIMIT_EXCEEDED, Some("203.0.113.7"), Some("curl/8"), None, now)
///     .await?;
/// let recent = log.recent_for_ip("203.0.113.7", 10).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SecurityEventLog {
    conn: DatabaseConnection,
}

impl SecurityEventLog {
    /// Creates a log writing through `conn`.
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Stores one event and emits it as a `warn` log line.
    pub async fn record(
        &self,
        event_type: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        details: Option<Value>,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<security_event::Model> {
        let event = EventActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            event_type: Set(event_type.to_string()),
            ip_address: Set(ip_address.map(str::to_string)),
            user_agent: Set(user_agent.map(str::to_string)),
            details: Set(details),
            created_at: Set(now),
        }
        .insert(&self.conn)
        .await?;

        tracing::warn!(event_type, ip = ?ip_address, "security event recorded");
        Ok(event)
    }

    /// Newest events for an address, most recent first.
    pub async fn recent_for_ip(
        &self,
        ip_address: &str,
        limit: u64,
    ) -> ServiceResult<Vec<security_event::Model>> {
        Ok(EventEntity::find()
            .filter(security_event::Column::IpAddress.eq(ip_address))
            .order_by_desc(security_event::Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await?)
    }
}
