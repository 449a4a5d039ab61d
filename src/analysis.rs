//! Anonymous document upload and analysis bookkeeping.
//!
//! A document is accepted into a public session only while the session is
//! live, the caller's address still has rate-limit quota, and the session's
//! storage quota has room for it. The analysis itself runs elsewhere and
//! reports back through [`PublicAnalysisService::transition`].

use std::sync::Arc;

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::entity::analysis_session::{self, Entity as SessionEntity};
use crate::entity::document_analysis::{
    self, ActiveModel as AnalysisActiveModel, AnalysisStatus, Entity as AnalysisEntity,
};
use crate::entity::public_upload::ActiveModel as UploadActiveModel;
use crate::error::{ServiceError, ServiceResult};
use crate::rate_limit::PublicRateLimiter;
use crate::security::{SecurityEventLog, UPLOAD_REJECTED};
use crate::storage::{ObjectStore, PUBLIC_DOCUMENTS_BUCKET};

const MAX_FILE_NAME_LEN: usize = 100;

/// A status change reported by the analysis worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusUpdate {
    Processing,
    Completed { result: Value },
    Failed { error: String },
}

impl StatusUpdate {
    pub fn target(&self) -> AnalysisStatus {
        match self {
            StatusUpdate::Processing => AnalysisStatus::Processing,
            StatusUpdate::Completed { .. } => AnalysisStatus::Completed,
            StatusUpdate::Failed { .. } => AnalysisStatus::Failed,
        }
    }
}

/// Storage and analysis counts of one public session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUsage {
    pub session_id: String,
    pub active: bool,
    pub analyses: u64,
    pub bytes_used: u64,
    pub bytes_remaining: u64,
    pub expires_at: DateTimeWithTimeZone,
}

/// Accepts anonymous uploads and tracks their analysis.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use craftchat_service::analysis::{PublicAnalysisService, StatusUpdate};
/// use craftchat_service::config::PublicLimits;
/// use craftchat_service::rate_limit::PublicRateLimiter;
/// use craftchat_service::storage::FsObjectStore;
///
/// # async fn example(conn: sea_orm::DatabaseConnection) -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = PublicRateLimiter::new(conn.clone(), PublicLimits::default());
/// let service = PublicAnalysisService::new(
///     conn,
///     Arc::new(FsObjectStore::new("./storage")),
///     limiter.clone(),
/// );
/// let now = chrono::Utc::now().fixed_offset();
///
/// let decision = limiter.increment("203.0.113.7", None, now).await?;
/// if let Some(session_id) = decision.session_id {
///     let analysis = service
///         .upload(&session_id, "lease.pdf", Some("application/pdf"), b"%PDF-1.7", now)
///         .await?;
///     service.transition(&analysis.id, StatusUpdate::Processing, now).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PublicAnalysisService {
    conn: DatabaseConnection,
    store: Arc<dyn ObjectStore>,
    limiter: PublicRateLimiter,
    events: SecurityEventLog,
}

impl PublicAnalysisService {
    pub fn new(
        conn: DatabaseConnection,
        store: Arc<dyn ObjectStore>,
        limiter: PublicRateLimiter,
    ) -> Self {
        Self {
            events: SecurityEventLog::new(conn.clone()),
            conn,
            store,
            limiter,
        }
    }

    /// Stores a document and registers a `pending` analysis for it.
    pub async fn upload(
        &self,
        session_id: &str,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<document_analysis::Model> {
        let session = self.find_session(session_id).await?;
        if session.expires_at <= now {
            return Err(ServiceError::SessionExpired(session.id));
        }
        if bytes.is_empty() {
            return Err(ServiceError::InvalidInput("document is empty".into()));
        }

        let limits = *self.limiter.limits();
        let size = bytes.len() as u64;
        if size > limits.max_file_bytes {
            self.note_rejection(&session, "file_too_large", size, now).await;
            return Err(ServiceError::FileTooLarge {
                size,
                limit: limits.max_file_bytes,
            });
        }

        let remaining = self.limiter.remaining(&session.ip_address, now).await?;
        if remaining.hourly == 0 || remaining.daily == 0 {
            return Err(ServiceError::RateLimited);
        }

        let used = self.bytes_used(&session.id, now).await?;
        if used + size > limits.session_quota_bytes {
            self.note_rejection(&session, "quota_exceeded", size, now).await;
            return Err(ServiceError::QuotaExceeded {
                used,
                requested: size,
                limit: limits.session_quota_bytes,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let storage_path = format!("{}/{}-{}", session.id, id, sanitize_file_name(file_name));
        self.store
            .put(PUBLIC_DOCUMENTS_BUCKET, &storage_path, bytes, content_type)
            .await?;

        let row = self
            .register(AnalysisActiveModel {
                id: Set(id),
                session_id: Set(session.id.clone()),
                ip_address: Set(session.ip_address.clone()),
                file_name: Set(file_name.to_string()),
                content_type: Set(content_type.map(str::to_string)),
                file_size: Set(bytes.len() as i64),
                storage_path: Set(storage_path.clone()),
                status: Set(AnalysisStatus::Pending),
                result: Set(None),
                error_message: Set(None),
                created_at: Set(now),
                completed_at: Set(None),
                expires_at: Set(session.expires_at),
            })
            .await;

        match row {
            Ok(analysis) => {
                tracing::info!(
                    analysis_id = %analysis.id,
                    session_id = %session.id,
                    size,
                    "document accepted for analysis"
                );
                Ok(analysis)
            }
            Err(e) => {
                if let Err(cleanup) = self
                    .store
                    .remove(PUBLIC_DOCUMENTS_BUCKET, &[storage_path])
                    .await
                {
                    tracing::warn!(error = %cleanup, "failed to remove object after insert error");
                }
                Err(e.into())
            }
        }
    }

    /// Fetches one analysis by id.
    pub async fn get(&self, analysis_id: &str) -> ServiceResult<document_analysis::Model> {
        AnalysisEntity::find_by_id(analysis_id.to_string())
            .one(&self.conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("analysis", analysis_id))
    }

    /// Applies a status change if the current status permits it.
    ///
    /// The update is conditional on the status read beforehand, so of two
    /// racing workers only one wins; the other gets `InvalidTransition`.
    pub async fn transition(
        &self,
        analysis_id: &str,
        update: StatusUpdate,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<document_analysis::Model> {
        let current = self.get(analysis_id).await?;
        let target = update.target();
        if !current.status.can_become(target) {
            return Err(ServiceError::InvalidTransition {
                from: current.status,
                to: target,
            });
        }

        let mut query = AnalysisEntity::update_many()
            .col_expr(document_analysis::Column::Status, Expr::value(target.as_str()));
        match update {
            StatusUpdate::Processing => {}
            StatusUpdate::Completed { result } => {
                query = query
                    .col_expr(document_analysis::Column::Result, Expr::value(result))
                    .col_expr(document_analysis::Column::CompletedAt, Expr::value(now));
            }
            StatusUpdate::Failed { error } => {
                query = query
                    .col_expr(document_analysis::Column::ErrorMessage, Expr::value(error))
                    .col_expr(document_analysis::Column::CompletedAt, Expr::value(now));
            }
        }

        let updated = query
            .filter(document_analysis::Column::Id.eq(analysis_id))
            .filter(document_analysis::Column::Status.eq(current.status.as_str()))
            .exec(&self.conn)
            .await?;

        let latest = self.get(analysis_id).await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::InvalidTransition {
                from: latest.status,
                to: target,
            });
        }

        tracing::debug!(analysis_id, status = %target, "analysis status changed");
        Ok(latest)
    }

    /// Live analyses and bytes held by a session at `now`. Expired sessions
    /// still report, with `active: false`.
    pub async fn usage(
        &self,
        session_id: &str,
        now: DateTimeWithTimeZone,
    ) -> ServiceResult<SessionUsage> {
        let session = self.find_session(session_id).await?;
        let bytes_used = self.bytes_used(&session.id, now).await?;
        let analyses = AnalysisEntity::find()
            .filter(document_analysis::Column::SessionId.eq(session.id.as_str()))
            .filter(document_analysis::Column::ExpiresAt.gt(now))
            .count(&self.conn)
            .await?;

        Ok(SessionUsage {
            active: session.expires_at > now,
            analyses,
            bytes_used,
            bytes_remaining: self
                .limiter
                .limits()
                .session_quota_bytes
                .saturating_sub(bytes_used),
            expires_at: session.expires_at,
            session_id: session.id,
        })
    }

    /// Inserts the analysis row and its upload-ledger entry together.
    async fn register(
        &self,
        analysis: AnalysisActiveModel,
    ) -> Result<document_analysis::Model, DbErr> {
        let txn = self.conn.begin().await?;
        let analysis = analysis.insert(&txn).await?;
        UploadActiveModel {
            id: Set(analysis.id.clone()),
            ip_address: Set(analysis.ip_address.clone()),
            session_id: Set(analysis.session_id.clone()),
            file_size: Set(analysis.file_size),
            created_at: Set(analysis.created_at),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(analysis)
    }

    async fn find_session(&self, session_id: &str) -> ServiceResult<analysis_session::Model> {
        SessionEntity::find_by_id(session_id.to_string())
            .one(&self.conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("public analysis session", session_id))
    }

    async fn bytes_used(&self, session_id: &str, now: DateTimeWithTimeZone) -> ServiceResult<u64> {
        let sizes: Vec<i64> = AnalysisEntity::find()
            .select_only()
            .column(document_analysis::Column::FileSize)
            .filter(document_analysis::Column::SessionId.eq(session_id))
            .filter(document_analysis::Column::ExpiresAt.gt(now))
            .into_tuple()
            .all(&self.conn)
            .await?;

        Ok(sizes.into_iter().map(|size| size.max(0) as u64).sum())
    }

    async fn note_rejection(
        &self,
        session: &analysis_session::Model,
        reason: &str,
        size: u64,
        now: DateTimeWithTimeZone,
    ) {
        let details = json!({ "reason": reason, "size": size, "session_id": session.id });
        if let Err(e) = self
            .events
            .record(
                UPLOAD_REJECTED,
                Some(&session.ip_address),
                session.user_agent.as_deref(),
                Some(details),
                now,
            )
            .await
        {
            tracing::warn!(error = %e, "failed to record upload rejection");
        }
    }
}

/// Reduces a client-supplied file name to a safe single path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        return "document".to_string();
    }
    cleaned.chars().take(MAX_FILE_NAME_LEN).collect()
}
