//! Removal of expired public sessions, their documents, and dead cookie
//! sessions.
//!
//! The job is sequential and not transactional. Storage objects are removed
//! before their rows. When removal fails the row is kept and the next run
//! retries it.
//!
//! Upload-ledger entries are not tied to expiry: they stay for a full day
//! after the upload so the rate limiter keeps counting them, and are pruned
//! afterwards.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as TimeDelta;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::entity::analysis_session::{self, Entity as SessionEntity};
use crate::entity::document_analysis::{self, Entity as AnalysisEntity};
use crate::entity::public_upload::{self, Entity as UploadEntity};
use crate::error::ServiceResult;
use crate::session_store::DbSessionStore;
use crate::storage::{ObjectStore, PUBLIC_DOCUMENTS_BUCKET};

/// Outcome of one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub analyses_deleted: u64,
    pub sessions_deleted: u64,
    pub objects_removed: u64,
    pub user_sessions_deleted: u64,
    pub uploads_pruned: u64,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CleanupJob {
    conn: DatabaseConnection,
    store: Arc<dyn ObjectStore>,
    user_sessions: Option<DbSessionStore>,
}

impl CleanupJob {
    pub fn new(conn: DatabaseConnection, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            conn,
            store,
            user_sessions: None,
        }
    }

    /// Also purge expired cookie sessions on every run.
    pub fn with_user_sessions(mut self, sessions: DbSessionStore) -> Self {
        self.user_sessions = Some(sessions);
        self
    }

    /// Deletes everything whose `expires_at` is at or before `now`.
    ///
    /// Database errors while *finding* work abort the run; errors on
    /// individual items are collected in the report.
    pub async fn run(&self, now: DateTimeWithTimeZone) -> ServiceResult<CleanupReport> {
        let mut report = CleanupReport::default();

        let expired_analyses = AnalysisEntity::find()
            .filter(document_analysis::Column::ExpiresAt.lte(now))
            .all(&self.conn)
            .await?;

        for analysis in expired_analyses {
            match self
                .store
                .remove(PUBLIC_DOCUMENTS_BUCKET, &[analysis.storage_path.clone()])
                .await
            {
                Ok(removed) => report.objects_removed += removed as u64,
                Err(e) => {
                    tracing::warn!(analysis_id = %analysis.id, error = %e, "failed to remove document");
                    report
                        .failures
                        .push(format!("analysis {}: {}", analysis.id, e));
                    continue;
                }
            }

            match AnalysisEntity::delete_by_id(analysis.id.clone())
                .exec(&self.conn)
                .await
            {
                Ok(result) => report.analyses_deleted += result.rows_affected,
                Err(e) => {
                    tracing::warn!(analysis_id = %analysis.id, error = %e, "failed to delete analysis row");
                    report
                        .failures
                        .push(format!("analysis {}: {}", analysis.id, e));
                }
            }
        }

        let expired_sessions = SessionEntity::find()
            .filter(analysis_session::Column::ExpiresAt.lte(now))
            .all(&self.conn)
            .await?;

        for session in expired_sessions {
            self.sweep_session(&session, now, &mut report).await;
        }

        match UploadEntity::delete_many()
            .filter(public_upload::Column::CreatedAt.lte(now - TimeDelta::days(1)))
            .exec(&self.conn)
            .await
        {
            Ok(result) => report.uploads_pruned = result.rows_affected,
            Err(e) => {
                tracing::warn!(error = %e, "failed to prune upload ledger");
                report.failures.push(format!("upload ledger: {e}"));
            }
        }

        if let Some(sessions) = &self.user_sessions {
            match sessions.purge_expired(now).await {
                Ok(deleted) => report.user_sessions_deleted = deleted,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to purge user sessions");
                    report.failures.push(format!("user sessions: {e}"));
                }
            }
        }

        tracing::info!(
            analyses = report.analyses_deleted,
            sessions = report.sessions_deleted,
            objects = report.objects_removed,
            user_sessions = report.user_sessions_deleted,
            uploads_pruned = report.uploads_pruned,
            failures = report.failures.len(),
            "cleanup finished"
        );
        Ok(report)
    }

    /// Removes the objects under one expired session's folder, then its row.
    ///
    /// `session` may be a stale snapshot. Objects are only looked up under
    /// the snapshot's id, and a renewed session always carries a new id, so a
    /// session renewed since the snapshot keeps its new documents. The row is
    /// deleted only while it still has that id and is still expired at `now`.
    pub async fn sweep_session(
        &self,
        session: &analysis_session::Model,
        now: DateTimeWithTimeZone,
        report: &mut CleanupReport,
    ) {
        if let Err(message) = self.purge_session_objects(session, report).await {
            tracing::warn!(session_id = %session.id, error = %message, "failed to remove session objects");
            report
                .failures
                .push(format!("session {}: {}", session.id, message));
            return;
        }

        match SessionEntity::delete_many()
            .filter(analysis_session::Column::Id.eq(session.id.as_str()))
            .filter(analysis_session::Column::ExpiresAt.lte(now))
            .exec(&self.conn)
            .await
        {
            Ok(result) => report.sessions_deleted += result.rows_affected,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "failed to delete session row");
                report
                    .failures
                    .push(format!("session {}: {}", session.id, e));
            }
        }
    }

    async fn purge_session_objects(
        &self,
        session: &analysis_session::Model,
        report: &mut CleanupReport,
    ) -> Result<(), String> {
        let paths = self
            .store
            .list(PUBLIC_DOCUMENTS_BUCKET, &session.id)
            .await
            .map_err(|e| e.to_string())?;
        if paths.is_empty() {
            return Ok(());
        }

        let removed = self
            .store
            .remove(PUBLIC_DOCUMENTS_BUCKET, &paths)
            .await
            .map_err(|e| e.to_string())?;
        report.objects_removed += removed as u64;
        Ok(())
    }
}

/// Runs `job` every `period` until the returned handle is aborted.
pub fn spawn_cleanup_task(job: CleanupJob, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let now = chrono::Utc::now().fixed_offset();
            if let Err(e) = job.run(now).await {
                tracing::error!(error = %e, "cleanup run aborted");
            }
        }
    })
}
