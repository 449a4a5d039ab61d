#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use craftchat_service::entity::analysis_session;
use craftchat_service::entity::document_analysis::{self, AnalysisStatus};
use craftchat_service::entity::public_upload;
use craftchat_service::migration::{Migrator, MigratorTrait};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

/// Fresh in-memory database with every migration applied.
///
/// A single pooled connection keeps all queries on the same in-memory file.
pub async fn setup_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(opt).await.expect("connect to sqlite");
    Migrator::up(&db, None).await.expect("apply migrations");
    db
}

/// File-backed database served by a pool of `connections`, so concurrent
/// queries really run on separate connections.
pub async fn setup_file_db(dir: &std::path::Path, connections: u32) -> DatabaseConnection {
    let url = format!("sqlite://{}?mode=rwc", dir.join("craftchat.db").display());
    let mut opt = ConnectOptions::new(url);
    opt.max_connections(connections)
        .min_connections(connections)
        .sqlx_logging(false);

    let db = Database::connect(opt).await.expect("connect to sqlite file");
    Migrator::up(&db, None).await.expect("apply migrations");
    db
}

/// Fixed reference instant used instead of the wall clock.
pub fn base_time() -> DateTimeWithTimeZone {
    Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0)
        .unwrap()
        .fixed_offset()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

pub async fn seed_session(
    db: &DatabaseConnection,
    id: &str,
    ip: &str,
    created_at: DateTimeWithTimeZone,
    expires_at: DateTimeWithTimeZone,
) -> analysis_session::Model {
    analysis_session::ActiveModel {
        id: Set(id.to_string()),
        ip_address: Set(ip.to_string()),
        user_agent: Set(Some("test-agent".to_string())),
        created_at: Set(created_at),
        expires_at: Set(expires_at),
    }
    .insert(db)
    .await
    .expect("insert session")
}

/// Inserts an analysis row together with its upload-ledger entry, as an
/// accepted upload would.
pub async fn seed_analysis(
    db: &DatabaseConnection,
    id: &str,
    session: &analysis_session::Model,
    created_at: DateTimeWithTimeZone,
    expires_at: DateTimeWithTimeZone,
    size: i64,
) -> document_analysis::Model {
    let analysis = document_analysis::ActiveModel {
        id: Set(id.to_string()),
        session_id: Set(session.id.clone()),
        ip_address: Set(session.ip_address.clone()),
        file_name: Set(format!("{id}.pdf")),
        content_type: Set(Some("application/pdf".to_string())),
        file_size: Set(size),
        storage_path: Set(format!("{}/{id}-{id}.pdf", session.id)),
        status: Set(AnalysisStatus::Completed),
        result: Set(None),
        error_message: Set(None),
        created_at: Set(created_at),
        completed_at: Set(None),
        expires_at: Set(expires_at),
    }
    .insert(db)
    .await
    .expect("insert analysis");

    seed_upload(db, id, &session.ip_address, &session.id, created_at, size).await;
    analysis
}

/// Inserts only an upload-ledger entry.
pub async fn seed_upload(
    db: &DatabaseConnection,
    id: &str,
    ip: &str,
    session_id: &str,
    created_at: DateTimeWithTimeZone,
    size: i64,
) -> public_upload::Model {
    public_upload::ActiveModel {
        id: Set(id.to_string()),
        ip_address: Set(ip.to_string()),
        session_id: Set(session_id.to_string()),
        file_size: Set(size),
        created_at: Set(created_at),
    }
    .insert(db)
    .await
    .expect("insert upload")
}
