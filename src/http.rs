//! HTTP surface.
//!
//! Function-style endpoints live under `/functions/v1`, table-style ones
//! under `/rest/v1`. Every response carries permissive CORS headers and
//! errors are rendered as `{"error": message}`.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::{to_bytes, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::json;
use tower_sessions::{Expiry, Session, SessionManagerLayer};

use crate::analysis::{PublicAnalysisService, SessionUsage, StatusUpdate};
use crate::cleanup::{CleanupJob, CleanupReport};
use crate::config::PublicLimits;
use crate::customization::{CustomizationService, GeneratedDocument, NewCustomization};
use crate::entity::{
    ai_usage_log, document_analysis, template, template_customization, template_version,
};
use crate::error::{ServiceError, ServiceResult};
use crate::rate_limit::{PublicRateLimiter, RateLimitAction, RateLimitDecision};
use crate::session_store::DbSessionStore;
use crate::storage::ObjectStore;
use crate::templates::{NewTemplate, TemplateCatalog, TemplateQuery};
use crate::usage::{NewUsage, UsageMeter, UsageSummary};

/// Cookie-session key remembering the caller's public analysis session.
pub const PUBLIC_SESSION_KEY: &str = "public_analysis_session_id";

const MAX_ERROR_BODY: usize = 16 * 1024;

const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type, x-file-name";

/// Services shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub limiter: PublicRateLimiter,
    pub analyses: PublicAnalysisService,
    pub cleanup: CleanupJob,
    pub templates: TemplateCatalog,
    pub customizations: CustomizationService,
    pub usage: UsageMeter,
}

impl AppState {
    pub fn new(
        conn: DatabaseConnection,
        store: Arc<dyn ObjectStore>,
        limits: PublicLimits,
        ai_monthly_token_limit: u64,
    ) -> Self {
        let limiter = PublicRateLimiter::new(conn.clone(), limits);
        let templates = TemplateCatalog::new(conn.clone());

        Self {
            analyses: PublicAnalysisService::new(conn.clone(), store.clone(), limiter.clone()),
            cleanup: CleanupJob::new(conn.clone(), store)
                .with_user_sessions(DbSessionStore::new(conn.clone())),
            customizations: CustomizationService::new(conn.clone(), templates.clone()),
            usage: UsageMeter::new(conn, ai_monthly_token_limit),
            limiter,
            templates,
        }
    }
}

pub fn router(state: AppState, sessions: DbSessionStore, session_ttl: time::Duration) -> Router {
    let upload_limit = usize::try_from(state.limiter.limits().max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(64 * 1024);

    let session_layer =
        SessionManagerLayer::new(sessions).with_expiry(Expiry::OnInactivity(session_ttl));

    Router::new()
        .route("/functions/v1/public-rate-limiter", post(rate_limit))
        .route("/functions/v1/public-analysis/session", get(current_session_usage))
        .route("/functions/v1/public-analysis/sessions/{id}", get(session_usage))
        .route(
            "/functions/v1/public-analysis/sessions/{id}/documents",
            post(upload_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/functions/v1/public-analysis/analyses/{id}", get(get_analysis))
        .route(
            "/functions/v1/public-analysis/analyses/{id}/status",
            post(update_analysis_status),
        )
        .route("/functions/v1/cleanup-expired", post(run_cleanup))
        .route("/rest/v1/templates", get(search_templates).post(create_template))
        .route("/rest/v1/templates/popular", get(popular_templates))
        .route("/rest/v1/templates/{id}", get(get_template))
        .route(
            "/rest/v1/templates/{id}/versions",
            get(list_versions).post(publish_version),
        )
        .route("/rest/v1/templates/{id}/ratings", post(rate_template))
        .route("/rest/v1/customizations", post(save_customization))
        .route("/rest/v1/customizations/{id}", post(update_customization))
        .route("/rest/v1/customizations/{id}/document", get(render_customization))
        .route("/rest/v1/ai-usage", post(record_usage))
        .route("/rest/v1/ai-usage/{user_id}", get(usage_summary))
        .with_state(state)
        .layer(middleware::from_fn(json_errors))
        .layer(session_layer)
        .layer(middleware::from_fn(cors))
}

async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    response
}

/// Rewrites error responses produced outside the handlers (extractor
/// rejections, body limits, unknown routes) into the `{"error": ...}` shape
/// that [`ServiceError`] responses already have.
async fn json_errors(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_json(&response) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let message = match to_bytes(body, MAX_ERROR_BODY).await {
        Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    tracing::debug!(status = %status, error = %message, "request rejected");

    let mut rewritten = (status, Json(json!({ "error": message }))).into_response();
    if let Some(allow) = parts.headers.get(header::ALLOW) {
        rewritten.headers_mut().insert(header::ALLOW, allow.clone());
    }
    rewritten
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

/// The caller's address: first `x-forwarded-for` hop, then `x-real-ip`,
/// then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim);
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim);

    forwarded
        .into_iter()
        .chain(real_ip)
        .find_map(|candidate| candidate.parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
        .to_string()
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
}

fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ServiceResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ServiceError::InvalidInput(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
pub struct RateLimitRequest {
    pub action: RateLimitAction,
}

pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    session: Session,
    body: Result<Json<RateLimitRequest>, JsonRejection>,
) -> ServiceResult<Json<RateLimitDecision>> {
    let request = json_body(body)?;
    let ip = client_ip(&headers, peer);

    let decision = state
        .limiter
        .evaluate(request.action, &ip, user_agent(&headers), now())
        .await?;

    if request.action == RateLimitAction::Increment {
        if let Some(session_id) = &decision.session_id {
            if let Err(e) = session.insert(PUBLIC_SESSION_KEY, session_id).await {
                tracing::warn!(error = %e, "failed to remember public session in cookie");
            }
        }
    }

    Ok(Json(decision))
}

pub async fn current_session_usage(
    State(state): State<AppState>,
    session: Session,
) -> ServiceResult<Json<SessionUsage>> {
    let session_id: String = session
        .get(PUBLIC_SESSION_KEY)
        .await?
        .ok_or_else(|| ServiceError::not_found("public analysis session", "(cookie)"))?;
    Ok(Json(state.analyses.usage(&session_id, now()).await?))
}

pub async fn session_usage(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ServiceResult<Json<SessionUsage>> {
    Ok(Json(state.analyses.usage(&session_id, now()).await?))
}

pub async fn upload_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ServiceResult<(StatusCode, Json<document_analysis::Model>)> {
    let file_name = headers
        .get("x-file-name")
        .and_then(|value| value.to_str().ok())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ServiceError::InvalidInput("x-file-name header is required".into()))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let analysis = state
        .analyses
        .upload(&session_id, file_name, content_type, &body, now())
        .await?;
    Ok((StatusCode::CREATED, Json(analysis)))
}

pub async fn get_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> ServiceResult<Json<document_analysis::Model>> {
    Ok(Json(state.analyses.get(&analysis_id).await?))
}

pub async fn update_analysis_status(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> ServiceResult<Json<document_analysis::Model>> {
    let update = json_body(body)?;
    Ok(Json(
        state.analyses.transition(&analysis_id, update, now()).await?,
    ))
}

pub async fn run_cleanup(State(state): State<AppState>) -> ServiceResult<Json<CleanupReport>> {
    Ok(Json(state.cleanup.run(now()).await?))
}

pub async fn search_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> ServiceResult<Json<Vec<template::Model>>> {
    Ok(Json(state.templates.search(&query).await?))
}

pub async fn create_template(
    State(state): State<AppState>,
    body: Result<Json<NewTemplate>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<template::Model>)> {
    let new = json_body(body)?;
    let created = state.templates.create(new, now()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct PopularQuery {
    pub limit: Option<u64>,
}

pub async fn popular_templates(
    State(state): State<AppState>,
    Query(query): Query<PopularQuery>,
) -> ServiceResult<Json<Vec<template::Model>>> {
    Ok(Json(
        state.templates.popular(query.limit.unwrap_or(10)).await?,
    ))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> ServiceResult<Json<template::Model>> {
    Ok(Json(state.templates.get(&template_id).await?))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> ServiceResult<Json<Vec<template_version::Model>>> {
    Ok(Json(state.templates.versions(&template_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PublishVersionRequest {
    pub content: String,
    pub changelog: Option<String>,
}

pub async fn publish_version(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    body: Result<Json<PublishVersionRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<template_version::Model>)> {
    let request = json_body(body)?;
    let version = state
        .templates
        .publish_version(&template_id, request.content, request.changelog, now())
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub rating: u8,
}

pub async fn rate_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    body: Result<Json<RateRequest>, JsonRejection>,
) -> ServiceResult<Json<template::Model>> {
    let request = json_body(body)?;
    Ok(Json(state.templates.rate(&template_id, request.rating).await?))
}

pub async fn save_customization(
    State(state): State<AppState>,
    body: Result<Json<NewCustomization>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<template_customization::Model>)> {
    let new = json_body(body)?;
    let saved = state.customizations.save(new, now()).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCustomizationRequest {
    pub values: BTreeMap<String, String>,
}

pub async fn update_customization(
    State(state): State<AppState>,
    Path(customization_id): Path<String>,
    body: Result<Json<UpdateCustomizationRequest>, JsonRejection>,
) -> ServiceResult<Json<template_customization::Model>> {
    let request = json_body(body)?;
    Ok(Json(
        state
            .customizations
            .update_values(&customization_id, request.values, now())
            .await?,
    ))
}

pub async fn render_customization(
    State(state): State<AppState>,
    Path(customization_id): Path<String>,
) -> ServiceResult<Json<GeneratedDocument>> {
    Ok(Json(state.customizations.render(&customization_id).await?))
}

pub async fn record_usage(
    State(state): State<AppState>,
    body: Result<Json<NewUsage>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<ai_usage_log::Model>)> {
    let usage = json_body(body)?;
    let recorded = state.usage.record(usage, now()).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

pub async fn usage_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ServiceResult<Json<UsageSummary>> {
    Ok(Json(state.usage.monthly_summary(&user_id, now()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 9], 51000))
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn real_ip_is_used_when_forwarded_for_is_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("unknown"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, peer()), "198.51.100.2");
    }

    #[test]
    fn peer_is_the_fallback() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "10.0.0.9");
    }
}
