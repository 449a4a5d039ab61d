mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use common::setup_db;
use craftchat_service::config::PublicLimits;
use craftchat_service::http::{
    current_session_usage, get_template, rate_limit, router, AppState, RateLimitRequest,
    PUBLIC_SESSION_KEY,
};
use craftchat_service::rate_limit::RateLimitAction;
use craftchat_service::storage::MemoryObjectStore;
use craftchat_service::DbSessionStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower_sessions::Session;

async fn state() -> (sea_orm::DatabaseConnection, AppState) {
    let db = setup_db().await;
    let state = AppState::new(
        db.clone(),
        Arc::new(MemoryObjectStore::new()),
        PublicLimits::default(),
        1_000,
    );
    (db, state)
}

fn peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 51000)))
}

#[tokio::test]
async fn increment_remembers_session_in_cookie() {
    let (db, state) = state().await;
    let session = Session::new(None, Arc::new(DbSessionStore::new(db)), None);

    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));

    let Json(decision) = rate_limit(
        State(state.clone()),
        peer(),
        headers,
        session.clone(),
        Ok(Json(RateLimitRequest {
            action: RateLimitAction::Increment,
        })),
    )
    .await
    .unwrap();

    assert!(decision.allowed);
    let remembered: Option<String> = session.get(PUBLIC_SESSION_KEY).await.unwrap();
    assert_eq!(remembered, decision.session_id);

    let Json(usage) = current_session_usage(State(state), session).await.unwrap();
    assert!(usage.active);
    assert_eq!(Some(usage.session_id), decision.session_id);
    assert_eq!(usage.analyses, 0);
}

#[tokio::test]
async fn check_does_not_touch_the_cookie() {
    let (db, state) = state().await;
    let session = Session::new(None, Arc::new(DbSessionStore::new(db)), None);

    let Json(decision) = rate_limit(
        State(state.clone()),
        peer(),
        HeaderMap::new(),
        session.clone(),
        Ok(Json(RateLimitRequest {
            action: RateLimitAction::Check,
        })),
    )
    .await
    .unwrap();

    assert!(decision.allowed);
    assert_eq!(decision.session_id, None);
    let remembered: Option<String> = session.get(PUBLIC_SESSION_KEY).await.unwrap();
    assert_eq!(remembered, None);

    let err = current_session_usage(State(state), session)
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_template_maps_to_404() {
    let (_db, state) = state().await;

    let err = get_template(State(state), Path("missing".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
}

async fn send(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response.to_ascii_lowercase()
}

async fn serve() -> SocketAddr {
    let (db, state) = state().await;
    let app = router(state, DbSessionStore::new(db), time::Duration::hours(1));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[tokio::test]
async fn served_router_answers_preflight_and_renders_json_errors() {
    let addr = serve().await;

    let preflight = send(
        addr,
        "OPTIONS /functions/v1/public-rate-limiter HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert!(preflight.starts_with("http/1.1 204"));
    assert!(preflight.contains("access-control-allow-origin: *"));

    let missing = send(
        addr,
        "GET /rest/v1/templates/nope HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert!(missing.starts_with("http/1.1 404"));
    assert!(missing.contains("access-control-allow-origin: *"));
    assert!(missing.contains("\"error\""));

    let bad_body = send(
        addr,
        "POST /functions/v1/public-rate-limiter HTTP/1.1\r\nhost: localhost\r\ncontent-type: application/json\r\ncontent-length: 20\r\nconnection: close\r\n\r\n{\"action\":\"explode\"}",
    )
    .await;
    assert!(bad_body.starts_with("http/1.1 400"));
}

#[tokio::test]
async fn extractor_rejections_use_the_error_envelope() {
    let addr = serve().await;

    let bad_query = send(
        addr,
        "GET /rest/v1/templates?limit=lots HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert!(bad_query.starts_with("http/1.1 400"));
    assert!(bad_query.contains("content-type: application/json"));
    assert!(bad_query.contains("{\"error\":"));

    let no_route = send(
        addr,
        "GET /rest/v1/nothing-here HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert!(no_route.starts_with("http/1.1 404"));
    assert!(no_route.contains("{\"error\":\"not found\"}"));

    let wrong_method = send(
        addr,
        "GET /functions/v1/public-rate-limiter HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert!(wrong_method.starts_with("http/1.1 405"));
    assert!(wrong_method.contains("allow: post"));
    assert!(wrong_method.contains("{\"error\":"));
}
