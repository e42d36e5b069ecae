//! HTTP control surface.
//!
//! JSON endpoints over the control operations and the state snapshot, for
//! the operator UI and any external consumer of session records. Thin:
//! every handler delegates straight to [`EngineHandle`].

use crate::control::EngineHandle;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

pub fn create_router(handle: Arc<EngineHandle>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/keepalive", get(keepalive))
        .route("/api/state", get(state))
        .route("/api/engine/start", post(start))
        .route("/api/engine/stop", post(stop))
        .route("/api/engine/dry-run", post(toggle_dry_run))
        .route("/api/engine/window", post(set_window))
        .route("/api/engine/point-value", post(set_point_value))
        .route("/api/engine/countries", post(set_countries))
        .route("/api/engine/spread-control", post(toggle_spread_control))
        .route("/api/engine/jofs", post(toggle_jofs))
        .route("/api/engine/reset-bets", post(reset_bets))
        .route("/api/engine/reload", post(reload))
        .route("/api/sessions", get(sessions))
        .route("/api/sessions/:session_id", get(session_detail))
        .route("/api/markets/:market_id/depth", get(market_depth))
        .route("/api/keys", get(list_keys).post(generate_key))
        .route("/api/keys/:key_id", delete(revoke_key))
        .with_state(handle)
}

/// Serve the router until the process exits.
pub async fn start_api(handle: Arc<EngineHandle>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "control api listening");
    axum::serve(listener, create_router(handle)).await?;
    Ok(())
}

async fn health(State(handle): State<Arc<EngineHandle>>) -> Json<serde_json::Value> {
    let snapshot = handle.state().await;
    Json(serde_json::json!({ "status": "ok", "engine": snapshot.status }))
}

async fn keepalive(State(handle): State<Arc<EngineHandle>>) -> Json<serde_json::Value> {
    let snapshot = handle.state().await;
    Json(serde_json::json!({
        "status": "ok",
        "engine": snapshot.status,
        "authenticated": handle.is_authenticated().await,
        "dry_run": snapshot.dry_run,
        "markets": snapshot.trackers_summary.total,
        "bets_today": snapshot.summary.total_bets,
    }))
}

async fn state(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    Json(handle.state().await)
}

async fn start(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    let resp = handle.start().await;
    let code = if resp.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (code, Json(resp))
}

async fn stop(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    Json(handle.stop().await)
}

async fn toggle_dry_run(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    Json(handle.toggle_dry_run().await)
}

#[derive(Deserialize)]
struct WindowRequest {
    minutes: u32,
}

async fn set_window(
    State(handle): State<Arc<EngineHandle>>,
    Json(req): Json<WindowRequest>,
) -> impl IntoResponse {
    respond(handle.set_process_window(req.minutes).await)
}

#[derive(Deserialize)]
struct PointValueRequest {
    value: Decimal,
}

async fn set_point_value(
    State(handle): State<Arc<EngineHandle>>,
    Json(req): Json<PointValueRequest>,
) -> impl IntoResponse {
    respond(handle.set_point_value(req.value).await)
}

#[derive(Deserialize)]
struct CountriesRequest {
    countries: Vec<String>,
}

async fn set_countries(
    State(handle): State<Arc<EngineHandle>>,
    Json(req): Json<CountriesRequest>,
) -> impl IntoResponse {
    respond(handle.set_countries(req.countries).await)
}

async fn toggle_spread_control(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    Json(handle.toggle_spread_control().await)
}

async fn toggle_jofs(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    Json(handle.toggle_jofs().await)
}

async fn reset_bets(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    Json(handle.reset_bets().await)
}

async fn reload(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    respond(handle.reload().await)
}

async fn sessions(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    Json(serde_json::json!({ "sessions": handle.sessions().await }))
}

async fn session_detail(
    State(handle): State<Arc<EngineHandle>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match handle.session_detail(&session_id).await {
        Some(detail) => (StatusCode::OK, Json(serde_json::to_value(detail).unwrap_or_default())),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "message": "session not found" })),
        ),
    }
}

async fn market_depth(
    State(handle): State<Arc<EngineHandle>>,
    Path(market_id): Path<String>,
) -> impl IntoResponse {
    match handle.feed().get_book_full(&market_id).await {
        Ok(book) => (
            StatusCode::OK,
            Json(serde_json::to_value(book).unwrap_or_default()),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "status": "error", "message": e.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
struct KeyRequest {
    #[serde(default)]
    label: String,
}

async fn generate_key(
    State(handle): State<Arc<EngineHandle>>,
    Json(req): Json<KeyRequest>,
) -> impl IntoResponse {
    // The full key is returned exactly once, at creation.
    Json(handle.generate_api_key(&req.label).await)
}

async fn list_keys(State(handle): State<Arc<EngineHandle>>) -> impl IntoResponse {
    Json(serde_json::json!({ "keys": handle.list_api_keys().await }))
}

async fn revoke_key(
    State(handle): State<Arc<EngineHandle>>,
    Path(key_id): Path<String>,
) -> impl IntoResponse {
    respond(handle.revoke_api_key(&key_id).await)
}

fn respond(resp: crate::control::OpResponse) -> impl IntoResponse {
    let code = if resp.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (code, Json(resp))
}
