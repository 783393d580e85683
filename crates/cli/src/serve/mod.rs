//! `capa serve` -- HTTP JSON API for the corrective action workflow.
//!
//! Exposes the lifecycle engine as an async HTTP service using `axum` +
//! `tokio`. Supports concurrent request handling; every mutation is one
//! version-validated compare-and-swap in the engine, so concurrent writers
//! resolve to exactly one winner and one 409.
//!
//! Security features:
//! - CORS headers on all responses (permissive for local dev)
//! - Per-IP rate limiting (default: 60 req/min, CAPA_RATE_LIMIT)
//! - Optional API key authentication via CAPA_API_KEY env var
//!
//! Endpoints:
//! - GET   /health                       - Server status (exempt from auth)
//! - POST  /actions                      - Create a corrective action
//! - GET   /actions                      - List (assignee/incident/status filters)
//! - GET   /actions/{id}                 - Fetch one action
//! - PATCH /actions/{id}                 - Edit description/priority/due date/assignee
//! - POST  /actions/{id}/start           - pending -> in_progress
//! - POST  /actions/{id}/complete        - in_progress -> completed
//! - POST  /actions/{id}/verify          - completed -> verified (+ optional incident close)
//! - POST  /actions/{id}/reject          - completed -> in_progress
//! - POST  /actions/{id}/evidence        - Attach evidence files (multipart)
//! - GET   /actions/{id}/evidence        - List evidence
//! - GET   /actions/{id}/history         - Domain-event audit trail
//!
//! All JSON endpoints respond Content-Type: application/json. Every
//! /actions route requires X-Actor-Id / X-Actor-Role actor headers, reads
//! included; mutating endpoints (except create and evidence upload)
//! additionally require an `If-Match` version token.

mod handlers;
mod middleware;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use capa_engine::{LifecycleEngine, NullSink, StaticIncidentClient};
use capa_storage::MemoryStore;

use self::handlers::{
    handle_add_evidence, handle_complete, handle_create, handle_edit, handle_get, handle_health,
    handle_history, handle_list, handle_list_evidence, handle_not_found, handle_reject,
    handle_start, handle_verify,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};
use crate::incident::{HttpIncidentClient, IncidentBackend};

/// Maximum request body size: 32 MB, leaving room for a batch of evidence
/// files under the per-file 10 MiB cap plus multipart framing.
const MAX_BODY_SIZE: usize = 32 * 1024 * 1024;

/// Default rate limit: 60 requests per minute per IP.
const DEFAULT_RATE_LIMIT: u64 = 60;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Construct a JSON error response with the given status, error kind, and
/// message. Kinds mirror `WorkflowError::kind` where one applies.
fn json_error(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({"error": {"kind": kind, "message": message}})),
    )
        .into_response()
}

/// Start the HTTP server on the given port.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
///
/// Security:
/// - CORS: Permissive (`Any` origin) for local dev; tighten for production.
/// - Rate limit: Per-IP, CAPA_RATE_LIMIT env var (default 60 req/min).
/// - API key: If CAPA_API_KEY is set, all endpoints except /health require auth.
pub async fn start_server(
    port: u16,
    incident_url: Option<String>,
    _tls_cert: Option<PathBuf>,
    _tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let incidents = match incident_url {
        Some(url) => {
            eprintln!("Incident service: {}", url);
            IncidentBackend::Http(HttpIncidentClient::new(url))
        }
        None => {
            eprintln!("Incident service: none configured, accepting any incident id");
            IncidentBackend::Permissive(StaticIncidentClient::permissive())
        }
    };

    let engine = LifecycleEngine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(incidents),
        Arc::new(NullSink),
    );

    // Rate limit: from CAPA_RATE_LIMIT env var, or default
    let rate_limit = std::env::var("CAPA_RATE_LIMIT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT);

    // API key: from CAPA_API_KEY env var (None = no auth)
    let api_key = std::env::var("CAPA_API_KEY").ok().filter(|k| !k.is_empty());

    if api_key.is_some() {
        eprintln!("API key authentication enabled");
    }
    eprintln!("Rate limit: {} requests per minute per IP", rate_limit);

    let state = Arc::new(AppState {
        engine,
        rate_limiter: RateLimiter::new(rate_limit),
        api_key,
    });

    // CORS: permissive for local dev
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/actions", post(handle_create).get(handle_list))
        .route("/actions/{id}", get(handle_get).patch(handle_edit))
        .route("/actions/{id}/start", post(handle_start))
        .route("/actions/{id}/complete", post(handle_complete))
        .route("/actions/{id}/verify", post(handle_verify))
        .route("/actions/{id}/reject", post(handle_reject))
        .route(
            "/actions/{id}/evidence",
            post(handle_add_evidence).get(handle_list_evidence),
        )
        .route("/actions/{id}/history", get(handle_history))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);

    // TLS support via axum-server + rustls (requires `tls` feature)
    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&_tls_cert, &_tls_key) {
        let config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        eprintln!("CAPA workflow API listening on https://0.0.0.0:{}", port);
        axum_server::bind_rustls(socket_addr, config)
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    eprintln!("CAPA workflow API listening on http://0.0.0.0:{}", port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    eprintln!("\nServer shut down.");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    eprintln!("\nReceived shutdown signal...");
}
