use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;
use tutor_protocol::AskRequest;

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::forward::Forwarder;

pub const STREAM_PATH: &str = "/api/stream";
pub const HEALTH_PATH: &str = "/healthz";

const EVENT_STREAM: &str = "text/event-stream; charset=utf-8";
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Origins of the local UI dev servers.
const DEV_ORIGINS: [&str; 5] = [
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:8000",
];

pub fn router(forwarder: Forwarder) -> Router {
    Router::new()
        .route(STREAM_PATH, post(stream_ask))
        .route(HEALTH_PATH, get(healthz))
        .layer(cors())
        .with_state(forwarder)
}

/// Bind, serve until Ctrl-C, then drain in-flight streams.
pub async fn serve(config: ProxyConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        backend = %config.backend_url,
        "tutor proxy listening"
    );

    let app = router(Forwarder::new(config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn stream_ask(State(forwarder): State<Forwarder>, Json(request): Json<AskRequest>) -> Response {
    info!(
        user_id = %request.user_id,
        strict_mode = request.strict_mode,
        history = request.chat_history.len(),
        "stream request"
    );

    let body = forwarder
        .forward(request)
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame.encode())));

    (
        [
            (CONTENT_TYPE, EVENT_STREAM),
            (CACHE_CONTROL, "no-cache, no-transform"),
            (CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            DEV_ORIGINS.into_iter().map(HeaderValue::from_static),
        ))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down tutor proxy");
    }
}
