//! Call agent server
//!
//! Accepts telephony media streams over WebSocket, admits them through the
//! call registry, and runs one `CallSession` per connection. Health and
//! readiness surfaces expose the registry state so a load balancer stops
//! routing calls to a draining instance.

pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use call_agent_config::Settings;
use call_agent_core::{EventSink, TracingEventSink};
use call_agent_persistence::{CallStore, MemoryCallStore};
use call_agent_providers::{LoopbackStt, SimulatedLlm, SimulatedTts};
use call_agent_session::{CallRegistry, Providers};

/// Server startup errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] call_agent_config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared server state
pub struct AppState {
    pub settings: Settings,
    pub registry: Arc<CallRegistry>,
    pub providers: Providers,
    pub store: Arc<dyn CallStore>,
    pub events: Arc<dyn EventSink>,
}

/// State wired to the simulated provider stack
///
/// The loopback STT turns media payload bytes into transcripts, so the whole
/// pipeline can be exercised with a WebSocket client and no vendor accounts.
pub fn simulated_state(settings: Settings) -> Arc<AppState> {
    let providers = Providers {
        stt: Arc::new(LoopbackStt),
        llm: Arc::new(SimulatedLlm::new(vec![
            "I can take a message, go ahead.".to_string(),
            "Got it. Anything else I can pass along?".to_string(),
            "Alright, I'll let them know. <hangup/>".to_string(),
        ])),
        tts: Arc::new(SimulatedTts::new()),
    };

    Arc::new(AppState {
        settings,
        registry: CallRegistry::new(),
        providers,
        store: Arc::new(MemoryCallStore::new()),
        events: Arc::new(TracingEventSink),
    })
}

/// Build the HTTP router
pub fn create_router(state: Arc<AppState>) -> Router {
    let media_path = state.settings.server.media_path.clone();

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route(&media_path, get(ws::media_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "active_calls": state.registry.active_count(),
    }))
}

async fn ready(State(state): State<Arc<AppState>>) -> Response {
    if state.registry.is_draining() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "draining" })),
        )
            .into_response();
    }
    Json(json!({
        "status": "ready",
        "active_calls": state.registry.active_count(),
    }))
    .into_response()
}

/// Resolve on shutdown signal, then drain in-flight calls
///
/// New calls are rejected the moment draining starts; the future resolves
/// when the last call releases or the drain timeout expires.
pub async fn shutdown_signal(registry: Arc<CallRegistry>, drain_timeout: Duration) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install shutdown signal handler");
        return;
    }
    tracing::info!("shutdown signal received, draining calls");
    registry.start_draining();

    if tokio::time::timeout(drain_timeout, registry.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!(
            active_calls = registry.active_count(),
            "drain timeout expired with calls still in flight",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_json(
        router: Router,
        path: &str,
    ) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_reports_active_calls() {
        let state = simulated_state(Settings::default());
        let (status, body) = get_json(create_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_calls"], 0);
    }

    #[tokio::test]
    async fn test_ready_degrades_when_draining() {
        let state = simulated_state(Settings::default());
        let router = create_router(state.clone());

        let (status, _) = get_json(router.clone(), "/ready").await;
        assert_eq!(status, StatusCode::OK);

        state.registry.start_draining();
        let (status, body) = get_json(router, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "draining");
    }

    #[tokio::test]
    async fn test_shutdown_drain_times_out() {
        let registry = CallRegistry::new();
        let _guard = registry.register().unwrap();

        registry.start_draining();
        // wait_idle never resolves while the guard is held.
        tokio::time::timeout(Duration::from_millis(50), registry.wait_idle())
            .await
            .expect_err("registry should not be idle");
    }
}
