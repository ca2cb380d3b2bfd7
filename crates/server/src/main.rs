//! Server entrypoint
//!
//! Dev build runs against the simulated provider stack; swap the providers in
//! `AppState` to go live against real vendors.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use call_agent_config::{load_settings, ObservabilityConfig};
use call_agent_server::{create_router, shutdown_signal, simulated_state, ServerError};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let env = std::env::var("CALL_AGENT_ENV").ok();
    let settings = load_settings(env.as_deref())?;
    init_tracing(&settings.observability);

    let state = simulated_state(settings.clone());
    let router = create_router(state.clone());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        media_path = %settings.server.media_path,
        max_calls = settings.server.max_calls,
        "listening",
    );

    let registry = state.registry.clone();
    let drain_timeout = Duration::from_secs(settings.server.drain_timeout_seconds);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(registry, drain_timeout))
        .await?;

    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if observability.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
