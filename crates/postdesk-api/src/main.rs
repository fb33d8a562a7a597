//! postdesk API server entry point.

use std::net::SocketAddr;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use postdesk_api::{create_router, ApiConfig, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // rustls 0.23 needs an explicit process-wide crypto provider.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("install rustls crypto provider");

    init_tracing();

    let config = ApiConfig::from_env();
    info!(host = %config.host, port = config.port, "starting postdesk-api");

    let state = match AppState::new(config.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!("failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    let metrics_handle = if metrics_enabled() {
        info!("Prometheus metrics exposed at /metrics");
        Some(postdesk_api::metrics::init_metrics())
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("valid bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind server address");
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    info!("shutdown complete");
}

/// Human-readable logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let env_filter = EnvFilter::from_default_env().add_directive("postdesk=info".parse().unwrap());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

fn metrics_enabled() -> bool {
    std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("install CTRL+C handler");
    info!("received shutdown signal");
}
