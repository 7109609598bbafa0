//! Signal Engine Binary
//!
//! Starts the webhook receiver, the gateway session supervisor and the
//! order workflow engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin signal-engine
//! ```
//!
//! # Environment Variables
//!
//! - `SIGNAL_ENGINE_CONFIG`: Path to the YAML config (default: config.yaml)
//! - `HTTP_PORT`: Override for the webhook port
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use signal_engine::account::AccountCache;
use signal_engine::config::{Config, GatewayMode, load_config};
use signal_engine::correlator::RequestCorrelator;
use signal_engine::gateway::SimGateway;
use signal_engine::server::{AppState, create_router};
use signal_engine::session::{ConnectionSupervisor, Session};
use signal_engine::signal::{PriceState, SignalGate};
use signal_engine::telemetry;
use signal_engine::workflow::WorkflowEngine;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real environments set variables directly.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    tracing::info!("Starting signal engine");

    let config = parse_config()?;
    config.validate()?;
    log_config(&config);

    let gateway = match config.gateway.mode {
        GatewayMode::Sim => {
            tracing::info!("using in-process paper gateway");
            Arc::new(SimGateway::new(&config.trading.account_ids()))
        }
    };

    let correlator = Arc::new(RequestCorrelator::new(
        Arc::clone(&gateway),
        config.gateway.request_timeout(),
    ));
    let cache = Arc::new(AccountCache::new(
        Arc::clone(&gateway),
        Arc::clone(&correlator),
    ));
    let session = Arc::new(Session::new());
    let shutdown = CancellationToken::new();

    let supervisor_handle = ConnectionSupervisor::new(
        Arc::clone(&gateway),
        Arc::clone(&session),
        Arc::clone(&cache),
        Arc::clone(&correlator),
        config.gateway.reconnect_policy(),
        shutdown.clone(),
    )
    .spawn();

    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&gateway),
        correlator,
        cache,
        session,
        config.trading.engine_settings(),
    ));
    let gate = Arc::new(SignalGate::new(
        config.signals.cooldown(),
        config.signals.open_alert_id.clone(),
        config.signals.liquidate_alert_id.clone(),
    ));
    let prices = Arc::new(PriceState::new(config.trading.default_price));

    let app = create_router(AppState::new(engine, gate, prices), &config.server.allowed_origins);

    let addr: SocketAddr =
        format!("{}:{}", config.server.bind_address, config.server.http_port).parse()?;
    tracing::info!(%addr, "HTTP server starting");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health");
    tracing::info!("  POST /webhook");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = supervisor_handle.await;
    tracing::info!("Signal engine stopped");
    Ok(())
}

/// Load configuration and apply environment overrides.
fn parse_config() -> anyhow::Result<Config> {
    let path = std::env::var("SIGNAL_ENGINE_CONFIG").ok();
    let mut config = load_config(path.as_deref())?;

    if let Ok(port) = std::env::var("HTTP_PORT")
        && let Ok(port) = port.parse()
    {
        config.server.http_port = port;
    }

    Ok(config)
}

/// Log the effective configuration.
fn log_config(config: &Config) {
    tracing::info!(
        http_port = config.server.http_port,
        accounts = ?config.trading.accounts,
        symbol = %config.trading.contract.symbol,
        leverage_factor = %config.trading.leverage_factor,
        cooldown_ms = config.signals.cooldown_ms,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed: a process that cannot
/// respond to termination signals is worse than one that fails fast at
/// startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown.cancel();
}
