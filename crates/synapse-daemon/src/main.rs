// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use synapse_core::SynapseConfig;
use synapse_daemon::{build_client_app, build_spectator_app, run_metrics_reporter, DaemonState};
use synapse_exchange::Exchange;
use synapse_persistence::InMemoryStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "synapse-daemon", version, about = "Synapse agent-to-agent exchange")]
struct Args {
    /// Enable verbose request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("synapse=debug,synapse_daemon=debug,synapse_exchange=debug")
    } else {
        EnvFilter::new("synapse=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SynapseConfig::from_env().context("load SynapseConfig from environment")?;

    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but no durable backing store is wired in this build; using the in-memory reference store");
    }
    let persistence = Arc::new(InMemoryStore::new());

    let exchange = Exchange::with_collaborators(
        config.clone(),
        Some(persistence),
        Arc::new(synapse_exchange::KeywordEvaluator),
    );
    let state = DaemonState::new(exchange);

    tokio::spawn(run_metrics_reporter(Arc::clone(&state.metrics), Duration::from_secs(60)));

    let client_app = build_client_app(state.clone());
    let spectator_app = build_spectator_app(state);

    let client_addr = format!("0.0.0.0:{}", config.port);
    let spectator_addr = format!("0.0.0.0:{}", config.spectator_port);

    let client_listener = tokio::net::TcpListener::bind(&client_addr)
        .await
        .with_context(|| format!("bind client port {client_addr}"))?;
    let spectator_listener = tokio::net::TcpListener::bind(&spectator_addr)
        .await
        .with_context(|| format!("bind spectator port {spectator_addr}"))?;

    info!(
        client = %client_addr,
        spectator = %spectator_addr,
        "synapse-daemon listening"
    );

    let client_serve = axum::serve(client_listener, client_app).with_graceful_shutdown(shutdown_signal());
    let spectator_serve = axum::serve(spectator_listener, spectator_app).with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async { client_serve.await.context("client listener") },
        async { spectator_serve.await.context("spectator listener") },
    )?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
