//! `fleet-agent` -- worker shim.
//!
//! Runs on each worker machine next to the job runtime. Registers with the
//! controller, heartbeats, and serves the controller's start, stop and
//! resume commands on its own port. See [`AgentConfig::from_env`] for the
//! environment variables it reads.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use fleet_agent::config::AgentConfig;
use fleet_agent::controller::HttpControllerLink;
use fleet_agent::executor::SimulatedExecutor;
use fleet_agent::runtime::Agent;
use fleet_agent::server;
use fleet_core::protocol::RegisterRequest;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env().context("Invalid agent configuration")?;

    tracing::info!(
        controller_url = %config.controller_url,
        advertise_host = %config.advertise_host,
        port = config.listen_port,
        "Starting fleet-agent",
    );

    let link = HttpControllerLink::new(&config.controller_url)
        .context("Failed to build controller client")?;
    let executor = SimulatedExecutor::new(config.sim_steps, config.sim_step);
    let agent = Arc::new(Agent::new(
        Arc::new(link),
        Arc::new(executor),
        config.base_config.clone(),
        RegisterRequest {
            hostname: config.advertise_host.clone(),
            port: config.listen_port,
        },
        config.register_retry,
    )
    .with_merge_options(config.merge_options.clone()));

    // Serve commands before registering so the controller can reach us as
    // soon as it knows about us.
    let addr = SocketAddr::new(
        config.listen_host.parse().context("Invalid AGENT_HOST")?,
        config.listen_port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Command server listening");

    let cancel = CancellationToken::new();

    let server_handle = {
        let cancel = cancel.clone();
        let app = server::router(Arc::clone(&agent));
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
        })
    };

    let heartbeat_handle = {
        let agent = Arc::clone(&agent);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if agent.register_until_success(&cancel).await.is_some() {
                agent.run_heartbeats(cancel).await;
            }
        })
    };

    shutdown_signal().await;
    tracing::info!("Shutting down");

    cancel.cancel();
    let _ = heartbeat_handle.await;
    agent.shutdown().await;
    server_handle
        .await
        .context("Command server task panicked")?
        .context("Command server error")?;

    tracing::info!("Agent stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C)"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
