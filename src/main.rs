//! registry-gate - admission webhook that only admits Pods whose container
//! images come from whitelisted registries.
//!
//! This is the main entry point that:
//! - Parses flags and environment
//! - Initializes structured logging
//! - Loads the registry whitelist
//! - Starts the health server and the TLS webhook server
//! - Drains the webhook server on SIGTERM/SIGINT

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use registry_gate::config::{Config, LogFormat};
use registry_gate::health::{HealthState, run_health_server};
use registry_gate::webhooks::{
    WebhookServer, WebhookState, create_webhook_router, install_crypto_provider,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    // Initialize tracing subscriber
    let filter = EnvFilter::from_default_env().add_directive("registry_gate=info".parse()?);
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    info!("Starting registry-gate");

    install_crypto_provider()?;

    let policy = config.policy_store();
    info!(
        prefixes = ?policy.prefixes(),
        prefix_match = %policy.mode(),
        "Loaded registry whitelist"
    );
    if policy.is_empty() {
        warn!("Registry whitelist is empty, every container image will be denied");
    }

    // Create shared health state
    let health_state = Arc::new(HealthState::new());
    health_state.metrics.set_whitelist_prefixes(policy.len());

    // Start health server immediately so liveness works while TLS loads
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let state = Arc::new(WebhookState::new(policy).with_health_state(health_state.clone()));

    // Certificate and bind failures are fatal: the webhook never serves without TLS
    let server = WebhookServer::start(
        config.listen_addr(),
        &config.certificate_source(),
        create_webhook_router(state),
    )
    .await
    .inspect_err(|e| error!(error = %e, "Webhook server failed to start"))?;

    health_state.set_ready(true).await;

    tokio::select! {
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
        }
    }

    // Mark as not ready to stop receiving new reviews
    health_state.set_ready(false).await;
    info!("Marked webhook as not ready");

    server.shutdown(config.shutdown_grace_period()).await?;

    info!("registry-gate stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
