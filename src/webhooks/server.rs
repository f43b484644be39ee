//! Admission webhook server.
//!
//! Terminates TLS for the review routes and drains in-flight reviews on shutdown.
//!
//! To enable the webhook:
//! 1. Issue a serving certificate for the webhook Service (e.g. with cert-manager)
//! 2. Mount the certificate secret into the pod at /etc/webhook/certs/
//! 3. Register `/validate` in a ValidatingWebhookConfiguration and `/mutate`
//!    in a MutatingWebhookConfiguration, both with the CA bundle of the issuer

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 443;

/// How often open connections are polled while draining
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Certificate or key could not be loaded
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Listener could not be bound
    #[error("failed to bind webhook listener on {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Install aws-lc-rs as the process-wide rustls crypto provider.
///
/// Must run before any TLS configuration is built. A provider that is already
/// installed is kept.
pub fn install_crypto_provider() -> Result<(), WebhookError> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    match rustls::crypto::CryptoProvider::get_default() {
        Some(_) => Ok(()),
        None => Err(WebhookError::TlsConfig(
            "no rustls crypto provider could be installed".to_string(),
        )),
    }
}

/// Where the serving certificate chain and private key come from
#[derive(Debug, Clone)]
pub enum CertificateSource {
    /// PEM files on disk (certificate chain, private key)
    PemFiles { cert: PathBuf, key: PathBuf },
    /// PEM material already in memory
    Pem { cert: Vec<u8>, key: Vec<u8> },
}

impl CertificateSource {
    /// Load the certificate chain and key into a rustls server config
    pub async fn load(&self) -> Result<RustlsConfig, WebhookError> {
        let config = match self {
            CertificateSource::PemFiles { cert, key } => {
                RustlsConfig::from_pem_file(cert, key).await
            }
            CertificateSource::Pem { cert, key } => {
                RustlsConfig::from_pem(cert.clone(), key.clone()).await
            }
        };
        config.map_err(|e| WebhookError::TlsConfig(e.to_string()))
    }
}

/// A running TLS webhook listener
pub struct WebhookServer {
    local_addr: SocketAddr,
    handle: Handle,
    task: JoinHandle<std::io::Result<()>>,
}

impl WebhookServer {
    /// Load TLS material, bind `addr` and serve `app` on a background task.
    ///
    /// Returns once the listener is bound. Certificate and bind failures are
    /// returned to the caller and are not retried.
    pub async fn start(
        addr: SocketAddr,
        certificates: &CertificateSource,
        app: Router,
    ) -> Result<Self, WebhookError> {
        let config = certificates.load().await?;

        let handle = Handle::new();
        let task = tokio::spawn(
            axum_server::bind_rustls(addr, config)
                .handle(handle.clone())
                .serve(app.into_make_service()),
        );

        match handle.listening().await {
            Some(local_addr) => {
                info!(addr = %local_addr, "Webhook server listening with TLS");
                Ok(Self {
                    local_addr,
                    handle,
                    task,
                })
            }
            None => {
                let reason = match task.await {
                    Ok(Err(e)) => e.to_string(),
                    Ok(Ok(())) => "listener stopped before binding".to_string(),
                    Err(e) => e.to_string(),
                };
                error!(addr = %addr, reason = %reason, "Failed to bind webhook listener");
                Err(WebhookError::Bind { addr, reason })
            }
        }
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }

    /// Stop accepting connections and wait up to `grace_period` for in-flight
    /// reviews. Connections still open after that are closed.
    pub async fn shutdown(self, grace_period: Duration) -> Result<(), WebhookError> {
        info!(
            in_flight = self.handle.connection_count(),
            grace_period_secs = grace_period.as_secs_f64(),
            "Draining webhook server"
        );
        self.handle.graceful_shutdown(Some(grace_period));

        if tokio::time::timeout(grace_period, drained(&self.handle))
            .await
            .is_err()
        {
            warn!(
                remaining = self.handle.connection_count(),
                "Grace period expired, closing connections with in-flight admission reviews"
            );
        }

        match self.task.await {
            Ok(Ok(())) => {
                info!("Webhook server stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(WebhookError::Server(e.to_string())),
            Err(e) => Err(WebhookError::Server(e.to_string())),
        }
    }
}

async fn drained(handle: &Handle) {
    while handle.connection_count() > 0 {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}
