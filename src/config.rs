//! Command-line and environment configuration.
//!
//! Every flag has an environment fallback so the webhook can be configured
//! from a Deployment manifest without a wrapper script.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::health::HEALTH_PORT;
use crate::webhooks::{
    CertificateSource, PolicyStore, PrefixMatch, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT,
};

/// Default grace period for in-flight reviews during shutdown
pub const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 10;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable text
    Text,
}

/// registry-gate - admission webhook that only admits Pods from whitelisted registries
#[derive(Parser, Debug, Clone)]
#[command(name = "registry-gate", version, about, long_about = None)]
pub struct Config {
    /// Port the TLS webhook listener binds to
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = WEBHOOK_PORT)]
    pub port: u16,

    /// x509 certificate chain (PEM) served by the webhook
    #[arg(
        long = "tls-cert-file",
        visible_alias = "tlsCertFile",
        env = "TLS_CERT_FILE",
        default_value = WEBHOOK_CERT_PATH
    )]
    pub tls_cert_file: PathBuf,

    /// Private key (PEM) for the webhook certificate
    #[arg(
        long = "tls-key-file",
        visible_alias = "tlsKeyFile",
        env = "TLS_KEY_FILE",
        default_value = WEBHOOK_KEY_PATH
    )]
    pub tls_key_file: PathBuf,

    /// Comma-separated list of allowed image registry prefixes.
    ///
    /// Empty entries are ignored. An empty list denies every image.
    #[arg(long, env = "WHITELIST_REGISTRY")]
    pub whitelist_registry: Option<String>,

    /// How prefixes are matched: `prefix` (plain string prefix) or
    /// `path-segment` (prefix must end on a `/`, `:` or `@` boundary)
    #[arg(long, env = "PREFIX_MATCH", default_value = "prefix")]
    pub prefix_match: PrefixMatch,

    /// Port for the plain-HTTP health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = HEALTH_PORT)]
    pub health_port: u16,

    /// Seconds to wait for in-flight reviews during shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = SHUTDOWN_GRACE_PERIOD_SECS)]
    pub shutdown_grace_secs: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Config {
    /// Address the webhook listener binds to (all interfaces)
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Serving certificate source
    pub fn certificate_source(&self) -> CertificateSource {
        CertificateSource::PemFiles {
            cert: self.tls_cert_file.clone(),
            key: self.tls_key_file.clone(),
        }
    }

    /// Build the registry whitelist
    pub fn policy_store(&self) -> PolicyStore {
        PolicyStore::from_csv(
            self.whitelist_registry.as_deref().unwrap_or_default(),
            self.prefix_match,
        )
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
