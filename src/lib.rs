//! registry-gate library crate
//!
//! This module exports the admission webhook (codec, router, policies, TLS
//! listener), the health server, and the process configuration.

pub mod config;
pub mod health;
pub mod webhooks;

pub use config::Config;
pub use health::{HealthState, run_health_server};
pub use webhooks::{
    CertificateSource, PolicyStore, PrefixMatch, WebhookError, WebhookServer, WebhookState,
    create_webhook_router,
};
