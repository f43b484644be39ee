//! Admission webhook: review codec, routing, policies and the TLS listener.
//!
//! Routes:
//! - `POST /validate`: registry whitelist check on Pod container images
//! - `POST /mutate`: mutation seam, a no-op unless another policy is configured

pub mod codec;
pub mod policies;
mod router;
mod server;

pub use policies::{Decision, MutationPolicy, NoopMutation, PolicyStore, PrefixMatch};
pub use router::{
    CODE_DECODE_FAILED, JSON_CONTENT_TYPE, MAX_REVIEW_BYTES, ROUTES, Reply, ReviewKind,
    WebhookState, build_response, create_webhook_router, handle_review,
};
pub use server::{
    CertificateSource, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError,
    WebhookServer, install_crypto_provider,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
