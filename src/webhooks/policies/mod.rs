//! Admission policies.
//!
//! - `image_whitelist`: validation policy, denies Pods whose container images
//!   are not served from a whitelisted registry
//! - `mutation`: extension seam for patch-producing policies (no-op by default)
//! - `store`: the immutable registry whitelist both are configured from

pub mod image_whitelist;
pub mod mutation;
pub mod store;

pub use mutation::{MutationPolicy, NoopMutation};
pub use store::{PolicyStore, PrefixMatch};

/// Status code carried by an allowed decision
pub const CODE_ALLOWED: u16 = 200;
/// Status code for an object that could not be decoded into the expected shape
pub const CODE_INVALID_OBJECT: u16 = 400;
/// Status code for a policy denial
pub const CODE_FORBIDDEN: u16 = 403;

/// Outcome of evaluating one admission policy
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the object may be admitted
    pub allowed: bool,
    /// Status code reported in the response status
    pub code: u16,
    /// Machine-readable reason (empty when allowed)
    pub reason: String,
    /// Human-readable message; never empty on a denial
    pub message: String,
    /// JSON Patch against the original object, if the policy rewrites it
    pub patch: Option<json_patch::Patch>,
}

impl Decision {
    /// Create an allowed decision with no patch
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            code: CODE_ALLOWED,
            reason: String::new(),
            message: String::new(),
            patch: None,
        }
    }

    /// Create a denied decision
    pub fn denied(code: u16, reason: &str, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            code,
            reason: reason.to_string(),
            message: message.into(),
            patch: None,
        }
    }

    /// Attach a patch. `allowed` is left untouched.
    #[must_use]
    pub fn with_patch(mut self, patch: json_patch::Patch) -> Self {
        self.patch = Some(patch);
        self
    }
}
