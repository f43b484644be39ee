//! Mutation policy seam.
//!
//! Applies to the `/mutate` route. The shipped policy is [`NoopMutation`],
//! which admits every object unchanged. Patch-producing policies (sidecar
//! injection, image rewriting, default labels) implement [`MutationPolicy`]
//! and are handed to the webhook state at startup.

use kube::core::DynamicObject;

use super::Decision;

/// A policy that may rewrite an object before it is admitted.
///
/// Implementations must:
/// - decide `allowed` independently of whether a patch is produced
/// - express any patch as an RFC 6902 JSON Patch against the original object
///
/// The router sets `patchType: JSONPatch` whenever a patch is returned.
pub trait MutationPolicy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Evaluate the policy against the admitted object, if the request carries one
    fn evaluate(&self, object: Option<&DynamicObject>) -> Decision;
}

/// Mutation policy that always allows and never patches
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMutation;

impl MutationPolicy for NoopMutation {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn evaluate(&self, _object: Option<&DynamicObject>) -> Decision {
        Decision::allowed()
    }
}
