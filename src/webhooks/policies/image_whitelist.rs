//! Container image registry whitelist policy.
//!
//! Applies to the `/validate` route.
//!
//! Validates:
//! - The object decodes as a Pod (otherwise denied with 400)
//! - Every container image starts with a whitelisted registry prefix; the first
//!   container that does not is reported (denied with 403)

use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;

use super::{CODE_FORBIDDEN, CODE_INVALID_OBJECT, Decision, PolicyStore};

/// Name used in logs
pub const POLICY_NAME: &str = "image-whitelist";
/// Reason reported when the object is not Pod-shaped
pub const REASON_INVALID_OBJECT: &str = "InvalidObject";
/// Reason reported when a container image is not whitelisted
pub const REASON_IMAGE_NOT_WHITELISTED: &str = "ImageNotWhitelisted";

/// Decode the admitted object into a Pod.
///
/// A Pod without a spec decodes successfully and has no containers.
pub fn decode_pod(object: Option<&DynamicObject>) -> Result<Pod, String> {
    let object = object.ok_or_else(|| "admission request carries no object".to_string())?;
    let value = serde_json::to_value(object).map_err(|e| e.to_string())?;
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Evaluate the whitelist against an admitted object
pub fn evaluate(object: Option<&DynamicObject>, store: &PolicyStore) -> Decision {
    match decode_pod(object) {
        Ok(pod) => evaluate_pod(&pod, store),
        Err(e) => Decision::denied(CODE_INVALID_OBJECT, REASON_INVALID_OBJECT, e),
    }
}

/// Evaluate the whitelist against a decoded Pod.
///
/// Containers are checked in declaration order and evaluation stops at the
/// first one that is not whitelisted.
pub fn evaluate_pod(pod: &Pod, store: &PolicyStore) -> Decision {
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    for container in containers {
        match container.image.as_deref() {
            Some(image) if store.is_whitelisted(image) => continue,
            Some(image) if !image.is_empty() => {
                return Decision::denied(CODE_FORBIDDEN, REASON_IMAGE_NOT_WHITELISTED, image);
            }
            _ => {
                return Decision::denied(
                    CODE_FORBIDDEN,
                    REASON_IMAGE_NOT_WHITELISTED,
                    format!("container {:?} has no image", container.name),
                );
            }
        }
    }

    Decision::allowed()
}
