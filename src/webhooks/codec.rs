//! AdmissionReview wire codec.
//!
//! Only `admission.k8s.io/v1` envelopes are accepted. Anything else fails to
//! decode instead of being read with missing fields.

use kube::core::admission::{AdmissionReview, META_API_VERSION_V1, META_KIND};
use kube::core::{DynamicObject, TypeMeta};
use serde_json::Value;
use thiserror::Error;

/// Errors from decoding or encoding an AdmissionReview
#[derive(Error, Debug)]
pub enum CodecError {
    /// Body is not JSON
    #[error("body is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Body is JSON but not an object
    #[error("body is not an AdmissionReview object")]
    NotAnObject,

    /// Envelope apiVersion/kind is not the one this webhook speaks
    #[error(
        "unsupported review type {api_version:?}/{kind:?} (expected {}/{})",
        META_API_VERSION_V1,
        META_KIND
    )]
    UnsupportedVersion { api_version: String, kind: String },

    /// Envelope has no `request` object
    #[error("AdmissionReview carries no request")]
    MissingRequest,

    /// Inbound envelope already carries a `response`
    #[error("inbound AdmissionReview must not carry a response")]
    UnexpectedResponse,

    /// `request` does not match the AdmissionRequest schema
    #[error("invalid admission request: {0}")]
    InvalidRequest(#[source] serde_json::Error),

    /// Outbound envelope could not be serialized
    #[error("failed to encode AdmissionReview: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Correlation data salvaged from a body that failed to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Envelope type to answer with
    pub types: TypeMeta,
    /// Request uid, if present (non-string values as their JSON text)
    pub uid: Option<String>,
}

/// The envelope type this webhook speaks
pub fn review_types() -> TypeMeta {
    TypeMeta {
        api_version: META_API_VERSION_V1.to_string(),
        kind: META_KIND.to_string(),
    }
}

/// Decode an inbound AdmissionReview.
///
/// The returned review always carries a request.
pub fn decode(body: &[u8]) -> Result<AdmissionReview<DynamicObject>, CodecError> {
    let value: Value = serde_json::from_slice(body).map_err(CodecError::Malformed)?;

    {
        let envelope = value.as_object().ok_or(CodecError::NotAnObject)?;

        let api_version = envelope.get("apiVersion").and_then(Value::as_str);
        let kind = envelope.get("kind").and_then(Value::as_str);
        if api_version != Some(META_API_VERSION_V1) || kind != Some(META_KIND) {
            return Err(CodecError::UnsupportedVersion {
                api_version: api_version.unwrap_or_default().to_string(),
                kind: kind.unwrap_or_default().to_string(),
            });
        }

        if envelope.get("response").is_some_and(|r| !r.is_null()) {
            return Err(CodecError::UnexpectedResponse);
        }
        if !envelope.get("request").is_some_and(Value::is_object) {
            return Err(CodecError::MissingRequest);
        }
    }

    serde_json::from_value(value).map_err(CodecError::InvalidRequest)
}

/// Encode an outbound AdmissionReview
pub fn encode(review: &AdmissionReview<DynamicObject>) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(review).map_err(CodecError::Encode)
}

/// Best-effort extraction of the envelope type and request uid.
///
/// Used only after [`decode`] failed, so that the error response can still be
/// addressed to the caller. Falls back to the v1 envelope type when the body
/// does not name one.
pub fn recover_correlation(body: &[u8]) -> Correlation {
    let value: Option<Value> = serde_json::from_slice(body).ok();
    let text = |v: Option<&Value>, key: &str| {
        v.and_then(|v| v.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let types = match (
        text(value.as_ref(), "apiVersion"),
        text(value.as_ref(), "kind"),
    ) {
        (Some(api_version), Some(kind)) => TypeMeta { api_version, kind },
        _ => review_types(),
    };
    let request = value.as_ref().and_then(|v| v.get("request"));

    // A uid of the wrong JSON type is still echoed, as its JSON text
    let uid = request
        .and_then(|r| r.get("uid"))
        .filter(|uid| !uid.is_null())
        .map(|uid| uid.as_str().map_or_else(|| uid.to_string(), str::to_string));

    Correlation { types, uid }
}
