//! Admission review routing.
//!
//! Every review goes through the same pipeline: transport preconditions,
//! decode, policy dispatch, response assembly, encode. The response always
//! carries the uid of the request it answers, whichever step failed.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use kube::core::DynamicObject;
use kube::core::admission::{
    AdmissionRequest, AdmissionResponse, Operation, SerializePatchError,
};
use tracing::{error, info, warn};

use crate::health::HealthState;
use crate::webhooks::codec::{self, CodecError, Correlation};
use crate::webhooks::policies::{
    Decision, MutationPolicy, NoopMutation, PolicyStore, image_whitelist,
};

/// The only content type accepted for reviews
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Status code reported when the review envelope cannot be decoded
pub const CODE_DECODE_FAILED: u16 = 500;
/// Largest review body accepted
pub const MAX_REVIEW_BYTES: usize = 6 * 1024 * 1024;

/// The kinds of review this webhook serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewKind {
    /// Image whitelist validation
    Validate,
    /// Mutation through the configured [`MutationPolicy`]
    Mutate,
}

/// Route table: every served path and the review it dispatches to
pub const ROUTES: [(&str, ReviewKind); 2] = [
    ("/validate", ReviewKind::Validate),
    ("/mutate", ReviewKind::Mutate),
];

impl ReviewKind {
    /// Look up the review kind served at `path`
    pub fn from_path(path: &str) -> Option<Self> {
        ROUTES
            .iter()
            .find(|(route, _)| *route == path)
            .map(|(_, kind)| *kind)
    }

    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewKind::Validate => "validate",
            ReviewKind::Mutate => "mutate",
        }
    }
}

/// How a review ended, for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Allowed,
    Denied,
    DecodeFailed,
    Rejected,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Denied => "denied",
            Outcome::DecodeFailed => "decode_failed",
            Outcome::Rejected => "rejected",
        }
    }
}

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Registry whitelist for the validation route
    pub policy: PolicyStore,
    /// Policy for the mutation route
    pub mutation: Box<dyn MutationPolicy>,
    /// Optional health state for metrics
    pub health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    /// Create state with the no-op mutation policy
    pub fn new(policy: PolicyStore) -> Self {
        Self {
            policy,
            mutation: Box::new(NoopMutation),
            health_state: None,
        }
    }

    /// Replace the mutation policy
    #[must_use]
    pub fn with_mutation(mut self, mutation: impl MutationPolicy + 'static) -> Self {
        self.mutation = Box::new(mutation);
        self
    }

    /// Name of the policy serving `kind`, for logs
    pub fn policy_name(&self, kind: ReviewKind) -> &'static str {
        match kind {
            ReviewKind::Validate => image_whitelist::POLICY_NAME,
            ReviewKind::Mutate => self.mutation.name(),
        }
    }

    /// Record metrics into the given health state
    #[must_use]
    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }
}

/// Result of handling one review at the transport level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Encoded AdmissionReview, sent with HTTP 200
    Review(Vec<u8>),
    /// Protocol-level failure, sent as plain text with HTTP 400
    Rejected(String),
}

impl Reply {
    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Review(_) => StatusCode::OK,
            Reply::Rejected(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Reply::Review(body) => {
                (status, [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response()
            }
            Reply::Rejected(message) => (status, message).into_response(),
        }
    }
}

/// Create the webhook router from the route table. Reviews are POST only.
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    let mut router: Router<Arc<WebhookState>> = Router::new();
    for (path, kind) in ROUTES {
        router = router.route(
            path,
            post(
                move |State(state): State<Arc<WebhookState>>, headers: HeaderMap, body: Bytes| async move {
                    let content_type = headers
                        .get(header::CONTENT_TYPE)
                        .map(|value| value.to_str().unwrap_or("<non-ascii>"));
                    handle_review(&state, kind, content_type, &body)
                },
            ),
        );
    }
    router
        .layer(DefaultBodyLimit::max(MAX_REVIEW_BYTES))
        .with_state(state)
}

/// Handle one inbound review body
pub fn handle_review(
    state: &WebhookState,
    kind: ReviewKind,
    content_type: Option<&str>,
    body: &[u8],
) -> Reply {
    let started = Instant::now();
    let (reply, outcome) = review(state, kind, content_type, body);
    if let Some(health_state) = &state.health_state {
        health_state.metrics.record_review(
            kind.as_str(),
            outcome.as_str(),
            started.elapsed().as_secs_f64(),
        );
    }
    reply
}

fn review(
    state: &WebhookState,
    kind: ReviewKind,
    content_type: Option<&str>,
    body: &[u8],
) -> (Reply, Outcome) {
    let route = kind.as_str();

    if body.is_empty() {
        error!(route, "Rejecting review: empty data body");
        return (Reply::Rejected("empty data body".to_string()), Outcome::Rejected);
    }

    if content_type != Some(JSON_CONTENT_TYPE) {
        let received = content_type.unwrap_or("<none>");
        error!(route, content_type = received, "Rejecting review: unexpected Content-Type");
        return (
            Reply::Rejected(format!(
                "Content-Type is {received}, but expect {JSON_CONTENT_TYPE}"
            )),
            Outcome::Rejected,
        );
    }

    let decoded: Result<AdmissionRequest<DynamicObject>, CodecError> =
        codec::decode(body).and_then(|review| {
            review
                .try_into()
                .map_err(|_| CodecError::MissingRequest)
        });

    let (response, outcome) = match decoded {
        Ok(request) => {
            let decision = evaluate(state, kind, &request);
            let outcome = if decision.allowed {
                Outcome::Allowed
            } else {
                Outcome::Denied
            };
            match build_response(&request, decision) {
                Ok(response) => (response, outcome),
                Err(e) => {
                    error!(route, uid = %request.uid, error = %e, "Can't encode response patch");
                    return (
                        Reply::Rejected(format!("Can't encode response: {e}")),
                        Outcome::Rejected,
                    );
                }
            }
        }
        Err(e) => (decode_failure(kind, body, &e), Outcome::DecodeFailed),
    };

    match codec::encode(&response.into_review()) {
        Ok(bytes) => (Reply::Review(bytes), outcome),
        Err(e) => {
            error!(route, error = %e, "Can't encode response");
            (
                Reply::Rejected(format!("Can't encode response: {e}")),
                Outcome::Rejected,
            )
        }
    }
}

/// Dispatch a decoded request to the policy for its route
fn evaluate(
    state: &WebhookState,
    kind: ReviewKind,
    request: &AdmissionRequest<DynamicObject>,
) -> Decision {
    let policy = state.policy_name(kind);

    // Deletions carry no new object, so there is nothing to inspect or patch
    let decision = if request.operation == Operation::Delete {
        Decision::allowed()
    } else {
        match kind {
            ReviewKind::Validate => {
                image_whitelist::evaluate(request.object.as_ref(), &state.policy)
            }
            ReviewKind::Mutate => state.mutation.evaluate(request.object.as_ref()),
        }
    };

    if decision.allowed {
        info!(
            route = kind.as_str(),
            policy,
            uid = %request.uid,
            kind = %request.kind.kind,
            namespace = ?request.namespace,
            name = %request.name,
            operation = ?request.operation,
            code = decision.code,
            patched = decision.patch.is_some(),
            "Admission request allowed"
        );
    } else {
        warn!(
            route = kind.as_str(),
            policy,
            uid = %request.uid,
            kind = %request.kind.kind,
            namespace = ?request.namespace,
            name = %request.name,
            operation = ?request.operation,
            code = decision.code,
            reason = %decision.reason,
            message = %decision.message,
            "Admission request denied"
        );
    }

    decision
}

/// Build the response for a decoded request.
///
/// The uid and envelope type are copied from the request; the decision fills
/// in `allowed`, the status, and the patch.
pub fn build_response(
    request: &AdmissionRequest<DynamicObject>,
    decision: Decision,
) -> Result<AdmissionResponse, SerializePatchError> {
    let mut response = AdmissionResponse::from(request);
    response.allowed = decision.allowed;
    response.result.code = decision.code;
    response.result.reason = decision.reason;
    response.result.message = decision.message;

    match decision.patch {
        Some(patch) => response.with_patch(patch),
        None => Ok(response),
    }
}

/// Build the response for a body that could not be decoded.
///
/// The request is never allowed. The uid is echoed when it can be recovered.
fn decode_failure(kind: ReviewKind, body: &[u8], error: &CodecError) -> AdmissionResponse {
    let Correlation { types, uid } = codec::recover_correlation(body);

    let mut response = AdmissionResponse::invalid(error.to_string());
    response.types = types;
    response.result.code = CODE_DECODE_FAILED;

    match uid {
        Some(uid) => {
            error!(route = kind.as_str(), uid = %uid, error = %error, "Can't decode AdmissionReview");
            response.uid = uid;
        }
        None => {
            error!(
                route = kind.as_str(),
                error = %error,
                "Can't decode AdmissionReview and no uid is recoverable; response cannot be correlated"
            );
        }
    }

    response
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::webhooks::policies::PrefixMatch;
    use serde_json::{Value, json};

    const UID: &str = "e911857d-c318-11e8-bbad-025000000001";

    fn state() -> WebhookState {
        WebhookState::new(PolicyStore::from_csv(
            "registry.example.com/",
            PrefixMatch::Prefix,
        ))
    }

    fn review_body(images: &[&str]) -> Vec<u8> {
        let containers: Vec<_> = images
            .iter()
            .enumerate()
            .map(|(i, image)| json!({"name": format!("c{i}"), "image": image}))
            .collect();
        serde_json::to_vec(&json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": UID,
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "web",
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "admin"},
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "web", "namespace": "default"},
                    "spec": {"containers": containers}
                }
            }
        }))
        .unwrap()
    }

    fn response_of(reply: Reply) -> Value {
        match reply {
            Reply::Review(bytes) => serde_json::from_slice(&bytes).unwrap(),
            Reply::Rejected(message) => panic!("unexpected rejection: {message}"),
        }
    }

    #[test]
    fn test_route_table_lookup() {
        assert_eq!(ReviewKind::from_path("/validate"), Some(ReviewKind::Validate));
        assert_eq!(ReviewKind::from_path("/mutate"), Some(ReviewKind::Mutate));
        assert_eq!(ReviewKind::from_path("/validate/"), None);
        for (path, kind) in ROUTES {
            assert_eq!(path.trim_start_matches('/'), kind.as_str());
        }
    }

    #[test]
    fn test_policy_name_per_route() {
        struct Named;
        impl MutationPolicy for Named {
            fn name(&self) -> &'static str {
                "named"
            }
            fn evaluate(&self, _object: Option<&DynamicObject>) -> Decision {
                Decision::allowed()
            }
        }

        let state = state();
        assert_eq!(state.policy_name(ReviewKind::Validate), "image-whitelist");
        assert_eq!(state.policy_name(ReviewKind::Mutate), "noop");
        assert_eq!(
            state.with_mutation(Named).policy_name(ReviewKind::Mutate),
            "named"
        );
    }

    #[test]
    fn test_empty_body_rejected() {
        let reply = handle_review(&state(), ReviewKind::Validate, Some("application/json"), b"");
        assert_eq!(reply, Reply::Rejected("empty data body".to_string()));
        assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_wrong_content_type_rejected() {
        let body = review_body(&["registry.example.com/app:1"]);
        for content_type in [Some("text/plain"), Some("application/json; charset=utf-8"), None] {
            let reply = handle_review(&state(), ReviewKind::Validate, content_type, &body);
            assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_allowed_review_echoes_uid_and_type() {
        let body = review_body(&["registry.example.com/app:1"]);
        let response = response_of(handle_review(
            &state(),
            ReviewKind::Validate,
            Some("application/json"),
            &body,
        ));

        assert_eq!(response["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(response["kind"], "AdmissionReview");
        assert!(response.get("request").is_none());
        assert_eq!(response["response"]["uid"], UID);
        assert_eq!(response["response"]["allowed"], true);
        assert_eq!(response["response"]["status"]["code"], 200);
    }

    #[test]
    fn test_denied_review_reports_image() {
        let body = review_body(&["evil.io/app:1"]);
        let response = response_of(handle_review(
            &state(),
            ReviewKind::Validate,
            Some("application/json"),
            &body,
        ));

        assert_eq!(response["response"]["uid"], UID);
        assert_eq!(response["response"]["allowed"], false);
        assert_eq!(response["response"]["status"]["code"], 403);
        assert_eq!(response["response"]["status"]["message"], "evil.io/app:1");
        assert_eq!(response["response"]["status"]["reason"], "ImageNotWhitelisted");
    }

    #[test]
    fn test_mutate_route_is_noop() {
        let body = review_body(&["evil.io/app:1"]);
        let response = response_of(handle_review(
            &state(),
            ReviewKind::Mutate,
            Some("application/json"),
            &body,
        ));

        assert_eq!(response["response"]["uid"], UID);
        assert_eq!(response["response"]["allowed"], true);
        assert!(response["response"].get("patch").is_none());
        assert!(response["response"].get("patchType").is_none());
    }

    #[test]
    fn test_garbled_body_fails_closed() {
        let response = response_of(handle_review(
            &state(),
            ReviewKind::Validate,
            Some("application/json"),
            b"{{{ not json",
        ));

        assert_eq!(response["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(response["response"]["allowed"], false);
        assert_eq!(response["response"]["status"]["code"], 500);
        assert!(!response["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_decode_failure_still_echoes_uid() {
        let mut value: Value = serde_json::from_slice(&review_body(&[])).unwrap();
        value["request"]["operation"] = json!("EXPLODE");
        let body = serde_json::to_vec(&value).unwrap();

        let response = response_of(handle_review(
            &state(),
            ReviewKind::Validate,
            Some("application/json"),
            &body,
        ));
        assert_eq!(response["response"]["uid"], UID);
        assert_eq!(response["response"]["allowed"], false);
        assert_eq!(response["response"]["status"]["code"], 500);
    }

    #[test]
    fn test_build_response_copies_uid() {
        let review = codec::decode(&review_body(&[])).unwrap();
        let request: AdmissionRequest<DynamicObject> = review.try_into().unwrap();

        let response =
            build_response(&request, Decision::denied(403, "ImageNotWhitelisted", "x")).unwrap();
        assert_eq!(response.uid, UID);
        assert!(!response.allowed);
        assert_eq!(response.result.code, 403);
        assert_eq!(response.types, codec::review_types());
    }

    #[test]
    fn test_metrics_recorded_per_outcome() {
        let health_state = Arc::new(HealthState::new());
        let state = state().with_health_state(health_state.clone());

        handle_review(&state, ReviewKind::Validate, Some("application/json"), b"");
        handle_review(
            &state,
            ReviewKind::Validate,
            Some("application/json"),
            &review_body(&["evil.io/app:1"]),
        );

        let encoded = health_state.metrics.encode();
        assert!(encoded.contains("outcome=\"rejected\""));
        assert!(encoded.contains("outcome=\"denied\""));
    }
}
