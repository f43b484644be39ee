// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for registry-gate.
//!
//! These tests drive the webhook router in-process (no TLS, no cluster) and
//! check the wire contract the API server relies on.

#[path = "../common/mod.rs"]
mod common;

mod router_tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use registry_gate::webhooks::{
        Decision, MAX_REVIEW_BYTES, MutationPolicy, PolicyStore, PrefixMatch, WebhookState,
        create_webhook_router,
    };

    use crate::common::fixtures::ReviewBuilder;

    const UID: &str = "0c9a8d74-9cb7-44dd-b98e-09fd62def2f4";

    fn router() -> Router {
        let store = PolicyStore::from_csv("registry.example.com/", PrefixMatch::Prefix);
        create_webhook_router(Arc::new(WebhookState::new(store)))
    }

    async fn post(router: Router, path: &str, content_type: Option<&str>, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method("POST").uri(path);
        if let Some(content_type) = content_type {
            request = request.header(header::CONTENT_TYPE, content_type);
        }
        let response = router
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn review(path: &str, body: Vec<u8>) -> Value {
        let (status, body) = post(router(), path, Some("application/json"), body).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_validate_allows_whitelisted_image() {
        let body = ReviewBuilder::new(UID)
            .image("registry.example.com/app:1")
            .build();
        let review = review("/validate", body).await;

        assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(review["kind"], "AdmissionReview");
        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_validate_denies_foreign_image() {
        let body = ReviewBuilder::new(UID).image("evil.io/app:1").build();
        let review = review("/validate", body).await;

        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(review["response"]["status"]["code"], 403);
        assert_eq!(review["response"]["status"]["message"], "evil.io/app:1");
    }

    #[tokio::test]
    async fn test_validate_reports_first_violation_only() {
        let body = ReviewBuilder::new(UID)
            .images(&[
                "registry.example.com/a:1",
                "evil.io/b:1",
                "registry.example.com/c:1",
                "other.io/d:1",
            ])
            .build();
        let review = review("/validate", body).await;

        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(review["response"]["status"]["message"], "evil.io/b:1");
    }

    #[tokio::test]
    async fn test_validate_allows_pod_without_containers() {
        let body = ReviewBuilder::new(UID).build();
        let review = review("/validate", body).await;
        assert_eq!(review["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_object_decode_failure_echoes_uid() {
        let body = ReviewBuilder::new(UID)
            .object(json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "web"},
                "spec": {"containers": 42}
            }))
            .build();
        let review = review("/validate", body).await;

        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(review["response"]["status"]["code"], 400);
    }

    #[tokio::test]
    async fn test_non_pod_object_is_denied_as_invalid() {
        let body = ReviewBuilder::new(UID)
            .object(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "web"},
                "spec": {"template": {"spec": {"containers": [
                    {"name": "app", "image": "registry.example.com/app:1"}
                ]}}}
            }))
            .build();
        let review = review("/validate", body).await;

        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(review["response"]["status"]["code"], 400);
        assert_eq!(review["response"]["status"]["reason"], "InvalidObject");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_without_envelope() {
        let body = vec![b' '; MAX_REVIEW_BYTES + 1];
        let (status, text) = post(router(), "/validate", Some("application/json"), body).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(serde_json::from_slice::<Value>(&text).is_err());
    }

    #[tokio::test]
    async fn test_delete_is_allowed_without_object() {
        let body = ReviewBuilder::new(UID)
            .operation("DELETE")
            .object(Value::Null)
            .build();
        let review = review("/validate", body).await;

        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_unsupported_version_fails_closed_and_echoes_envelope() {
        let body = ReviewBuilder::new(UID)
            .api_version("admission.k8s.io/v1beta1")
            .image("registry.example.com/app:1")
            .build();
        let review = review("/validate", body).await;

        assert_eq!(review["apiVersion"], "admission.k8s.io/v1beta1");
        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(review["response"]["status"]["code"], 500);
    }

    #[tokio::test]
    async fn test_numeric_uid_is_echoed_as_text() {
        let mut value = ReviewBuilder::new(UID).image("registry.example.com/app:1").build_json();
        value["request"]["uid"] = json!(123);
        let review = review("/validate", serde_json::to_vec(&value).unwrap()).await;

        assert_eq!(review["response"]["uid"], "123");
        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(review["response"]["status"]["code"], 500);
    }

    #[tokio::test]
    async fn test_garbled_body_fails_closed() {
        let review = review("/validate", b"\x00\x01garbage".to_vec()).await;

        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(review["response"]["status"]["code"], 500);
        assert_eq!(review["response"]["uid"], "");
    }

    #[tokio::test]
    async fn test_empty_body_is_plain_400() {
        let (status, body) = post(router(), "/validate", Some("application/json"), Vec::new()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"empty data body");
        assert!(serde_json::from_slice::<Value>(&body).is_err());
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_400() {
        let body = ReviewBuilder::new(UID).image("registry.example.com/app:1").build();

        let (status, text) = post(router(), "/validate", Some("text/plain"), body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(text).unwrap().contains("text/plain"));

        let (status, _) = post(router(), "/mutate", None, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_is_not_routed() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/validate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let body = ReviewBuilder::new(UID).build();
        let (status, _) = post(router(), "/admit", Some("application/json"), body).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_mutate_noop_allows_without_patch() {
        let body = ReviewBuilder::new(UID).image("evil.io/app:1").build();
        let review = review("/mutate", body).await;

        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], true);
        assert!(review["response"].get("patch").is_none());
    }

    /// Adds a label to every admitted object
    struct LabelInjector;

    impl MutationPolicy for LabelInjector {
        fn name(&self) -> &'static str {
            "label-injector"
        }

        fn evaluate(&self, _object: Option<&kube::core::DynamicObject>) -> Decision {
            let patch: json_patch::Patch = serde_json::from_value(json!([
                {"op": "add", "path": "/metadata/labels", "value": {"registry-gate/checked": "true"}}
            ]))
            .unwrap();
            Decision::allowed().with_patch(patch)
        }
    }

    #[tokio::test]
    async fn test_mutate_with_patching_policy_sets_patch_type() {
        let store = PolicyStore::from_csv("registry.example.com/", PrefixMatch::Prefix);
        let state = WebhookState::new(store).with_mutation(LabelInjector);
        let router = create_webhook_router(Arc::new(state));

        let body = ReviewBuilder::new(UID).image("registry.example.com/app:1").build();
        let (status, body) = post(router, "/mutate", Some("application/json"), body).await;
        assert_eq!(status, StatusCode::OK);

        let review: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], true);
        assert_eq!(review["response"]["patchType"], "JSONPatch");
        assert!(review["response"].get("patch").is_some());
    }
}

mod policy_store_tests {
    use registry_gate::webhooks::{PolicyStore, PrefixMatch};

    #[test]
    fn test_lookalike_registry_depends_on_mode() {
        let image = "registry.example.com.evil.io/app:1";

        let legacy = PolicyStore::from_csv("registry.example.com", PrefixMatch::Prefix);
        assert!(legacy.is_whitelisted(image));

        let strict = PolicyStore::from_csv("registry.example.com", PrefixMatch::PathSegment);
        assert!(!strict.is_whitelisted(image));
    }
}
