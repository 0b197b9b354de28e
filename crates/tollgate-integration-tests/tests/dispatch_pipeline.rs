//! End-to-end behavior of the request pipeline.

use serde_json::json;
use tollgate_gateway::{ExecutionPolicy, OutcomeStatus, Request, ViolationKind};
use tollgate_test::{
    CountingHandler, SECRET_FAILURE, args, counting_capability, init_test_logging, test_gateway,
    test_gateway_builder, test_policy,
};

#[tokio::test]
async fn test_add_returns_sum() {
    init_test_logging();
    let gateway = test_gateway();
    let outcome = gateway
        .invoke("add", args(json!({"a": 2, "b": 3})), Some("alice"))
        .await;
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.payload, Some(json!(5)));
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_unknown_capability_is_not_found() {
    let gateway = test_gateway();
    let outcome = gateway.invoke("does_not_exist", args(json!({})), None).await;
    assert_eq!(outcome.status, OutcomeStatus::NotFound);
    assert_eq!(outcome.error_code(), Some("not_found"));

    let resource = gateway.read_resource("config://missing", None).await;
    assert_eq!(resource.unwrap_err().status, OutcomeStatus::NotFound);
}

#[tokio::test]
async fn test_second_read_only_call_is_served_from_cache() {
    let handler = CountingHandler::new();
    let gateway = test_gateway_builder()
        .register(counting_capability("lookup", handler.clone()))
        .unwrap()
        .build();

    let first = gateway
        .invoke("lookup", args(json!({"key": "k1"})), None)
        .await;
    let second = gateway
        .invoke("lookup", args(json!({"key": "k1"})), None)
        .await;

    assert_eq!(first.payload, second.payload);
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(handler.calls(), 1);

    let metrics = gateway.tracker().capability("lookup").unwrap();
    assert_eq!(metrics.count, 2);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(gateway.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_side_effecting_tools_are_never_cached() {
    let gateway = test_gateway();
    for _ in 0..2 {
        let outcome = gateway.invoke("echo", args(json!({"n": 1})), None).await;
        assert_eq!(outcome.payload, Some(json!({"n": 1})));
        assert!(!outcome.cached);
    }
    assert!(gateway.cache().is_empty());
}

#[tokio::test]
async fn test_missing_required_field() {
    let gateway = test_gateway();
    let outcome = gateway.invoke("add", args(json!({"a": 2})), None).await;
    assert_eq!(outcome.status, OutcomeStatus::ValidationError);
    let error = outcome.error.unwrap();
    assert_eq!(error.violations.len(), 1);
    assert_eq!(error.violations[0].field, "b");
    assert_eq!(error.violations[0].kind, ViolationKind::Missing);
}

#[tokio::test]
async fn test_type_mismatch() {
    let gateway = test_gateway();
    let outcome = gateway
        .invoke("add", args(json!({"a": "two", "b": 3})), None)
        .await;
    assert_eq!(outcome.status, OutcomeStatus::ValidationError);
    assert_eq!(
        outcome.error.unwrap().violations[0].kind,
        ViolationKind::TypeMismatch
    );
}

#[tokio::test]
async fn test_traversal_is_rejected_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    let secret = dir.path().join("secret.txt");
    std::fs::write(&secret, "top secret").unwrap();

    let gateway = test_gateway();
    let path = format!("{}/sub/../secret.txt", dir.path().display());
    let outcome = gateway
        .invoke("read_file", args(json!({"path": path})), None)
        .await;

    assert_eq!(outcome.status, OutcomeStatus::ValidationError);
    let error = outcome.error.unwrap();
    assert_eq!(error.violations[0].kind, ViolationKind::PathTraversal);
    // The message names the field, never the value.
    assert!(!error.message.contains("secret"));
    assert!(gateway.cache().is_empty());
    assert_eq!(gateway.cache().stats().misses, 0);
}

#[tokio::test]
async fn test_reserved_path_characters_are_rejected() {
    let gateway = test_gateway();
    for path in ["notes|rm", "a\u{0}b", "what?.txt"] {
        let outcome = gateway
            .invoke("read_file", args(json!({"path": path})), None)
            .await;
        assert_eq!(outcome.status, OutcomeStatus::ValidationError, "{path:?}");
        assert_eq!(
            outcome.error.unwrap().violations[0].kind,
            ViolationKind::UnsafePath
        );
    }
}

#[tokio::test]
async fn test_path_roots_are_enforced() {
    let allowed = tempfile::tempdir().unwrap();
    let other = tempfile::tempdir().unwrap();
    let inside = allowed.path().join("inside.txt");
    let outside = other.path().join("outside.txt");
    std::fs::write(&inside, "hello").unwrap();
    std::fs::write(&outside, "nope").unwrap();

    let gateway = test_gateway_builder()
        .with_execution_policy(test_policy().allow_root(allowed.path()))
        .build();

    let ok = gateway
        .invoke("read_file", args(json!({"path": inside})), None)
        .await;
    assert_eq!(ok.payload, Some(json!("hello")));

    let denied = gateway
        .invoke("read_file", args(json!({"path": outside})), None)
        .await;
    assert_eq!(denied.status, OutcomeStatus::PermissionDenied);
    assert_eq!(
        denied.error.unwrap().violations[0].kind,
        ViolationKind::PathNotAllowed
    );
}

#[tokio::test]
async fn test_handler_failure_does_not_leak_detail() {
    let gateway = test_gateway();
    let outcome = gateway.invoke("failing", args(json!({})), None).await;
    assert_eq!(outcome.status, OutcomeStatus::InternalError);
    let message = outcome.error_message().unwrap();
    assert!(!message.contains("hunter2"));
    assert_ne!(message, SECRET_FAILURE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_is_isolated() {
    let gateway = test_gateway();
    let outcome = gateway.invoke("panicking", args(json!({})), None).await;
    assert_eq!(outcome.status, OutcomeStatus::InternalError);

    let after = gateway
        .invoke("add", args(json!({"a": 1, "b": 1})), None)
        .await;
    assert_eq!(after.payload, Some(json!(2)));
}

#[tokio::test]
async fn test_oversized_output_is_discarded() {
    let gateway = test_gateway();
    let outcome = gateway.invoke("oversized", args(json!({})), None).await;
    assert_eq!(outcome.status, OutcomeStatus::OutputTooLarge);
    assert!(outcome.payload.is_none());
}

#[tokio::test]
async fn test_every_request_is_tracked() {
    let gateway = test_gateway();
    gateway
        .invoke("add", args(json!({"a": 1, "b": 2})), None)
        .await;
    gateway.invoke("add", args(json!({"a": 1})), None).await;
    gateway.invoke("nope", args(json!({})), None).await;

    let add = gateway.tracker().capability("add").unwrap();
    assert_eq!(add.count, 2);
    assert_eq!(add.status_count(OutcomeStatus::Success), 1);
    assert_eq!(add.status_count(OutcomeStatus::ValidationError), 1);
    assert_eq!(gateway.tracker().total_requests(), 3);
}

#[tokio::test]
async fn test_dispatch_keeps_request_id() {
    let gateway = test_gateway();
    let request = Request::new("echo", args(json!({"x": true})))
        .with_id("corr-42")
        .with_caller("bob");
    let outcome = gateway.dispatch(request).await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_prompt_rendering() {
    let gateway = test_gateway();
    let rendered = gateway
        .render_prompt("greeting", args(json!({"name": "Ada"})), None)
        .await
        .unwrap();
    assert_eq!(rendered.rendered_text, "Hello, Ada! Welcome to Tollgate.");

    let missing = gateway
        .render_prompt("greeting", args(json!({})), None)
        .await
        .unwrap_err();
    assert_eq!(missing.status, OutcomeStatus::ValidationError);

    let unknown = gateway
        .render_prompt("greeting", args(json!({"name": "Ada", "mood": "happy"})), None)
        .await
        .unwrap_err();
    assert_eq!(
        unknown.error.unwrap().violations[0].kind,
        ViolationKind::UnknownField
    );
}

#[tokio::test]
async fn test_resource_read() {
    let gateway = test_gateway();
    let content = gateway
        .read_resource(tollgate_test::CONFIG_URI, Some("carol"))
        .await
        .unwrap();
    assert_eq!(content.uri, "config://app");
    assert_eq!(content.mime_type.as_deref(), Some("application/json"));
    assert_eq!(content.content["theme"], "dark");
}

#[tokio::test]
async fn test_policy_without_roots_accepts_any_clean_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plain.txt");
    std::fs::write(&file, "plain").unwrap();

    let gateway = test_gateway_builder()
        .with_execution_policy(ExecutionPolicy::new())
        .build();
    let outcome = gateway
        .invoke("read_file", args(json!({"path": file})), None)
        .await;
    assert_eq!(outcome.payload, Some(json!("plain")));
}
