//! Wire-level request handling: decode, serve, encode.

use serde_json::{Value, json};
use tollgate_gateway::{Gateway, GatewayRequest, OutcomeStatus};
use tollgate_test::test_gateway;

async fn roundtrip(gateway: &Gateway, request: Value) -> Value {
    let request: GatewayRequest = serde_json::from_value(request).unwrap();
    let response = gateway.handle(request).await;
    serde_json::to_value(response).unwrap()
}

#[tokio::test]
async fn test_invoke_success_envelope() {
    let gateway = test_gateway();
    let response = roundtrip(
        &gateway,
        json!({"method": "invoke", "id": "1", "capability": "add", "arguments": {"a": 2, "b": 3}}),
    )
    .await;

    assert_eq!(response["id"], "1");
    assert_eq!(response["status"], "success");
    assert_eq!(response["payload"], 5);
    assert_eq!(response["cached"], false);
    assert!(response["durationMs"].is_u64());
    assert!(response.get("errorCode").is_none());
}

#[tokio::test]
async fn test_cached_flag_on_wire() {
    let gateway = test_gateway();
    let request = json!({"method": "invoke", "capability": "add", "arguments": {"a": 1, "b": 1}});
    roundtrip(&gateway, request.clone()).await;
    let second = roundtrip(&gateway, request).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["payload"], 2);
}

#[tokio::test]
async fn test_error_codes_are_stable_strings() {
    let gateway = test_gateway();
    let cases = [
        (
            json!({"method": "invoke", "capability": "nope"}),
            "not_found",
        ),
        (
            json!({"method": "invoke", "capability": "add", "arguments": {"a": 1}}),
            "validation_error",
        ),
        (
            json!({"method": "invoke", "capability": "run_command", "arguments": {"command": "rm"}}),
            "permission_denied",
        ),
        (
            json!({"method": "invoke", "capability": "failing"}),
            "internal_error",
        ),
        (
            json!({"method": "invoke", "capability": "oversized"}),
            "output_too_large",
        ),
        (
            json!({"method": "readResource", "uri": "config://nowhere"}),
            "not_found",
        ),
        (
            json!({"method": "renderPrompt", "name": "add"}),
            "not_found",
        ),
    ];
    for (request, code) in cases {
        let response = roundtrip(&gateway, request.clone()).await;
        assert_eq!(response["errorCode"], code, "{request}");
        assert!(response["errorMessage"].is_string());
        assert!(response.get("payload").is_none());
    }
}

#[tokio::test]
async fn test_violations_on_wire() {
    let gateway = test_gateway();
    let response = roundtrip(
        &gateway,
        json!({"method": "invoke", "capability": "read_file", "arguments": {"path": "../etc/passwd"}}),
    )
    .await;
    assert_eq!(response["status"], "validationError");
    assert_eq!(response["violations"][0]["field"], "path");
    assert_eq!(response["violations"][0]["kind"], "path_traversal");
    assert!(!response["errorMessage"].as_str().unwrap().contains("passwd"));
}

#[tokio::test]
async fn test_list_capabilities() {
    let gateway = test_gateway();
    let all = roundtrip(&gateway, json!({"method": "listCapabilities"})).await;
    assert_eq!(all["payload"].as_array().unwrap().len(), 11);

    let tools = roundtrip(
        &gateway,
        json!({"method": "listCapabilities", "kind": "tool"}),
    )
    .await;
    let add = tools["payload"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "add")
        .unwrap()
        .clone();
    assert_eq!(add["kind"], "tool");
    assert_eq!(add["readOnly"], true);
    assert_eq!(add["inputSchema"]["type"], "object");
    assert_eq!(add["inputSchema"]["required"], json!(["a", "b"]));
}

#[tokio::test]
async fn test_read_resource_and_render_prompt() {
    let gateway = test_gateway();
    let resource = roundtrip(
        &gateway,
        json!({"method": "readResource", "id": "r", "uri": "config://app", "callerIdentity": "ui"}),
    )
    .await;
    assert_eq!(resource["id"], "r");
    assert_eq!(resource["payload"]["uri"], "config://app");
    assert_eq!(resource["payload"]["mimeType"], "application/json");
    assert_eq!(resource["payload"]["content"]["retries"], 3);

    let prompt = roundtrip(
        &gateway,
        json!({"method": "renderPrompt", "name": "greeting", "arguments": {"name": "Lin", "place": "the gate"}}),
    )
    .await;
    assert_eq!(
        prompt["payload"]["renderedText"],
        "Hello, Lin! Welcome to the gate."
    );
}

#[tokio::test]
async fn test_health_report() {
    let gateway = test_gateway();
    roundtrip(
        &gateway,
        json!({"method": "invoke", "capability": "add", "arguments": {"a": 1, "b": 2}, "callerIdentity": "h"}),
    )
    .await;
    let health = roundtrip(&gateway, json!({"method": "health", "id": "hc"})).await;

    assert_eq!(health["id"], "hc");
    let report = &health["payload"];
    assert_eq!(report["name"], "tollgate-test");
    assert_eq!(report["capabilities"], 11);
    assert_eq!(report["trackedCallers"], 1);
    assert_eq!(report["inFlight"], 0);
    assert_eq!(report["cache"]["size"], 1);
    assert_eq!(report["metrics"]["add"]["count"], 1);
    assert_eq!(report["metrics"]["add"]["statusCounts"]["success"], 1);
}

#[tokio::test]
async fn test_direct_status_matches_wire_status() {
    let gateway = test_gateway();
    let outcome = gateway
        .invoke("nope", serde_json::Map::new(), None)
        .await;
    assert_eq!(outcome.status, OutcomeStatus::NotFound);
    let wire = serde_json::to_value(outcome.status).unwrap();
    assert_eq!(wire, "notFound");
}
