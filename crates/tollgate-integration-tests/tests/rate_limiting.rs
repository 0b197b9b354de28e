//! Per-caller admission control.

use std::time::Duration;

use serde_json::json;
use tollgate_gateway::{AnonymousCallerPolicy, Gateway, OutcomeStatus, RateLimit};
use tollgate_test::{args, test_gateway_builder};

const WINDOW: Duration = Duration::from_secs(10);
const MAX_REQUESTS: u32 = 3;

fn limited_gateway() -> Gateway {
    test_gateway_builder()
        .with_rate_limit(RateLimit::new(MAX_REQUESTS, WINDOW))
        .build()
}

async fn echo(gateway: &Gateway, caller: Option<&str>) -> OutcomeStatus {
    gateway
        .invoke("echo", args(json!({"ping": true})), caller)
        .await
        .status
}

#[tokio::test(start_paused = true)]
async fn test_limit_then_recovery_after_window() {
    let gateway = limited_gateway();

    for _ in 0..MAX_REQUESTS {
        assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::Success);
    }
    let denied = gateway
        .invoke("echo", args(json!({"ping": true})), Some("alice"))
        .await;
    assert_eq!(denied.status, OutcomeStatus::RateLimited);
    let retry_after = denied.error.unwrap().retry_after_ms.unwrap();
    assert!(retry_after > 0);
    assert!(retry_after <= 10_000);

    tokio::time::advance(WINDOW + Duration::from_millis(1)).await;
    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_sliding_window_frees_oldest_slot_first() {
    let gateway = limited_gateway();

    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::Success);
    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::Success);
    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::Success);
    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::RateLimited);

    // Only the first request has left the window.
    tokio::time::advance(Duration::from_secs(7)).await;
    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::Success);
    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::RateLimited);
}

#[tokio::test]
async fn test_callers_are_limited_independently() {
    let gateway = limited_gateway();
    for _ in 0..MAX_REQUESTS {
        echo(&gateway, Some("alice")).await;
    }
    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::RateLimited);
    assert_eq!(echo(&gateway, Some("bob")).await, OutcomeStatus::Success);
    assert_eq!(gateway.limiter().tracked_callers(), 2);
}

#[tokio::test]
async fn test_anonymous_callers_share_one_window() {
    let gateway = test_gateway_builder()
        .with_rate_limit(RateLimit::new(MAX_REQUESTS, WINDOW))
        .with_anonymous_callers(AnonymousCallerPolicy::Shared {
            identity: "anonymous".to_owned(),
        })
        .build();

    for _ in 0..MAX_REQUESTS {
        assert_eq!(echo(&gateway, None).await, OutcomeStatus::Success);
    }
    assert_eq!(echo(&gateway, None).await, OutcomeStatus::RateLimited);
    assert_eq!(gateway.limiter().remaining("anonymous"), 0);
    assert_eq!(echo(&gateway, Some("alice")).await, OutcomeStatus::Success);
}

#[tokio::test]
async fn test_reject_policy_requires_identity() {
    let gateway = test_gateway_builder()
        .with_anonymous_callers(AnonymousCallerPolicy::Reject)
        .build();

    let outcome = gateway.invoke("echo", args(json!({})), None).await;
    assert_eq!(outcome.status, OutcomeStatus::PermissionDenied);
    assert_eq!(outcome.error_code(), Some("permission_denied"));
    assert_eq!(gateway.limiter().tracked_callers(), 0);

    assert_eq!(echo(&gateway, Some("dave")).await, OutcomeStatus::Success);
}

#[tokio::test]
async fn test_rejected_requests_do_not_consume_budget() {
    let gateway = limited_gateway();
    for _ in 0..5 {
        let invalid = gateway
            .invoke("add", args(json!({"a": 1})), Some("erin"))
            .await;
        assert_eq!(invalid.status, OutcomeStatus::ValidationError);
    }
    assert_eq!(gateway.limiter().remaining("erin"), MAX_REQUESTS);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_drops_idle_callers() {
    let gateway = test_gateway_builder()
        .with_rate_limit(RateLimit::new(MAX_REQUESTS, WINDOW))
        .with_sweep_interval(Some(Duration::from_secs(30)))
        .build();
    assert_eq!(gateway.active_sweepers(), 2);

    echo(&gateway, Some("frank")).await;
    assert_eq!(gateway.limiter().tracked_callers(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(gateway.limiter().tracked_callers(), 0);

    gateway.shutdown();
    assert_eq!(gateway.active_sweepers(), 0);
}
