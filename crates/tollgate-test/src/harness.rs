//! Gateway construction and logging helpers for tests.

use std::time::Duration;

use serde_json::Value;
use tollgate_gateway::{Arguments, ExecutionPolicy, Gateway, GatewayBuilder};

use crate::fixtures::{
    add_capability, config_resource, echo_capability, failing_capability, greeting_prompt,
    oversized_capability, panicking_capability, path_reader_capability, process_echo_capability,
    run_command_capability, sleeping_capability,
};

/// Output ceiling of the test policy.
pub const TEST_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Budget of the `long_running` fixture.
pub const LONG_RUNNING_BUDGET: Duration = Duration::from_millis(100);

/// Execution policy used by [`test_gateway`]: `cat` and `echo` allowed,
/// 64 KiB output ceiling.
#[must_use]
pub fn test_policy() -> ExecutionPolicy {
    ExecutionPolicy::new()
        .allow_command("cat")
        .allow_command("echo")
        .with_max_output_bytes(TEST_MAX_OUTPUT_BYTES)
}

/// Builder with every fixture registered and sweepers disabled.
///
/// # Panics
///
/// Panics if a fixture fails to register.
#[must_use]
pub fn test_gateway_builder() -> GatewayBuilder {
    let fixtures = [
        add_capability(),
        echo_capability(),
        failing_capability(),
        panicking_capability(),
        oversized_capability(TEST_MAX_OUTPUT_BYTES.saturating_mul(2)),
        path_reader_capability(),
        greeting_prompt(),
        config_resource(),
        process_echo_capability(),
        run_command_capability(),
        sleeping_capability("long_running", Duration::from_secs(5), LONG_RUNNING_BUDGET),
    ];
    fixtures.into_iter().fold(
        GatewayBuilder::new()
            .with_name("tollgate-test")
            .with_execution_policy(test_policy())
            .with_sweep_interval(None),
        |builder, descriptor| {
            builder
                .register(descriptor)
                .expect("fixture capabilities register cleanly")
        },
    )
}

/// A gateway with every fixture registered.
#[must_use]
pub fn test_gateway() -> Gateway {
    test_gateway_builder().build()
}

/// Arguments from a JSON object literal; anything else gives no arguments.
#[must_use]
pub fn args(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => Arguments::new(),
    }
}

/// Install a test-writer subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tollgate_gateway::CapabilityKind;

    #[tokio::test]
    async fn test_gateway_has_every_fixture() {
        let gateway = test_gateway();
        assert_eq!(gateway.registry().len(), 11);
        assert_eq!(gateway.active_sweepers(), 0);
        assert_eq!(
            gateway
                .list_capabilities(Some(CapabilityKind::Resource))
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_add_fixture() {
        init_test_logging();
        let gateway = test_gateway();
        let ints = gateway
            .invoke("add", args(json!({"a": 2, "b": 3})), None)
            .await;
        assert_eq!(ints.payload, Some(json!(5)));
        let floats = gateway
            .invoke("add", args(json!({"a": 0.5, "b": 1})), None)
            .await;
        assert_eq!(floats.payload, Some(json!(1.5)));
    }

    #[test]
    fn test_args_helper() {
        assert_eq!(args(json!({"a": 1})).len(), 1);
        assert!(args(json!([1, 2])).is_empty());
    }
}
