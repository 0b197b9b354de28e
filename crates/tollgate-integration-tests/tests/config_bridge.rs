//! TOML configuration applied through the gateway builder.

use std::time::Duration;

use serde_json::json;
use tollgate_config::{Config, ConfigError};
use tollgate_gateway::{GatewayBuilder, GatewayError, OutcomeStatus};
use tollgate_telemetry::{LogConfig, LogFormat};
use tollgate_test::{
    add_capability, args, echo_capability, path_reader_capability, run_command_capability,
};

#[tokio::test]
async fn test_config_file_drives_the_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let allowed = dir.path().join("data");
    std::fs::create_dir(&allowed).unwrap();
    std::fs::write(allowed.join("note.txt"), "from config").unwrap();

    let path = dir.path().join("tollgate.toml");
    std::fs::write(
        &path,
        format!(
            r#"
            [gateway]
            name = "configured"
            sweep_interval_secs = 0

            [rate_limit]
            max_requests = 2
            window_ms = 60000

            [cache]
            capacity = 8
            default_ttl_secs = 30

            [execution]
            max_execution_time_ms = 500
            allowed_commands = ["echo"]
            allowed_roots = ["{}"]

            [callers]
            anonymous = "shared"
            anonymous_identity = "guest"
            "#,
            allowed.display()
        ),
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    let gateway = GatewayBuilder::from_config(&config)
        .unwrap()
        .register(add_capability())
        .unwrap()
        .register(path_reader_capability())
        .unwrap()
        .register(run_command_capability())
        .unwrap()
        .build();

    assert_eq!(gateway.name(), "configured");
    assert_eq!(gateway.cache().capacity(), 8);
    assert_eq!(gateway.cache().default_ttl(), Duration::from_secs(30));
    assert_eq!(gateway.active_sweepers(), 0);

    let note = gateway
        .invoke(
            "read_file",
            args(json!({"path": allowed.join("note.txt")})),
            Some("u1"),
        )
        .await;
    assert_eq!(note.payload, Some(json!("from config")));

    let outside = gateway
        .invoke("read_file", args(json!({"path": path})), Some("u2"))
        .await;
    assert_eq!(outside.status, OutcomeStatus::PermissionDenied);

    let denied = gateway
        .invoke("run_command", args(json!({"command": "cat"})), Some("u3"))
        .await;
    assert_eq!(denied.status, OutcomeStatus::PermissionDenied);

    // Anonymous requests share the "guest" window of two.
    for _ in 0..2 {
        let ok = gateway
            .invoke("add", args(json!({"a": 1, "b": 1})), None)
            .await;
        assert!(ok.is_success());
    }
    let limited = gateway
        .invoke("add", args(json!({"a": 1, "b": 1})), None)
        .await;
    assert_eq!(limited.status, OutcomeStatus::RateLimited);
    assert_eq!(gateway.limiter().remaining("guest"), 0);
}

#[test]
fn test_invalid_config_is_rejected_by_builder() {
    let mut config = Config::default();
    config.rate_limit.max_requests = 0;
    let err = GatewayBuilder::from_config(&config).unwrap_err();
    match err {
        GatewayError::Config(ConfigError::ValidationError { field, .. }) => {
            assert_eq!(field, "rate_limit.max_requests");
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_malformed_toml() {
    let err = Config::from_toml_str("[rate_limit\nmax_requests = 1").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
}

#[tokio::test]
async fn test_reject_policy_from_config() {
    let config = Config::from_toml_str(
        r#"
        [callers]
        anonymous = "reject"
        "#,
    )
    .unwrap();
    let gateway = GatewayBuilder::from_config(&config)
        .unwrap()
        .register(echo_capability())
        .unwrap()
        .build();

    let anonymous = gateway.invoke("echo", args(json!({})), None).await;
    assert_eq!(anonymous.status, OutcomeStatus::PermissionDenied);
    let named = gateway.invoke("echo", args(json!({})), Some("ops")).await;
    assert!(named.is_success());
    gateway.shutdown();
}

#[test]
fn test_logging_section_maps_to_log_config() {
    let config = Config::from_toml_str(
        r#"
        [logging]
        level = "debug"
        format = "json"
        directives = ["tollgate_gateway=trace"]
        "#,
    )
    .unwrap();
    let log = LogConfig::from_section(&config.logging);
    assert_eq!(log.level, "debug");
    assert_eq!(log.format, LogFormat::Json);
    assert_eq!(log.directives, vec!["tollgate_gateway=trace".to_owned()]);
}

#[test]
fn test_config_roundtrips_through_toml() {
    let config = Config::default();
    let text = config.to_toml_string().unwrap();
    let parsed = Config::from_toml_str(&text).unwrap();
    assert_eq!(parsed, config);
}
