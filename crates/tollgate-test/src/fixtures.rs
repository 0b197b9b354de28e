//! Fixture capabilities covering each handler kind and failure mode.

use std::time::Duration;

use serde_json::{Value, json};
use tollgate_gateway::{
    Arguments, CapabilityDescriptor, CapabilityHandler, FieldSpec, FieldType, HandlerError,
    InputSchema, ProcessSpec, PromptTemplate,
};

use crate::mocks::CountingHandler;

/// Message returned by [`failing_capability`]. Must never reach a caller.
pub const SECRET_FAILURE: &str = "connection to db://admin:hunter2@10.0.0.5 refused";

/// URI of [`config_resource`].
pub const CONFIG_URI: &str = "config://app";

/// Read-only `add(a, b)`. Integer inputs give an integer sum.
#[must_use]
pub fn add_capability() -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "add",
        CapabilityHandler::native(|args| async move {
            let a = args.get("a").unwrap_or(&Value::Null);
            let b = args.get("b").unwrap_or(&Value::Null);
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return a
                    .checked_add(b)
                    .map(Value::from)
                    .ok_or_else(|| HandlerError::failed("integer overflow"));
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => Ok(json!(a + b)),
                _ => Err(HandlerError::InvalidArguments("a and b must be numbers".into())),
            }
        }),
    )
    .with_description("Add two numbers")
    .with_schema(
        InputSchema::new()
            .field(FieldSpec::required("a", FieldType::Number).with_description("First addend"))
            .field(FieldSpec::required("b", FieldType::Number).with_description("Second addend")),
    )
    .read_only()
}

/// Side-effecting `echo` that returns its arguments.
#[must_use]
pub fn echo_capability() -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "echo",
        CapabilityHandler::native(|args| async move { Ok(Value::Object(args)) }),
    )
    .with_description("Return the arguments unchanged")
}

/// Read-only capability backed by `handler`, keyed by a `key` argument.
#[must_use]
pub fn counting_capability(name: &str, handler: CountingHandler) -> CapabilityDescriptor {
    CapabilityDescriptor::tool(name, CapabilityHandler::Native(std::sync::Arc::new(handler)))
        .with_schema(InputSchema::new().field(FieldSpec::optional("key", FieldType::Any)))
        .read_only()
}

/// Sleeps for `sleep` under an execution budget of `budget`.
#[must_use]
pub fn sleeping_capability(name: &str, sleep: Duration, budget: Duration) -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        name,
        CapabilityHandler::native(move |_| async move {
            tokio::time::sleep(sleep).await;
            Ok(json!("done"))
        }),
    )
    .with_max_execution_time(budget)
}

/// Always fails with [`SECRET_FAILURE`].
#[must_use]
pub fn failing_capability() -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "failing",
        CapabilityHandler::native(|_| async { Err(HandlerError::failed(SECRET_FAILURE)) }),
    )
}

/// Panics inside its handler.
#[must_use]
pub fn panicking_capability() -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "panicking",
        CapabilityHandler::native(|_| async {
            if std::hint::black_box(true) {
                panic!("handler blew up");
            }
            Ok(Value::Null)
        }),
    )
}

/// Returns a string of `bytes` characters.
#[must_use]
pub fn oversized_capability(bytes: usize) -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "oversized",
        CapabilityHandler::native(move |_| async move { Ok(Value::String("x".repeat(bytes))) }),
    )
}

/// Read-only `read_file(path)` returning the file's text.
#[must_use]
pub fn path_reader_capability() -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "read_file",
        CapabilityHandler::native(|args: Arguments| async move {
            let path = args
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::InvalidArguments("path is required".into()))?;
            let text = tokio::fs::read_to_string(path).await?;
            Ok::<_, HandlerError>(Value::String(text))
        }),
    )
    .with_schema(InputSchema::new().field(FieldSpec::required("path", FieldType::Path)))
    .read_only()
}

/// `greeting(name, place = "Tollgate")` prompt.
#[must_use]
pub fn greeting_prompt() -> CapabilityDescriptor {
    CapabilityDescriptor::prompt(
        "greeting",
        PromptTemplate::new("Hello, {{name}}! Welcome to {{place}}."),
    )
    .with_description("Greet a visitor")
    .with_schema(
        InputSchema::new()
            .field(FieldSpec::required("name", FieldType::String))
            .field(FieldSpec::optional("place", FieldType::String).with_default(json!("Tollgate"))),
    )
}

/// JSON resource at [`CONFIG_URI`].
#[must_use]
pub fn config_resource() -> CapabilityDescriptor {
    CapabilityDescriptor::resource(
        "app_config",
        CONFIG_URI,
        "application/json",
        CapabilityHandler::native(|_| async { Ok(json!({"theme": "dark", "retries": 3})) }),
    )
    .with_description("Application settings")
}

/// Pipes its JSON arguments through `cat`.
#[must_use]
pub fn process_echo_capability() -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "process_echo",
        CapabilityHandler::Process(ProcessSpec::fixed("cat")),
    )
    .with_schema(InputSchema::new().field(FieldSpec::optional("message", FieldType::String)))
}

/// Runs the program named by its `command` argument.
#[must_use]
pub fn run_command_capability() -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "run_command",
        CapabilityHandler::Process(ProcessSpec::from_argument("command")),
    )
    .with_schema(InputSchema::new().field(FieldSpec::required("command", FieldType::String)))
}
