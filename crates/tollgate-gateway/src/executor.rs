//! Bounded execution of capability handlers.
//!
//! Every native and process handler runs on its own Tokio task. The executor
//! waits on it for at most the execution budget and aborts it at expiry, so a
//! runaway handler can only ever cost its own request. Panics surface as
//! join errors and become `internalError` like any other handler failure.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::error::HandlerError;
use crate::policy::{ExecutionLimits, ExecutionPolicy};
use crate::process::{self, ProcessFailure};
use crate::registry::{CapabilityDescriptor, CapabilityHandler};
use crate::types::{Arguments, ExecutionOutcome, OutcomeStatus};

/// Why a spawned handler did not produce a value.
enum TaskFailure {
    Handler(HandlerError),
    Process(ProcessFailure),
}

/// Runs capability handlers under time and output limits.
#[derive(Debug, Clone, Default)]
pub struct SandboxedExecutor {
    policy: Arc<ExecutionPolicy>,
}

impl SandboxedExecutor {
    /// Executor enforcing `policy`.
    #[must_use]
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// The enforced policy.
    #[must_use]
    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Limits for `descriptor`: the policy defaults with the descriptor's
    /// own budget applied when it sets one.
    #[must_use]
    pub fn limits_for(&self, descriptor: &CapabilityDescriptor) -> ExecutionLimits {
        let mut limits = self.policy.limits();
        if let Some(budget) = descriptor.max_execution_time {
            limits.max_execution_time = budget;
        }
        limits
    }

    /// Run `descriptor`'s handler with validated `arguments`.
    ///
    /// Never returns a partial result: on timeout or output overflow the
    /// execution is terminated and its output discarded. The returned
    /// outcome carries no duration; the dispatcher measures that.
    pub async fn execute(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: Arguments,
        limits: ExecutionLimits,
    ) -> ExecutionOutcome {
        let mut task = match &descriptor.handler {
            CapabilityHandler::Template(template) => {
                let rendered = template.render(&arguments, &descriptor.input_schema);
                return check_size(descriptor, Value::String(rendered), limits);
            },
            CapabilityHandler::Native(handler) => {
                let handler = Arc::clone(handler);
                tokio::spawn(async move { handler.call(arguments).await.map_err(TaskFailure::Handler) })
            },
            CapabilityHandler::Process(spec) => {
                let command = match spec.resolve(&arguments) {
                    Ok(command) => command,
                    Err(issue) => {
                        warn!(capability = %descriptor.name, ?issue, "Command could not be resolved");
                        return ExecutionOutcome::failure(
                            OutcomeStatus::ValidationError,
                            "command argument is invalid",
                        );
                    },
                };
                if !self.policy.is_command_allowed(command.command_name()) {
                    warn!(
                        security = true,
                        capability = %descriptor.name,
                        command = %command.command_name(),
                        "Refused to spawn command outside the allow-list"
                    );
                    return ExecutionOutcome::failure(
                        OutcomeStatus::PermissionDenied,
                        "command is not allowed",
                    );
                }
                let input = match serde_json::to_vec(&arguments) {
                    Ok(input) => input,
                    Err(e) => {
                        error!(capability = %descriptor.name, error = %e, "Failed to encode arguments");
                        return ExecutionOutcome::internal();
                    },
                };
                let max_output = limits.max_output_bytes;
                let sandboxed = self.policy.sandbox_env();
                tokio::spawn(async move {
                    process::run(command, input, max_output, sandboxed)
                        .await
                        .map_err(TaskFailure::Process)
                })
            },
        };

        let joined = match tokio::time::timeout(limits.max_execution_time, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                warn!(
                    capability = %descriptor.name,
                    budget_ms = u64::try_from(limits.max_execution_time.as_millis()).unwrap_or(u64::MAX),
                    "Execution timed out, task aborted"
                );
                return ExecutionOutcome::failure(
                    OutcomeStatus::Timeout,
                    format!(
                        "execution exceeded {}ms",
                        limits.max_execution_time.as_millis()
                    ),
                );
            },
        };

        match joined {
            Ok(Ok(value)) => check_size(descriptor, value, limits),
            Ok(Err(TaskFailure::Process(ProcessFailure::OutputTooLarge))) => {
                output_too_large(limits)
            },
            Ok(Err(TaskFailure::Process(failure))) => {
                error!(capability = %descriptor.name, error = %failure, "Capability process failed");
                ExecutionOutcome::internal()
            },
            Ok(Err(TaskFailure::Handler(e))) => {
                error!(capability = %descriptor.name, error = %e, "Capability handler failed");
                ExecutionOutcome::internal()
            },
            Err(join_error) if join_error.is_panic() => {
                error!(capability = %descriptor.name, "Capability handler panicked");
                ExecutionOutcome::internal()
            },
            Err(join_error) => {
                error!(capability = %descriptor.name, error = %join_error, "Capability task was cancelled");
                ExecutionOutcome::internal()
            },
        }
    }
}

fn output_too_large(limits: ExecutionLimits) -> ExecutionOutcome {
    ExecutionOutcome::failure(
        OutcomeStatus::OutputTooLarge,
        format!("output exceeded {} bytes", limits.max_output_bytes),
    )
}

/// Measure a produced value by its serialized size.
fn check_size(
    descriptor: &CapabilityDescriptor,
    value: Value,
    limits: ExecutionLimits,
) -> ExecutionOutcome {
    let size = match &value {
        Value::String(s) => s.len(),
        other => match serde_json::to_vec(other) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                error!(capability = %descriptor.name, error = %e, "Failed to measure output");
                return ExecutionOutcome::internal();
            },
        },
    };
    if size > limits.max_output_bytes {
        warn!(
            capability = %descriptor.name,
            size,
            limit = limits.max_output_bytes,
            "Output exceeded ceiling, discarded"
        );
        return output_too_large(limits);
    }
    ExecutionOutcome::success(value)
}
