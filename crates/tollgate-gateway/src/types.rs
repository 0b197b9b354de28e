//! Request and outcome types shared by every pipeline stage.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::validator::Violation;

/// Named arguments of an invocation.
pub type Arguments = serde_json::Map<String, Value>;

/// Message returned to callers for every internal failure.
pub(crate) const INTERNAL_ERROR_MESSAGE: &str = "the capability failed to complete";

/// What a capability exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// An action that may have side effects.
    Tool,
    /// Readable content addressed by URI.
    Resource,
    /// A parameterized message template.
    Prompt,
}

impl CapabilityKind {
    /// Lowercase name used in logs and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Correlation identifier.
    pub id: String,
    /// Target capability name.
    pub capability: String,
    /// Named arguments.
    #[serde(default)]
    pub arguments: Arguments,
    /// Identity used for admission control.
    #[serde(default, rename = "callerIdentity")]
    pub caller: Option<String>,
}

impl Request {
    /// Create a request with a generated ID and no caller identity.
    #[must_use]
    pub fn new(capability: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            capability: capability.into(),
            arguments,
            caller: None,
        }
    }

    /// Use a transport-supplied correlation ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the caller identity.
    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// Result category of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeStatus {
    /// The capability produced a payload.
    Success,
    /// Arguments did not satisfy the input schema.
    ValidationError,
    /// Arguments reference something the execution policy forbids.
    PermissionDenied,
    /// The caller exceeded its admission window.
    RateLimited,
    /// No such capability or resource.
    NotFound,
    /// Execution exceeded its time budget.
    Timeout,
    /// Execution produced more output than allowed.
    OutputTooLarge,
    /// The handler failed or panicked.
    InternalError,
}

impl OutcomeStatus {
    /// Stable `snake_case` error code, `None` for success.
    #[must_use]
    pub fn error_code(self) -> Option<&'static str> {
        match self {
            Self::Success => None,
            Self::ValidationError => Some("validation_error"),
            Self::PermissionDenied => Some("permission_denied"),
            Self::RateLimited => Some("rate_limited"),
            Self::NotFound => Some("not_found"),
            Self::Timeout => Some("timeout"),
            Self::OutputTooLarge => Some("output_too_large"),
            Self::InternalError => Some("internal_error"),
        }
    }

    /// camelCase name, as serialized.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ValidationError => "validationError",
            Self::PermissionDenied => "permissionDenied",
            Self::RateLimited => "rateLimited",
            Self::NotFound => "notFound",
            Self::Timeout => "timeout",
            Self::OutputTooLarge => "outputTooLarge",
            Self::InternalError => "internalError",
        }
    }

    /// Whether this status is `Success`.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing description of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    /// Stable error code.
    pub code: String,
    /// Human-readable summary. Never carries internal detail.
    pub message: String,
    /// Suggested wait before retrying (rate limiting only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Per-field findings (validation and permission failures).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

/// Terminal result of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// Result category.
    pub status: OutcomeStatus,
    /// Produced value, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Failure description, present only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Wall-clock time from receipt to completion.
    pub duration_ms: u64,
    /// Whether the payload came from the result cache.
    #[serde(default)]
    pub cached: bool,
}

impl ExecutionOutcome {
    /// Successful outcome carrying `payload`.
    #[must_use]
    pub fn success(payload: Value) -> Self {
        Self {
            status: OutcomeStatus::Success,
            payload: Some(payload),
            error: None,
            duration_ms: 0,
            cached: false,
        }
    }

    /// Failed outcome with the given status and caller-facing message.
    ///
    /// A `Success` status is coerced to `InternalError`: a failure must carry
    /// an error code.
    #[must_use]
    pub fn failure(status: OutcomeStatus, message: impl Into<String>) -> Self {
        let status = if status.is_success() {
            OutcomeStatus::InternalError
        } else {
            status
        };
        Self {
            status,
            payload: None,
            error: Some(ErrorDetail {
                code: status.error_code().unwrap_or("internal_error").to_owned(),
                message: message.into(),
                retry_after_ms: None,
                violations: Vec::new(),
            }),
            duration_ms: 0,
            cached: false,
        }
    }

    /// Generic internal failure. Detail belongs in the logs, not here.
    #[must_use]
    pub fn internal() -> Self {
        Self::failure(OutcomeStatus::InternalError, INTERNAL_ERROR_MESSAGE)
    }

    /// Unknown capability or resource.
    #[must_use]
    pub fn not_found(what: &str) -> Self {
        Self::failure(OutcomeStatus::NotFound, format!("{what} not found"))
    }

    /// Admission refused; retry after `retry_after`.
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        let retry_ms = duration_ms(retry_after);
        let mut outcome = Self::failure(
            OutcomeStatus::RateLimited,
            format!("rate limit exceeded; retry after {retry_ms}ms"),
        );
        if let Some(error) = outcome.error.as_mut() {
            error.retry_after_ms = Some(retry_ms);
        }
        outcome
    }

    /// Attach per-field violations to the error detail.
    #[must_use]
    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.violations = violations;
        }
        self
    }

    /// Set the measured duration.
    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = duration_ms(elapsed);
        self
    }

    /// Mark the payload as served from cache.
    #[must_use]
    pub fn from_cache(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Whether the status is `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Stable error code, `None` on success.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Caller-facing error message, `None` on success.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
