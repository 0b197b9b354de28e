//! Wire-level request and response envelopes.
//!
//! The transport decodes one [`GatewayRequest`] per message, hands it to
//! [`Gateway::handle`](crate::Gateway::handle) and encodes the returned
//! [`ResponseEnvelope`]. Framing is the transport's concern.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheStats;
use crate::tracker::CapabilityMetrics;
use crate::types::{Arguments, CapabilityKind, ExecutionOutcome, OutcomeStatus};
use crate::validator::Violation;

/// A method call from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayRequest {
    /// List registered capabilities, optionally of one kind.
    ListCapabilities {
        /// Correlation ID echoed in the response.
        #[serde(default)]
        id: Option<String>,
        /// Restrict the listing to this kind.
        #[serde(default)]
        kind: Option<CapabilityKind>,
    },
    /// Invoke a capability by name.
    Invoke {
        /// Correlation ID echoed in the response.
        #[serde(default)]
        id: Option<String>,
        /// Capability name.
        capability: String,
        /// Named arguments.
        #[serde(default)]
        arguments: Arguments,
        /// Identity used for admission control.
        #[serde(default)]
        caller_identity: Option<String>,
    },
    /// Read a resource by URI.
    ReadResource {
        /// Correlation ID echoed in the response.
        #[serde(default)]
        id: Option<String>,
        /// Resource URI.
        uri: String,
        /// Identity used for admission control.
        #[serde(default)]
        caller_identity: Option<String>,
    },
    /// Render a prompt template.
    RenderPrompt {
        /// Correlation ID echoed in the response.
        #[serde(default)]
        id: Option<String>,
        /// Prompt name.
        name: String,
        /// Template arguments.
        #[serde(default)]
        arguments: Arguments,
        /// Identity used for admission control.
        #[serde(default)]
        caller_identity: Option<String>,
    },
    /// Report gateway health.
    Health {
        /// Correlation ID echoed in the response.
        #[serde(default)]
        id: Option<String>,
    },
}

impl GatewayRequest {
    /// Correlation ID supplied by the transport, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::ListCapabilities { id, .. }
            | Self::Invoke { id, .. }
            | Self::ReadResource { id, .. }
            | Self::RenderPrompt { id, .. }
            | Self::Health { id } => id.as_deref(),
        }
    }

    /// Method name, as on the wire.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::ListCapabilities { .. } => "listCapabilities",
            Self::Invoke { .. } => "invoke",
            Self::ReadResource { .. } => "readResource",
            Self::RenderPrompt { .. } => "renderPrompt",
            Self::Health { .. } => "health",
        }
    }
}

/// The response to one [`GatewayRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Correlation ID.
    pub id: String,
    /// Result category.
    pub status: OutcomeStatus,
    /// Produced value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Stable `snake_case` error code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Caller-facing failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Suggested wait before retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Per-field findings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    /// Time spent serving the request.
    pub duration_ms: u64,
    /// Whether the payload came from the result cache.
    pub cached: bool,
}

impl ResponseEnvelope {
    /// Envelope for an execution outcome.
    #[must_use]
    pub fn from_outcome(id: impl Into<String>, outcome: ExecutionOutcome) -> Self {
        let (error_code, error_message, retry_after_ms, violations) = match outcome.error {
            Some(error) => (
                Some(error.code),
                Some(error.message),
                error.retry_after_ms,
                error.violations,
            ),
            None => (None, None, None, Vec::new()),
        };
        Self {
            id: id.into(),
            status: outcome.status,
            payload: outcome.payload,
            error_code,
            error_message,
            retry_after_ms,
            violations,
            duration_ms: outcome.duration_ms,
            cached: outcome.cached,
        }
    }

    /// Successful envelope for a gateway-level query.
    #[must_use]
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self::from_outcome(id, ExecutionOutcome::success(payload))
    }

    /// Whether the status is `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Content of a resource read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    /// The resource URI.
    pub uri: String,
    /// MIME type declared at registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// The content.
    pub content: Value,
}

/// Output of a prompt render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPrompt {
    /// Prompt name.
    pub name: String,
    /// Template text with arguments substituted.
    pub rendered_text: String,
}

/// Point-in-time view of the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Gateway name from configuration.
    pub name: String,
    /// Registered capabilities.
    pub capabilities: usize,
    /// Result cache counters.
    pub cache: CacheStats,
    /// Callers with a live rate-limit window.
    pub tracked_callers: usize,
    /// Executions currently being shared with waiters.
    pub in_flight: usize,
    /// Requests recorded since start.
    pub total_requests: u64,
    /// Per-capability metrics.
    pub metrics: BTreeMap<String, CapabilityMetrics>,
    /// When the report was taken.
    pub checked_at: DateTime<Utc>,
}
