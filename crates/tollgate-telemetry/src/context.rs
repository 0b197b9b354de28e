//! Request context for log correlation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Correlation data carried through one gateway request.
///
/// The `request_id` is the transport's correlation identifier when one was
/// supplied, otherwise a fresh UUID. Every log line emitted inside
/// [`RequestContext::span`] carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Request identifier (caller-supplied or generated).
    pub request_id: String,
    /// Correlation identifier shared by related requests.
    pub correlation_id: String,
    /// Caller identity used for admission control, if known.
    pub caller: Option<String>,
    /// When the request was received.
    pub started_at: DateTime<Utc>,
    /// Component that created the context.
    pub source: String,
    /// Operation being performed (`invoke`, `readResource`, ...).
    pub operation: Option<String>,
    /// Target capability name.
    pub capability: Option<String>,
    /// Additional metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    /// Create a context with a generated request ID.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_request_id(Uuid::new_v4().to_string(), source)
    }

    /// Create a context for a caller-supplied request ID.
    #[must_use]
    pub fn with_request_id(request_id: impl Into<String>, source: impl Into<String>) -> Self {
        let request_id = request_id.into();
        Self {
            correlation_id: request_id.clone(),
            request_id,
            caller: None,
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            capability: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Set the caller identity.
    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Set the target capability.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Milliseconds since the request was received.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// Tracing span carrying the correlation fields.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            correlation_id = %self.correlation_id,
            source = %self.source,
            caller = self.caller.as_deref(),
            operation = self.operation.as_deref(),
            capability = self.capability.as_deref(),
        )
    }

    /// First eight characters of the request ID.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.request_id
            .char_indices()
            .nth(8)
            .map_or(self.request_id.as_str(), |(end, _)| &self.request_id[..end])
    }
}

/// Enters a request span and logs start and completion.
pub struct RequestGuard {
    context: RequestContext,
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl RequestGuard {
    /// Enter the context's span.
    #[must_use]
    pub fn new(context: RequestContext) -> Self {
        let span = context.span().entered();
        tracing::debug!("Request started");
        Self { context, span }
    }

    /// The guarded context.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        tracing::debug!(elapsed_ms = self.context.elapsed_ms(), "Request completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_request_id() {
        let ctx = RequestContext::new("transport");
        assert_eq!(ctx.source, "transport");
        assert_eq!(ctx.request_id, ctx.correlation_id);
        assert!(Uuid::parse_str(&ctx.request_id).is_ok());
        assert!(ctx.caller.is_none());
    }

    #[test]
    fn test_caller_supplied_request_id() {
        let ctx = RequestContext::with_request_id("req-42", "transport")
            .with_caller("alice")
            .with_operation("invoke")
            .with_capability("add")
            .with_metadata("transport", "stdio");

        assert_eq!(ctx.request_id, "req-42");
        assert_eq!(ctx.caller.as_deref(), Some("alice"));
        assert_eq!(ctx.operation.as_deref(), Some("invoke"));
        assert_eq!(ctx.capability.as_deref(), Some("add"));
        assert_eq!(ctx.metadata.get("transport").map(String::as_str), Some("stdio"));
    }

    #[test]
    fn test_short_id() {
        let ctx = RequestContext::new("test");
        assert_eq!(ctx.short_id().len(), 8);

        let short = RequestContext::with_request_id("abc", "test");
        assert_eq!(short.short_id(), "abc");
    }

    #[test]
    fn test_elapsed() {
        let ctx = RequestContext::new("test");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(ctx.elapsed_ms() >= 10);
    }

    #[test]
    fn test_guard_exposes_context() {
        let guard = RequestGuard::new(RequestContext::with_request_id("r1", "test"));
        assert_eq!(guard.context().request_id, "r1");
    }
}
