//! Mock handlers for testing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tollgate_gateway::{Arguments, HandlerError, NativeHandler};

/// A [`NativeHandler`] that counts its executions.
///
/// Each call waits `delay` (so concurrent callers overlap) and returns
/// `{"key": <key argument>}`. Clones share the counter.
#[derive(Debug, Clone, Default)]
pub struct CountingHandler {
    calls: Arc<AtomicUsize>,
    in_progress: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingHandler {
    /// Handler that returns immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long inside every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Completed and running calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Largest number of calls that overlapped.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NativeHandler for CountingHandler {
    async fn call(&self, arguments: Arguments) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_progress.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.peak.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        let key = arguments.get("key").cloned().unwrap_or(Value::Null);
        Ok(json!({ "key": key }))
    }
}
