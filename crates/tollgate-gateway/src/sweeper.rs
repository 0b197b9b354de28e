//! Periodic background housekeeping.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Aborts the wrapped task when dropped.
#[derive(Debug)]
pub struct AbortOnDrop(JoinHandle<()>);

impl AbortOnDrop {
    /// Whether the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `sweep` every `every` until the returned guard is dropped. `sweep`
/// returns how many entries it removed; non-zero results are logged.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn_periodic<F>(name: &'static str, every: Duration, sweep: F) -> AbortOnDrop
where
    F: Fn() -> usize + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = sweep();
            if removed > 0 {
                debug!(sweeper = name, removed, "Swept stale entries");
            }
        }
    });
    AbortOnDrop(handle)
}
