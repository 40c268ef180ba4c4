//! Debounced execution for filter-driven refetching.
//!
//! A burst of edits (keystrokes in the search box, rapid date-picker changes)
//! collapses into one trailing invocation. Each view owns its debouncers;
//! instances never share timers, and the delay is per-instance so search and
//! structured filters can settle at different speeds.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::lock::mutex_lock;

const SOURCE: &str = "sync::debounce";

/// Trailing-edge debouncer over spawned futures.
///
/// `call` resets the timer: only the most recent future runs, and only after
/// the delay elapses with no further calls. Dropping the debouncer cancels
/// any pending work, so a torn-down view can never be updated.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `work` to run after the delay, superseding any pending call.
    pub fn call<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let mut pending = mutex_lock(&self.pending, SOURCE, "call");
        if let Some(superseded) = pending.take() {
            superseded.abort();
            trace!(delay_ms = delay.as_millis() as u64, "pending call superseded");
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        }));
    }

    /// Cancel any pending call without scheduling a new one.
    pub fn cancel(&self) {
        if let Some(pending) = mutex_lock(&self.pending, SOURCE, "cancel").take() {
            pending.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
