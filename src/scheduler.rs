//! Visibility-gated periodic refresh.
//!
//! Hosts report whether the hosting view is visible (browser tab focus, a
//! collapsed panel, a backgrounded webview). The tick closure never runs
//! while hidden; on becoming visible again it runs once immediately as a
//! catch-up, then the interval resumes.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::lock::mutex_lock;

const SOURCE: &str = "sync::scheduler";

/// Periodic runner that respects view visibility.
///
/// `start` is idempotent: calling it while the loop is running is a no-op,
/// so a remounting view cannot stack duplicate timers.
pub struct VisibilityScheduler {
    visibility: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VisibilityScheduler {
    /// A scheduler that starts in the visible state.
    pub fn new() -> Self {
        let (visibility, _) = watch::channel(true);
        Self {
            visibility,
            task: Mutex::new(None),
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.visibility.borrow()
    }

    /// Report a visibility change from the host.
    pub fn set_visible(&self, visible: bool) {
        self.visibility.send_if_modified(|current| {
            if *current == visible {
                false
            } else {
                *current = visible;
                true
            }
        });
    }

    /// Begin running `tick` every `interval` while visible.
    pub fn start<F, Fut>(&self, interval: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut task = mutex_lock(&self.task, SOURCE, "start");
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            debug!("Refresh loop already running; start ignored");
            return;
        }

        let mut visibility = self.visibility.subscribe();
        *task = Some(tokio::spawn(async move {
            loop {
                // Park until the view is visible.
                while !*visibility.borrow_and_update() {
                    if visibility.changed().await.is_err() {
                        return;
                    }
                }

                // Catch-up tick on (re)gaining visibility.
                tick().await;

                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            if !*visibility.borrow() {
                                break;
                            }
                            tick().await;
                        }
                        changed = visibility.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            if !*visibility.borrow_and_update() {
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Stop the loop. Pending ticks are cancelled.
    pub fn stop(&self) {
        if let Some(task) = mutex_lock(&self.task, SOURCE, "stop").take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        mutex_lock(&self.task, SOURCE, "is_running")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Default for VisibilityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VisibilityScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
