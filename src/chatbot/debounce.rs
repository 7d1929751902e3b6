//! Cancelable one-shot timers for debounce and cooldown windows.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A callback scheduled to run once after a delay.
///
/// Dropping the handle cancels the callback if it has not fired yet, so
/// re-arming a timer is just replacing the old handle with a new one.
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Run `callback` after `delay`, unless cancelled first.
    pub fn after<F, Fut>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            callback().await;
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Cancel the callback. No-op if it already ran.
    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Release the handle without cancelling.
    ///
    /// A fired callback that removes its own bookkeeping must disarm rather
    /// than drop, or it would abort itself at its next await.
    pub fn disarm(mut self) {
        self.handle.take();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
