// Token refresh scheduler
// A cancellable, single-slot timer that drives proactive renewal

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::{Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::controller::SessionController;

/// Single-slot timer for proactive token renewal.
///
/// Arming always cancels the previously armed slot first, so one session
/// never has two live timers. The spawned task holds only a weak reference
/// to the controller: a timer that outlives its session fires into nothing
/// instead of resurrecting cleared state.
pub struct RefreshScheduler {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Arm the timer to invoke `refresh()` on the controller after `delay`
    pub fn arm(&self, delay: Duration, controller: Weak<SessionController>) {
        tracing::debug!(delay_secs = delay.as_secs(), "Arming refresh timer");
        self.schedule(delay, async move {
            if let Some(controller) = controller.upgrade() {
                controller.refresh().await;
            } else {
                tracing::debug!("Refresh timer fired after controller teardown, ignoring");
            }
        });
    }

    /// Cancel the armed timer, if any. Synchronous.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock().expect("scheduler lock poisoned");
        if let Some(handle) = slot.take() {
            handle.abort();
            tracing::debug!("Cancelled refresh timer");
        }
    }

    pub fn is_armed(&self) -> bool {
        let slot = self.slot.lock().expect("scheduler lock poisoned");
        slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        let mut slot = self.slot.lock().expect("scheduler lock poisoned");
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Delay until the renewal check should fire: the assumed expiry
/// (`issued_at + ttl`) minus the safety threshold, clamped to zero so an
/// already-due credential refreshes immediately.
pub fn refresh_delay(
    issued_at: DateTime<Utc>,
    now: DateTime<Utc>,
    ttl_secs: i64,
    threshold_secs: i64,
) -> Duration {
    let fire_at = issued_at + ChronoDuration::seconds(ttl_secs - threshold_secs);
    (fire_at - now).to_std().unwrap_or(Duration::ZERO)
}
