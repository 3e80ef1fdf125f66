//! In-process retry timers.
//!
//! One spawned task per scheduled delivery, keyed by `DeliveryId`.
//! Rescheduling replaces (and aborts) a superseded timer. These timers are
//! lost on process restart; the recovery sweep is the authoritative path and
//! this is purely a latency optimization.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use telarx_core::DeliveryId;

/// Owns the timer handles so cancellation is tied to record lifecycle
/// rather than ambient process state.
#[derive(Default)]
pub struct RetryScheduler {
    timers: Arc<Mutex<HashMap<DeliveryId, JoinHandle<()>>>>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run at `at`, replacing any timer already pending
    /// for this delivery.
    pub fn schedule<F>(&self, delivery_id: DeliveryId, at: DateTime<Utc>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let timers = Arc::clone(&self.timers);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Deregister before running so a reschedule from inside the task
            // never aborts the task itself.
            timers.lock().unwrap().remove(&delivery_id);
            task.await;
        });

        debug!(%delivery_id, fire_at = %at, "retry timer armed");
        let mut timers = self.timers.lock().unwrap();
        if let Some(superseded) = timers.insert(delivery_id, handle) {
            superseded.abort();
        }
    }

    /// Drop the pending timer for a delivery, if any.
    pub fn cancel(&self, delivery_id: &DeliveryId) {
        if let Some(handle) = self.timers.lock().unwrap().remove(delivery_id) {
            handle.abort();
            debug!(%delivery_id, "retry timer cancelled");
        }
    }

    /// Number of timers currently pending.
    pub fn pending(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.timers.lock().unwrap().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_and_deregisters() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.schedule(
            DeliveryId::new(),
            Utc::now() + chrono::Duration::seconds(5),
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_supersedes_the_pending_timer() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let delivery_id = DeliveryId::new();

        let first = Arc::clone(&fired);
        scheduler.schedule(
            delivery_id,
            Utc::now() + chrono::Duration::seconds(5),
            async move {
                first.fetch_add(10, Ordering::SeqCst);
            },
        );
        let second = Arc::clone(&fired);
        scheduler.schedule(
            delivery_id,
            Utc::now() + chrono::Duration::seconds(5),
            async move {
                second.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let delivery_id = DeliveryId::new();

        let counter = Arc::clone(&fired);
        scheduler.schedule(
            delivery_id,
            Utc::now() + chrono::Duration::seconds(5),
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        scheduler.cancel(&delivery_id);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }
}
