//! Cancellable wake-up messages.
//!
//! The idle timeout, the deferred-stop timer, the recovery delay, and the
//! pending-disconnect recheck all post a message back into the warden queue
//! after a delay. This module provides that service behind a trait so tests
//! can substitute a deterministic implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::events::{EventPoster, WardenEvent};

/// Handle to a scheduled wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Schedules events to be posted into the warden queue after a delay.
pub trait TimerService: Send + Sync {
    /// Schedules `event` to be posted after `delay`.
    fn schedule(&self, delay: Duration, event: WardenEvent) -> TimerId;

    /// Cancels a scheduled wake-up. Unknown or already-fired ids are
    /// ignored, so cancellation is always safe.
    fn cancel(&self, id: TimerId);
}

struct TokioTimerInner {
    poster: EventPoster,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, tokio::task::AbortHandle>>,
}

/// [`TimerService`] backed by `tokio::time`.
pub struct TokioTimerService {
    inner: Arc<TokioTimerInner>,
}

impl TokioTimerService {
    /// Creates a timer service posting into the given queue.
    #[must_use]
    pub fn new(poster: EventPoster) -> Self {
        Self {
            inner: Arc::new(TokioTimerInner {
                poster,
                next_id: AtomicU64::new(0),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl TimerService for TokioTimerService {
    fn schedule(&self, delay: Duration, event: WardenEvent) -> TimerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Remove ourselves first so a late cancel is a no-op.
            inner.tasks.lock().remove(&id);
            inner.poster.post(event);
        });
        self.inner.tasks.lock().insert(id, handle.abort_handle());
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = self.inner.tasks.lock().remove(&id.0) {
            handle.abort();
        }
    }
}

/// Deterministic [`TimerService`] for tests: records scheduled wake-ups and
/// lets the test fire them explicitly.
#[derive(Default)]
pub struct ManualTimerService {
    next_id: AtomicU64,
    pending: Mutex<Vec<(TimerId, Duration, WardenEvent)>>,
}

impl ManualTimerService {
    /// Creates an empty manual timer service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of wake-ups currently scheduled.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Scheduled delays, in schedule order.
    #[must_use]
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending.lock().iter().map(|(_, d, _)| *d).collect()
    }

    /// Removes and returns the wake-up that would fire first (shortest
    /// delay; schedule order breaks ties).
    #[must_use]
    pub fn fire_next(&self) -> Option<WardenEvent> {
        let mut pending = self.pending.lock();
        let index = pending
            .iter()
            .enumerate()
            .min_by_key(|&(i, &(_, delay, _))| (delay, i))
            .map(|(i, _)| i)?;
        Some(pending.remove(index).2)
    }
}

impl TimerService for ManualTimerService {
    fn schedule(&self, delay: Duration, event: WardenEvent) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push((id, delay, event));
        id
    }

    fn cancel(&self, id: TimerId) {
        self.pending.lock().retain(|(t, _, _)| *t != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_timer_fire_order() {
        let timers = ManualTimerService::new();
        let a = timers.schedule(Duration::from_secs(1), WardenEvent::WifiToggled);
        let _b = timers.schedule(Duration::from_secs(2), WardenEvent::AirplaneToggled);
        assert_eq!(timers.pending_count(), 2);

        timers.cancel(a);
        assert_eq!(timers.pending_count(), 1);
        assert!(matches!(
            timers.fire_next(),
            Some(WardenEvent::AirplaneToggled)
        ));
        assert!(timers.fire_next().is_none());
    }

    #[test]
    fn test_manual_timer_cancel_unknown_is_noop() {
        let timers = ManualTimerService::new();
        let id = timers.schedule(Duration::from_millis(5), WardenEvent::WifiToggled);
        timers.cancel(id);
        timers.cancel(id);
        assert_eq!(timers.pending_count(), 0);
    }
}
