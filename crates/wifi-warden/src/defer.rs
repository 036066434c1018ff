//! Deferred-stop controller.
//!
//! A station leaving connect mode would drop an ongoing voice-over-Wi-Fi
//! call. When IMS voice is registered over the Wi-Fi transport, the stop is
//! deferred up to a carrier-configured bound and continues on the earliest
//! of: IMS re-registered on another transport, the last IMS network lost
//! (plus an optional configured extra delay), or the deferral timer firing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wifi_warden_core::traits::{ImsEvent, ImsEventSink, TelephonyPolicy};
use wifi_warden_core::types::ManagerId;

use crate::deps::WardenDeps;
use crate::events::{ClientMessage, EventPoster, WardenEvent};
use crate::timer::TimerId;

/// What `begin` decided about the requested stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// No deferral needed; run the pending transition now.
    ContinueNow,
    /// Deferral armed; the transition continues on a later message.
    Deferred,
    /// A deferral is already in flight; it will pick up the new target.
    AlreadyDeferring,
}

/// Why the deferral resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueCause {
    /// No deferral was armed.
    Immediate,
    /// The deferral timer fired.
    TimerExpired,
    /// An IMS event released the deferral early.
    Ims,
}

/// Deferral bookkeeping for one client mode manager.
#[derive(Default)]
pub struct DeferStopController {
    deferring: bool,
    active_sub_id: Option<i32>,
    max_deferring_ms: u64,
    started_at: Option<Instant>,
    timer: Option<TimerId>,
    ims_lost_timer: Option<TimerId>,
}

/// Marshals IMS events for one manager onto the warden queue.
struct ImsSink {
    id: ManagerId,
    poster: EventPoster,
}

impl ImsEventSink for ImsSink {
    fn on_ims_event(&self, event: ImsEvent) {
        self.poster
            .post(WardenEvent::Client(self.id, ClientMessage::Ims(event)));
    }
}

/// Picks the largest deferral bound among subscriptions whose IMS voice is
/// registered over the Wi-Fi transport. Returns the delay and the winning
/// subscription id.
pub fn wifi_off_deferring_time(telephony: &dyn TelephonyPolicy) -> (u64, Option<i32>) {
    let mut max_delay = 0u64;
    let mut sub_id = None;
    for sub in telephony.active_subscriptions() {
        if !sub.voice_over_wlan {
            continue;
        }
        if sub.wifi_off_deferring_ms > max_delay {
            max_delay = sub.wifi_off_deferring_ms;
            sub_id = Some(sub.sub_id);
        }
    }
    (max_delay, sub_id)
}

impl DeferStopController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a deferral is currently armed.
    #[must_use]
    pub fn is_deferring(&self) -> bool {
        self.deferring
    }

    /// Evaluates the deferral policy for a stop of manager `id`.
    pub fn begin(&mut self, id: ManagerId, deps: &WardenDeps) -> BeginOutcome {
        if self.deferring {
            return BeginOutcome::AlreadyDeferring;
        }

        let (delay_ms, sub_id) = wifi_off_deferring_time(deps.telephony.as_ref());
        self.max_deferring_ms = delay_ms;
        self.started_at = Some(Instant::now());
        if delay_ms == 0 {
            return BeginOutcome::ContinueNow;
        }

        let sub_id = match sub_id {
            Some(sub_id) => sub_id,
            // Defensive: a positive delay always comes with a subscription.
            None => return BeginOutcome::ContinueNow,
        };

        self.deferring = true;
        self.active_sub_id = Some(sub_id);
        tracing::debug!(
            manager = %id,
            delay_ms,
            sub_id,
            "deferring Wi-Fi off for voice-over-Wi-Fi"
        );
        deps.telephony.register_ims_events(
            sub_id,
            Arc::new(ImsSink {
                id,
                poster: deps.poster.clone(),
            }),
        );
        self.timer = Some(deps.timers.schedule(
            Duration::from_millis(delay_ms),
            WardenEvent::Client(id, ClientMessage::DeferTimeout),
        ));
        BeginOutcome::Deferred
    }

    /// Handles the last-IMS-network-lost signal. Returns `true` if the
    /// pending transition should continue now; otherwise an extra delay
    /// message was scheduled.
    pub fn on_ims_network_lost(&mut self, id: ManagerId, deps: &WardenDeps) -> bool {
        if !self.deferring {
            return false;
        }
        let extra_ms = deps.telephony.delay_disconnect_on_ims_lost_ms();
        if extra_ms == 0 {
            return true;
        }
        tracing::debug!(manager = %id, extra_ms, "IMS network lost, delaying disconnect");
        self.ims_lost_timer = Some(deps.timers.schedule(
            Duration::from_millis(extra_ms),
            WardenEvent::Client(id, ClientMessage::ImsLostDelayExpired),
        ));
        false
    }

    /// Tears the deferral down and reports `(was_deferring, timed_out,
    /// duration_ms)` for metrics.
    pub fn finish(&mut self, deps: &WardenDeps, cause: ContinueCause) -> (bool, bool, u64) {
        let duration_ms = self
            .started_at
            .take()
            .map_or(0, |t| t.elapsed().as_millis() as u64);
        let was_deferring = self.deferring;
        let timed_out = was_deferring
            && (cause == ContinueCause::TimerExpired
                || (self.max_deferring_ms > 0 && duration_ms >= self.max_deferring_ms));

        if self.deferring {
            tracing::debug!("stopping Wi-Fi off deferral");
            if let Some(timer) = self.timer.take() {
                deps.timers.cancel(timer);
            }
            if let Some(timer) = self.ims_lost_timer.take() {
                deps.timers.cancel(timer);
            }
            if let Some(sub_id) = self.active_sub_id.take() {
                deps.telephony.unregister_ims_events(sub_id);
            }
            self.deferring = false;
        }
        self.max_deferring_ms = 0;
        (was_deferring, timed_out, duration_ms)
    }
}
