//! Shared collaborator bundle and tunables.

use std::sync::Arc;

use parking_lot::RwLock;

use wifi_warden_core::traits::{
    ConnectionEngine, Diagnostics, SelfRecovery, SettingsStore, SoftApCallback, StateBroadcaster,
    TelephonyPolicy, WardenMetrics, WifiNative,
};

use crate::events::EventPoster;
use crate::timer::TimerService;

/// Upper bound for the recovery restart delay, however large the configured
/// value is.
pub const MAX_RECOVERY_TIMEOUT_DELAY_MS: u64 = 4_000;

/// Static tunables, read once at construction.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    /// Delay before a recovery restart re-enables Wi-Fi, in milliseconds.
    /// Clamped to [`MAX_RECOVERY_TIMEOUT_DELAY_MS`].
    pub recovery_delay_ms: u64,
    /// Default soft AP idle shutdown timeout, in milliseconds.
    pub default_shutdown_timeout_ms: u64,
    /// Regulatory country code, if known.
    pub country_code: Option<String>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            recovery_delay_ms: 2_000,
            default_shutdown_timeout_ms: 600_000,
            country_code: None,
        }
    }
}

impl WardenConfig {
    /// Recovery delay with the hard upper bound applied.
    #[must_use]
    pub fn clamped_recovery_delay_ms(&self) -> u64 {
        if self.recovery_delay_ms > MAX_RECOVERY_TIMEOUT_DELAY_MS {
            tracing::warn!(
                configured = self.recovery_delay_ms,
                max = MAX_RECOVERY_TIMEOUT_DELAY_MS,
                "overriding recovery timeout delay with maximum limit"
            );
            MAX_RECOVERY_TIMEOUT_DELAY_MS
        } else {
            self.recovery_delay_ms
        }
    }
}

/// Late-injected handle to the self-recovery component.
///
/// Self-recovery holds the warden, so it cannot be passed to the warden
/// constructor; it is installed afterwards via [`RecoverySlot::install`].
#[derive(Clone, Default)]
pub struct RecoverySlot {
    inner: Arc<RwLock<Option<Arc<dyn SelfRecovery>>>>,
}

impl RecoverySlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the recovery component. Replaces any previous one.
    pub fn install(&self, recovery: Arc<dyn SelfRecovery>) {
        *self.inner.write() = Some(recovery);
    }

    /// Triggers recovery if a component has been installed.
    pub fn trigger(&self, reason: wifi_warden_core::RecoveryReason) {
        match self.inner.read().as_ref() {
            Some(recovery) => recovery.trigger(reason),
            None => tracing::warn!(%reason, "recovery requested before self-recovery installed"),
        }
    }
}

/// Every collaborator the warden and its mode managers need.
#[derive(Clone)]
pub struct WardenDeps {
    /// Native interface layer.
    pub native: Arc<dyn WifiNative>,
    /// Settings / policy store.
    pub settings: Arc<dyn SettingsStore>,
    /// Telephony carrier config and IMS observers.
    pub telephony: Arc<dyn TelephonyPolicy>,
    /// Sticky state broadcasts.
    pub broadcaster: Arc<dyn StateBroadcaster>,
    /// The external connection engine for station managers.
    pub engine: Arc<dyn ConnectionEngine>,
    /// Callback surface for the tethered soft AP.
    pub softap_callback: Arc<dyn SoftApCallback>,
    /// Callback surface for the local-only soft AP.
    pub lohs_callback: Arc<dyn SoftApCallback>,
    /// Counters.
    pub metrics: Arc<dyn WardenMetrics>,
    /// Diagnostics capture.
    pub diagnostics: Arc<dyn Diagnostics>,
    /// Wake-up scheduling.
    pub timers: Arc<dyn TimerService>,
    /// Posts events back into the warden queue.
    pub poster: EventPoster,
    /// Late-injected self-recovery component.
    pub recovery: RecoverySlot,
    /// Static tunables.
    pub config: WardenConfig,
}
