//! Event loop and public handle.
//!
//! One task drains the warden queue, acting as the "main Wi-Fi thread".
//! External callbacks (native, IMS, timers) post into the queue and never
//! touch state directly, so every state mutation happens on this task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use wifi_warden_core::traits::{
    AvailabilitySink, ClientModeRequestListener, ModeChangeObserver, NativeStatusSink,
    ScorerBinding, SelfRecovery,
};
use wifi_warden_core::types::{
    ManagerId, RecoveryReason, Role, SoftApCapability, SoftApConfig, SoftApModeConfig,
    SoftApStopMode, WifiState,
};

use crate::deps::WardenDeps;
use crate::events::{EventPoster, WardenEvent, WardenQuery};
use crate::warden::ModeWarden;

/// Posts native daemon status changes into the queue.
struct StatusSink {
    poster: EventPoster,
}

impl NativeStatusSink for StatusSink {
    fn on_native_status(&self, ready: bool) {
        self.poster.post(WardenEvent::NativeStatusChanged(ready));
    }
}

/// Posts interface-availability changes into the queue.
struct AvailabilityPoster {
    poster: EventPoster,
    client: bool,
}

impl AvailabilitySink for AvailabilityPoster {
    fn on_availability_changed(&self, available: bool) {
        let event = if self.client {
            WardenEvent::ClientAvailabilityChanged(available)
        } else {
            WardenEvent::SoftApAvailabilityChanged(available)
        };
        self.poster.post(event);
    }
}

/// Fire-and-forget handle to the running warden. Clonable; all methods
/// enqueue a message and return immediately.
#[derive(Clone)]
pub struct ActiveModeWarden {
    poster: EventPoster,
    shutting_down: Arc<AtomicBool>,
}

impl ActiveModeWarden {
    /// The user Wi-Fi toggle changed.
    pub fn wifi_toggled(&self) {
        self.poster.post(WardenEvent::WifiToggled);
    }

    /// Airplane mode changed.
    pub fn airplane_mode_toggled(&self) {
        self.poster.post(WardenEvent::AirplaneToggled);
    }

    /// Scan-always or location mode changed.
    pub fn scan_always_mode_changed(&self) {
        self.poster.post(WardenEvent::ScanAlwaysModeChanged);
    }

    /// Starts a soft AP.
    pub fn start_soft_ap(&self, config: SoftApModeConfig) {
        self.poster.post(WardenEvent::StartSoftAp(Box::new(config)));
    }

    /// Stops soft APs matching the selector.
    pub fn stop_soft_ap(&self, mode: SoftApStopMode) {
        self.poster.post(WardenEvent::StopSoftAp(mode));
    }

    /// Pushes a new AP capability to all live AP managers.
    pub fn update_soft_ap_capability(&self, capability: SoftApCapability) {
        self.poster
            .post(WardenEvent::UpdateSoftApCapability(capability));
    }

    /// Pushes a new AP configuration to all live AP managers.
    pub fn update_soft_ap_configuration(&self, config: SoftApConfig) {
        self.poster
            .post(WardenEvent::UpdateSoftApConfig(Box::new(config)));
    }

    /// Requests a local-only client manager; the listener is answered once
    /// the manager is up (or immediately when Wi-Fi is off).
    pub fn request_local_only_client_mode_manager(
        &self,
        listener: Arc<dyn ClientModeRequestListener>,
    ) {
        self.poster
            .post(WardenEvent::RequestLocalOnlyClient(listener));
    }

    /// Releases a previously granted local-only client manager.
    pub fn remove_local_only_client_mode_manager(&self, id: ManagerId) {
        self.poster.post(WardenEvent::RemoveLocalOnlyClient(id));
    }

    /// Disables Wi-Fi when recovery is throttled.
    pub fn recovery_disable_wifi(&self) {
        self.poster.post(WardenEvent::RecoveryDisableWifi);
    }

    /// Restarts the Wi-Fi stack for recovery.
    pub fn recovery_restart_wifi(&self, reason: RecoveryReason) {
        self.poster.post(WardenEvent::RecoveryRestartWifi(reason));
    }

    /// Emergency callback mode changed.
    pub fn emergency_callback_mode_changed(&self, active: bool) {
        self.poster
            .post(WardenEvent::EmergencyCallbackModeChanged(active));
    }

    /// Emergency call state changed.
    pub fn emergency_call_state_changed(&self, in_call: bool) {
        self.poster
            .post(WardenEvent::EmergencyCallStateChanged(in_call));
    }

    /// Installs a connected-network scorer; cached across manager
    /// replacement.
    pub fn set_wifi_connected_network_scorer(&self, scorer: ScorerBinding) {
        self.poster.post(WardenEvent::SetScorer(scorer));
    }

    /// Removes the installed scorer.
    pub fn clear_wifi_connected_network_scorer(&self) {
        self.poster.post(WardenEvent::ClearScorer);
    }

    /// Registers a mode change observer.
    pub fn register_mode_change_callback(&self, observer: Arc<dyn ModeChangeObserver>) {
        self.poster
            .post(WardenEvent::RegisterModeChangeObserver(observer));
    }

    /// Unregisters a mode change observer.
    pub fn unregister_mode_change_callback(&self, observer: Arc<dyn ModeChangeObserver>) {
        self.poster
            .post(WardenEvent::UnregisterModeChangeObserver(observer));
    }

    /// Enables verbose logging everywhere.
    pub fn enable_verbose_logging(&self, verbose: bool) {
        self.poster.post(WardenEvent::SetVerboseLogging(verbose));
    }

    /// Marks the device as shutting down, suppressing recovery triggers.
    /// Safe from any thread.
    pub fn notify_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Externally visible station state.
    pub async fn wifi_state(&self) -> WifiState {
        let (tx, rx) = oneshot::channel();
        self.poster
            .post(WardenEvent::Query(WardenQuery::WifiState(tx)));
        rx.await.unwrap_or(WifiState::Unknown)
    }

    /// Snapshot of live managers as `(id, role, iface)` tuples.
    pub async fn live_managers(&self) -> Vec<(ManagerId, Option<Role>, Option<String>)> {
        let (tx, rx) = oneshot::channel();
        self.poster
            .post(WardenEvent::Query(WardenQuery::LiveManagers(tx)));
        rx.await.unwrap_or_default()
    }

    /// Whether the chip supports station + AP concurrency.
    pub async fn is_sta_ap_concurrency_supported(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.poster
            .post(WardenEvent::Query(WardenQuery::StaApConcurrencySupported(tx)));
        rx.await.unwrap_or(false)
    }

    /// Whether the emergency overlay is active.
    pub async fn is_in_emergency_mode(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.poster
            .post(WardenEvent::Query(WardenQuery::InEmergencyMode(tx)));
        rx.await.unwrap_or(false)
    }
}

/// Owns the warden core and drains its queue.
pub struct WardenRuntime {
    rx: mpsc::UnboundedReceiver<WardenEvent>,
    core: ModeWarden,
}

impl WardenRuntime {
    /// Wires the warden up: builds the queue, registers the native
    /// listeners, and derives the initial state from settings.
    ///
    /// `deps.poster` is replaced with a poster for the new queue, so
    /// callers may pass a placeholder.
    pub fn new(mut deps: WardenDeps) -> (ActiveModeWarden, WardenRuntime) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poster = EventPoster::new(tx);
        deps.poster = poster.clone();

        let shutting_down = Arc::new(AtomicBool::new(false));
        deps.native.register_status_listener(Arc::new(StatusSink {
            poster: poster.clone(),
        }));
        deps.native
            .register_client_availability_listener(Arc::new(AvailabilityPoster {
                poster: poster.clone(),
                client: true,
            }));
        deps.native
            .register_softap_availability_listener(Arc::new(AvailabilityPoster {
                poster: poster.clone(),
                client: false,
            }));

        let mut core = ModeWarden::new(deps, Arc::clone(&shutting_down));
        core.start();

        let handle = ActiveModeWarden {
            poster,
            shutting_down,
        };
        (handle, WardenRuntime { rx, core })
    }

    /// Installs the self-recovery component (late injection; see
    /// [`crate::deps::RecoverySlot`]).
    pub fn install_recovery(&self, recovery: Arc<dyn SelfRecovery>) {
        self.core.recovery_slot().install(recovery);
    }

    /// Immutable access to the core, for tests and dumps.
    #[must_use]
    pub fn core(&self) -> &ModeWarden {
        &self.core
    }

    /// Drains the queue until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.dispatch(event);
        }
        tracing::info!("warden runtime exiting, all handles dropped");
    }

    /// Processes everything currently queued without waiting. Useful for
    /// deterministic tests that drive time by hand.
    pub fn drain_now(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: WardenEvent) {
        match event {
            WardenEvent::Query(query) => self.answer(query),
            other => self.core.handle_event(other),
        }
    }

    fn answer(&self, query: WardenQuery) {
        match query {
            WardenQuery::WifiState(tx) => {
                let _ = tx.send(self.core.wifi_state());
            }
            WardenQuery::LiveManagers(tx) => {
                let snapshot = self
                    .core
                    .live_managers()
                    .into_iter()
                    .map(|info| (info.id, info.role, info.iface))
                    .collect();
                let _ = tx.send(snapshot);
            }
            WardenQuery::StaApConcurrencySupported(tx) => {
                let _ = tx.send(self.core.is_sta_ap_concurrency_supported());
            }
            WardenQuery::InEmergencyMode(tx) => {
                let _ = tx.send(self.core.in_emergency_mode());
            }
        }
    }
}
