//! The mode warden: top-level coordinator over all mode managers.
//!
//! Owns the live sets of client and soft AP managers and decides when to
//! create, reconfigure, or destroy them in response to external toggles,
//! recovery triggers and emergency state. The warden itself is a two-state
//! machine (`Disabled` / `Enabled`) under a default fallback layer, with an
//! orthogonal emergency overlay that suppresses normal transitions.
//!
//! `Enabled` holds exactly while the live set is non-empty; every
//! transition to `Disabled` is driven by terminal manager notifications,
//! never by fiat.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use wifi_warden_core::traits::{
    ActiveModeInfo, ClientModeRequestListener, ModeChangeObserver, ScorerBinding,
};
use wifi_warden_core::types::{
    ManagerId, RecoveryReason, Role, SoftApMode, SoftApModeConfig, SoftApStopMode, WifiState,
};

use crate::client::{ClientMode, ClientModeManager, DEFAULT_CLIENT_MODE};
use crate::deps::{RecoverySlot, WardenDeps};
use crate::events::{ClientMessage, ModeLifecycle, SoftApMessage, WardenEvent};
use crate::graveyard::{Graveyard, StoppedManagerRecord};
use crate::softap::SoftApManager;

/// Transition-log ring size.
const LOG_RING_SIZE: usize = 100;

/// Outer state of the warden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WardenState {
    /// No live mode managers.
    Disabled,
    /// At least one live mode manager.
    Enabled,
}

/// Top-level coordinator over the device's Wi-Fi operating modes.
pub struct ModeWarden {
    deps: WardenDeps,
    state: WardenState,
    clients: Vec<ClientModeManager>,
    softaps: Vec<SoftApManager>,
    graveyard: Graveyard,
    observers: Vec<Arc<dyn ModeChangeObserver>>,
    scorer: Option<ScorerBinding>,

    in_emergency_call: bool,
    in_callback_mode: bool,
    is_disabling_due_to_airplane: bool,
    can_request_more_clients: bool,
    can_request_more_softaps: bool,
    is_shutting_down: Arc<AtomicBool>,
    reported_wifi_on: bool,
    verbose: bool,

    /// Messages the warden generated while processing the current one;
    /// drained before the next external message.
    pending: VecDeque<WardenEvent>,
    /// Messages deferred until the next state transition.
    deferred: Vec<WardenEvent>,
    /// Last transitions and messages, for dumps.
    log_ring: VecDeque<(WardenState, &'static str)>,
}

impl ModeWarden {
    /// Creates a warden in the `Disabled` state. Call
    /// [`ModeWarden::start`] to register native listeners and derive the
    /// initial state from settings.
    pub fn new(deps: WardenDeps, is_shutting_down: Arc<AtomicBool>) -> Self {
        Self {
            deps,
            state: WardenState::Disabled,
            clients: Vec::new(),
            softaps: Vec::new(),
            graveyard: Graveyard::new(),
            observers: Vec::new(),
            scorer: None,
            in_emergency_call: false,
            in_callback_mode: false,
            is_disabling_due_to_airplane: false,
            can_request_more_clients: false,
            can_request_more_softaps: false,
            is_shutting_down,
            reported_wifi_on: false,
            verbose: false,
            pending: VecDeque::new(),
            deferred: Vec::new(),
            log_ring: VecDeque::new(),
        }
    }

    /// Derives the initial state from settings and brings up a station
    /// manager if policy asks for one.
    pub fn start(&mut self) {
        let airplane = self.deps.settings.is_airplane_mode_on();
        let wifi = self.deps.settings.is_wifi_toggle_enabled();
        let scan_always = self.deps.settings.is_scan_always_available();
        let location = self.deps.settings.is_location_mode_enabled();
        tracing::info!(
            airplane,
            wifi,
            scan_always,
            location,
            "starting mode warden"
        );
        if self.should_enable_sta() {
            self.start_primary_or_scan_only_client();
            self.transition_to(WardenState::Enabled);
        }
        self.drain_pending();
    }

    /// Current outer state.
    #[must_use]
    pub fn state(&self) -> WardenState {
        self.state
    }

    /// Whether the emergency overlay is active.
    #[must_use]
    pub fn in_emergency_mode(&self) -> bool {
        self.in_emergency_call || self.in_callback_mode
    }

    /// Live client managers.
    #[must_use]
    pub fn clients(&self) -> &[ClientModeManager] {
        &self.clients
    }

    /// Live soft AP managers.
    #[must_use]
    pub fn softaps(&self) -> &[SoftApManager] {
        &self.softaps
    }

    /// The graveyard of recently stopped managers.
    #[must_use]
    pub fn graveyard(&self) -> &Graveyard {
        &self.graveyard
    }

    /// The client manager in the given role, if one is live.
    #[must_use]
    pub fn client_in_role(&self, role: Role) -> Option<&ClientModeManager> {
        self.clients.iter().find(|m| m.role() == Some(role))
    }

    /// The soft AP manager in the given role, if one is live.
    #[must_use]
    pub fn softap_in_role(&self, role: Role) -> Option<&SoftApManager> {
        self.softaps.iter().find(|m| m.role() == role)
    }

    /// The primary client manager, or a no-op default when none is live, so
    /// API calls always have a target.
    #[must_use]
    pub fn primary_client_or_default(&self) -> &dyn ClientMode {
        match self.client_in_role(Role::ClientPrimary) {
            Some(manager) => manager,
            None => &DEFAULT_CLIENT_MODE,
        }
    }

    /// Externally visible station state.
    #[must_use]
    pub fn wifi_state(&self) -> WifiState {
        self.primary_client_or_default().wifi_state()
    }

    /// Whether the chip supports station + AP concurrency.
    #[must_use]
    pub fn is_sta_ap_concurrency_supported(&self) -> bool {
        self.deps.native.is_sta_ap_concurrency_supported()
    }

    /// The late-injection slot for the self-recovery component.
    #[must_use]
    pub fn recovery_slot(&self) -> RecoverySlot {
        self.deps.recovery.clone()
    }

    /// Whether the chip can host another client interface right now.
    #[must_use]
    pub fn can_request_more_client_mode_managers(&self) -> bool {
        self.can_request_more_clients
    }

    /// Whether the chip can host another AP interface right now.
    #[must_use]
    pub fn can_request_more_softap_managers(&self) -> bool {
        self.can_request_more_softaps
    }

    /// Snapshot of every live manager.
    #[must_use]
    pub fn live_managers(&self) -> Vec<ActiveModeInfo> {
        self.clients
            .iter()
            .map(ClientModeManager::info)
            .chain(self.softaps.iter().map(SoftApManager::info))
            .collect()
    }

    fn has_any_manager(&self) -> bool {
        !self.clients.is_empty() || !self.softaps.is_empty()
    }

    fn has_any_client(&self) -> bool {
        !self.clients.is_empty()
    }

    fn check_scan_only_available(&self) -> bool {
        self.deps.settings.is_location_mode_enabled()
            && self.deps.settings.is_scan_always_available()
    }

    fn should_enable_sta(&self) -> bool {
        self.deps.settings.is_wifi_toggle_enabled() || self.check_scan_only_available()
    }

    // -------------------------------------------------------------------------
    // Message processing
    // -------------------------------------------------------------------------

    /// Processes one message and everything it spawned.
    pub fn handle_event(&mut self, event: WardenEvent) {
        self.process(event);
        self.drain_pending();
    }

    fn drain_pending(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            self.process(event);
        }
    }

    fn process(&mut self, event: WardenEvent) {
        if self.log_ring.len() == LOG_RING_SIZE {
            self.log_ring.pop_front();
        }
        self.log_ring.push_back((self.state, event.name()));

        match event {
            // Per-manager state machine traffic flows regardless of the
            // warden's own state; the managers were already told to stop
            // when a policy requires it.
            WardenEvent::Client(id, msg) => self.dispatch_client(id, msg),
            WardenEvent::SoftAp(id, msg) => self.dispatch_softap(id, msg),

            WardenEvent::NativeStatusChanged(ready) => {
                if !ready && !self.is_shutting_down.load(Ordering::Acquire) {
                    tracing::error!("a native daemon died, triggering recovery");
                    self.deps
                        .diagnostics
                        .trigger_bug_report_data_capture(RecoveryReason::WifiNativeFailure);
                    self.deps
                        .recovery
                        .trigger(RecoveryReason::WifiNativeFailure);
                }
            }
            WardenEvent::ClientAvailabilityChanged(available) => {
                self.can_request_more_clients = available;
            }
            WardenEvent::SoftApAvailabilityChanged(available) => {
                self.can_request_more_softaps = available;
            }
            WardenEvent::SetScorer(scorer) => {
                self.scorer = Some(scorer.clone());
                self.primary_client_or_default().set_scorer(&scorer);
            }
            WardenEvent::ClearScorer => {
                self.scorer = None;
                self.primary_client_or_default().clear_scorer();
            }
            WardenEvent::RegisterModeChangeObserver(observer) => {
                self.register_mode_change_observer(observer);
            }
            WardenEvent::UnregisterModeChangeObserver(observer) => {
                self.unregister_mode_change_observer(&observer);
            }
            WardenEvent::SetVerboseLogging(verbose) => {
                self.verbose = verbose;
                for manager in &mut self.clients {
                    manager.set_verbose(verbose);
                }
                for manager in &mut self.softaps {
                    manager.set_verbose(verbose);
                }
            }
            WardenEvent::Query(_) => {
                // Queries are answered by the runtime before dispatch.
                tracing::debug!("query reached the warden core, dropping");
            }

            WardenEvent::EmergencyCallStateChanged(_)
            | WardenEvent::EmergencyCallbackModeChanged(_) => self.handle_emergency_change(event),

            other if self.in_emergency_mode() => self.process_in_emergency(other),

            other => {
                let not_handled = match self.state {
                    WardenState::Disabled => self.process_disabled(other),
                    WardenState::Enabled => self.process_enabled(other),
                };
                if let Some(event) = not_handled {
                    self.process_default(event);
                }
            }
        }
    }

    /// Emergency overlay: drop everything except terminal manager
    /// notifications, which still reconcile the live set.
    fn process_in_emergency(&mut self, event: WardenEvent) {
        match event {
            WardenEvent::StaStopped
            | WardenEvent::StaStartFailure
            | WardenEvent::ApStopped
            | WardenEvent::ApStartFailure => {
                if self.state == WardenState::Enabled && !self.has_any_manager() {
                    tracing::info!("no live managers in emergency mode, disabling");
                    self.transition_to(WardenState::Disabled);
                }
            }
            WardenEvent::RequestLocalOnlyClient(listener) => listener.on_answer(None),
            other => {
                tracing::debug!(event = other.name(), "dropped while in emergency mode");
            }
        }
    }

    fn handle_emergency_change(&mut self, event: WardenEvent) {
        let was_in_emergency = self.in_emergency_mode();
        match event {
            WardenEvent::EmergencyCallStateChanged(in_call) => self.in_emergency_call = in_call,
            WardenEvent::EmergencyCallbackModeChanged(on) => self.in_callback_mode = on,
            _ => unreachable!("non-emergency event routed to emergency handler"),
        }
        let in_emergency = self.in_emergency_mode();
        if !was_in_emergency && in_emergency {
            self.enter_emergency_mode();
        } else if was_in_emergency && !in_emergency {
            self.exit_emergency_mode();
        }
    }

    fn enter_emergency_mode(&mut self) {
        tracing::info!("entering emergency mode");
        self.stop_softap_managers(SoftApStopMode::Any);
        let disable_wifi = self.deps.telephony.disable_wifi_in_emergency();
        tracing::info!(disable_wifi, "emergency Wi-Fi policy");
        if disable_wifi {
            self.shutdown_wifi();
        }
    }

    /// Re-derives the warden state from policy after the overlay lifts.
    fn exit_emergency_mode(&mut self) {
        tracing::info!("exiting emergency mode");
        if self.should_enable_sta() {
            if self.has_any_client() {
                self.switch_all_primary_or_scan_only_clients();
            } else {
                self.start_primary_or_scan_only_client();
            }
        }
        if self.has_any_manager() {
            self.transition_to(WardenState::Enabled);
        } else {
            self.transition_to(WardenState::Disabled);
        }
    }

    /// Fallback handlers valid in any state.
    fn process_default(&mut self, event: WardenEvent) {
        match event {
            WardenEvent::WifiToggled
            | WardenEvent::ScanAlwaysModeChanged
            | WardenEvent::StaStopped
            | WardenEvent::StaStartFailure
            | WardenEvent::RecoveryRestartWifi(_)
            | WardenEvent::RecoveryRestartWifiContinue
            | WardenEvent::DeferredRecoveryRestartWifi
            | WardenEvent::RemoveLocalOnlyClient(_)
            | WardenEvent::StopSoftAp(_) => {}
            WardenEvent::RequestLocalOnlyClient(listener) => listener.on_answer(None),
            WardenEvent::RecoveryDisableWifi => {
                tracing::info!("recovery has been throttled, disabling Wi-Fi");
                self.shutdown_wifi();
                // Terminal stop notifications drive us to Disabled.
            }
            WardenEvent::AirplaneToggled => {
                if self.deps.settings.is_airplane_mode_on() {
                    tracing::info!("airplane mode on, shutting down all modes");
                    self.shutdown_wifi();
                } else {
                    tracing::info!("airplane mode off, deriving next state");
                    if self.should_enable_sta() {
                        self.start_primary_or_scan_only_client();
                        self.transition_to(WardenState::Enabled);
                    }
                    // Otherwise Wi-Fi stays disabled.
                }
            }
            WardenEvent::UpdateSoftApCapability(capability) => {
                for manager in &self.softaps {
                    self.deps.poster.post(WardenEvent::SoftAp(
                        manager.id(),
                        SoftApMessage::UpdateCapability(capability.clone()),
                    ));
                }
            }
            WardenEvent::UpdateSoftApConfig(config) => {
                for manager in &self.softaps {
                    self.deps.poster.post(WardenEvent::SoftAp(
                        manager.id(),
                        SoftApMessage::UpdateConfig(config.clone()),
                    ));
                }
            }
            WardenEvent::ApStopped | WardenEvent::ApStartFailure => {
                tracing::info!("soft AP mode disabled, deriving next state");
                if self.should_enable_sta() {
                    self.start_primary_or_scan_only_client();
                    self.transition_to(WardenState::Enabled);
                }
            }
            other => {
                tracing::error!(event = other.name(), "unexpected message in default state");
            }
        }
    }

    /// `Disabled`: no live managers. Returns the event when unhandled so it
    /// bubbles to the default layer.
    fn process_disabled(&mut self, event: WardenEvent) -> Option<WardenEvent> {
        match event {
            WardenEvent::WifiToggled | WardenEvent::ScanAlwaysModeChanged => {
                if self.should_enable_sta() {
                    self.start_primary_or_scan_only_client();
                    self.transition_to(WardenState::Enabled);
                }
                None
            }
            WardenEvent::StartSoftAp(config) => {
                self.start_softap_manager(*config);
                self.transition_to(WardenState::Enabled);
                None
            }
            WardenEvent::RecoveryRestartWifi(_) | WardenEvent::DeferredRecoveryRestartWifi => {
                // Wait for the driver to settle before coming back up.
                let delay = self.deps.config.clamped_recovery_delay_ms();
                tracing::info!(delay_ms = delay, "recovery restart, scheduling continuation");
                let _ = self.deps.timers.schedule(
                    Duration::from_millis(delay),
                    WardenEvent::RecoveryRestartWifiContinue,
                );
                None
            }
            WardenEvent::RecoveryRestartWifiContinue => {
                if self.should_enable_sta() {
                    self.start_primary_or_scan_only_client();
                    self.transition_to(WardenState::Enabled);
                }
                None
            }
            other => Some(other),
        }
    }

    /// `Enabled`: at least one live manager.
    fn process_enabled(&mut self, event: WardenEvent) -> Option<WardenEvent> {
        match event {
            WardenEvent::WifiToggled | WardenEvent::ScanAlwaysModeChanged => {
                if self.should_enable_sta() {
                    if self.has_any_client() {
                        self.switch_all_primary_or_scan_only_clients();
                    } else {
                        self.start_primary_or_scan_only_client();
                    }
                } else {
                    self.stop_all_client_managers();
                }
                None
            }
            WardenEvent::RequestLocalOnlyClient(listener) => {
                if self.can_request_more_clients {
                    // Room for a concurrent local-only manager.
                    self.start_local_only_client(listener);
                } else {
                    // No concurrency; hand back the primary instead.
                    let answer = self
                        .client_in_role(Role::ClientPrimary)
                        .map(ClientModeManager::info);
                    listener.on_answer(answer);
                }
                None
            }
            WardenEvent::RemoveLocalOnlyClient(id) => {
                self.stop_local_only_client(id);
                None
            }
            WardenEvent::StartSoftAp(config) => {
                // A dual-band AP needs the whole chip; stations must go.
                if self.deps.settings.is_dual_softap_requested() {
                    self.stop_all_client_managers();
                }
                self.start_softap_manager(*config);
                None
            }
            WardenEvent::StopSoftAp(mode) => {
                self.stop_softap_managers(mode);
                None
            }
            WardenEvent::AirplaneToggled => {
                if self.deps.settings.is_airplane_mode_on() {
                    // Shutdown is handled by the default layer.
                    self.is_disabling_due_to_airplane = true;
                    Some(WardenEvent::AirplaneToggled)
                } else {
                    if self.is_disabling_due_to_airplane {
                        // The previous airplane-on is still draining; replay
                        // the toggle-off once we reach Disabled.
                        tracing::info!("airplane off while disable in flight, deferring");
                        self.deferred.push(WardenEvent::AirplaneToggled);
                    } else {
                        tracing::info!("airplane off but Wi-Fi already on, nothing to do");
                    }
                    None
                }
            }
            WardenEvent::ApStopped | WardenEvent::ApStartFailure => {
                if !self.has_any_manager() {
                    if self.should_enable_sta() {
                        tracing::info!("soft AP disabled, starting client mode");
                        self.start_primary_or_scan_only_client();
                    } else {
                        tracing::info!("soft AP disabled, returning to disabled state");
                        self.transition_to(WardenState::Disabled);
                    }
                } else {
                    tracing::info!("soft AP disabled, remaining enabled");
                }
                None
            }
            WardenEvent::StaStopped | WardenEvent::StaStartFailure => {
                if !self.has_any_manager() {
                    tracing::info!("station disabled, returning to disabled state");
                    self.transition_to(WardenState::Disabled);
                } else {
                    tracing::info!("station disabled, remaining enabled");
                }
                None
            }
            WardenEvent::RecoveryRestartWifi(reason) => {
                if reason != RecoveryReason::LastResortWatchdog {
                    self.deps
                        .diagnostics
                        .take_bug_report(&format!("Wi-Fi BugReport: {reason}"), &reason.to_string());
                }
                tracing::info!(%reason, "recovery triggered, disabling Wi-Fi");
                self.deferred.push(WardenEvent::DeferredRecoveryRestartWifi);
                self.shutdown_wifi();
                None
            }
            other => Some(other),
        }
    }

    fn transition_to(&mut self, new_state: WardenState) {
        if self.state != new_state {
            tracing::info!(from = ?self.state, to = ?new_state, "warden state transition");
        }
        match new_state {
            WardenState::Disabled => {
                if self.has_any_manager() {
                    tracing::error!("entered disabled state with live managers");
                }
            }
            WardenState::Enabled => {
                if !self.has_any_manager() {
                    tracing::error!("entered enabled state without live managers");
                }
                self.is_disabling_due_to_airplane = false;
            }
        }
        self.state = new_state;
        // Deferred messages re-enter at the head of the queue of the new
        // state, ahead of anything already queued.
        for event in self.deferred.drain(..).rev() {
            self.pending.push_front(event);
        }
    }

    // -------------------------------------------------------------------------
    // Manager creation / destruction
    // -------------------------------------------------------------------------

    /// Primary when the Wi-Fi toggle is on, scan-only when location-based
    /// scanning keeps the radio alive, `None` when neither applies.
    fn desired_client_role(&self) -> Option<Role> {
        if self.deps.settings.is_wifi_toggle_enabled() {
            Some(Role::ClientPrimary)
        } else if self.check_scan_only_available() {
            Some(Role::ClientScanOnly)
        } else {
            None
        }
    }

    fn start_primary_or_scan_only_client(&mut self) -> bool {
        tracing::info!("starting client mode manager");
        let Some(role) = self.desired_client_role() else {
            tracing::error!("no client mode toggle enabled, cannot pick a role");
            return false;
        };
        let id = ManagerId::next();
        let mut manager = ClientModeManager::new(id, Arc::clone(&self.deps.engine), None);
        manager.set_verbose(self.verbose);
        manager.start(&self.deps);
        manager.set_role(role, &self.deps);
        self.clients.push(manager);
        true
    }

    fn start_local_only_client(&mut self, listener: Arc<dyn ClientModeRequestListener>) {
        tracing::info!("starting local-only client mode manager");
        let id = ManagerId::next();
        let mut manager = ClientModeManager::new(id, Arc::clone(&self.deps.engine), Some(listener));
        manager.set_verbose(self.verbose);
        manager.start(&self.deps);
        manager.set_role(Role::ClientLocalOnly, &self.deps);
        self.clients.push(manager);
    }

    fn stop_local_only_client(&mut self, id: ManagerId) {
        let mut lifecycles = Vec::new();
        if let Some(manager) = self.clients.iter_mut().find(|m| m.id() == id) {
            // Only local-only managers may be released this way.
            if manager.role() != Some(Role::ClientLocalOnly) {
                return;
            }
            tracing::info!(manager = %id, "stopping local-only client mode manager");
            let mut out = Vec::new();
            manager.stop(&self.deps, &mut out);
            lifecycles.extend(out.into_iter().map(|l| (id, l)));
        }
        for (id, lifecycle) in lifecycles {
            self.reconcile_client(id, lifecycle);
        }
    }

    /// Switches every primary / scan-only manager to the role the current
    /// toggle state calls for.
    fn switch_all_primary_or_scan_only_clients(&mut self) -> bool {
        tracing::info!("switching roles on all client mode managers");
        let Some(role) = self.desired_client_role() else {
            tracing::error!("no client mode toggle enabled, cannot switch roles");
            return false;
        };
        let deps = self.deps.clone();
        for manager in &mut self.clients {
            if !matches!(
                manager.role(),
                Some(Role::ClientPrimary) | Some(Role::ClientScanOnly)
            ) {
                continue;
            }
            manager.set_role(role, &deps);
        }
        true
    }

    fn stop_all_client_managers(&mut self) {
        tracing::info!("stopping all client mode managers");
        let mut lifecycles = Vec::new();
        let deps = self.deps.clone();
        for manager in &mut self.clients {
            let mut out = Vec::new();
            manager.stop(&deps, &mut out);
            lifecycles.extend(out.into_iter().map(|l| (manager.id(), l)));
        }
        for (id, lifecycle) in lifecycles {
            self.reconcile_client(id, lifecycle);
        }
    }

    fn start_softap_manager(&mut self, config: SoftApModeConfig) {
        tracing::info!(mode = ?config.mode, ssid = %config.config.ssid, "starting soft AP manager");
        let callback = match config.mode {
            SoftApMode::Tethered => Arc::clone(&self.deps.softap_callback),
            SoftApMode::LocalOnly => Arc::clone(&self.deps.lohs_callback),
        };
        let id = ManagerId::next();
        let requestor = config.requestor.clone();
        let mut manager = SoftApManager::new(
            id,
            config,
            callback,
            self.deps.config.country_code.clone(),
        );
        manager.set_verbose(self.verbose);
        manager.request_start(&self.deps, requestor);
        self.softaps.push(manager);
    }

    fn stop_softap_managers(&mut self, mode: SoftApStopMode) {
        tracing::info!(?mode, "stopping soft AP managers");
        for manager in &self.softaps {
            if mode.matches(manager.role()) {
                manager.request_stop(&self.deps);
            }
        }
    }

    /// Stops every live manager, e.g. when airplane mode turns on.
    fn shutdown_wifi(&mut self) {
        tracing::info!("shutting down all mode managers");
        self.stop_all_client_managers();
        self.stop_softap_managers(SoftApStopMode::Any);
    }

    // -------------------------------------------------------------------------
    // Per-manager dispatch & reconciliation
    // -------------------------------------------------------------------------

    fn dispatch_client(&mut self, id: ManagerId, msg: ClientMessage) {
        let deps = self.deps.clone();
        let Some(manager) = self.clients.iter_mut().find(|m| m.id() == id) else {
            tracing::debug!(manager = %id, "message for unknown client manager dropped");
            return;
        };
        let mut out = Vec::new();
        manager.handle(msg, &deps, &mut out);
        for lifecycle in out {
            self.reconcile_client(id, lifecycle);
        }
    }

    fn dispatch_softap(&mut self, id: ManagerId, msg: SoftApMessage) {
        let deps = self.deps.clone();
        let Some(manager) = self.softaps.iter_mut().find(|m| m.id() == id) else {
            tracing::debug!(manager = %id, "message for unknown soft AP manager dropped");
            return;
        };
        let mut out = Vec::new();
        manager.handle(msg, &deps, &mut out);
        for lifecycle in out {
            self.reconcile_softap(id, lifecycle);
        }
    }

    fn reconcile_client(&mut self, id: ManagerId, lifecycle: ModeLifecycle) {
        match lifecycle {
            ModeLifecycle::Started => {
                let Some(manager) = self.clients.iter_mut().find(|m| m.id() == id) else {
                    return;
                };
                let info = manager.info();
                let listener = manager.take_request_listener();
                self.update_stats();
                if let Some(listener) = listener {
                    listener.on_answer(Some(info.clone()));
                }
                for observer in &self.observers {
                    observer.on_added(&info);
                }
                self.install_scorer_on_primary(id);
            }
            ModeLifecycle::RoleChanged => {
                let Some(manager) = self.clients.iter().find(|m| m.id() == id) else {
                    return;
                };
                let info = manager.info();
                self.update_stats();
                for observer in &self.observers {
                    observer.on_role_changed(&info);
                }
                self.install_scorer_on_primary(id);
            }
            ModeLifecycle::Stopped => {
                let Some(index) = self.clients.iter().position(|m| m.id() == id) else {
                    return;
                };
                let manager = self.clients.remove(index);
                let info = manager.info();
                self.graveyard.inter_client(StoppedManagerRecord {
                    id,
                    last_role: manager.last_role(),
                    iface: info.iface.clone(),
                    start_failed: false,
                    stopped_at: Utc::now(),
                });
                self.update_stats();
                self.pending.push_back(WardenEvent::StaStopped);
                for observer in &self.observers {
                    observer.on_removed(&info);
                }
            }
            ModeLifecycle::StartFailure => {
                let Some(index) = self.clients.iter().position(|m| m.id() == id) else {
                    return;
                };
                let mut manager = self.clients.remove(index);
                self.graveyard.inter_client(StoppedManagerRecord {
                    id,
                    last_role: manager.role(),
                    iface: None,
                    start_failed: true,
                    stopped_at: Utc::now(),
                });
                if let Some(listener) = manager.take_request_listener() {
                    listener.on_answer(None);
                }
                self.update_stats();
                self.pending.push_back(WardenEvent::StaStartFailure);
            }
        }
    }

    fn reconcile_softap(&mut self, id: ManagerId, lifecycle: ModeLifecycle) {
        match lifecycle {
            ModeLifecycle::Started => {
                let Some(manager) = self.softaps.iter().find(|m| m.id() == id) else {
                    return;
                };
                let info = manager.info();
                self.update_stats();
                for observer in &self.observers {
                    observer.on_added(&info);
                }
            }
            ModeLifecycle::RoleChanged => {
                tracing::warn!(manager = %id, "unexpected role switch on a soft AP manager");
            }
            ModeLifecycle::Stopped => {
                let Some(index) = self.softaps.iter().position(|m| m.id() == id) else {
                    return;
                };
                let manager = self.softaps.remove(index);
                let info = manager.info();
                self.graveyard.inter_softap(StoppedManagerRecord {
                    id,
                    last_role: Some(manager.role()),
                    iface: info.iface.clone(),
                    start_failed: false,
                    stopped_at: Utc::now(),
                });
                self.update_stats();
                self.pending.push_back(WardenEvent::ApStopped);
                for observer in &self.observers {
                    observer.on_removed(&info);
                }
            }
            ModeLifecycle::StartFailure => {
                let Some(index) = self.softaps.iter().position(|m| m.id() == id) else {
                    return;
                };
                let manager = self.softaps.remove(index);
                self.graveyard.inter_softap(StoppedManagerRecord {
                    id,
                    last_role: Some(manager.role()),
                    iface: None,
                    start_failed: true,
                    stopped_at: Utc::now(),
                });
                self.update_stats();
                self.pending.push_back(WardenEvent::ApStartFailure);
            }
        }
    }

    /// Re-installs the cached scorer when `id` holds the primary role, so
    /// the binding survives manager replacement and role switches.
    fn install_scorer_on_primary(&self, id: ManagerId) {
        let Some(scorer) = self.scorer.as_ref() else {
            return;
        };
        if let Some(manager) = self.clients.iter().find(|m| m.id() == id) {
            if manager.role() == Some(Role::ClientPrimary) {
                manager.set_scorer(scorer);
            }
        }
    }

    /// Reports on/off edges and scan-only occupancy to the metrics sink.
    fn update_stats(&mut self) {
        let any = self.has_any_manager();
        if any && !self.reported_wifi_on {
            self.reported_wifi_on = true;
            self.deps.metrics.note_wifi_on();
        } else if !any && self.reported_wifi_on {
            self.reported_wifi_on = false;
            self.deps.metrics.note_wifi_off();
        }
        if !self.clients.is_empty()
            && self
                .clients
                .iter()
                .all(|m| m.role() == Some(Role::ClientScanOnly))
        {
            self.deps.metrics.note_scan_only_mode_active();
        }
    }

    // -------------------------------------------------------------------------
    // Observers & dumps
    // -------------------------------------------------------------------------

    /// Registers a mode change observer.
    pub fn register_mode_change_observer(&mut self, observer: Arc<dyn ModeChangeObserver>) {
        self.observers.push(observer);
    }

    /// Unregisters a previously registered observer.
    pub fn unregister_mode_change_observer(&mut self, observer: &Arc<dyn ModeChangeObserver>) {
        self.observers.retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Writes a full state dump, including the transition ring and the
    /// graveyard, into `out`.
    pub fn dump(&self, out: &mut String) {
        use std::fmt::Write;

        let _ = writeln!(out, "ModeWarden state: {:?}", self.state);
        let _ = writeln!(out, "  emergency: {}", self.in_emergency_mode());
        let _ = writeln!(
            out,
            "  live managers: {} clients, {} softaps",
            self.clients.len(),
            self.softaps.len()
        );
        for manager in &self.clients {
            manager.dump(out);
        }
        for manager in &self.softaps {
            manager.dump(out);
        }
        let _ = writeln!(out, "  last {} messages:", self.log_ring.len());
        for (state, event) in &self.log_ring {
            let _ = writeln!(out, "    [{state:?}] {event}");
        }
        self.graveyard.dump(out);
    }
}
