//! Client (station) mode manager.
//!
//! Owns one native client interface and drives it through a hierarchical
//! state machine: `Idle`, and `Started` with `ScanOnly` / `Connect`
//! sub-states. Start always lands in scan mode first; connectivity is a
//! reconfiguration of the same interface. Stops and connect → scan-only
//! switches are gated by the deferred-stop controller so an ongoing
//! voice-over-Wi-Fi call is not cut.
//!
//! The externally visible station state is broadcast only while the manager
//! holds the primary role.

use std::sync::Arc;

use wifi_warden_core::traits::{
    ActiveModeInfo, ClientModeRequestListener, ConnectionEngine, InterfaceEvent,
    InterfaceEventSink, ScorerBinding,
};
use wifi_warden_core::types::{ManagerId, OperationalMode, RecoveryReason, Role, WifiState};

use crate::defer::{BeginOutcome, ContinueCause, DeferStopController};
use crate::deps::WardenDeps;
use crate::events::{ClientMessage, EventPoster, ModeLifecycle, WardenEvent};

/// Hierarchical state of a client mode manager. `ScanOnly` and `Connect`
/// are the sub-states of the started half of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Idle,
    ScanOnly,
    Connect,
}

impl ClientState {
    fn is_started(self) -> bool {
        matches!(self, Self::ScanOnly | Self::Connect)
    }
}

/// Marshals native interface events for one client manager onto the warden
/// queue.
struct ClientIfaceSink {
    id: ManagerId,
    poster: EventPoster,
}

impl InterfaceEventSink for ClientIfaceSink {
    fn on_interface_event(&self, event: InterfaceEvent) {
        self.poster
            .post(WardenEvent::Client(self.id, ClientMessage::Interface(event)));
    }
}

/// Read-only facade over a station manager, answering API calls. The warden
/// hands out [`DefaultClientMode`] when no primary manager is live.
pub trait ClientMode {
    /// Current role, if started.
    fn role(&self) -> Option<Role>;

    /// Externally visible station state.
    fn wifi_state(&self) -> WifiState;

    /// Initiates a connection to a configured network.
    fn connect_network(&self, network_id: i64);

    /// Disconnects from the current network.
    fn disconnect(&self);

    /// Reassociates to the current network.
    fn reassociate(&self);

    /// Installs a connected-network scorer.
    fn set_scorer(&self, scorer: &ScorerBinding) -> bool;

    /// Removes the installed scorer.
    fn clear_scorer(&self);

    /// Whether an L2 connection is held.
    fn is_connected(&self) -> bool;
}

/// No-op [`ClientMode`] answering API calls while Wi-Fi is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClientMode;

/// Shared instance backing `primary_client_or_default`.
pub static DEFAULT_CLIENT_MODE: DefaultClientMode = DefaultClientMode;

impl ClientMode for DefaultClientMode {
    fn role(&self) -> Option<Role> {
        None
    }

    fn wifi_state(&self) -> WifiState {
        WifiState::Disabled
    }

    fn connect_network(&self, _network_id: i64) {}

    fn disconnect(&self) {}

    fn reassociate(&self) {}

    fn set_scorer(&self, _scorer: &ScorerBinding) -> bool {
        // Don't fail the public API when Wi-Fi is off.
        true
    }

    fn clear_scorer(&self) {}

    fn is_connected(&self) -> bool {
        false
    }
}

/// Manager for Wi-Fi in client mode.
pub struct ClientModeManager {
    id: ManagerId,
    state: ClientState,
    role: Option<Role>,
    previous_role: Option<Role>,
    target_role: Option<Role>,
    iface: Option<String>,
    iface_up: bool,
    wifi_state: WifiState,
    defer: DeferStopController,
    engine: Arc<dyn ConnectionEngine>,
    request_listener: Option<Arc<dyn ClientModeRequestListener>>,
    verbose: bool,
}

impl ClientModeManager {
    /// Creates an idle manager. `request_listener` is answered once the
    /// manager starts (used for external local-only requests).
    pub fn new(
        id: ManagerId,
        engine: Arc<dyn ConnectionEngine>,
        request_listener: Option<Arc<dyn ClientModeRequestListener>>,
    ) -> Self {
        Self {
            id,
            state: ClientState::Idle,
            role: None,
            previous_role: None,
            target_role: None,
            iface: None,
            iface_up: false,
            wifi_state: WifiState::Disabled,
            defer: DeferStopController::new(),
            engine,
            request_listener,
            verbose: false,
        }
    }

    /// Manager id.
    #[must_use]
    pub fn id(&self) -> ManagerId {
        self.id
    }

    /// Current role.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The role held when the manager last stopped; for post-mortems.
    #[must_use]
    pub fn last_role(&self) -> Option<Role> {
        self.role.or(self.previous_role)
    }

    /// Owned interface name, if any.
    #[must_use]
    pub fn iface(&self) -> Option<&str> {
        self.iface.as_deref()
    }

    /// Snapshot for observers and request answers.
    #[must_use]
    pub fn info(&self) -> ActiveModeInfo {
        ActiveModeInfo {
            id: self.id,
            role: self.role,
            iface: self.iface.clone(),
        }
    }

    /// Takes the pending external request listener, if any.
    pub fn take_request_listener(&mut self) -> Option<Arc<dyn ClientModeRequestListener>> {
        self.request_listener.take()
    }

    /// Enables verbose logging.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Starts client mode. The interface always comes up in scan mode.
    pub fn start(&mut self, deps: &WardenDeps) {
        self.target_role = Some(Role::ClientScanOnly);
        deps.poster
            .post(WardenEvent::Client(self.id, ClientMessage::Start));
    }

    /// Disconnects and stops client mode, gated by the deferred-stop
    /// controller. A stop on an already-idle manager is a no-op.
    pub fn stop(&mut self, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        if self.state == ClientState::Idle && self.role.is_none() {
            tracing::debug!(manager = %self.id, "stop on idle client manager ignored");
            return;
        }
        self.target_role = None;
        if self.iface_up {
            self.update_connect_mode_state(deps, WifiState::Disabling, WifiState::Enabled);
        } else {
            self.update_connect_mode_state(deps, WifiState::Disabling, WifiState::Enabling);
        }
        match self.defer.begin(self.id, deps) {
            BeginOutcome::ContinueNow => self.continue_stop(deps, ContinueCause::Immediate, out),
            BeginOutcome::Deferred | BeginOutcome::AlreadyDeferring => {}
        }
    }

    /// Switches the manager's role. Primary ↔ scan-only is an in-place
    /// reconfiguration of the owned interface.
    pub fn set_role(&mut self, role: Role, deps: &WardenDeps) {
        if role == Role::ClientScanOnly {
            self.target_role = Some(role);
            deps.poster.post(WardenEvent::Client(
                self.id,
                ClientMessage::SwitchToScanOnlyMode,
            ));
        } else if role.is_client_connectivity() {
            self.target_role = Some(role);
            deps.poster.post(WardenEvent::Client(
                self.id,
                ClientMessage::SwitchToConnectMode(role),
            ));
        } else {
            tracing::error!(manager = %self.id, %role, "refusing non-client role");
        }
    }

    /// Processes one state machine message. Lifecycle notifications are
    /// appended to `out` for the warden to reconcile.
    pub fn handle(&mut self, msg: ClientMessage, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        if self.verbose {
            tracing::debug!(manager = %self.id, state = ?self.state, msg = ?msg, "client sm");
        }
        match msg {
            ClientMessage::Start => self.handle_start(deps, out),
            ClientMessage::Stop => self.stop(deps, out),
            ClientMessage::SwitchToConnectMode(role) => {
                self.handle_switch_to_connect(role, deps, out);
            }
            ClientMessage::SwitchToScanOnlyMode => self.handle_switch_to_scan_only(deps, out),
            ClientMessage::SwitchToScanOnlyModeContinue => {
                if self.state == ClientState::Connect {
                    self.exit_connect(deps);
                    self.enter_scan_only(deps, out);
                }
            }
            ClientMessage::Interface(event) => self.handle_interface_event(event, deps, out),
            ClientMessage::InterfaceDown => self.handle_interface_down(deps, out),
            ClientMessage::DeferTimeout => {
                if self.defer.is_deferring() {
                    self.continue_stop(deps, ContinueCause::TimerExpired, out);
                }
            }
            ClientMessage::Ims(event) => self.handle_ims_event(event, deps, out),
            ClientMessage::ImsLostDelayExpired => {
                if self.defer.is_deferring() {
                    self.continue_stop(deps, ContinueCause::Ims, out);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Message handlers
    // -------------------------------------------------------------------------

    fn handle_start(&mut self, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        if self.state.is_started() {
            // Already started, ignore.
            return;
        }
        let sink = Arc::new(ClientIfaceSink {
            id: self.id,
            poster: deps.poster.clone(),
        });
        // Always start in scan mode first.
        match deps.native.setup_interface_for_client_in_scan_mode(sink) {
            Ok(iface) => {
                tracing::info!(manager = %self.id, %iface, "client interface created");
                self.iface = Some(iface);
                self.enter_started(deps);
                self.enter_scan_only(deps, out);
            }
            Err(err) => {
                tracing::error!(manager = %self.id, %err, "failed to create client interface");
                out.push(ModeLifecycle::StartFailure);
            }
        }
    }

    fn handle_switch_to_connect(
        &mut self,
        role: Role,
        deps: &WardenDeps,
        out: &mut Vec<ModeLifecycle>,
    ) {
        match self.state {
            ClientState::Idle => {
                tracing::debug!(manager = %self.id, "switch-to-connect while idle ignored");
            }
            ClientState::ScanOnly => {
                // Could be any of the connectivity roles.
                self.set_role_internal(role, out);
                self.update_connect_mode_state(deps, WifiState::Enabling, WifiState::Disabled);
                let iface = self.iface.clone().unwrap_or_default();
                if !deps.native.switch_client_interface_to_connectivity_mode(&iface) {
                    self.update_connect_mode_state(deps, WifiState::Unknown, WifiState::Enabling);
                    self.update_connect_mode_state(deps, WifiState::Disabled, WifiState::Unknown);
                    out.push(ModeLifecycle::StartFailure);
                    return;
                }
                self.state = ClientState::Connect;
                self.enter_connect(deps);
            }
            ClientState::Connect => {
                // Already in connect mode, only switching connectivity roles.
                self.set_role_internal(role, out);
            }
        }
    }

    fn handle_switch_to_scan_only(&mut self, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        match self.state {
            ClientState::Idle | ClientState::ScanOnly => {
                // Nothing to switch.
            }
            ClientState::Connect => {
                self.update_connect_mode_state(deps, WifiState::Disabling, WifiState::Enabled);
                match self.defer.begin(self.id, deps) {
                    BeginOutcome::ContinueNow => {
                        self.continue_stop(deps, ContinueCause::Immediate, out);
                    }
                    BeginOutcome::Deferred | BeginOutcome::AlreadyDeferring => {}
                }
            }
        }
    }

    fn handle_interface_event(
        &mut self,
        event: InterfaceEvent,
        deps: &WardenDeps,
        out: &mut Vec<ModeLifecycle>,
    ) {
        if !self.state.is_started() || self.iface.as_deref() != Some(event.iface()) {
            return;
        }
        match event {
            InterfaceEvent::Up { .. } => self.handle_status_changed(true, deps),
            InterfaceEvent::Down { .. } => self.handle_status_changed(false, deps),
            InterfaceEvent::Destroyed { iface } => {
                tracing::info!(manager = %self.id, %iface, "client interface destroyed");
                // Drop per-interface engine state before unwinding.
                self.engine.handle_iface_destroyed();
                if self.state == ClientState::Connect {
                    self.update_connect_mode_state(deps, WifiState::Disabling, WifiState::Enabled);
                }
                self.iface = None;
                self.transition_to_idle(deps, out);
            }
        }
    }

    fn handle_status_changed(&mut self, is_up: bool, deps: &WardenDeps) {
        if self.state == ClientState::Connect {
            if is_up == self.iface_up {
                return;
            }
            if !is_up {
                if self.engine.is_connected_mac_randomization_enabled() {
                    // MAC randomization cycles the interface; not an error.
                    return;
                }
                self.update_connect_mode_state(deps, WifiState::Unknown, WifiState::Enabled);
            }
        }
        self.on_up_changed(is_up, deps);
    }

    fn handle_interface_down(&mut self, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        if !self.state.is_started() {
            return;
        }
        if self.state == ClientState::Connect {
            self.update_connect_mode_state(deps, WifiState::Disabling, WifiState::Unknown);
        }
        tracing::error!(manager = %self.id, "interface down, reporting to self-recovery");
        deps.recovery.trigger(RecoveryReason::StaIfaceDown);
        self.transition_to_idle(deps, out);
    }

    fn handle_ims_event(
        &mut self,
        event: wifi_warden_core::ImsEvent,
        deps: &WardenDeps,
        out: &mut Vec<ModeLifecycle>,
    ) {
        use wifi_warden_core::ImsEvent;

        if !self.defer.is_deferring() {
            return;
        }
        match event {
            ImsEvent::Registered { over_wlan: false } => {
                self.continue_stop(deps, ContinueCause::Ims, out);
            }
            ImsEvent::Registered { over_wlan: true } => {}
            ImsEvent::NetworkLost => {
                if self.defer.on_ims_network_lost(self.id, deps) {
                    self.continue_stop(deps, ContinueCause::Ims, out);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Deferred stop continuation
    // -------------------------------------------------------------------------

    fn continue_stop(
        &mut self,
        deps: &WardenDeps,
        cause: ContinueCause,
        out: &mut Vec<ModeLifecycle>,
    ) {
        let (was_deferring, timed_out, duration_ms) = self.defer.finish(deps, cause);
        match self.target_role {
            None => {
                tracing::debug!(manager = %self.id, "continuing to stop client mode");
                self.transition_to_idle(deps, out);
                deps.metrics
                    .note_wifi_off_deferring(was_deferring, timed_out, duration_ms);
            }
            Some(Role::ClientScanOnly) => {
                let iface = self.iface.clone().unwrap_or_default();
                if !deps.native.switch_client_interface_to_scan_mode(&iface) {
                    out.push(ModeLifecycle::StartFailure);
                } else {
                    deps.poster.post(WardenEvent::Client(
                        self.id,
                        ClientMessage::SwitchToScanOnlyModeContinue,
                    ));
                    deps.metrics
                        .note_wifi_off_deferring(was_deferring, timed_out, duration_ms);
                }
            }
            Some(_) => {
                // Target flipped back to a connectivity role while deferring;
                // abort the stop.
                self.update_connect_mode_state(deps, WifiState::Enabled, WifiState::Disabling);
            }
        }
    }

    // -------------------------------------------------------------------------
    // State entry / exit actions
    // -------------------------------------------------------------------------

    fn enter_started(&mut self, deps: &WardenDeps) {
        self.iface_up = false;
        let up = self
            .iface
            .as_deref()
            .is_some_and(|iface| deps.native.is_interface_up(iface));
        self.on_up_changed(up, deps);
    }

    fn enter_scan_only(&mut self, _deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        self.state = ClientState::ScanOnly;
        self.engine
            .set_operational_mode(OperationalMode::ScanOnly, self.iface.as_deref());
        self.set_role_internal(Role::ClientScanOnly, out);
    }

    fn enter_connect(&mut self, deps: &WardenDeps) {
        self.engine
            .set_operational_mode(OperationalMode::Connect, self.iface.as_deref());
        self.update_connect_mode_state(deps, WifiState::Enabled, WifiState::Enabling);
    }

    fn exit_connect(&mut self, deps: &WardenDeps) {
        self.update_connect_mode_state(deps, WifiState::Disabled, WifiState::Disabling);
    }

    /// Runs the exit chain down to `Idle`: leaves the connect sub-state if
    /// active, tears down the interface, and reports the terminal stop.
    fn transition_to_idle(&mut self, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        if self.state == ClientState::Connect {
            self.exit_connect(deps);
        }
        // Started-state exit.
        self.engine.set_operational_mode(OperationalMode::Disabled, None);
        if let Some(iface) = self.iface.take() {
            deps.native.teardown_interface(&iface);
        }
        self.iface_up = false;
        self.previous_role = self.role.take();
        // A deferral may still be armed when the interface dies under us.
        let _ = self.defer.finish(deps, ContinueCause::Immediate);
        self.state = ClientState::Idle;
        out.push(ModeLifecycle::Stopped);
    }

    fn on_up_changed(&mut self, is_up: bool, deps: &WardenDeps) {
        if is_up == self.iface_up {
            return;
        }
        self.iface_up = is_up;
        if !is_up {
            // Interface went down; unwind from the started states.
            tracing::debug!(manager = %self.id, "client interface down");
            deps.poster
                .post(WardenEvent::Client(self.id, ClientMessage::InterfaceDown));
        }
    }

    fn set_role_internal(&mut self, new_role: Role, out: &mut Vec<ModeLifecycle>) {
        if self.role == Some(new_role) {
            return;
        }
        if self.role.is_none() {
            tracing::info!(manager = %self.id, role = %new_role, "client manager started");
            self.role = Some(new_role);
            out.push(ModeLifecycle::Started);
        } else {
            tracing::info!(manager = %self.id, role = %new_role, "client manager role changed");
            self.role = Some(new_role);
            out.push(ModeLifecycle::RoleChanged);
        }
    }

    /// Updates the externally visible state and emits the sticky broadcast.
    ///
    /// `Unknown` is never broadcast, and nothing is broadcast unless this
    /// manager holds the primary role.
    fn update_connect_mode_state(
        &mut self,
        deps: &WardenDeps,
        new: WifiState,
        previous: WifiState,
    ) {
        if new == WifiState::Unknown {
            return;
        }
        if self.role != Some(Role::ClientPrimary) {
            return;
        }
        self.wifi_state = new;
        deps.broadcaster.wifi_state_changed(new, previous);
    }

    /// Writes a state dump into `out`.
    pub fn dump(&self, out: &mut String) {
        use std::fmt::Write;

        let _ = writeln!(out, "ClientModeManager id={}", self.id);
        let _ = writeln!(out, "  state: {:?}", self.state);
        let _ = writeln!(out, "  role: {:?} target: {:?}", self.role, self.target_role);
        let _ = writeln!(out, "  iface: {:?} up: {}", self.iface, self.iface_up);
        let _ = writeln!(out, "  deferring: {}", self.defer.is_deferring());
    }
}

impl ClientMode for ClientModeManager {
    fn role(&self) -> Option<Role> {
        self.role
    }

    fn wifi_state(&self) -> WifiState {
        self.wifi_state
    }

    fn connect_network(&self, network_id: i64) {
        if self.state == ClientState::Connect {
            self.engine.connect_network(network_id);
        }
    }

    fn disconnect(&self) {
        if self.state == ClientState::Connect {
            self.engine.disconnect();
        }
    }

    fn reassociate(&self) {
        if self.state == ClientState::Connect {
            self.engine.reassociate();
        }
    }

    fn set_scorer(&self, scorer: &ScorerBinding) -> bool {
        if self.state.is_started() {
            self.engine.set_scorer(scorer)
        } else {
            true
        }
    }

    fn clear_scorer(&self) {
        if self.state.is_started() {
            self.engine.clear_scorer();
        }
    }

    fn is_connected(&self) -> bool {
        self.state == ClientState::Connect && self.engine.is_connected()
    }
}
