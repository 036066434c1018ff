//! Shared mock ports and a deterministic test harness.
//!
//! Everything is driven synchronously: the harness owns the warden core and
//! the queue receiver, and tests pump queued messages and fire scheduled
//! timers by hand. No sleeps, no real time.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use wifi_warden::deps::{WardenConfig, WardenDeps};
use wifi_warden::events::{EventPoster, WardenEvent};
use wifi_warden::timer::ManualTimerService;
use wifi_warden::warden::ModeWarden;
use wifi_warden_core::error::{SoftApStartError, WardenError};
use wifi_warden_core::traits::{
    ActiveModeInfo, AvailabilitySink, ClientModeRequestListener, ConnectionEngine, Diagnostics,
    ImsEventSink, InterfaceEvent, InterfaceEventSink, ModeChangeObserver, NativeStatusSink,
    ScorerBinding, SelfRecovery, SettingsStore, SoftApCallback, SoftApHalEvent,
    SoftApHalEventSink, StateBroadcaster, SubscriptionInfo, TelephonyPolicy, WardenMetrics,
    WifiNative,
};
use wifi_warden_core::types::{
    ApState, ClientBlockReason, MacAddress, OperationalMode, RecoveryReason, SoftApConfig,
    SoftApInfo, SoftApMode, WifiState, WorkSource,
};

// =============================================================================
// Native layer mock
// =============================================================================

#[derive(Default)]
pub struct MockNative {
    next_iface: AtomicUsize,
    pub fail_client_setup: AtomicBool,
    pub fail_softap_setup: AtomicBool,
    pub fail_bridge_setup: AtomicBool,
    pub fail_start_softap: AtomicBool,
    pub fail_switch_to_connect: AtomicBool,
    pub fail_switch_to_scan: AtomicBool,
    pub force_disconnect_ok: AtomicBool,
    pub interfaces_up: AtomicBool,
    pub ap_mac_supported: AtomicBool,
    pub sta_ap_concurrency: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    iface_sinks: Mutex<HashMap<String, Arc<dyn InterfaceEventSink>>>,
    hal_sinks: Mutex<HashMap<String, Arc<dyn SoftApHalEventSink>>>,
    pub hostapd_configs: Mutex<Vec<(String, SoftApConfig)>>,
    pub disconnects: Mutex<Vec<(String, MacAddress, ClientBlockReason)>>,
    pub status_sink: Mutex<Option<Arc<dyn NativeStatusSink>>>,
}

impl MockNative {
    pub fn new() -> Arc<Self> {
        let native = Self::default();
        native.force_disconnect_ok.store(true, Ordering::SeqCst);
        native.interfaces_up.store(true, Ordering::SeqCst);
        native.ap_mac_supported.store(true, Ordering::SeqCst);
        native.sta_ap_concurrency.store(true, Ordering::SeqCst);
        Arc::new(native)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Delivers a native interface event through the sink registered for
    /// `iface`. Panics if nothing ever registered for that name.
    pub fn fire_iface_event(&self, iface: &str, event: InterfaceEvent) {
        let sink = self
            .iface_sinks
            .lock()
            .get(iface)
            .cloned()
            .unwrap_or_else(|| panic!("no sink registered for {iface}"));
        sink.on_interface_event(event);
    }

    /// Delivers a hostapd event through the listener registered for `iface`.
    pub fn fire_hal_event(&self, iface: &str, event: SoftApHalEvent) {
        let sink = self
            .hal_sinks
            .lock()
            .get(iface)
            .cloned()
            .unwrap_or_else(|| panic!("no hostapd listener registered for {iface}"));
        sink.on_softap_event(event);
    }

    /// Reports native daemon death through the registered status listener.
    pub fn report_daemon_death(&self) {
        if let Some(sink) = self.status_sink.lock().clone() {
            sink.on_native_status(false);
        }
    }
}

impl WifiNative for MockNative {
    fn setup_interface_for_client_in_scan_mode(
        &self,
        callback: Arc<dyn InterfaceEventSink>,
    ) -> Result<String, WardenError> {
        if self.fail_client_setup.load(Ordering::SeqCst) {
            return Err(WardenError::native_setup("client scan iface"));
        }
        let iface = format!("wlan{}", self.next_iface.fetch_add(1, Ordering::SeqCst));
        self.record(format!("setup_client {iface}"));
        self.iface_sinks.lock().insert(iface.clone(), callback);
        Ok(iface)
    }

    fn setup_interface_for_softap_mode(
        &self,
        callback: Arc<dyn InterfaceEventSink>,
        _requestor: &WorkSource,
        bridged: bool,
    ) -> Result<String, WardenError> {
        if self.fail_softap_setup.load(Ordering::SeqCst) {
            return Err(WardenError::native_setup("softap iface"));
        }
        let iface = format!("ap{}", self.next_iface.fetch_add(1, Ordering::SeqCst));
        self.record(format!("setup_softap {iface} bridged={bridged}"));
        self.iface_sinks.lock().insert(iface.clone(), callback);
        Ok(iface)
    }

    fn setup_interface_for_bridge_mode(
        &self,
        callback: Arc<dyn InterfaceEventSink>,
    ) -> Result<String, WardenError> {
        if self.fail_bridge_setup.load(Ordering::SeqCst) {
            return Err(WardenError::native_setup("bridge iface"));
        }
        let iface = format!("br{}", self.next_iface.fetch_add(1, Ordering::SeqCst));
        self.record(format!("setup_bridge {iface}"));
        self.iface_sinks.lock().insert(iface.clone(), callback);
        Ok(iface)
    }

    fn switch_client_interface_to_scan_mode(&self, iface: &str) -> bool {
        self.record(format!("switch_to_scan {iface}"));
        !self.fail_switch_to_scan.load(Ordering::SeqCst)
    }

    fn switch_client_interface_to_connectivity_mode(&self, iface: &str) -> bool {
        self.record(format!("switch_to_connect {iface}"));
        !self.fail_switch_to_connect.load(Ordering::SeqCst)
    }

    fn teardown_interface(&self, iface: &str) {
        self.record(format!("teardown {iface}"));
    }

    fn start_soft_ap(
        &self,
        iface: &str,
        config: &SoftApConfig,
        _tethered: bool,
        listener: Arc<dyn SoftApHalEventSink>,
    ) -> bool {
        if self.fail_start_softap.load(Ordering::SeqCst) {
            return false;
        }
        self.record(format!("start_soft_ap {iface}"));
        self.hal_sinks.lock().insert(iface.to_string(), listener);
        self.hostapd_configs
            .lock()
            .push((iface.to_string(), config.clone()));
        true
    }

    fn set_country_code(&self, iface: &str, country_code: &str) -> bool {
        self.record(format!("set_country {iface} {country_code}"));
        true
    }

    fn set_ap_mac_address(&self, iface: &str, mac: MacAddress) -> bool {
        self.record(format!("set_ap_mac {iface} {mac}"));
        true
    }

    fn reset_ap_mac_to_factory(&self, iface: &str) -> bool {
        self.record(format!("reset_ap_mac {iface}"));
        true
    }

    fn is_ap_set_mac_address_supported(&self, _iface: &str) -> bool {
        self.ap_mac_supported.load(Ordering::SeqCst)
    }

    fn is_interface_up(&self, _iface: &str) -> bool {
        self.interfaces_up.load(Ordering::SeqCst)
    }

    fn force_client_disconnect(
        &self,
        iface: &str,
        mac: MacAddress,
        reason: ClientBlockReason,
    ) -> bool {
        self.disconnects
            .lock()
            .push((iface.to_string(), mac, reason));
        self.force_disconnect_ok.load(Ordering::SeqCst)
    }

    fn is_sta_ap_concurrency_supported(&self) -> bool {
        self.sta_ap_concurrency.load(Ordering::SeqCst)
    }

    fn register_status_listener(&self, sink: Arc<dyn NativeStatusSink>) {
        *self.status_sink.lock() = Some(sink);
    }

    fn register_client_availability_listener(&self, _sink: Arc<dyn AvailabilitySink>) {}

    fn register_softap_availability_listener(&self, _sink: Arc<dyn AvailabilitySink>) {}
}

// =============================================================================
// Settings / telephony mocks
// =============================================================================

#[derive(Default)]
pub struct MockSettings {
    pub airplane: AtomicBool,
    pub wifi_toggle: AtomicBool,
    pub scan_always: AtomicBool,
    pub location: AtomicBool,
    pub dual_softap: AtomicBool,
}

impl MockSettings {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SettingsStore for MockSettings {
    fn is_airplane_mode_on(&self) -> bool {
        self.airplane.load(Ordering::SeqCst)
    }

    fn is_wifi_toggle_enabled(&self) -> bool {
        self.wifi_toggle.load(Ordering::SeqCst)
    }

    fn is_scan_always_available(&self) -> bool {
        self.scan_always.load(Ordering::SeqCst)
    }

    fn is_location_mode_enabled(&self) -> bool {
        self.location.load(Ordering::SeqCst)
    }

    fn is_dual_softap_requested(&self) -> bool {
        self.dual_softap.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockTelephony {
    pub subscriptions: Mutex<Vec<SubscriptionInfo>>,
    pub disable_wifi_in_emergency: AtomicBool,
    pub ims_lost_delay_ms: AtomicUsize,
    pub registered: Mutex<HashMap<i32, Arc<dyn ImsEventSink>>>,
    pub unregistered: Mutex<Vec<i32>>,
}

impl MockTelephony {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delivers an IMS event to the sink registered for `sub_id`.
    pub fn fire_ims_event(&self, sub_id: i32, event: wifi_warden_core::ImsEvent) {
        let sink = self
            .registered
            .lock()
            .get(&sub_id)
            .cloned()
            .unwrap_or_else(|| panic!("no IMS sink registered for sub {sub_id}"));
        sink.on_ims_event(event);
    }
}

impl TelephonyPolicy for MockTelephony {
    fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.lock().clone()
    }

    fn disable_wifi_in_emergency(&self) -> bool {
        self.disable_wifi_in_emergency.load(Ordering::SeqCst)
    }

    fn delay_disconnect_on_ims_lost_ms(&self) -> u64 {
        self.ims_lost_delay_ms.load(Ordering::SeqCst) as u64
    }

    fn register_ims_events(&self, sub_id: i32, sink: Arc<dyn ImsEventSink>) {
        self.registered.lock().insert(sub_id, sink);
    }

    fn unregister_ims_events(&self, sub_id: i32) {
        self.registered.lock().remove(&sub_id);
        self.unregistered.lock().push(sub_id);
    }
}

// =============================================================================
// Broadcast / callback / engine mocks
// =============================================================================

#[derive(Default)]
pub struct MockBroadcaster {
    pub wifi: Mutex<Vec<(WifiState, WifiState)>>,
    pub ap: Mutex<Vec<(ApState, ApState, Option<SoftApStartError>)>>,
}

impl MockBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn wifi_transitions(&self) -> Vec<(WifiState, WifiState)> {
        self.wifi.lock().clone()
    }

    pub fn ap_transitions(&self) -> Vec<(ApState, ApState, Option<SoftApStartError>)> {
        self.ap.lock().clone()
    }
}

impl StateBroadcaster for MockBroadcaster {
    fn wifi_state_changed(&self, new: WifiState, previous: WifiState) {
        self.wifi.lock().push((new, previous));
    }

    fn ap_state_changed(
        &self,
        new: ApState,
        previous: ApState,
        reason: Option<SoftApStartError>,
        _iface: Option<&str>,
        _mode: SoftApMode,
    ) {
        self.ap.lock().push((new, previous, reason));
    }
}

#[derive(Default)]
pub struct MockSoftApCallback {
    pub states: Mutex<Vec<(ApState, Option<SoftApStartError>)>>,
    pub infos: Mutex<Vec<SoftApInfo>>,
    pub client_lists: Mutex<Vec<Vec<MacAddress>>>,
    pub blocked: Mutex<Vec<(MacAddress, ClientBlockReason)>>,
}

impl MockSoftApCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn latest_clients(&self) -> Vec<MacAddress> {
        self.client_lists.lock().last().cloned().unwrap_or_default()
    }
}

impl SoftApCallback for MockSoftApCallback {
    fn on_state_changed(&self, state: ApState, reason: Option<SoftApStartError>) {
        self.states.lock().push((state, reason));
    }

    fn on_info_changed(&self, info: &SoftApInfo) {
        self.infos.lock().push(info.clone());
    }

    fn on_connected_clients_changed(&self, clients: &[MacAddress]) {
        self.client_lists.lock().push(clients.to_vec());
    }

    fn on_blocked_client_connecting(&self, mac: MacAddress, reason: ClientBlockReason) {
        self.blocked.lock().push((mac, reason));
    }
}

#[derive(Default)]
pub struct MockEngine {
    pub ops: Mutex<Vec<String>>,
    pub mac_randomization: AtomicBool,
    pub connected: AtomicBool,
    pub scorer_installs: Mutex<Vec<u64>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ConnectionEngine for MockEngine {
    fn set_operational_mode(&self, mode: OperationalMode, iface: Option<&str>) {
        self.ops
            .lock()
            .push(format!("mode {:?} {}", mode, iface.unwrap_or("-")));
    }

    fn handle_iface_destroyed(&self) {
        self.ops.lock().push("iface_destroyed".to_string());
    }

    fn connect_network(&self, network_id: i64) {
        self.ops.lock().push(format!("connect {network_id}"));
    }

    fn disconnect(&self) {
        self.ops.lock().push("disconnect".to_string());
    }

    fn reassociate(&self) {
        self.ops.lock().push("reassociate".to_string());
    }

    fn set_scorer(&self, scorer: &ScorerBinding) -> bool {
        self.scorer_installs.lock().push(scorer.token);
        true
    }

    fn clear_scorer(&self) {
        self.ops.lock().push("clear_scorer".to_string());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_connected_mac_randomization_enabled(&self) -> bool {
        self.mac_randomization.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Metrics / diagnostics / recovery / observer mocks
// =============================================================================

#[derive(Default)]
pub struct MockMetrics {
    pub wifi_on: AtomicUsize,
    pub wifi_off: AtomicUsize,
    pub scan_only_active: AtomicUsize,
    pub softap_start_results: Mutex<Vec<(bool, Option<SoftApStartError>)>>,
    pub client_blocked: Mutex<Vec<usize>>,
    pub deferring: Mutex<Vec<(bool, bool, u64)>>,
}

impl MockMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl WardenMetrics for MockMetrics {
    fn note_wifi_on(&self) {
        self.wifi_on.fetch_add(1, Ordering::SeqCst);
    }

    fn note_wifi_off(&self) {
        self.wifi_off.fetch_add(1, Ordering::SeqCst);
    }

    fn note_scan_only_mode_active(&self) {
        self.scan_only_active.fetch_add(1, Ordering::SeqCst);
    }

    fn note_soft_ap_start_result(&self, success: bool, reason: Option<SoftApStartError>) {
        self.softap_start_results.lock().push((success, reason));
    }

    fn note_soft_ap_client_blocked(&self, effective_max: usize) {
        self.client_blocked.lock().push(effective_max);
    }

    fn note_wifi_off_deferring(&self, was_deferred: bool, timed_out: bool, duration_ms: u64) {
        self.deferring
            .lock()
            .push((was_deferred, timed_out, duration_ms));
    }
}

#[derive(Default)]
pub struct MockDiagnostics {
    pub bug_reports: Mutex<Vec<String>>,
    pub captures: Mutex<Vec<RecoveryReason>>,
}

impl MockDiagnostics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Diagnostics for MockDiagnostics {
    fn take_bug_report(&self, title: &str, _detail: &str) {
        self.bug_reports.lock().push(title.to_string());
    }

    fn trigger_bug_report_data_capture(&self, reason: RecoveryReason) {
        self.captures.lock().push(reason);
    }
}

#[derive(Default)]
pub struct MockRecovery {
    pub triggers: Mutex<Vec<RecoveryReason>>,
}

impl MockRecovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SelfRecovery for MockRecovery {
    fn trigger(&self, reason: RecoveryReason) {
        self.triggers.lock().push(reason);
    }
}

#[derive(Default)]
pub struct MockObserver {
    pub events: Mutex<Vec<String>>,
}

impl MockObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ModeChangeObserver for MockObserver {
    fn on_added(&self, manager: &ActiveModeInfo) {
        self.events.lock().push(format!(
            "added:{}",
            manager.role.map_or("none".into(), |r| r.to_string())
        ));
    }

    fn on_removed(&self, manager: &ActiveModeInfo) {
        self.events.lock().push(format!(
            "removed:{}",
            manager.role.map_or("none".into(), |r| r.to_string())
        ));
    }

    fn on_role_changed(&self, manager: &ActiveModeInfo) {
        self.events.lock().push(format!(
            "role_changed:{}",
            manager.role.map_or("none".into(), |r| r.to_string())
        ));
    }
}

#[derive(Default)]
pub struct MockRequestListener {
    pub answers: Mutex<Vec<Option<ActiveModeInfo>>>,
}

impl MockRequestListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ClientModeRequestListener for MockRequestListener {
    fn on_answer(&self, manager: Option<ActiveModeInfo>) {
        self.answers.lock().push(manager);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct TestHarness {
    pub warden: ModeWarden,
    rx: mpsc::UnboundedReceiver<WardenEvent>,
    pub poster: EventPoster,
    pub native: Arc<MockNative>,
    pub settings: Arc<MockSettings>,
    pub telephony: Arc<MockTelephony>,
    pub broadcaster: Arc<MockBroadcaster>,
    pub engine: Arc<MockEngine>,
    pub softap_callback: Arc<MockSoftApCallback>,
    pub lohs_callback: Arc<MockSoftApCallback>,
    pub metrics: Arc<MockMetrics>,
    pub diagnostics: Arc<MockDiagnostics>,
    pub recovery: Arc<MockRecovery>,
    pub timers: Arc<ManualTimerService>,
}

impl TestHarness {
    /// Builds a harness with default mocks. The warden is not started;
    /// flip settings first, then call [`TestHarness::start`].
    pub fn new() -> Self {
        Self::with_config(WardenConfig::default())
    }

    /// Builds a harness with custom tunables (country code, timeouts).
    pub fn with_config(config: WardenConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let poster = EventPoster::new(tx);
        let native = MockNative::new();
        let settings = MockSettings::new();
        let telephony = MockTelephony::new();
        let broadcaster = MockBroadcaster::new();
        let engine = MockEngine::new();
        let softap_callback = MockSoftApCallback::new();
        let lohs_callback = MockSoftApCallback::new();
        let metrics = MockMetrics::new();
        let diagnostics = MockDiagnostics::new();
        let recovery = MockRecovery::new();
        let timers = Arc::new(ManualTimerService::new());

        let deps = WardenDeps {
            native: native.clone(),
            settings: settings.clone(),
            telephony: telephony.clone(),
            broadcaster: broadcaster.clone(),
            engine: engine.clone(),
            softap_callback: softap_callback.clone(),
            lohs_callback: lohs_callback.clone(),
            metrics: metrics.clone(),
            diagnostics: diagnostics.clone(),
            timers: timers.clone(),
            poster: poster.clone(),
            recovery: wifi_warden::deps::RecoverySlot::new(),
            config,
        };
        deps.recovery.install(recovery.clone());

        // Wire the daemon status listener the way the runtime does.
        struct StatusPoster(EventPoster);
        impl NativeStatusSink for StatusPoster {
            fn on_native_status(&self, ready: bool) {
                self.0.post(WardenEvent::NativeStatusChanged(ready));
            }
        }
        native.register_status_listener(Arc::new(StatusPoster(poster.clone())));

        let warden = ModeWarden::new(deps, Arc::new(AtomicBool::new(false)));
        Self {
            warden,
            rx,
            poster,
            native,
            settings,
            telephony,
            broadcaster,
            engine,
            softap_callback,
            lohs_callback,
            metrics,
            diagnostics,
            recovery,
            timers,
        }
    }

    /// Starts the warden and settles the queue.
    pub fn start(&mut self) {
        self.warden.start();
        self.pump();
    }

    /// Processes everything currently queued.
    pub fn pump(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.warden.handle_event(event);
        }
    }

    /// Delivers one event without pumping the queue afterwards.
    pub fn post(&mut self, event: WardenEvent) {
        self.warden.handle_event(event);
    }

    /// Delivers one event and settles the queue.
    pub fn send(&mut self, event: WardenEvent) {
        self.post(event);
        self.pump();
    }

    /// Fires the oldest scheduled timer and settles the queue. Panics when
    /// nothing is scheduled.
    pub fn fire_next_timer(&mut self) {
        let event = self
            .timers
            .fire_next()
            .expect("no timer scheduled");
        self.send(event);
    }

    /// Checks the structural invariants that must hold after every message:
    /// Enabled ⇔ live set non-empty, at most one manager per singleton
    /// role, and distinct live managers own distinct interface names.
    pub fn assert_invariants(&self) {
        use wifi_warden::warden::WardenState;
        use wifi_warden_core::types::Role;

        let live: Vec<ActiveModeInfo> = self.warden.live_managers();
        match self.warden.state() {
            WardenState::Enabled => assert!(!live.is_empty(), "enabled with empty live set"),
            WardenState::Disabled => assert!(live.is_empty(), "disabled with live managers"),
        }

        for role in [
            Role::ClientPrimary,
            Role::ClientScanOnly,
            Role::SoftApTethered,
            Role::SoftApLocalOnly,
        ] {
            let count = live.iter().filter(|m| m.role == Some(role)).count();
            assert!(count <= 1, "{count} managers hold role {role}");
        }

        let mut names: Vec<&str> = live
            .iter()
            .filter_map(|m| m.iface.as_deref())
            .collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len(), "duplicate interface ownership");
    }
}

/// Convenience MAC literal.
pub fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, last])
}
