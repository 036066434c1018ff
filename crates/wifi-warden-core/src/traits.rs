//! Port traits for the Wi-Fi mode warden.
//!
//! This module defines the contracts between the warden core and its
//! external collaborators, enabling a modular and testable architecture.
//!
//! # Ports
//!
//! - [`WifiNative`]: the low-level native interface layer (interface
//!   lifecycle, hostapd/supplicant control)
//! - [`SettingsStore`]: the settings / policy store (toggles, location mode)
//! - [`TelephonyPolicy`]: telephony and IMS observers used by the
//!   deferred-stop controller and emergency policy
//! - [`ConnectionEngine`]: the external connection engine a station manager
//!   envelopes
//! - [`StateBroadcaster`]: sticky state-change broadcasts
//! - [`SelfRecovery`]: the external recovery component (late-injected)
//! - [`WardenMetrics`]: counters with no-op defaults
//!
//! All ports are object-safe and `Send + Sync`; implementations deliver
//! their callbacks from arbitrary threads, and the warden runtime marshals
//! every event onto its single event-loop task before acting on it.

use std::sync::Arc;

use crate::error::{SoftApStartError, WardenError};
use crate::types::{
    ApState, ClientBlockReason, MacAddress, ManagerId, OperationalMode, RecoveryReason, Role,
    SoftApConfig, SoftApInfo, SoftApMode, WifiState, WorkSource,
};

// =============================================================================
// Native Interface Layer
// =============================================================================

/// Lifecycle event of a native network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEvent {
    /// The interface transitioned to administratively/operationally up.
    Up {
        /// Interface name.
        iface: String,
    },
    /// The interface went down without being destroyed.
    Down {
        /// Interface name.
        iface: String,
    },
    /// The kernel interface was destroyed.
    Destroyed {
        /// Interface name.
        iface: String,
    },
}

impl InterfaceEvent {
    /// The interface this event refers to.
    #[must_use]
    pub fn iface(&self) -> &str {
        match self {
            Self::Up { iface } | Self::Down { iface } | Self::Destroyed { iface } => iface,
        }
    }
}

/// Receiver for [`InterfaceEvent`]s, registered at interface setup time.
pub trait InterfaceEventSink: Send + Sync {
    /// Delivers an interface lifecycle event. May be called from any thread.
    fn on_interface_event(&self, event: InterfaceEvent);
}

/// Event reported by the hostapd listener of an operating soft AP.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftApHalEvent {
    /// hostapd reported an unrecoverable failure.
    Failure,
    /// Operating channel / bandwidth / BSSID changed.
    InfoChanged(SoftApInfo),
    /// A station associated or disassociated.
    ClientAssociated {
        /// Station MAC address.
        mac: MacAddress,
        /// `true` on association, `false` on disassociation.
        connected: bool,
    },
}

/// Receiver for [`SoftApHalEvent`]s, registered when hostapd is started.
pub trait SoftApHalEventSink: Send + Sync {
    /// Delivers a soft AP event. May be called from any thread.
    fn on_softap_event(&self, event: SoftApHalEvent);
}

/// Receiver for native daemon readiness changes.
pub trait NativeStatusSink: Send + Sync {
    /// `ready == false` means one of the native daemons died.
    fn on_native_status(&self, ready: bool);
}

/// Receiver for interface-availability changes (concurrency headroom).
pub trait AvailabilitySink: Send + Sync {
    /// Reports whether another interface of the listened-for kind can be
    /// created right now.
    fn on_availability_changed(&self, available: bool);
}

/// Port abstracting the native interface layer.
///
/// Calls are synchronous and expected to complete in bounded time; they
/// execute on the warden event-loop task and serialize state-machine
/// progress while in flight.
pub trait WifiNative: Send + Sync {
    /// Creates a client interface configured for scan-only operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the native layer cannot create the interface.
    fn setup_interface_for_client_in_scan_mode(
        &self,
        callback: Arc<dyn InterfaceEventSink>,
    ) -> Result<String, WardenError>;

    /// Creates an AP interface.
    ///
    /// `bridged` indicates the interface will be enslaved to a bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if the native layer cannot create the interface.
    fn setup_interface_for_softap_mode(
        &self,
        callback: Arc<dyn InterfaceEventSink>,
        requestor: &WorkSource,
        bridged: bool,
    ) -> Result<String, WardenError>;

    /// Creates a bridge interface over previously created AP interfaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the native layer cannot create the bridge.
    fn setup_interface_for_bridge_mode(
        &self,
        callback: Arc<dyn InterfaceEventSink>,
    ) -> Result<String, WardenError>;

    /// Reconfigures a client interface for scan-only operation.
    fn switch_client_interface_to_scan_mode(&self, iface: &str) -> bool;

    /// Reconfigures a client interface for full connectivity.
    fn switch_client_interface_to_connectivity_mode(&self, iface: &str) -> bool;

    /// Destroys an interface. Idempotent; unknown names are ignored.
    fn teardown_interface(&self, iface: &str);

    /// Starts hostapd on the interface with the final configuration.
    fn start_soft_ap(
        &self,
        iface: &str,
        config: &SoftApConfig,
        tethered: bool,
        listener: Arc<dyn SoftApHalEventSink>,
    ) -> bool;

    /// Pushes a country code to the HAL for the interface.
    fn set_country_code(&self, iface: &str, country_code: &str) -> bool;

    /// Sets an explicit AP MAC address.
    fn set_ap_mac_address(&self, iface: &str, mac: MacAddress) -> bool;

    /// Restores the factory MAC address.
    fn reset_ap_mac_to_factory(&self, iface: &str) -> bool;

    /// Whether the driver supports [`WifiNative::set_ap_mac_address`].
    fn is_ap_set_mac_address_supported(&self, iface: &str) -> bool;

    /// Current up/down state of the interface.
    fn is_interface_up(&self, iface: &str) -> bool;

    /// Forces a station off the AP. Returns `false` if the request could
    /// not be issued (caller retries later).
    fn force_client_disconnect(
        &self,
        iface: &str,
        mac: MacAddress,
        reason: ClientBlockReason,
    ) -> bool;

    /// Whether the chip can run a station and an AP concurrently.
    fn is_sta_ap_concurrency_supported(&self) -> bool;

    /// Registers for native daemon readiness changes.
    fn register_status_listener(&self, sink: Arc<dyn NativeStatusSink>);

    /// Registers for client-interface availability changes.
    fn register_client_availability_listener(&self, sink: Arc<dyn AvailabilitySink>);

    /// Registers for AP-interface availability changes.
    fn register_softap_availability_listener(&self, sink: Arc<dyn AvailabilitySink>);
}

// =============================================================================
// Settings / Policy Store
// =============================================================================

/// Port over the settings and policy store.
pub trait SettingsStore: Send + Sync {
    /// Whether airplane mode is on.
    fn is_airplane_mode_on(&self) -> bool;

    /// Whether the user Wi-Fi toggle is on.
    ///
    /// Implementations fold airplane mode into this: turning airplane mode
    /// on reads as the toggle being off, and turning it back off restores
    /// the persisted user choice.
    fn is_wifi_toggle_enabled(&self) -> bool;

    /// Whether scanning should stay available with Wi-Fi off.
    fn is_scan_always_available(&self) -> bool;

    /// Whether the system location mode is enabled.
    fn is_location_mode_enabled(&self) -> bool;

    /// Whether a dual-AP (two simultaneous bands) hotspot is requested.
    fn is_dual_softap_requested(&self) -> bool;
}

// =============================================================================
// Telephony / IMS
// =============================================================================

/// Snapshot of one active cellular subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Subscription id.
    pub sub_id: i32,
    /// Whether IMS voice is currently registered over the Wi-Fi transport.
    pub voice_over_wlan: bool,
    /// Carrier-configured Wi-Fi off deferral bound in milliseconds.
    pub wifi_off_deferring_ms: u64,
}

/// IMS registration event delivered to a deferring stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImsEvent {
    /// IMS (re-)registered on some transport.
    Registered {
        /// `true` when the registration landed on the Wi-Fi transport.
        over_wlan: bool,
    },
    /// The last IMS-capable network was lost.
    NetworkLost,
}

/// Receiver for [`ImsEvent`]s.
pub trait ImsEventSink: Send + Sync {
    /// Delivers an IMS event. May be called from any thread.
    fn on_ims_event(&self, event: ImsEvent);
}

/// Port over telephony carrier configuration and IMS observers.
pub trait TelephonyPolicy: Send + Sync {
    /// Active subscriptions with their deferral parameters.
    fn active_subscriptions(&self) -> Vec<SubscriptionInfo>;

    /// Carrier flag: shut down stations while in an emergency call.
    fn disable_wifi_in_emergency(&self) -> bool;

    /// Extra delay applied after the last IMS network is lost, in
    /// milliseconds. 0 means continue immediately.
    fn delay_disconnect_on_ims_lost_ms(&self) -> u64;

    /// Starts delivering IMS events for the subscription to `sink`.
    fn register_ims_events(&self, sub_id: i32, sink: Arc<dyn ImsEventSink>);

    /// Stops delivering IMS events for the subscription.
    fn unregister_ims_events(&self, sub_id: i32);
}

// =============================================================================
// Connection Engine
// =============================================================================

/// Handle to an installed connected-network scorer.
///
/// The warden caches the most recent binding so it survives manager
/// replacement and primary role switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScorerBinding {
    /// Token identifying the remote scorer endpoint.
    pub token: u64,
}

/// Port over the external connection engine (network selection, DHCP,
/// scoring, roaming). Only the interface-lifecycle envelope is driven here.
pub trait ConnectionEngine: Send + Sync {
    /// Points the engine at an interface in the given mode, or detaches it.
    fn set_operational_mode(&self, mode: OperationalMode, iface: Option<&str>);

    /// Tells the engine its interface is gone so it can drop per-interface
    /// state immediately.
    fn handle_iface_destroyed(&self);

    /// Initiates a connection to a configured network.
    fn connect_network(&self, network_id: i64);

    /// Disconnects from the current network.
    fn disconnect(&self);

    /// Reassociates to the current network.
    fn reassociate(&self);

    /// Installs a connected-network scorer. Returns `false` on rejection.
    fn set_scorer(&self, scorer: &ScorerBinding) -> bool;

    /// Removes the installed scorer.
    fn clear_scorer(&self);

    /// Whether the engine currently holds an L2 connection.
    fn is_connected(&self) -> bool;

    /// Whether connected-MAC randomization is enabled; an interface-down in
    /// connect mode is ignored when it is.
    fn is_connected_mac_randomization_enabled(&self) -> bool;
}

// =============================================================================
// Broadcasts & Callbacks
// =============================================================================

/// Port for the sticky state-change broadcasts.
pub trait StateBroadcaster: Send + Sync {
    /// Station state changed (only emitted for the primary role).
    fn wifi_state_changed(&self, new: WifiState, previous: WifiState);

    /// Soft AP state changed. `reason` is set only when `new` is
    /// [`ApState::Failed`].
    fn ap_state_changed(
        &self,
        new: ApState,
        previous: ApState,
        reason: Option<SoftApStartError>,
        iface: Option<&str>,
        mode: SoftApMode,
    );
}

/// Callback surface registered per soft AP mode (tethered / local-only).
pub trait SoftApCallback: Send + Sync {
    /// AP state changed.
    fn on_state_changed(&self, state: ApState, reason: Option<SoftApStartError>);

    /// Operating info (frequency/bandwidth/BSSID) changed.
    fn on_info_changed(&self, info: &SoftApInfo);

    /// The connected-client set changed.
    fn on_connected_clients_changed(&self, clients: &[MacAddress]);

    /// A client attempted to associate and was rejected.
    fn on_blocked_client_connecting(&self, mac: MacAddress, reason: ClientBlockReason);
}

/// Snapshot describing a live mode manager, handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveModeInfo {
    /// Manager id.
    pub id: ManagerId,
    /// Current role.
    pub role: Option<Role>,
    /// Owned interface name, if any.
    pub iface: Option<String>,
}

/// Observer of mode manager additions, removals and role changes.
pub trait ModeChangeObserver: Send + Sync {
    /// A manager finished starting.
    fn on_added(&self, manager: &ActiveModeInfo);

    /// A manager stopped and left the live set.
    fn on_removed(&self, manager: &ActiveModeInfo);

    /// A live manager changed role.
    fn on_role_changed(&self, manager: &ActiveModeInfo);
}

/// Listener answering a local-only client mode manager request.
pub trait ClientModeRequestListener: Send + Sync {
    /// Called with the serving manager, or `None` when Wi-Fi is off.
    fn on_answer(&self, manager: Option<ActiveModeInfo>);
}

// =============================================================================
// Recovery & Metrics
// =============================================================================

/// Port into the diagnostics capture facility.
pub trait Diagnostics: Send + Sync {
    /// Requests a bug report for a recovery event.
    fn take_bug_report(&self, _title: &str, _detail: &str) {}

    /// Captures diagnostic data for a native failure before recovery runs.
    fn trigger_bug_report_data_capture(&self, _reason: RecoveryReason) {}
}

/// No-op diagnostics sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {}

/// Port into the external self-recovery component.
///
/// Self-recovery holds the warden and the warden needs self-recovery; the
/// cycle is broken by injecting this port after both are constructed.
pub trait SelfRecovery: Send + Sync {
    /// Asks the recovery component to restart or disable Wi-Fi.
    fn trigger(&self, reason: RecoveryReason);
}

/// Counters emitted by the warden. Every method has a no-op default so
/// implementations pick what they record.
pub trait WardenMetrics: Send + Sync {
    /// First mode manager became live.
    fn note_wifi_on(&self) {}

    /// Last mode manager stopped.
    fn note_wifi_off(&self) {}

    /// Every live client manager is in the scan-only role.
    fn note_scan_only_mode_active(&self) {}

    /// A soft AP start attempt finished.
    fn note_soft_ap_start_result(&self, _success: bool, _reason: Option<SoftApStartError>) {}

    /// The connected-client count of a soft AP changed.
    fn note_soft_ap_clients_changed(&self, _count: usize, _mode: SoftApMode) {}

    /// A client was rejected because the AP was full. Emitted at most once
    /// per settings epoch.
    fn note_soft_ap_client_blocked(&self, _effective_max: usize) {}

    /// A station stop completed, possibly after deferral.
    fn note_wifi_off_deferring(&self, _was_deferred: bool, _timed_out: bool, _duration_ms: u64) {}
}

/// No-op metrics sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl WardenMetrics for NoopMetrics {}
