//! Message sets for the warden and its mode managers.
//!
//! Every external stimulus (API call, native callback, IMS event, timer
//! fire) becomes one of these messages and is processed serially on the
//! warden event-loop task.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use wifi_warden_core::traits::{ClientModeRequestListener, ModeChangeObserver, ScorerBinding};
use wifi_warden_core::types::{
    MacAddress, ManagerId, RecoveryReason, Role, SoftApCapability, SoftApConfig, SoftApInfo,
    SoftApModeConfig, SoftApStopMode, WifiState, WorkSource,
};
use wifi_warden_core::{ImsEvent, InterfaceEvent, SoftApHalEvent};

/// Top-level message processed by the mode warden.
pub enum WardenEvent {
    /// The user Wi-Fi toggle changed; re-evaluate station policy.
    WifiToggled,
    /// Airplane mode changed; read the new value from the settings store.
    AirplaneToggled,
    /// Scan-always or location mode changed; re-evaluate station policy.
    ScanAlwaysModeChanged,
    /// Start a soft AP with the given mode configuration.
    StartSoftAp(Box<SoftApModeConfig>),
    /// Stop soft AP managers matching the selector.
    StopSoftAp(SoftApStopMode),
    /// New AP capability (carrier config / resource change).
    UpdateSoftApCapability(SoftApCapability),
    /// New AP user configuration.
    UpdateSoftApConfig(Box<SoftApConfig>),
    /// Request a concurrent local-only client manager.
    RequestLocalOnlyClient(Arc<dyn ClientModeRequestListener>),
    /// Release a previously granted local-only client manager.
    RemoveLocalOnlyClient(ManagerId),
    /// Recovery is throttled; disable Wi-Fi instead of restarting.
    RecoveryDisableWifi,
    /// Restart the Wi-Fi stack for recovery.
    RecoveryRestartWifi(RecoveryReason),
    /// Deferred follow-up of a recovery restart, re-processed from Disabled.
    DeferredRecoveryRestartWifi,
    /// Delayed completion of a recovery restart.
    RecoveryRestartWifiContinue,
    /// Emergency callback mode (ECBM) changed.
    EmergencyCallbackModeChanged(bool),
    /// Emergency call state changed.
    EmergencyCallStateChanged(bool),
    /// Install a connected-network scorer on the primary manager.
    SetScorer(ScorerBinding),
    /// Remove the installed scorer.
    ClearScorer,
    /// Toggle verbose logging on the warden and all live managers.
    SetVerboseLogging(bool),
    /// Start observing manager additions / removals / role changes.
    RegisterModeChangeObserver(Arc<dyn ModeChangeObserver>),
    /// Stop observing.
    UnregisterModeChangeObserver(Arc<dyn ModeChangeObserver>),

    /// A client manager reported a terminal stop.
    StaStopped,
    /// A client manager failed to start.
    StaStartFailure,
    /// A soft AP manager reported a terminal stop.
    ApStopped,
    /// A soft AP manager failed to start.
    ApStartFailure,

    /// Native daemon readiness changed; `false` triggers self-recovery.
    NativeStatusChanged(bool),
    /// Whether another client interface can currently be created.
    ClientAvailabilityChanged(bool),
    /// Whether another AP interface can currently be created.
    SoftApAvailabilityChanged(bool),

    /// Message for a specific client mode manager.
    Client(ManagerId, ClientMessage),
    /// Message for a specific soft AP manager.
    SoftAp(ManagerId, SoftApMessage),

    /// State query answered by the runtime on the event-loop task.
    Query(WardenQuery),
}

impl WardenEvent {
    /// Short name used in transition logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::WifiToggled => "WIFI_TOGGLED",
            Self::AirplaneToggled => "AIRPLANE_TOGGLED",
            Self::ScanAlwaysModeChanged => "SCAN_ALWAYS_MODE_CHANGED",
            Self::StartSoftAp(_) => "START_SOFT_AP",
            Self::StopSoftAp(_) => "STOP_SOFT_AP",
            Self::UpdateSoftApCapability(_) => "UPDATE_AP_CAPABILITY",
            Self::UpdateSoftApConfig(_) => "UPDATE_AP_CONFIG",
            Self::RequestLocalOnlyClient(_) => "REQUEST_LOCAL_ONLY_CLIENT",
            Self::RemoveLocalOnlyClient(_) => "REMOVE_LOCAL_ONLY_CLIENT",
            Self::RecoveryDisableWifi => "RECOVERY_DISABLE_WIFI",
            Self::RecoveryRestartWifi(_) => "RECOVERY_RESTART_WIFI",
            Self::DeferredRecoveryRestartWifi => "DEFERRED_RECOVERY_RESTART_WIFI",
            Self::RecoveryRestartWifiContinue => "RECOVERY_RESTART_WIFI_CONTINUE",
            Self::EmergencyCallbackModeChanged(_) => "EMERGENCY_MODE_CHANGED",
            Self::EmergencyCallStateChanged(_) => "EMERGENCY_CALL_STATE_CHANGED",
            Self::SetScorer(_) => "SET_SCORER",
            Self::ClearScorer => "CLEAR_SCORER",
            Self::SetVerboseLogging(_) => "SET_VERBOSE_LOGGING",
            Self::RegisterModeChangeObserver(_) => "REGISTER_MODE_CHANGE_OBSERVER",
            Self::UnregisterModeChangeObserver(_) => "UNREGISTER_MODE_CHANGE_OBSERVER",
            Self::StaStopped => "STA_STOPPED",
            Self::StaStartFailure => "STA_START_FAILURE",
            Self::ApStopped => "AP_STOPPED",
            Self::ApStartFailure => "AP_START_FAILURE",
            Self::NativeStatusChanged(_) => "NATIVE_STATUS_CHANGED",
            Self::ClientAvailabilityChanged(_) => "CLIENT_AVAILABILITY_CHANGED",
            Self::SoftApAvailabilityChanged(_) => "SOFTAP_AVAILABILITY_CHANGED",
            Self::Client(_, _) => "CLIENT_SM",
            Self::SoftAp(_, _) => "SOFTAP_SM",
            Self::Query(_) => "QUERY",
        }
    }
}

/// Message processed by a client mode manager's state machine.
#[derive(Debug)]
pub enum ClientMessage {
    /// Bring up the scan-mode interface.
    Start,
    /// Tear the manager down (deferred-stop gated).
    Stop,
    /// Switch the interface to connectivity mode with the given role.
    SwitchToConnectMode(Role),
    /// Switch the interface to scan-only mode (deferred-stop gated).
    SwitchToScanOnlyMode,
    /// Deferral resolved; complete the switch to scan-only mode.
    SwitchToScanOnlyModeContinue,
    /// Native interface lifecycle event (filtered by interface name).
    Interface(InterfaceEvent),
    /// The owned interface transitioned up → down; run self-recovery.
    InterfaceDown,
    /// Deferred-stop timer fired.
    DeferTimeout,
    /// IMS registration event, marshalled from telephony.
    Ims(ImsEvent),
    /// Extra delay after the last IMS network loss elapsed.
    ImsLostDelayExpired,
}

/// Message processed by a soft AP manager's state machine.
#[derive(Debug)]
pub enum SoftApMessage {
    /// Set up interface(s) and start hostapd.
    Start(WorkSource),
    /// Tear the AP down.
    Stop,
    /// Native interface lifecycle event (filtered by interface name).
    Interface(InterfaceEvent),
    /// hostapd reported a failure.
    HalFailure,
    /// Operating info changed.
    ApInfoChanged(SoftApInfo),
    /// A station associated or disassociated.
    AssociatedStationChanged {
        /// Station MAC.
        mac: MacAddress,
        /// `true` on association.
        connected: bool,
    },
    /// The no-associated-stations idle timeout fired.
    NoAssociatedStationsTimeout,
    /// Retry force-disconnect of clients still pending.
    ForceDisconnectPendingClients,
    /// New capability snapshot.
    UpdateCapability(SoftApCapability),
    /// New user configuration.
    UpdateConfig(Box<SoftApConfig>),
}

impl From<SoftApHalEvent> for SoftApMessage {
    fn from(event: SoftApHalEvent) -> Self {
        match event {
            SoftApHalEvent::Failure => Self::HalFailure,
            SoftApHalEvent::InfoChanged(info) => Self::ApInfoChanged(info),
            SoftApHalEvent::ClientAssociated { mac, connected } => {
                Self::AssociatedStationChanged { mac, connected }
            }
        }
    }
}

/// Lifecycle notification a mode manager hands back to the warden from its
/// message handler. For any one manager the reported sequence always matches
/// `Started RoleChanged* (Stopped | StartFailure)?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeLifecycle {
    /// The manager finished starting and holds its first role.
    Started,
    /// The manager changed role in place.
    RoleChanged,
    /// The manager tore down and left the live set.
    Stopped,
    /// The manager failed its initial start.
    StartFailure,
}

/// State queries answered on the event-loop task.
pub enum WardenQuery {
    /// Externally visible station state of the primary manager.
    WifiState(oneshot::Sender<WifiState>),
    /// Snapshot of live managers as `(id, role, iface)` tuples.
    LiveManagers(oneshot::Sender<Vec<(ManagerId, Option<Role>, Option<String>)>>),
    /// Whether the chip supports station + AP concurrency.
    StaApConcurrencySupported(oneshot::Sender<bool>),
    /// Whether the warden is in the emergency overlay.
    InEmergencyMode(oneshot::Sender<bool>),
}

/// Clonable handle posting events into the warden queue.
///
/// Interface callbacks, IMS sinks and timers all funnel through this so
/// every stimulus is serialized onto the event-loop task.
#[derive(Clone)]
pub struct EventPoster {
    tx: mpsc::UnboundedSender<WardenEvent>,
}

impl EventPoster {
    /// Wraps a queue sender.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<WardenEvent>) -> Self {
        Self { tx }
    }

    /// Posts an event. Events posted after the runtime has shut down are
    /// dropped.
    pub fn post(&self, event: WardenEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event dropped, warden runtime is gone");
        }
    }
}
