//! Soft AP mode manager.
//!
//! Owns the native interface(s) of one access point and drives them through
//! an `Idle` / `Started` state machine: config validation, MAC and country
//! code programming, channel selection, hostapd start, client admission,
//! idle shutdown, and teardown.
//!
//! Single-band APs own one interface. Dual-band and OWE transition APs own
//! two band interfaces plus a bridge; the bridge carries the up/down state
//! and a destroyed band interface triggers full cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use wifi_warden_core::error::SoftApStartError;
use wifi_warden_core::traits::{
    ActiveModeInfo, InterfaceEvent, InterfaceEventSink, SoftApCallback, SoftApHalEvent,
    SoftApHalEventSink,
};
use wifi_warden_core::types::{
    ApState, Band, ClientBlockReason, MacAddress, ManagerId, Role, SecurityType, SoftApCapability,
    SoftApConfig, SoftApFeature, SoftApInfo, SoftApMode, SoftApModeConfig, WorkSource,
};

use crate::deps::WardenDeps;
use crate::events::{EventPoster, ModeLifecycle, SoftApMessage, WardenEvent};
use crate::timer::TimerId;

/// Recheck period for clients whose force-disconnect did not go through.
pub const PENDING_DISCONNECT_RECHECK_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApSmState {
    Idle,
    Started,
}

/// Marshals native interface events for one soft AP manager onto the
/// warden queue.
struct ApIfaceSink {
    id: ManagerId,
    poster: EventPoster,
}

impl InterfaceEventSink for ApIfaceSink {
    fn on_interface_event(&self, event: InterfaceEvent) {
        self.poster
            .post(WardenEvent::SoftAp(self.id, SoftApMessage::Interface(event)));
    }
}

/// Marshals hostapd events onto the warden queue.
struct ApHalSink {
    id: ManagerId,
    poster: EventPoster,
}

impl SoftApHalEventSink for ApHalSink {
    fn on_softap_event(&self, event: SoftApHalEvent) {
        self.poster
            .post(WardenEvent::SoftAp(self.id, event.into()));
    }
}

/// 32-bit FNV-1a over the SSID bytes. Stable across platforms; at most 10
/// decimal digits, so the derived companion SSID stays within 32 bytes.
fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// SSID for the hidden OWE half of an OWE transition pair.
fn owe_companion_ssid(ssid: &str) -> String {
    format!("OWE_{}", fnv1a32(ssid.as_bytes()))
}

/// Default channel when the driver cannot auto-select.
fn default_channel(band: Band) -> u32 {
    match band {
        Band::Band2Ghz | Band::BandDual => 6,
        Band::Band5Ghz => 36,
        Band::Band6Ghz => 37,
    }
}

/// Fills in the operating channel: driver ACS when available, the
/// configured channel otherwise, falling back to the band default.
fn update_channel(config: &mut SoftApConfig, capability: &SoftApCapability) {
    if capability.supports(SoftApFeature::AcsOffload) {
        // Channel 0 asks the driver to select.
        config.channel = 0;
    } else if config.channel == 0 {
        config.channel = default_channel(config.band);
    }
}

/// Verifies the capability set can serve the configuration.
fn check_support_all_configuration(
    config: &SoftApConfig,
    capability: &SoftApCapability,
) -> Result<(), SoftApStartError> {
    if config.max_clients > capability.max_supported_clients
        && !capability.supports(SoftApFeature::ClientForceDisconnect)
    {
        return Err(SoftApStartError::UnsupportedConfiguration);
    }
    if matches!(
        config.security,
        SecurityType::Wpa3Sae | SecurityType::Wpa3SaeTransition
    ) && !capability.supports(SoftApFeature::Wpa3Sae)
    {
        return Err(SoftApStartError::UnsupportedConfiguration);
    }
    if config.client_control_by_user && !capability.supports(SoftApFeature::ClientForceDisconnect) {
        return Err(SoftApStartError::UnsupportedConfiguration);
    }
    Ok(())
}

/// Manager for Wi-Fi in AP mode.
pub struct SoftApManager {
    id: ManagerId,
    mode: SoftApMode,
    role: Role,
    state: ApSmState,
    config: SoftApConfig,
    capability: SoftApCapability,
    country_code: Option<String>,
    callback: Arc<dyn SoftApCallback>,
    requestor: Option<WorkSource>,

    ap_iface: Option<String>,
    band_ifaces: [Option<String>; 2],
    paired_destroyed: bool,
    iface_up: bool,
    iface_destroyed: bool,
    bssid_unset: bool,

    connected: Vec<MacAddress>,
    pending_disconnect: HashMap<MacAddress, ClientBlockReason>,
    ever_reported_max_client_metric: bool,
    current_info: SoftApInfo,
    started_at: Option<DateTime<Utc>>,
    idle_timer: Option<TimerId>,
    recheck_timer: Option<TimerId>,
    verbose: bool,
}

impl SoftApManager {
    /// Creates an idle manager for the given mode configuration. The role
    /// is fixed at creation; soft AP roles cannot be switched in place.
    pub fn new(
        id: ManagerId,
        mode_config: SoftApModeConfig,
        callback: Arc<dyn SoftApCallback>,
        country_code: Option<String>,
    ) -> Self {
        let bssid_unset = mode_config.config.bssid.is_none();
        Self {
            id,
            mode: mode_config.mode,
            role: mode_config.mode.role(),
            state: ApSmState::Idle,
            config: mode_config.config,
            capability: mode_config.capability,
            country_code,
            callback,
            requestor: None,
            ap_iface: None,
            band_ifaces: [None, None],
            paired_destroyed: false,
            iface_up: false,
            iface_destroyed: false,
            bssid_unset,
            connected: Vec::new(),
            pending_disconnect: HashMap::new(),
            ever_reported_max_client_metric: false,
            current_info: SoftApInfo::default(),
            started_at: None,
            idle_timer: None,
            recheck_timer: None,
            verbose: false,
        }
    }

    /// Manager id.
    #[must_use]
    pub fn id(&self) -> ManagerId {
        self.id
    }

    /// The role fixed at creation.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Target mode.
    #[must_use]
    pub fn mode(&self) -> SoftApMode {
        self.mode
    }

    /// Owned (data) interface name, if any.
    #[must_use]
    pub fn iface(&self) -> Option<&str> {
        self.ap_iface.as_deref()
    }

    /// Currently associated clients.
    #[must_use]
    pub fn connected_clients(&self) -> &[MacAddress] {
        &self.connected
    }

    /// Snapshot for observers.
    #[must_use]
    pub fn info(&self) -> ActiveModeInfo {
        ActiveModeInfo {
            id: self.id,
            role: Some(self.role),
            iface: self.ap_iface.clone(),
        }
    }

    /// Enables verbose logging.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Requests an asynchronous start.
    pub fn request_start(&self, deps: &WardenDeps, requestor: WorkSource) {
        deps.poster
            .post(WardenEvent::SoftAp(self.id, SoftApMessage::Start(requestor)));
    }

    /// Requests an asynchronous stop.
    pub fn request_stop(&self, deps: &WardenDeps) {
        deps.poster
            .post(WardenEvent::SoftAp(self.id, SoftApMessage::Stop));
    }

    /// Processes one state machine message. Lifecycle notifications are
    /// appended to `out` for the warden to reconcile.
    pub fn handle(&mut self, msg: SoftApMessage, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        if self.verbose {
            tracing::debug!(manager = %self.id, state = ?self.state, msg = ?msg, "softap sm");
        }
        match self.state {
            ApSmState::Idle => self.handle_idle(msg, deps, out),
            ApSmState::Started => self.handle_started(msg, deps, out),
        }
    }

    // -------------------------------------------------------------------------
    // Idle state
    // -------------------------------------------------------------------------

    fn handle_idle(&mut self, msg: SoftApMessage, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        match msg {
            SoftApMessage::Start(requestor) => self.handle_start(requestor, deps, out),
            SoftApMessage::Stop => {
                tracing::debug!(manager = %self.id, "stop on idle softap manager ignored");
            }
            SoftApMessage::UpdateCapability(capability) => {
                // Capability only changes via carrier config; tether mode only.
                if self.mode == SoftApMode::Tethered {
                    self.capability = capability;
                }
            }
            SoftApMessage::UpdateConfig(config) => {
                tracing::debug!(manager = %self.id, "configuration replaced before start");
                self.config = *config;
            }
            _ => {}
        }
    }

    fn handle_start(
        &mut self,
        requestor: WorkSource,
        deps: &WardenDeps,
        out: &mut Vec<ModeLifecycle>,
    ) {
        self.requestor = Some(requestor.clone());
        if self.config.ssid.is_empty() {
            tracing::error!(manager = %self.id, "cannot start soft AP without an SSID");
            self.start_failed(deps, ApState::Disabled, SoftApStartError::Generic, out);
            return;
        }

        let result = if self.config.band == Band::BandDual {
            self.setup_paired(deps, PairedKind::DualBand, &requestor)
        } else if self.config.security == SecurityType::Owe {
            self.setup_paired(deps, PairedKind::OweTransition, &requestor)
        } else {
            self.setup_single(deps, &requestor)
        };

        match result {
            Ok(()) => {
                self.state = ApSmState::Started;
                self.enter_started(deps, out);
            }
            Err((previous, reason)) => {
                self.teardown_interfaces(deps);
                self.start_failed(deps, previous, reason, out);
            }
        }
    }

    fn setup_single(
        &mut self,
        deps: &WardenDeps,
        requestor: &WorkSource,
    ) -> Result<(), (ApState, SoftApStartError)> {
        let sink = self.iface_sink(deps);
        let iface = deps
            .native
            .setup_interface_for_softap_mode(sink, requestor, false)
            .map_err(|err| {
                tracing::error!(manager = %self.id, %err, "AP interface setup failed");
                (ApState::Disabled, SoftApStartError::Generic)
            })?;
        self.ap_iface = Some(iface.clone());
        self.update_ap_state(deps, ApState::Enabling, ApState::Disabled, None);

        let config = self.config.clone();
        self.start_hostapd(deps, &iface, &config)
            .map_err(|reason| (ApState::Enabling, reason))
    }

    fn setup_paired(
        &mut self,
        deps: &WardenDeps,
        kind: PairedKind,
        requestor: &WorkSource,
    ) -> Result<(), (ApState, SoftApStartError)> {
        let setup_err = |err| {
            tracing::error!(%err, "setup failure creating paired AP interfaces");
            (ApState::Disabled, SoftApStartError::Generic)
        };
        self.band_ifaces[0] = Some(
            deps.native
                .setup_interface_for_softap_mode(self.iface_sink(deps), requestor, true)
                .map_err(setup_err)?,
        );
        self.band_ifaces[1] = Some(
            deps.native
                .setup_interface_for_softap_mode(self.iface_sink(deps), requestor, true)
                .map_err(setup_err)?,
        );
        self.ap_iface = Some(
            deps.native
                .setup_interface_for_bridge_mode(self.iface_sink(deps))
                .map_err(setup_err)?,
        );
        self.update_ap_state(deps, ApState::Enabling, ApState::Disabled, None);

        let first_iface = self.band_ifaces[0].clone().unwrap_or_default();
        let second_iface = self.band_ifaces[1].clone().unwrap_or_default();
        let (first, second) = match kind {
            PairedKind::DualBand => {
                let first = self.config.with_band(Band::Band2Ghz);
                let mut second = self.config.with_band(Band::Band5Ghz);
                second.bssid = second.bssid.map(|mac| mac.with_flipped_lsb());
                (first, second)
            }
            PairedKind::OweTransition => {
                // Hidden OWE half under a derived SSID, open half under the
                // user SSID with the companion BSSID.
                let mut owe = self.config.clone();
                owe.ssid = owe_companion_ssid(&self.config.ssid);
                owe.hidden = true;
                owe.owe_transition_iface = Some(second_iface.clone());
                tracing::info!(ssid = %owe.ssid, "generated OWE companion SSID");

                let mut open = self.config.clone();
                open.security = SecurityType::Open;
                open.passphrase = None;
                open.owe_transition_iface = Some(first_iface.clone());
                open.bssid = open.bssid.map(|mac| mac.with_flipped_lsb());
                (owe, open)
            }
        };

        self.start_hostapd(deps, &first_iface, &first)
            .map_err(|reason| (ApState::Enabling, reason))?;
        self.start_hostapd(deps, &second_iface, &second)
            .map_err(|reason| (ApState::Enabling, reason))
    }

    /// Programs MAC and country code, resolves the channel, validates the
    /// capability set, and starts hostapd on one interface.
    fn start_hostapd(
        &mut self,
        deps: &WardenDeps,
        iface: &str,
        config: &SoftApConfig,
    ) -> Result<(), SoftApStartError> {
        tracing::debug!(
            manager = %self.id,
            %iface,
            band = ?config.band,
            country = self.country_code.as_deref().unwrap_or(""),
            "starting soft AP"
        );

        self.apply_mac_address(deps, iface, config)?;
        self.apply_country_code(deps, iface, config)?;

        let mut final_config = config.clone();
        update_channel(&mut final_config, &self.capability);
        if final_config.hidden {
            tracing::debug!(manager = %self.id, "soft AP is a hidden network");
        }
        check_support_all_configuration(&final_config, &self.capability)?;

        let listener = Arc::new(ApHalSink {
            id: self.id,
            poster: deps.poster.clone(),
        });
        let tethered = self.mode == SoftApMode::Tethered;
        if !deps
            .native
            .start_soft_ap(iface, &final_config, tethered, listener)
        {
            tracing::error!(manager = %self.id, %iface, "hostapd start failed");
            return Err(SoftApStartError::Generic);
        }
        self.started_at = Some(Utc::now());
        tracing::info!(manager = %self.id, %iface, "soft AP started");
        Ok(())
    }

    fn apply_mac_address(
        &mut self,
        deps: &WardenDeps,
        iface: &str,
        config: &SoftApConfig,
    ) -> Result<(), SoftApStartError> {
        match config.bssid {
            None => {
                // No explicit BSSID: (re-)configure the factory MAC. Some
                // drivers cannot set the MAC at all, so fail soft here.
                if !deps.native.reset_ap_mac_to_factory(iface) {
                    tracing::warn!(%iface, "failed to reset factory MAC, continuing with current");
                }
            }
            Some(mac) => {
                if deps.native.is_ap_set_mac_address_supported(iface) {
                    if !deps.native.set_ap_mac_address(iface, mac) {
                        tracing::error!(%iface, "failed to set requested MAC address");
                        return Err(SoftApStartError::Generic);
                    }
                } else if !self.bssid_unset {
                    // The driver cannot honor an explicitly requested BSSID.
                    return Err(SoftApStartError::UnsupportedConfiguration);
                }
            }
        }
        self.current_info.bssid = config.bssid;
        Ok(())
    }

    fn apply_country_code(
        &self,
        deps: &WardenDeps,
        iface: &str,
        config: &SoftApConfig,
    ) -> Result<(), SoftApStartError> {
        let country = self.country_code.as_deref().unwrap_or("");
        if country.is_empty() {
            if config.band.requires_country_code() {
                tracing::error!(band = ?config.band, "country code required for this band");
                return Err(SoftApStartError::NoChannel);
            }
            return Ok(());
        }
        if !deps
            .native
            .set_country_code(iface, &country.to_uppercase())
        {
            if config.band.requires_country_code() {
                tracing::error!(band = ?config.band, "failed to set country code");
                return Err(SoftApStartError::Generic);
            }
            // Not fatal for 2.4 GHz.
        }
        Ok(())
    }

    fn start_failed(
        &mut self,
        deps: &WardenDeps,
        previous: ApState,
        reason: SoftApStartError,
        out: &mut Vec<ModeLifecycle>,
    ) {
        self.update_ap_state(deps, ApState::Failed, previous, Some(reason));
        deps.metrics.note_soft_ap_start_result(false, Some(reason));
        out.push(ModeLifecycle::StartFailure);
    }

    // -------------------------------------------------------------------------
    // Started state
    // -------------------------------------------------------------------------

    fn enter_started(&mut self, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        self.iface_up = false;
        self.iface_destroyed = false;
        self.connected.clear();
        self.pending_disconnect.clear();
        self.ever_reported_max_client_metric = false;
        let up = self
            .ap_iface
            .as_deref()
            .is_some_and(|iface| deps.native.is_interface_up(iface));
        self.on_up_changed(up, deps, out);
        self.schedule_timeout(deps);
    }

    fn handle_started(
        &mut self,
        msg: SoftApMessage,
        deps: &WardenDeps,
        out: &mut Vec<ModeLifecycle>,
    ) {
        match msg {
            SoftApMessage::Start(_) => {
                // Already started, ignore.
            }
            SoftApMessage::Stop => {
                let previous = if self.iface_up {
                    ApState::Enabled
                } else {
                    ApState::Enabling
                };
                self.update_ap_state(deps, ApState::Disabling, previous, None);
                self.transition_to_idle(deps, out);
            }
            SoftApMessage::Interface(event) => self.handle_interface_event(event, deps, out),
            SoftApMessage::HalFailure => {
                tracing::warn!(manager = %self.id, "hostapd failure, stop and report");
                self.handle_failure(deps, out);
            }
            SoftApMessage::ApInfoChanged(info) => self.update_softap_info(info),
            SoftApMessage::AssociatedStationChanged { mac, connected } => {
                tracing::debug!(manager = %self.id, %mac, connected, "associated stations changed");
                self.update_connected_clients(mac, connected, deps);
            }
            SoftApMessage::NoAssociatedStationsTimeout => {
                if !self.config.auto_shutdown_enabled {
                    tracing::warn!(manager = %self.id, "timeout fired while disabled, dropping");
                    return;
                }
                if !self.connected.is_empty() {
                    tracing::warn!(manager = %self.id, "timeout fired but clients present, dropping");
                    return;
                }
                tracing::info!(manager = %self.id, "idle timeout, stopping soft AP");
                self.update_ap_state(deps, ApState::Disabling, ApState::Enabled, None);
                self.transition_to_idle(deps, out);
            }
            SoftApMessage::ForceDisconnectPendingClients => {
                self.retry_pending_disconnects(deps);
            }
            SoftApMessage::UpdateCapability(capability) => {
                if self.mode == SoftApMode::Tethered {
                    self.capability = capability;
                    self.update_client_connection(deps);
                }
            }
            SoftApMessage::UpdateConfig(config) => self.handle_update_config(*config, deps),
        }
    }

    fn handle_interface_event(
        &mut self,
        event: InterfaceEvent,
        deps: &WardenDeps,
        out: &mut Vec<ModeLifecycle>,
    ) {
        let is_main = self.ap_iface.as_deref() == Some(event.iface());
        let band_index = self
            .band_ifaces
            .iter()
            .position(|i| i.as_deref() == Some(event.iface()));
        match event {
            InterfaceEvent::Up { .. } if is_main => self.on_up_changed(true, deps, out),
            InterfaceEvent::Down { .. } if is_main => self.on_up_changed(false, deps, out),
            InterfaceEvent::Destroyed { iface } if is_main => {
                if self.is_paired() && !self.paired_destroyed {
                    tracing::debug!(manager = %self.id, "bridge destroyed, tearing down band interfaces");
                    self.teardown_band_interfaces(deps);
                }
                tracing::debug!(manager = %self.id, %iface, "interface cleanly destroyed");
                self.update_ap_state(deps, ApState::Disabling, ApState::Enabled, None);
                self.iface_destroyed = true;
                self.transition_to_idle(deps, out);
            }
            InterfaceEvent::Destroyed { iface } => {
                if let Some(index) = band_index {
                    // One band interface died under us; clean up the rest and
                    // wait for the bridge destroy to finish the exit.
                    if !self.paired_destroyed {
                        tracing::debug!(manager = %self.id, %iface, "band interface destroyed, cleaning up pair");
                        self.paired_destroyed = true;
                        if let Some(other) = self.band_ifaces[1 - index].clone() {
                            deps.native.teardown_interface(&other);
                        }
                        if let Some(bridge) = self.ap_iface.clone() {
                            deps.native.teardown_interface(&bridge);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_failure(&mut self, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        self.update_ap_state(
            deps,
            ApState::Failed,
            ApState::Enabled,
            Some(SoftApStartError::Generic),
        );
        self.update_ap_state(deps, ApState::Disabling, ApState::Failed, None);
        self.transition_to_idle(deps, out);
    }

    fn handle_update_config(&mut self, new: SoftApConfig, deps: &WardenDeps) {
        // Compare against the running config with a randomized BSSID folded
        // back to unset, so a BSSID the user never chose is not a diff.
        let mut current = self.config.clone();
        if self.bssid_unset {
            current.bssid = None;
        }
        if current.change_requires_restart(&new) {
            tracing::info!(manager = %self.id, "config update requires restart, ignoring");
            return;
        }
        tracing::debug!(manager = %self.id, "applying config update in place");
        if self.config.max_clients != new.max_clients {
            // New cap, new metrics epoch.
            self.ever_reported_max_client_metric = false;
        }
        let reschedule = self.config.shutdown_timeout_ms != new.shutdown_timeout_ms
            || self.config.auto_shutdown_enabled != new.auto_shutdown_enabled;
        self.config = new;
        self.update_client_connection(deps);
        if reschedule {
            self.cancel_timeout(deps);
            self.schedule_timeout(deps);
        }
    }

    fn on_up_changed(&mut self, is_up: bool, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        if is_up == self.iface_up {
            return;
        }
        self.iface_up = is_up;
        if is_up {
            tracing::info!(manager = %self.id, "soft AP is ready for use");
            self.update_ap_state(deps, ApState::Enabled, ApState::Enabling, None);
            deps.metrics.note_soft_ap_start_result(true, None);
            self.callback.on_connected_clients_changed(&self.connected);
            out.push(ModeLifecycle::Started);
        } else {
            // The interface was up but went down.
            tracing::warn!(manager = %self.id, "interface error, stop and report");
            self.handle_failure(deps, out);
        }
    }

    // -------------------------------------------------------------------------
    // Client admission
    // -------------------------------------------------------------------------

    /// Effective client cap: hardware/carrier limit, tightened by the user
    /// cap when one is set.
    fn effective_max_clients(&self) -> usize {
        let hw_max = self.capability.max_supported_clients;
        if self.config.max_clients > 0 {
            hw_max.min(self.config.max_clients)
        } else {
            hw_max
        }
    }

    fn update_connected_clients(&mut self, mac: MacAddress, connected: bool, deps: &WardenDeps) {
        if self.pending_disconnect.remove(&mac).is_some() {
            tracing::debug!(manager = %self.id, %mac, "removed client from pending disconnect list");
        }

        let index = self.connected.iter().position(|c| *c == mac);
        if index.is_some() == connected {
            tracing::debug!(
                manager = %self.id,
                %mac,
                connected,
                "dropping duplicate or blocked client event"
            );
            return;
        }
        if connected {
            if !self.admit_client(mac, deps) {
                return;
            }
            self.connected.push(mac);
        } else if let Some(index) = index {
            self.connected.remove(index);
        }

        tracing::debug!(
            manager = %self.id,
            count = self.connected.len(),
            "connected stations changed"
        );
        self.callback.on_connected_clients_changed(&self.connected);
        deps.metrics
            .note_soft_ap_clients_changed(self.connected.len(), self.mode);
        self.schedule_timeout(deps);
    }

    /// Applies the admission policy to a newly associated client. Returns
    /// `true` if the client may stay.
    fn admit_client(&mut self, mac: MacAddress, deps: &WardenDeps) -> bool {
        if !self.capability.supports(SoftApFeature::ClientForceDisconnect) {
            return true;
        }

        if self.config.blocked_clients.contains(&mac) {
            tracing::debug!(manager = %self.id, %mac, "force disconnect for blocked client");
            self.force_disconnect(mac, ClientBlockReason::BlockedByUser, deps);
            return false;
        }
        if self.config.client_control_by_user && !self.config.allowed_clients.contains(&mac) {
            tracing::debug!(manager = %self.id, %mac, "force disconnect for unauthorized client");
            self.callback
                .on_blocked_client_connecting(mac, ClientBlockReason::BlockedByUser);
            self.force_disconnect(mac, ClientBlockReason::BlockedByUser, deps);
            return false;
        }
        let max = self.effective_max_clients();
        if self.connected.len() >= max {
            tracing::info!(manager = %self.id, %mac, max, "no more room for new client");
            self.force_disconnect(mac, ClientBlockReason::NoMoreStas, deps);
            self.callback
                .on_blocked_client_connecting(mac, ClientBlockReason::NoMoreStas);
            if !self.ever_reported_max_client_metric {
                deps.metrics.note_soft_ap_client_blocked(max);
                self.ever_reported_max_client_metric = true;
            }
            return false;
        }
        true
    }

    /// Issues a force-disconnect; clients the native layer could not kick
    /// land on the pending list and are retried every
    /// [`PENDING_DISCONNECT_RECHECK_MS`].
    fn force_disconnect(&mut self, mac: MacAddress, reason: ClientBlockReason, deps: &WardenDeps) {
        let iface = self.ap_iface.clone().unwrap_or_default();
        if !deps.native.force_client_disconnect(&iface, mac, reason) {
            tracing::debug!(manager = %self.id, %mac, "disconnect failed, adding to pending list");
            self.pending_disconnect.insert(mac, reason);
            if let Some(timer) = self.recheck_timer.take() {
                deps.timers.cancel(timer);
            }
            self.recheck_timer = Some(deps.timers.schedule(
                Duration::from_millis(PENDING_DISCONNECT_RECHECK_MS),
                WardenEvent::SoftAp(self.id, SoftApMessage::ForceDisconnectPendingClients),
            ));
        }
    }

    fn retry_pending_disconnects(&mut self, deps: &WardenDeps) {
        if self.pending_disconnect.is_empty() {
            return;
        }
        tracing::debug!(
            manager = %self.id,
            pending = self.pending_disconnect.len(),
            "retrying pending disconnects"
        );
        let iface = self.ap_iface.clone().unwrap_or_default();
        for (mac, reason) in &self.pending_disconnect {
            deps.native.force_client_disconnect(&iface, *mac, *reason);
        }
        self.recheck_timer = Some(deps.timers.schedule(
            Duration::from_millis(PENDING_DISCONNECT_RECHECK_MS),
            WardenEvent::SoftAp(self.id, SoftApMessage::ForceDisconnectPendingClients),
        ));
    }

    /// Re-evaluates admission over the connected set after a capability or
    /// configuration change, force-disconnecting clients that are no longer
    /// allowed or no longer fit.
    fn update_client_connection(&mut self, deps: &WardenDeps) {
        if !self.capability.supports(SoftApFeature::ClientForceDisconnect) {
            return;
        }
        let max = self.effective_max_clients();
        let mut to_disconnect = self.connected.len() as i64 - max as i64;
        let mut allowed_connected = Vec::new();
        for mac in self.connected.clone() {
            let disallowed = self.config.blocked_clients.contains(&mac)
                || (self.config.client_control_by_user
                    && !self.config.allowed_clients.contains(&mac));
            if disallowed {
                tracing::debug!(manager = %self.id, %mac, "force disconnect for disallowed client");
                self.force_disconnect(mac, ClientBlockReason::BlockedByUser, deps);
                to_disconnect -= 1;
            } else {
                allowed_connected.push(mac);
            }
        }
        for mac in allowed_connected {
            if to_disconnect <= 0 {
                break;
            }
            tracing::debug!(manager = %self.id, %mac, "force disconnect, no more room");
            self.force_disconnect(mac, ClientBlockReason::NoMoreStas, deps);
            to_disconnect -= 1;
        }
    }

    // -------------------------------------------------------------------------
    // Info, timeout, teardown
    // -------------------------------------------------------------------------

    fn update_softap_info(&mut self, info: SoftApInfo) {
        if info == self.current_info {
            return;
        }
        tracing::debug!(manager = %self.id, frequency = info.frequency_mhz, "soft AP info update");
        self.current_info = info;
        if self.current_info.frequency_mhz == 0 {
            // Frequency 0 means disabled; a BSSID makes no sense then.
            self.current_info.bssid = None;
        }
        self.callback.on_info_changed(&self.current_info);
    }

    fn schedule_timeout(&mut self, deps: &WardenDeps) {
        self.cancel_timeout(deps);
        if !self.config.auto_shutdown_enabled {
            return;
        }
        let timeout_ms = if self.config.shutdown_timeout_ms == 0 {
            deps.config.default_shutdown_timeout_ms
        } else {
            self.config.shutdown_timeout_ms
        };
        self.idle_timer = Some(deps.timers.schedule(
            Duration::from_millis(timeout_ms),
            WardenEvent::SoftAp(self.id, SoftApMessage::NoAssociatedStationsTimeout),
        ));
        tracing::debug!(manager = %self.id, timeout_ms, "idle timeout scheduled");
    }

    fn cancel_timeout(&mut self, deps: &WardenDeps) {
        if let Some(timer) = self.idle_timer.take() {
            deps.timers.cancel(timer);
        }
    }

    fn is_paired(&self) -> bool {
        self.band_ifaces[0].is_some()
    }

    /// Best-effort disconnect of every station on every owned interface.
    fn disconnect_all_clients(&self, deps: &WardenDeps) {
        if self.is_paired() && !self.paired_destroyed {
            for iface in self.band_ifaces.iter().flatten() {
                deps.native.force_client_disconnect(
                    iface,
                    MacAddress::BROADCAST,
                    ClientBlockReason::BlockedByUser,
                );
            }
        } else if let Some(iface) = self.ap_iface.as_deref() {
            deps.native.force_client_disconnect(
                iface,
                MacAddress::BROADCAST,
                ClientBlockReason::BlockedByUser,
            );
        }
    }

    fn teardown_band_interfaces(&mut self, deps: &WardenDeps) {
        if self.paired_destroyed {
            return;
        }
        self.paired_destroyed = true;
        for iface in self.band_ifaces.iter().flatten() {
            deps.native.teardown_interface(iface);
        }
    }

    fn teardown_interfaces(&mut self, deps: &WardenDeps) {
        self.disconnect_all_clients(deps);
        if self.is_paired() {
            self.teardown_band_interfaces(deps);
        }
        if let Some(iface) = self.ap_iface.as_deref() {
            deps.native.teardown_interface(iface);
        }
        tracing::debug!(manager = %self.id, "soft AP interfaces torn down");
    }

    /// Started-state exit: teardown, clear runtime state, final broadcasts,
    /// terminal stop report.
    fn transition_to_idle(&mut self, deps: &WardenDeps, out: &mut Vec<ModeLifecycle>) {
        if !self.iface_destroyed {
            self.teardown_interfaces(deps);
        }
        if !self.connected.is_empty() {
            self.connected.clear();
            self.callback.on_connected_clients_changed(&self.connected);
            deps.metrics.note_soft_ap_clients_changed(0, self.mode);
        }
        self.pending_disconnect.clear();
        self.cancel_timeout(deps);
        if let Some(timer) = self.recheck_timer.take() {
            deps.timers.cancel(timer);
        }
        self.update_ap_state(deps, ApState::Disabled, ApState::Disabling, None);
        self.ap_iface = None;
        self.band_ifaces = [None, None];
        self.paired_destroyed = false;
        self.iface_up = false;
        self.iface_destroyed = false;
        self.started_at = None;
        self.state = ApSmState::Idle;
        out.push(ModeLifecycle::Stopped);
        self.update_softap_info(SoftApInfo::default());
    }

    fn iface_sink(&self, deps: &WardenDeps) -> Arc<dyn InterfaceEventSink> {
        Arc::new(ApIfaceSink {
            id: self.id,
            poster: deps.poster.clone(),
        })
    }

    /// Reports an AP state change to the registered callback and the sticky
    /// broadcast.
    fn update_ap_state(
        &self,
        deps: &WardenDeps,
        new: ApState,
        previous: ApState,
        reason: Option<SoftApStartError>,
    ) {
        self.callback.on_state_changed(new, reason);
        deps.broadcaster.ap_state_changed(
            new,
            previous,
            reason,
            self.ap_iface.as_deref(),
            self.mode,
        );
    }

    /// Writes a state dump into `out`.
    pub fn dump(&self, out: &mut String) {
        use std::fmt::Write;

        let _ = writeln!(out, "SoftApManager id={}", self.id);
        let _ = writeln!(out, "  state: {:?} role: {}", self.state, self.role);
        let _ = writeln!(
            out,
            "  requestor: {}",
            self.requestor
                .as_ref()
                .map_or("none".to_string(), |ws| format!(
                    "uid={} pkg={}",
                    ws.uid,
                    ws.package.as_deref().unwrap_or("?")
                ))
        );
        let _ = writeln!(out, "  iface: {:?} up: {}", self.ap_iface, self.iface_up);
        let _ = writeln!(out, "  ssid: {} band: {:?}", self.config.ssid, self.config.band);
        let _ = writeln!(out, "  connected clients: {}", self.connected.len());
        let _ = writeln!(
            out,
            "  started at: {}",
            self.started_at
                .map_or("never".to_string(), |t| t.format("%m-%d %H:%M:%S%.3f").to_string())
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairedKind {
    DualBand,
    OweTransition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owe_companion_ssid_is_stable_and_short() {
        let a = owe_companion_ssid("MyHomeNetwork");
        let b = owe_companion_ssid("MyHomeNetwork");
        assert_eq!(a, b);
        assert!(a.starts_with("OWE_"));
        assert!(a.len() <= 32);
    }

    #[test]
    fn test_owe_companion_ssid_differs_per_ssid() {
        assert_ne!(owe_companion_ssid("alpha"), owe_companion_ssid("beta"));
    }

    #[test]
    fn test_fnv1a32_known_vector() {
        // FNV-1a of the empty string is the offset basis.
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
    }

    #[test]
    fn test_update_channel_prefers_acs() {
        let capability = SoftApCapability::new([SoftApFeature::AcsOffload], 8);
        let mut config = SoftApConfig {
            channel: 11,
            ..SoftApConfig::default()
        };
        update_channel(&mut config, &capability);
        assert_eq!(config.channel, 0);
    }

    #[test]
    fn test_update_channel_defaults_without_acs() {
        let capability = SoftApCapability::new([], 8);
        let mut config = SoftApConfig {
            band: Band::Band5Ghz,
            channel: 0,
            ..SoftApConfig::default()
        };
        update_channel(&mut config, &capability);
        assert_eq!(config.channel, 36);

        let mut fixed = SoftApConfig {
            channel: 11,
            ..SoftApConfig::default()
        };
        update_channel(&mut fixed, &capability);
        assert_eq!(fixed.channel, 11);
    }

    #[test]
    fn test_capability_check_rejects_sae_without_feature() {
        let capability = SoftApCapability::new([], 8);
        let config = SoftApConfig {
            security: SecurityType::Wpa3Sae,
            ..SoftApConfig::default()
        };
        assert_eq!(
            check_support_all_configuration(&config, &capability),
            Err(SoftApStartError::UnsupportedConfiguration)
        );
    }

    #[test]
    fn test_capability_check_rejects_user_cap_above_hw_without_disconnect() {
        let capability = SoftApCapability::new([], 4);
        let config = SoftApConfig {
            max_clients: 8,
            ..SoftApConfig::default()
        };
        assert_eq!(
            check_support_all_configuration(&config, &capability),
            Err(SoftApStartError::UnsupportedConfiguration)
        );

        let with_disconnect = SoftApCapability::new([SoftApFeature::ClientForceDisconnect], 4);
        assert!(check_support_all_configuration(&config, &with_disconnect).is_ok());
    }
}
