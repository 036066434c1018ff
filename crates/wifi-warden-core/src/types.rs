//! Core data types for the Wi-Fi mode warden.
//!
//! # Type Categories
//!
//! - **Identity**: [`ManagerId`], [`MacAddress`], [`WorkSource`]
//! - **Roles**: [`Role`] and its family classifiers
//! - **Soft AP**: [`SoftApConfig`], [`SoftApCapability`], [`SoftApInfo`],
//!   [`SoftApModeConfig`]
//! - **States**: [`WifiState`], [`ApState`]
//! - **Policy**: [`ClientBlockReason`], [`SoftApStopMode`], [`RecoveryReason`]

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::WardenError;

// =============================================================================
// Identity Types
// =============================================================================

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identifier of a mode manager instance.
///
/// Ids are process-local and never reused; a restarted manager gets a fresh
/// id so the graveyard can tell generations apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerId(u64);

impl ManagerId {
    /// Allocates the next process-unique manager id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 6-byte IEEE 802 MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The all-ones broadcast address, used for disconnect-all.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Creates a MAC address from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns a copy with the least significant bit of the last octet
    /// flipped. Used to derive the BSSID of the companion interface when an
    /// AP spans two interfaces.
    #[must_use]
    pub const fn with_flipped_lsb(&self) -> Self {
        let mut bytes = self.0;
        bytes[5] ^= 1;
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts
                .next()
                .ok_or_else(|| WardenError::validation(format!("short MAC address: '{s}'")))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| WardenError::validation(format!("invalid MAC address: '{s}'")))?;
        }
        if parts.next().is_some() {
            return Err(WardenError::validation(format!("long MAC address: '{s}'")));
        }
        Ok(Self(bytes))
    }
}

/// Opaque tag identifying the requester of a mode manager, carried through
/// to the native layer for attribution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorkSource {
    /// Requesting uid.
    pub uid: u32,
    /// Requesting package name, if known.
    pub package: Option<String>,
}

impl WorkSource {
    /// Creates a work source for the given uid and package.
    #[must_use]
    pub fn new(uid: u32, package: impl Into<String>) -> Self {
        Self {
            uid,
            package: Some(package.into()),
        }
    }
}

// =============================================================================
// Roles
// =============================================================================

/// The purpose a mode manager currently serves.
///
/// Client roles share a state machine and may be switched in place
/// (primary ↔ scan-only); soft AP roles are fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    /// Station used for the device's default internet route.
    ClientPrimary,
    /// Station restricted to scanning (location / scan-always).
    ClientScanOnly,
    /// Concurrent station serving a local-only (peer-to-peer) request.
    ClientLocalOnly,
    /// Soft AP providing tethered internet sharing.
    SoftApTethered,
    /// Soft AP serving a local-only hotspot.
    SoftApLocalOnly,
}

impl Role {
    /// Returns `true` for any client (station) role.
    #[must_use]
    pub const fn is_client(self) -> bool {
        matches!(
            self,
            Self::ClientPrimary | Self::ClientScanOnly | Self::ClientLocalOnly
        )
    }

    /// Returns `true` for client roles that provide internet connectivity
    /// (used by the scan-enable policy).
    #[must_use]
    pub const fn is_internet_connectivity(self) -> bool {
        matches!(self, Self::ClientPrimary | Self::ClientLocalOnly)
    }

    /// Returns `true` for client roles that run the connection engine
    /// (anything but scan-only).
    #[must_use]
    pub const fn is_client_connectivity(self) -> bool {
        matches!(self, Self::ClientPrimary | Self::ClientLocalOnly)
    }

    /// Returns `true` for any soft AP role.
    #[must_use]
    pub const fn is_softap(self) -> bool {
        matches!(self, Self::SoftApTethered | Self::SoftApLocalOnly)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClientPrimary => "client-primary",
            Self::ClientScanOnly => "client-scan-only",
            Self::ClientLocalOnly => "client-local-only",
            Self::SoftApTethered => "softap-tethered",
            Self::SoftApLocalOnly => "softap-local-only",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Soft AP Configuration
// =============================================================================

/// Radio band selection for a soft AP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Band {
    /// 2.4 GHz only.
    #[default]
    Band2Ghz,
    /// 5 GHz only. Requires a configured country code.
    Band5Ghz,
    /// 6 GHz only. Requires a configured country code.
    Band6Ghz,
    /// Simultaneous 2.4 GHz + 5 GHz over two interfaces and a bridge.
    BandDual,
}

impl Band {
    /// Returns `true` if starting on this band requires a country code.
    #[must_use]
    pub const fn requires_country_code(self) -> bool {
        matches!(self, Self::Band5Ghz | Self::Band6Ghz)
    }
}

/// Security mode of a soft AP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SecurityType {
    /// Open network.
    Open,
    /// WPA2-PSK.
    #[default]
    Wpa2,
    /// WPA3-SAE transition (WPA2/WPA3 mixed).
    Wpa3SaeTransition,
    /// WPA3-SAE only.
    Wpa3Sae,
    /// Opportunistic Wireless Encryption; started as an open + OWE
    /// transition pair over two interfaces.
    Owe,
}

/// Capability features a soft AP implementation may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SoftApFeature {
    /// Automatic channel selection offloaded to the driver.
    AcsOffload,
    /// The driver can force-disconnect an associated client.
    ClientForceDisconnect,
    /// WPA3-SAE authentication.
    Wpa3Sae,
    /// Custom BSSID / MAC randomization.
    MacAddressCustomization,
}

/// Device capability snapshot for soft AP operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SoftApCapability {
    features: HashSet<SoftApFeature>,
    /// Maximum clients supported by hardware and carrier.
    pub max_supported_clients: usize,
}

impl SoftApCapability {
    /// Creates a capability set with the given features and client limit.
    #[must_use]
    pub fn new(features: impl IntoIterator<Item = SoftApFeature>, max_clients: usize) -> Self {
        Self {
            features: features.into_iter().collect(),
            max_supported_clients: max_clients,
        }
    }

    /// Returns `true` if the feature is supported.
    #[must_use]
    pub fn supports(&self, feature: SoftApFeature) -> bool {
        self.features.contains(&feature)
    }
}

impl Default for SoftApCapability {
    fn default() -> Self {
        Self {
            features: HashSet::new(),
            max_supported_clients: 16,
        }
    }
}

/// User-facing soft AP configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SoftApConfig {
    /// Network name. Must be non-empty and at most 32 bytes.
    pub ssid: String,
    /// Radio band.
    pub band: Band,
    /// Fixed channel, or 0 to let channel selection decide.
    pub channel: u32,
    /// Security mode.
    pub security: SecurityType,
    /// Passphrase for secured modes.
    pub passphrase: Option<String>,
    /// Explicit BSSID. `None` means the factory MAC (or driver
    /// randomization) is used.
    pub bssid: Option<MacAddress>,
    /// Whether the SSID is hidden from beacons.
    pub hidden: bool,
    /// User-configured client cap; 0 means no user cap.
    pub max_clients: usize,
    /// When `true`, only clients on the allow list may associate.
    pub client_control_by_user: bool,
    /// Clients that are always rejected.
    pub blocked_clients: HashSet<MacAddress>,
    /// Clients allowed when user client control is on.
    pub allowed_clients: HashSet<MacAddress>,
    /// Whether the AP shuts down after being idle.
    pub auto_shutdown_enabled: bool,
    /// Idle timeout override in milliseconds; 0 uses the default.
    pub shutdown_timeout_ms: u64,
    /// Name of the paired interface when this config is one half of an OWE
    /// transition pair. Filled in by the AP manager, never by users.
    pub owe_transition_iface: Option<String>,
}

impl Default for SoftApConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            band: Band::Band2Ghz,
            channel: 0,
            security: SecurityType::Wpa2,
            passphrase: None,
            bssid: None,
            hidden: false,
            max_clients: 0,
            client_control_by_user: false,
            blocked_clients: HashSet::new(),
            allowed_clients: HashSet::new(),
            auto_shutdown_enabled: true,
            shutdown_timeout_ms: 0,
            owe_transition_iface: None,
        }
    }
}

impl SoftApConfig {
    /// Returns a copy configured for the given band.
    #[must_use]
    pub fn with_band(&self, band: Band) -> Self {
        Self { band, ..self.clone() }
    }

    /// Returns `true` if applying `new` over `self` requires a full AP
    /// restart (anything beyond client lists, caps and timeout knobs).
    #[must_use]
    pub fn change_requires_restart(&self, new: &SoftApConfig) -> bool {
        self.ssid != new.ssid
            || self.band != new.band
            || self.channel != new.channel
            || self.security != new.security
            || self.passphrase != new.passphrase
            || self.bssid != new.bssid
            || self.hidden != new.hidden
    }
}

/// Target mode of a soft AP manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SoftApMode {
    /// Tethering: shares the device's upstream connection.
    Tethered,
    /// Local-only hotspot: no upstream sharing.
    LocalOnly,
}

impl SoftApMode {
    /// The role a manager started in this mode holds.
    #[must_use]
    pub const fn role(self) -> Role {
        match self {
            Self::Tethered => Role::SoftApTethered,
            Self::LocalOnly => Role::SoftApLocalOnly,
        }
    }
}

/// Mode + configuration + capability snapshot handed to a soft AP manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftApModeConfig {
    /// Target mode.
    pub mode: SoftApMode,
    /// User configuration.
    pub config: SoftApConfig,
    /// Capability snapshot taken at start time.
    pub capability: SoftApCapability,
    /// Who asked for this AP.
    pub requestor: WorkSource,
}

// =============================================================================
// Soft AP Runtime Info
// =============================================================================

/// Channel bandwidth reported by the AP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChannelBandwidth {
    /// Unknown / AP not operating.
    #[default]
    Invalid,
    /// 20 MHz.
    Bw20,
    /// 40 MHz.
    Bw40,
    /// 80 MHz.
    Bw80,
    /// 160 MHz.
    Bw160,
}

/// Wi-Fi generation the AP is beaconing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WifiStandard {
    /// Unknown.
    #[default]
    Unknown,
    /// 802.11a/b/g.
    Legacy,
    /// 802.11n.
    N,
    /// 802.11ac.
    Ac,
    /// 802.11ax.
    Ax,
}

/// Runtime information about an operating soft AP.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SoftApInfo {
    /// Operating frequency in MHz; 0 when the AP is not operating.
    pub frequency_mhz: u32,
    /// Operating bandwidth.
    pub bandwidth: ChannelBandwidth,
    /// Operating Wi-Fi generation.
    pub standard: WifiStandard,
    /// Operating BSSID; cleared when `frequency_mhz` is 0.
    pub bssid: Option<MacAddress>,
}

// =============================================================================
// States & Policy
// =============================================================================

/// Externally visible station state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WifiState {
    /// Station off.
    Disabled,
    /// Teardown in progress.
    Disabling,
    /// Station operational.
    Enabled,
    /// Bring-up in progress.
    Enabling,
    /// Failure state; never broadcast publicly.
    Unknown,
}

/// Externally visible soft AP state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ApState {
    /// AP off.
    Disabled,
    /// Teardown in progress.
    Disabling,
    /// AP operational.
    Enabled,
    /// Bring-up in progress.
    Enabling,
    /// Start or mid-life failure.
    Failed,
}

/// Reason a client association was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClientBlockReason {
    /// The client is on the blocked list, or user client control is on and
    /// the client is not on the allow list.
    BlockedByUser,
    /// The AP is at its effective client capacity.
    NoMoreStas,
}

/// Selector for which soft AP managers a stop request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftApStopMode {
    /// Only the tethered manager.
    Tethered,
    /// Only the local-only manager.
    LocalOnly,
    /// Every soft AP manager.
    Any,
}

impl SoftApStopMode {
    /// Returns `true` if a manager holding `role` matches this selector.
    #[must_use]
    pub fn matches(self, role: Role) -> bool {
        match self {
            Self::Tethered => role == Role::SoftApTethered,
            Self::LocalOnly => role == Role::SoftApLocalOnly,
            Self::Any => role.is_softap(),
        }
    }
}

/// Why a recovery restart was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// The last-resort connectivity watchdog fired.
    LastResortWatchdog,
    /// A native daemon died.
    WifiNativeFailure,
    /// A station interface went down unexpectedly.
    StaIfaceDown,
}

impl fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LastResortWatchdog => "Last Resort Watchdog",
            Self::WifiNativeFailure => "WifiNative Failure",
            Self::StaIfaceDown => "STA Interface Down",
        };
        f.write_str(name)
    }
}

/// Operating mode handed to the connection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationalMode {
    /// Engine detached from any interface.
    Disabled,
    /// Scanning only; no connections.
    ScanOnly,
    /// Full connectivity.
    Connect,
}
