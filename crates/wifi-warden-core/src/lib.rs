//! # Wi-Fi Warden Core
//!
//! Core types, errors, and port traits for the Wi-Fi active mode warden.
//!
//! This crate provides the foundational building blocks shared by the mode
//! warden and its mode managers:
//!
//! - **Domain Types**: [`Role`], [`MacAddress`], [`SoftApConfig`],
//!   [`SoftApCapability`], [`SoftApInfo`], and the externally visible
//!   [`WifiState`] / [`ApState`] enums.
//!
//! - **Error Types**: [`WardenError`] and [`SoftApStartError`] via the
//!   [`error`] module.
//!
//! - **Ports**: [`WifiNative`], [`SettingsStore`], [`TelephonyPolicy`],
//!   [`ConnectionEngine`], and the callback contracts that connect the
//!   warden to the rest of the system.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization of configuration types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{SoftApStartError, WardenError, WardenResult};
pub use traits::{
    ActiveModeInfo, AvailabilitySink, ClientModeRequestListener, ConnectionEngine, Diagnostics,
    ImsEvent, ImsEventSink, InterfaceEvent, InterfaceEventSink, ModeChangeObserver,
    NativeStatusSink, NoopDiagnostics, NoopMetrics, ScorerBinding, SelfRecovery, SettingsStore,
    SoftApCallback, SoftApHalEvent, SoftApHalEventSink, StateBroadcaster, SubscriptionInfo,
    TelephonyPolicy, WardenMetrics, WifiNative,
};
pub use types::{
    ApState, Band, ChannelBandwidth, ClientBlockReason, MacAddress, ManagerId, OperationalMode,
    RecoveryReason, Role, SecurityType, SoftApCapability, SoftApConfig, SoftApFeature,
    SoftApInfo, SoftApMode, SoftApModeConfig, SoftApStopMode, WifiStandard, WifiState,
    WorkSource,
};
