//! Error types for the Wi-Fi mode warden.
//!
//! This module provides error handling using [`thiserror`] for automatic
//! `Display` and `Error` trait implementations.
//!
//! # Error Hierarchy
//!
//! - [`WardenError`]: Top-level error type for all warden subsystems
//! - [`SoftApStartError`]: Start-time failures of a soft AP manager, mapped
//!   onto the failure reason carried by the AP state broadcast
//!
//! # Example
//!
//! ```rust
//! use wifi_warden_core::error::{WardenError, SoftApStartError};
//!
//! fn start_ap() -> Result<(), WardenError> {
//!     // 5 GHz without a country code cannot pick a channel
//!     Err(SoftApStartError::NoChannel.into())
//! }
//! ```

use thiserror::Error;

/// A specialized `Result` type for warden operations.
pub type WardenResult<T> = Result<T, WardenError>;

/// Top-level error type for the Wi-Fi mode warden.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WardenError {
    /// Soft AP start failure
    #[error("Soft AP start failure: {0}")]
    SoftApStart(#[from] SoftApStartError),

    /// The native layer failed to create or configure an interface
    #[error("Native interface setup failed: {operation}")]
    NativeSetupFailed {
        /// The native operation that failed
        operation: String,
    },

    /// Validation error for a configuration or input value
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what validation failed
        message: String,
    },

    /// A native daemon (hostapd / supplicant / HAL) died
    #[error("Native daemon died")]
    DaemonDied,

    /// An owned interface went down outside of a requested teardown
    #[error("Interface '{iface}' went down unexpectedly")]
    InterfaceDownUnexpected {
        /// Name of the affected interface
        iface: String,
    },

    /// An owned interface was destroyed outside of a requested teardown
    #[error("Interface '{iface}' was destroyed unexpectedly")]
    InterfaceDestroyedUnexpected {
        /// Name of the affected interface
        iface: String,
    },

    /// Invalid state for the requested operation
    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

impl WardenError {
    /// Creates a new native-setup error.
    #[must_use]
    pub fn native_setup(operation: impl Into<String>) -> Self {
        Self::NativeSetupFailed {
            operation: operation.into(),
        }
    }

    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new invalid state error.
    #[must_use]
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are mid-life interface failures the self-recovery
    /// component may repair by restarting the stack. Configuration and
    /// validation failures require user action and are not recoverable.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SoftApStart(e) => e.is_recoverable(),
            Self::DaemonDied
            | Self::InterfaceDownUnexpected { .. }
            | Self::InterfaceDestroyedUnexpected { .. }
            | Self::NativeSetupFailed { .. } => true,
            Self::Validation { .. } | Self::InvalidState { .. } => false,
        }
    }
}

/// Start-time failures of a soft AP manager.
///
/// Each variant maps onto the failure reason attached to the AP state
/// broadcast when the state transitions to `Failed`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SoftApStartError {
    /// No usable channel: 5/6 GHz band requested without a country code,
    /// or channel selection failed
    #[error("no channel available for the requested band")]
    NoChannel,

    /// The configuration requests features the capability set cannot provide
    #[error("configuration not supported by device capabilities")]
    UnsupportedConfiguration,

    /// Generic start failure (interface setup, hostapd start, MAC config)
    #[error("generic soft AP start failure")]
    Generic,
}

impl SoftApStartError {
    /// Returns `true` if this error is recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Generic => true,
            Self::NoChannel | Self::UnsupportedConfiguration => false,
        }
    }
}
