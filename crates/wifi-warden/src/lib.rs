//! # Wi-Fi Warden
//!
//! In-process coordinator for the device's Wi-Fi operating modes: station
//! connectivity, scan-only, and soft AP (tethered and local-only), plus the
//! emergency and recovery paths that cut across them.
//!
//! ## Architecture
//!
//! Three cooperating state machines run on one event-loop task:
//!
//! ```text
//! external events ──▶ ModeWarden ──▶ creates / commands
//!                        │              ├─ ClientModeManager ──▶ WifiNative
//!                        │              └─ SoftApManager ───────▶ WifiNative
//!                        ◀── lifecycle notifications ──┘
//! ```
//!
//! - [`ModeWarden`] holds the live set of mode managers and decides when to
//!   create, role-switch, or destroy them.
//! - [`ClientModeManager`] owns one station interface and its
//!   scan-only / connect sub-states; stops route through the
//!   [`defer::DeferStopController`] so voice-over-Wi-Fi calls survive.
//! - [`SoftApManager`] owns the interface(s) of one AP: admission control,
//!   idle shutdown, dual-band and OWE transition pairs.
//!
//! External collaborators (native layer, settings, telephony, connection
//! engine) are reached through the port traits of [`wifi_warden_core`];
//! every callback is marshalled onto the event-loop task before any state
//! is touched.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wifi_warden::{WardenRuntime, WardenDeps};
//!
//! let (warden, runtime) = WardenRuntime::new(deps);
//! tokio::spawn(runtime.run());
//!
//! warden.wifi_toggled();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod defer;
pub mod deps;
pub mod events;
pub mod graveyard;
pub mod runtime;
pub mod softap;
pub mod timer;
pub mod warden;

// Re-export the main surface at the crate root
pub use client::{ClientMode, ClientModeManager, DefaultClientMode};
pub use deps::{RecoverySlot, WardenConfig, WardenDeps, MAX_RECOVERY_TIMEOUT_DELAY_MS};
pub use events::{ClientMessage, EventPoster, ModeLifecycle, SoftApMessage, WardenEvent};
pub use graveyard::{Graveyard, StoppedManagerRecord};
pub use runtime::{ActiveModeWarden, WardenRuntime};
pub use softap::SoftApManager;
pub use timer::{ManualTimerService, TimerId, TimerService, TokioTimerService};
pub use warden::{ModeWarden, WardenState};
