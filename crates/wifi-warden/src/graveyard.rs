//! Post-mortem record of recently stopped mode managers.
//!
//! Purely a debug-dump facility; control logic never consults it.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};

use wifi_warden_core::types::{ManagerId, Role};

/// Number of stopped managers kept per family.
const INSTANCES_TO_KEEP: usize = 3;

/// Snapshot of a manager taken as it reported its terminal state.
#[derive(Debug, Clone)]
pub struct StoppedManagerRecord {
    /// Manager id.
    pub id: ManagerId,
    /// Role held when the manager stopped (or the role it failed to take).
    pub last_role: Option<Role>,
    /// Interface the manager owned, if setup got that far.
    pub iface: Option<String>,
    /// Whether the manager stopped cleanly or failed to start.
    pub start_failed: bool,
    /// When the terminal state was reported.
    pub stopped_at: DateTime<Utc>,
}

impl fmt::Display for StoppedManagerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} role={} iface={} start_failed={} at={}",
            self.id,
            self.last_role.map_or("none".to_string(), |r| r.to_string()),
            self.iface.as_deref().unwrap_or("none"),
            self.start_failed,
            self.stopped_at.format("%m-%d %H:%M:%S%.3f"),
        )
    }
}

/// Bounded FIFO of stopped managers, kept separately per family.
#[derive(Debug, Default)]
pub struct Graveyard {
    clients: VecDeque<StoppedManagerRecord>,
    softaps: VecDeque<StoppedManagerRecord>,
}

impl Graveyard {
    /// Creates an empty graveyard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stopped client manager, evicting the oldest if full.
    pub fn inter_client(&mut self, record: StoppedManagerRecord) {
        if self.clients.len() == INSTANCES_TO_KEEP {
            self.clients.pop_front();
        }
        self.clients.push_back(record);
    }

    /// Records a stopped soft AP manager, evicting the oldest if full.
    pub fn inter_softap(&mut self, record: StoppedManagerRecord) {
        if self.softaps.len() == INSTANCES_TO_KEEP {
            self.softaps.pop_front();
        }
        self.softaps.push_back(record);
    }

    /// Stopped client managers, oldest first.
    #[must_use]
    pub fn clients(&self) -> impl Iterator<Item = &StoppedManagerRecord> {
        self.clients.iter()
    }

    /// Stopped soft AP managers, oldest first.
    #[must_use]
    pub fn softaps(&self) -> impl Iterator<Item = &StoppedManagerRecord> {
        self.softaps.iter()
    }

    /// Writes the graveyard contents into `out`.
    pub fn dump(&self, out: &mut String) {
        use std::fmt::Write;

        let _ = writeln!(out, "Graveyard: {} stopped client managers", self.clients.len());
        for record in &self.clients {
            let _ = writeln!(out, "  {record}");
        }
        let _ = writeln!(out, "Graveyard: {} stopped softap managers", self.softaps.len());
        for record in &self.softaps {
            let _ = writeln!(out, "  {record}");
        }
    }
}
