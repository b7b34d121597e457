use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest poll interval Dynamic mode will use.
pub const DYNAMIC_INTERVAL_FLOOR: Duration = Duration::from_millis(500);

/// How the effective mask of a matched process is recomputed over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingMode {
    /// Base mask, applied once when a process is first seen.
    #[default]
    Static,
    /// Base mask, reapplied every cycle to correct drift.
    Dynamic,
    /// Base mask plus the priority core.
    PriorityAugmented,
    /// Base mask, expected to hold only efficiency cores.
    PowerSave,
    /// One core of the base mask per process, rotating.
    RoundRobin,
    /// The least utilized core of the base mask.
    LoadBalance,
}

impl BindingMode {
    /// Whether already-bound processes get their mask recomputed and reapplied each tick.
    pub fn reapplies_every_cycle(self) -> bool {
        !matches!(self, BindingMode::Static)
    }

    /// Poll interval actually used for a configured one.
    pub fn effective_interval(self, configured: Duration) -> Duration {
        match self {
            BindingMode::Dynamic => DYNAMIC_INTERVAL_FLOOR.max(configured / 2),
            _ => configured,
        }
    }
}
