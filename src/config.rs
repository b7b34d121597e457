//! Engine settings and the JSON binding profile read by the runner.

use std::time::Duration;

use os_api::PriorityClass;
use serde::{Deserialize, Serialize};

use crate::affinity::{BindingMode, MonitorRequest, NamePattern};
use crate::error::{EngineError, EngineResult};
use crate::topology::CpuTopology;

/// Current version of the profile schema
pub const CURRENT_PROFILE_VERSION: u32 = 1;

/// Tunables of the monitoring engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause after a failed tick.
    pub fault_backoff_ms: u64,
    /// Capacity of the status event channel; events beyond it are dropped.
    pub event_capacity: usize,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fault_backoff_ms: 5000,
            event_capacity: 256,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }
}

/// What to bind and how, as plain values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingProfile {
    /// Executable name or glob, e.g. `game.exe` or `chrome*`.
    pub process: String,
    /// Selected logical cores; empty means every core.
    pub cores: Vec<usize>,
    pub mode: BindingMode,
    pub priority_core: Option<usize>,
    pub priority: Option<PriorityClass>,
    pub sync_threads: bool,
    pub poll_interval_ms: u64,
}

impl Default for BindingProfile {
    fn default() -> Self {
        Self {
            process: String::new(),
            cores: Vec::new(),
            mode: BindingMode::Static,
            priority_core: None,
            priority: None,
            sync_threads: false,
            poll_interval_ms: 2000,
        }
    }
}

impl BindingProfile {
    /// Resolves the profile against a detected topology.
    ///
    /// Core indices outside the topology are dropped. PowerSave on a hybrid part keeps only
    /// efficiency cores, falling back to all of them when the selection has none.
    pub fn to_request(&self, topology: &CpuTopology) -> EngineResult<MonitorRequest> {
        let pattern = NamePattern::new(&self.process)?;

        let mut base = if self.cores.is_empty() {
            topology.full_mask()
        } else {
            topology.mask_for(self.cores.iter().copied())
        };
        if base.is_empty() {
            return Err(EngineError::Config(format!(
                "none of the cores {:?} exist on this {}-thread cpu",
                self.cores, topology.logical_count
            )));
        }

        if self.mode == BindingMode::PowerSave && topology.is_hybrid {
            let efficiency = topology.mask_for(topology.efficiency_cores());
            let restricted = base & efficiency;
            base = if restricted.is_empty() {
                efficiency
            } else {
                restricted
            };
        }

        if let Some(core) = self.priority_core {
            if core >= topology.logical_count {
                return Err(EngineError::Config(format!(
                    "priority core {core} is outside 0..{}",
                    topology.logical_count
                )));
            }
        }

        Ok(MonitorRequest {
            pattern,
            base_mask: base,
            mode: self.mode,
            priority_core: self.priority_core,
            priority: self.priority,
            sync_threads: self.sync_threads,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        })
    }
}

/// Top-level document of `profile.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerProfile {
    pub version: u32,
    #[serde(default)]
    pub engine: EngineConfig,
    pub binding: BindingProfile,
    /// Bind matching processes once and exit instead of monitoring.
    #[serde(default)]
    pub apply_once: bool,
}

impl RunnerProfile {
    pub fn from_json(data: &str) -> EngineResult<Self> {
        #[derive(Deserialize)]
        struct VersionCheck {
            version: Option<u32>,
        }

        let check: VersionCheck = serde_json::from_str(data)?;
        match check.version {
            Some(CURRENT_PROFILE_VERSION) => Ok(serde_json::from_str(data)?),
            Some(v) => Err(EngineError::Config(format!("unsupported profile version {v}"))),
            None => Err(EngineError::Config("profile has no version".into())),
        }
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
