//! CPU topology detection and affinity enforcement for named processes.
//!
//! [`TopologyDetector`] classifies the processor once at startup, [`NumaTopology`] maps cores
//! to memory nodes and [`AffinityController`] keeps matching processes on the selected cores.

pub mod affinity;
pub mod config;
pub mod error;
pub mod numa;
pub mod platform;
pub mod topology;

pub use affinity::{
    AffinityController, AffinityMask, BindingMode, MonitorEvent, MonitorRequest, MonitorState,
    NamePattern, StatsSnapshot, compute_mask,
};
pub use config::{BindingProfile, EngineConfig, RunnerProfile};
pub use error::{EngineError, EngineResult};
pub use numa::{GroupingSuggestion, NumaNode, NumaTopology};
pub use platform::{SchedulingApi, SystemApi};
pub use topology::{CoreType, CpuTopology, DetectionPath, TopologyDetector, detect_topology};

pub use os_api::{PriorityClass, ProcessEntry};
