//! Affinity masks, binding modes and the monitoring loop that enforces them.

mod binding;
mod controller;
mod events;
mod mask;
mod mode;
mod pattern;
mod stats;

pub use binding::{MonitorRequest, ProcessBindingState, TickReport, sync_threads};
pub use controller::{AffinityController, MonitorState};
pub use events::{EventSink, FoundProcess, MonitorEvent};
pub use mask::{AffinityMask, MAX_CORES, compute_mask};
pub use mode::{BindingMode, DYNAMIC_INTERVAL_FLOOR};
pub use pattern::NamePattern;
pub use stats::{SessionStats, StatsSnapshot};
