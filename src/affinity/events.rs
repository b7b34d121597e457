use std::time::Duration;

use os_api::PriorityClass;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::{AffinityMask, BindingMode};

/// A process matched during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundProcess {
    pub pid: u32,
    pub name: String,
    pub window_title: Option<String>,
}

/// Status stream of a monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Started {
        pattern: String,
        mode: BindingMode,
        interval: Duration,
    },
    /// Every process matched by this tick.
    Found { processes: Vec<FoundProcess> },
    /// The pattern matched nothing this tick.
    NotFound { pattern: String },
    /// First mask application for a pid. `threads` is set when thread sync is on.
    Applied {
        pid: u32,
        mask: AffinityMask,
        threads: Option<usize>,
    },
    PrioritySet { pid: u32, level: PriorityClass },
    /// The effective mask came out empty; nothing was sent to the OS.
    Skipped { pid: u32, reason: String },
    /// The OS refused a change for this pid.
    Failed { pid: u32, error: String },
    Exited { pid: u32 },
    /// A tick failed as a whole; the loop sleeps for `backoff` and resumes.
    Fault { error: String, backoff: Duration },
    Stopped,
}

/// Non-blocking sender half of the event stream.
///
/// Events are dropped when the consumer falls behind or has gone away, the loop never waits
/// on it.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<MonitorEvent>>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn discard() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: MonitorEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => debug!(?event, "event channel full, dropping"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
