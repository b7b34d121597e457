use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

/// Counters of one monitoring session, written by the session task and readable from anywhere.
#[derive(Debug)]
pub struct SessionStats {
    started: Instant,
    started_at: SystemTime,
    processes_detected: AtomicU64,
    applications: AtomicU64,
    failures: AtomicU64,
    ticks: AtomicU64,
    faults: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub processes_detected: u64,
    pub applications: u64,
    pub failures: u64,
    pub ticks: u64,
    pub faults: u64,
    pub started_at: SystemTime,
    pub elapsed: Duration,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: SystemTime::now(),
            processes_detected: AtomicU64::new(0),
            applications: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_detected(&self) {
        self.processes_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_application(&self) {
        self.applications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processes_detected: self.processes_detected.load(Ordering::Relaxed),
            applications: self.applications.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
        }
    }
}
