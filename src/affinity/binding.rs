use std::collections::HashSet;
use std::time::Duration;

use os_api::PriorityClass;
use tracing::{debug, warn};

use super::events::{EventSink, FoundProcess, MonitorEvent};
use super::{AffinityMask, BindingMode, NamePattern, SessionStats};
use crate::error::EngineError;
use crate::platform::SchedulingApi;

/// What a monitoring session enforces.
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    pub pattern: NamePattern,
    pub base_mask: AffinityMask,
    pub mode: BindingMode,
    /// Core OR-ed into the mask in [`BindingMode::PriorityAugmented`].
    pub priority_core: Option<usize>,
    /// Applied once per process lifetime; `None` leaves priority alone.
    pub priority: Option<PriorityClass>,
    pub sync_threads: bool,
    pub poll_interval: Duration,
}

impl MonitorRequest {
    pub fn new(pattern: NamePattern, base_mask: AffinityMask, mode: BindingMode) -> Self {
        Self {
            pattern,
            base_mask,
            mode,
            priority_core: None,
            priority: None,
            sync_threads: false,
            poll_interval: Duration::from_millis(2000),
        }
    }
}

/// Outcome counts of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub matched: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub exited: usize,
}

/// Mutable state of one session. Owned by the session task only.
#[derive(Debug)]
pub struct ProcessBindingState {
    request: MonitorRequest,
    tracked: HashSet<u32>,
    priority_applied: HashSet<u32>,
    /// Pids the OS refused; not retried until they exit.
    denied: HashSet<u32>,
    /// Pids whose last application failed for another reason; retried next tick.
    retry: HashSet<u32>,
    cursor: usize,
}

impl ProcessBindingState {
    pub fn new(request: MonitorRequest) -> Self {
        Self {
            request,
            tracked: HashSet::new(),
            priority_applied: HashSet::new(),
            denied: HashSet::new(),
            retry: HashSet::new(),
            cursor: 0,
        }
    }

    /// Mask for the next process visited. Advances the rotation cursor in RoundRobin mode.
    ///
    /// `load` is per-core utilization indexed by logical core; missing entries count as idle,
    /// non-finite ones as fully busy.
    pub fn effective_mask(&mut self, load: &[f32]) -> AffinityMask {
        let base = self.request.base_mask;
        match self.request.mode {
            BindingMode::Static | BindingMode::Dynamic | BindingMode::PowerSave => base,
            BindingMode::PriorityAugmented => match self.request.priority_core {
                Some(core) => base | AffinityMask::single(core),
                None => base,
            },
            BindingMode::RoundRobin => {
                let cores: Vec<usize> = base.indices().collect();
                if cores.is_empty() {
                    return AffinityMask::EMPTY;
                }
                let core = cores[self.cursor % cores.len()];
                self.cursor = self.cursor.wrapping_add(1);
                AffinityMask::single(core)
            }
            BindingMode::LoadBalance => {
                let utilization = |core: usize| match load.get(core) {
                    Some(v) if v.is_finite() => *v,
                    Some(_) => f32::INFINITY,
                    None => 0.0,
                };
                base.indices()
                    .min_by(|&a, &b| utilization(a).total_cmp(&utilization(b)))
                    .map_or(AffinityMask::EMPTY, AffinityMask::single)
            }
        }
    }

    /// One reconciliation pass: apply to new pids, reapply where the mode asks for it,
    /// then forget pids that no longer match.
    pub fn tick(
        &mut self,
        api: &dyn SchedulingApi,
        load: &[f32],
        events: &EventSink,
        stats: &SessionStats,
    ) -> Result<TickReport, EngineError> {
        let entries = api
            .enumerate_processes_by_name(&self.request.pattern)
            .map_err(|e| EngineError::LoopFault(format!("process enumeration failed: {e}")))?;

        let mut report = TickReport {
            matched: entries.len(),
            ..TickReport::default()
        };

        if entries.is_empty() {
            events.emit(MonitorEvent::NotFound {
                pattern: self.request.pattern.to_string(),
            });
        } else {
            events.emit(MonitorEvent::Found {
                processes: entries
                    .iter()
                    .map(|e| FoundProcess {
                        pid: e.pid,
                        name: e.name.clone(),
                        window_title: e.window_title.clone(),
                    })
                    .collect(),
            });
        }

        for entry in &entries {
            let pid = entry.pid;
            if self.denied.contains(&pid) {
                continue;
            }
            let is_new = !self.tracked.contains(&pid);
            let retrying = self.retry.contains(&pid);
            if !is_new && !retrying && !self.request.mode.reapplies_every_cycle() {
                continue;
            }

            let mask = self.effective_mask(load);
            if mask.is_empty() {
                report.skipped += 1;
                events.emit(MonitorEvent::Skipped {
                    pid,
                    reason: "effective affinity mask is empty".into(),
                });
                continue;
            }

            if let Err(err) = api.set_process_affinity(pid, mask) {
                match EngineError::from_os(pid, err) {
                    EngineError::ProcessVanished(_) => {
                        debug!(pid, "process exited before its mask was set");
                        self.forget(pid);
                    }
                    err => {
                        warn!(pid, %err, "affinity not applied");
                        report.failed += 1;
                        stats.record_failure();
                        if is_new {
                            stats.record_detected();
                        }
                        self.tracked.insert(pid);
                        if matches!(err, EngineError::AffinityDenied { .. }) {
                            self.denied.insert(pid);
                        } else {
                            self.retry.insert(pid);
                        }
                        events.emit(MonitorEvent::Failed {
                            pid,
                            error: err.to_string(),
                        });
                    }
                }
                continue;
            }

            report.applied += 1;
            stats.record_application();
            self.retry.remove(&pid);
            let threads = self
                .request
                .sync_threads
                .then(|| sync_threads(api, &entry.thread_ids, mask));

            if is_new {
                stats.record_detected();
                self.tracked.insert(pid);
            }
            if is_new || retrying {
                debug!(pid, %mask, ?threads, "bound process");
                events.emit(MonitorEvent::Applied { pid, mask, threads });
            } else {
                debug!(pid, %mask, ?threads, "reapplied mask");
            }

            self.apply_priority(api, pid, events);
        }

        report.exited = self.prune(entries.iter().map(|e| e.pid).collect(), events);
        Ok(report)
    }

    fn apply_priority(&mut self, api: &dyn SchedulingApi, pid: u32, events: &EventSink) {
        let Some(level) = self.request.priority else {
            return;
        };
        if !self.priority_applied.insert(pid) {
            return;
        }
        match api.set_priority_class(pid, level) {
            Ok(()) => events.emit(MonitorEvent::PrioritySet { pid, level }),
            Err(err) => match EngineError::from_os(pid, err) {
                EngineError::ProcessVanished(_) => {}
                err => {
                    warn!(pid, %err, "priority not applied");
                    events.emit(MonitorEvent::Failed {
                        pid,
                        error: err.to_string(),
                    });
                }
            },
        }
    }

    fn forget(&mut self, pid: u32) {
        self.tracked.remove(&pid);
        self.priority_applied.remove(&pid);
        self.denied.remove(&pid);
        self.retry.remove(&pid);
    }

    /// Drops every tracked pid not in `live`, returning how many went away.
    fn prune(&mut self, live: HashSet<u32>, events: &EventSink) -> usize {
        let gone: Vec<u32> = self
            .tracked
            .iter()
            .filter(|pid| !live.contains(pid))
            .copied()
            .collect();
        for &pid in &gone {
            debug!(pid, "process exited");
            self.forget(pid);
            events.emit(MonitorEvent::Exited { pid });
        }
        self.priority_applied.retain(|pid| live.contains(pid));
        self.denied.retain(|pid| live.contains(pid));
        self.retry.retain(|pid| live.contains(pid));
        gone.len()
    }
}

/// Sets every listed thread to `mask`; threads that cannot be changed are skipped.
///
/// Returns how many threads were updated.
pub fn sync_threads(api: &dyn SchedulingApi, thread_ids: &[u32], mask: AffinityMask) -> usize {
    thread_ids
        .iter()
        .filter(|&&tid| match api.set_thread_affinity(tid, mask) {
            Ok(()) => true,
            Err(err) => {
                debug!(tid, %err, "thread skipped");
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(mode: BindingMode, base: u64) -> ProcessBindingState {
        let pattern = NamePattern::new("game").unwrap();
        ProcessBindingState::new(MonitorRequest::new(
            pattern,
            AffinityMask::from_bits(base),
            mode,
        ))
    }

    #[test]
    fn round_robin_is_fair() {
        let mut st = state(BindingMode::RoundRobin, 0b1011_0000);
        let k = 3;
        let n = 100;
        let mut visits = [0usize; 64];
        for _ in 0..n {
            let mask = st.effective_mask(&[]);
            assert_eq!(mask.count(), 1);
            visits[mask.indices().next().unwrap()] += 1;
        }
        for core in [4, 5, 7] {
            assert!(visits[core] == n / k || visits[core] == n.div_ceil(k), "{visits:?}");
        }
        assert_eq!(visits.iter().sum::<usize>(), n);
    }

    #[test]
    fn priority_core_bit_is_always_set() {
        for base in [0u64, 0b0011, 0b1000_0000] {
            let mut st = state(BindingMode::PriorityAugmented, base);
            st.request.priority_core = Some(6);
            let mask = st.effective_mask(&[]);
            assert!(mask.contains(6), "{base:#b}");
            assert_eq!(mask, AffinityMask::from_bits(base) | AffinityMask::single(6));
        }
    }

    #[test]
    fn load_balance_picks_the_idlest_core() {
        let mut st = state(BindingMode::LoadBalance, 0b1110);
        assert_eq!(st.effective_mask(&[0.0, 0.9, 0.2, 0.5]), AffinityMask::single(2));
        // missing samples count as idle
        assert_eq!(st.effective_mask(&[0.0, 0.9, 0.2]), AffinityMask::single(3));
        // ties go to the lowest index
        assert_eq!(st.effective_mask(&[]), AffinityMask::single(1));
    }

    #[test]
    fn load_balance_treats_non_finite_samples_as_busy() {
        let mut st = state(BindingMode::LoadBalance, 0b111);
        assert_eq!(st.effective_mask(&[0.5, f32::NAN, 0.9]), AffinityMask::single(0));
        assert_eq!(st.effective_mask(&[f32::NAN, 0.7, 0.9]), AffinityMask::single(1));
        assert_eq!(
            st.effective_mask(&[f32::INFINITY, f32::NAN, 0.9]),
            AffinityMask::single(2)
        );
    }

    #[test]
    fn fixed_modes_use_the_base_mask() {
        for mode in [BindingMode::Static, BindingMode::Dynamic, BindingMode::PowerSave] {
            let mut st = state(mode, 0xf0);
            assert_eq!(st.effective_mask(&[1.0; 8]).bits(), 0xf0);
        }
    }

    #[test]
    fn empty_base_yields_empty_single_core_masks() {
        assert!(state(BindingMode::RoundRobin, 0).effective_mask(&[]).is_empty());
        assert!(state(BindingMode::LoadBalance, 0).effective_mask(&[]).is_empty());
    }
}
