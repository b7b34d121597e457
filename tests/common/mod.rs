#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cpu_affinity_engine::affinity::NamePattern;
use cpu_affinity_engine::{AffinityMask, MonitorEvent, PriorityClass, ProcessEntry, SchedulingApi};
use os_api::{NumaNodeRecord, OsError, ProcessorCoreRecord};
use tokio::sync::mpsc;

/// In-memory platform whose process table and failures are set by the test.
#[derive(Default)]
pub struct ScriptedApi {
    pub model: String,
    pub logical: usize,
    pub physical: usize,
    pub core_records: Option<Vec<ProcessorCoreRecord>>,
    pub numa: Vec<NumaNodeRecord>,

    pub(crate) processes: Mutex<Vec<ProcessEntry>>,
    pub(crate) denied: Mutex<HashSet<u32>>,
    pub(crate) vanishing: Mutex<HashSet<u32>>,
    pub(crate) denied_threads: Mutex<HashSet<u32>>,
    pub(crate) denied_priority: Mutex<HashSet<u32>>,
    pub(crate) failing_affinity: AtomicUsize,
    pub(crate) affinity_delay: Mutex<Duration>,
    pub(crate) failing_enumerations: AtomicUsize,
    pub(crate) panicking_enumerations: AtomicUsize,

    pub enumerations: AtomicUsize,
    pub affinity_calls: Mutex<Vec<(u32, AffinityMask)>>,
    pub thread_calls: Mutex<Vec<(u32, AffinityMask)>>,
    pub priority_calls: Mutex<Vec<(u32, PriorityClass)>>,
}

pub fn process(pid: u32, name: &str) -> ProcessEntry {
    ProcessEntry {
        pid,
        name: name.to_string(),
        window_title: None,
        thread_ids: vec![pid * 10, pid * 10 + 1],
    }
}

impl ScriptedApi {
    pub fn with_processes(processes: Vec<ProcessEntry>) -> Self {
        let api = Self {
            logical: 8,
            physical: 4,
            ..Self::default()
        };
        api.set_processes(processes);
        api
    }

    pub fn set_processes(&self, processes: Vec<ProcessEntry>) {
        *self.processes.lock().unwrap() = processes;
    }

    pub fn deny(&self, pid: u32) {
        self.denied.lock().unwrap().insert(pid);
    }

    pub fn vanish(&self, pid: u32) {
        self.vanishing.lock().unwrap().insert(pid);
    }

    pub fn deny_thread(&self, tid: u32) {
        self.denied_threads.lock().unwrap().insert(tid);
    }

    pub fn deny_priority(&self, pid: u32) {
        self.denied_priority.lock().unwrap().insert(pid);
    }

    /// Fails the next `n` process affinity calls with a non-permission error.
    pub fn fail_next_affinity(&self, n: usize) {
        self.failing_affinity.store(n, Ordering::SeqCst);
    }

    /// Blocks every process affinity call for `delay` before recording it.
    pub fn delay_affinity(&self, delay: Duration) {
        *self.affinity_delay.lock().unwrap() = delay;
    }

    pub fn fail_next_enumerations(&self, n: usize) {
        self.failing_enumerations.store(n, Ordering::SeqCst);
    }

    pub fn panic_next_enumerations(&self, n: usize) {
        self.panicking_enumerations.store(n, Ordering::SeqCst);
    }

    pub fn affinity_calls_for(&self, pid: u32) -> Vec<AffinityMask> {
        self.affinity_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == pid)
            .map(|(_, m)| *m)
            .collect()
    }

    pub fn affinity_call_count(&self) -> usize {
        self.affinity_calls.lock().unwrap().len()
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl SchedulingApi for ScriptedApi {
    fn query_processor_topology(&self) -> Result<Vec<ProcessorCoreRecord>, OsError> {
        self.core_records
            .clone()
            .ok_or(OsError::Unsupported("scripted"))
    }

    fn logical_processor_count(&self) -> usize {
        self.logical
    }

    fn physical_core_count(&self) -> usize {
        self.physical
    }

    fn cpu_model_name(&self) -> String {
        self.model.clone()
    }

    fn set_process_affinity(&self, pid: u32, mask: AffinityMask) -> Result<(), OsError> {
        if self.vanishing.lock().unwrap().contains(&pid) {
            return Err(OsError::Vanished {
                target: "process",
                id: pid,
            });
        }
        let delay = *self.affinity_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if Self::take_one(&self.failing_affinity) {
            return Err(OsError::Other("scripted transient failure".into()));
        }
        self.affinity_calls.lock().unwrap().push((pid, mask));
        if self.denied.lock().unwrap().contains(&pid) {
            return Err(OsError::Denied {
                target: "process",
                id: pid,
                reason: "Access is denied.".into(),
            });
        }
        Ok(())
    }

    fn set_thread_affinity(&self, tid: u32, mask: AffinityMask) -> Result<(), OsError> {
        if self.denied_threads.lock().unwrap().contains(&tid) {
            return Err(OsError::Denied {
                target: "thread",
                id: tid,
                reason: "Access is denied.".into(),
            });
        }
        self.thread_calls.lock().unwrap().push((tid, mask));
        Ok(())
    }

    fn set_priority_class(&self, pid: u32, level: PriorityClass) -> Result<(), OsError> {
        self.priority_calls.lock().unwrap().push((pid, level));
        if self.denied_priority.lock().unwrap().contains(&pid) {
            return Err(OsError::Denied {
                target: "process",
                id: pid,
                reason: "Access is denied.".into(),
            });
        }
        Ok(())
    }

    fn enumerate_processes_by_name(
        &self,
        pattern: &NamePattern,
    ) -> Result<Vec<ProcessEntry>, OsError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.panicking_enumerations) {
            panic!("scripted enumeration panic");
        }
        if Self::take_one(&self.failing_enumerations) {
            return Err(OsError::Other("scripted enumeration failure".into()));
        }
        Ok(self
            .processes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| pattern.matches(&p.name))
            .cloned()
            .collect())
    }

    fn query_numa_nodes(&self) -> Result<Vec<NumaNodeRecord>, OsError> {
        Ok(self.numa.clone())
    }
}

/// Waits for the first event satisfying `wanted`, failing the test after five seconds.
pub async fn wait_for<F>(rx: &mut mpsc::Receiver<MonitorEvent>, mut wanted: F) -> MonitorEvent
where
    F: FnMut(&MonitorEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) if wanted(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for event"),
        }
    }
}

/// Waits until `n` ticks have reported their matches.
pub async fn wait_ticks(rx: &mut mpsc::Receiver<MonitorEvent>, n: usize) {
    for _ in 0..n {
        wait_for(rx, |e| {
            matches!(e, MonitorEvent::Found { .. } | MonitorEvent::NotFound { .. })
        })
        .await;
    }
}
