// linux scheduling ops

use std::fs;
use std::io;
use std::path::Path;

use libc::{PRIO_PROCESS, SCHED_FIFO, pid_t, sched_param, sched_setscheduler, setpriority};
use nix::errno::Errno;
use nix::sched::{CpuSet, sched_setaffinity};
use nix::unistd::Pid;

use crate::{NumaNodeRecord, OsError, PriorityClass, ProcessEntry, ProcessorCoreRecord};

const SYS_CPU: &str = "/sys/devices/system/cpu";
const SYS_NODE: &str = "/sys/devices/system/node";
// Present on Intel hybrid parts: lists the logical CPUs owned by P-cores.
const SYS_HYBRID_CORE: &str = "/sys/devices/cpu_core/cpus";

pub struct OS;

impl OS {
    // ---- helpers to reduce duplication ----
    fn classify(target: &'static str, id: u32, errno: Errno) -> OsError {
        match errno {
            Errno::EPERM | Errno::EACCES => OsError::Denied {
                target,
                id,
                reason: errno.desc().to_string(),
            },
            Errno::ESRCH => OsError::Vanished { target, id },
            other => OsError::Io(io::Error::from_raw_os_error(other as i32)),
        }
    }

    fn classify_last(target: &'static str, id: u32) -> OsError {
        Self::classify(target, id, Errno::last())
    }

    fn cpuset_from_mask(mask: u64) -> Result<CpuSet, OsError> {
        if mask == 0 {
            return Err(OsError::EmptyMask);
        }
        let mut cpu_set = CpuSet::new();
        for i in 0..u64::BITS as usize {
            if (mask & (1u64 << i)) != 0 {
                cpu_set.set(i).map_err(|e| OsError::Other(e.to_string()))?;
            }
        }
        Ok(cpu_set)
    }

    fn mask_from_list(list: &[usize]) -> u64 {
        list.iter()
            .filter(|&&cpu| cpu < u64::BITS as usize)
            .fold(0u64, |acc, &cpu| acc | (1u64 << cpu))
    }

    fn set_affinity_for(target: &'static str, id: u32, mask: u64) -> Result<(), OsError> {
        let cpu_set = Self::cpuset_from_mask(mask)?;
        sched_setaffinity(Pid::from_raw(id as pid_t), &cpu_set)
            .map_err(|e| Self::classify(target, id, e))
    }

    fn set_priority_for_pid(pid: u32, p: PriorityClass) -> Result<(), OsError> {
        let raw = pid as pid_t;
        let ret = match p {
            PriorityClass::Realtime => {
                let param = sched_param { sched_priority: 50 };
                unsafe { sched_setscheduler(raw, SCHED_FIFO, &param) }
            }
            _ => unsafe { setpriority(PRIO_PROCESS, raw as libc::id_t, Self::to_nice(p)) },
        };
        if ret == 0 {
            Ok(())
        } else {
            Err(Self::classify_last("process", pid))
        }
    }

    fn to_nice(p: PriorityClass) -> i32 {
        match p {
            PriorityClass::Idle => 19,
            PriorityClass::BelowNormal => 10,
            PriorityClass::Normal => 0,
            PriorityClass::AboveNormal => -5,
            PriorityClass::High => -10,
            PriorityClass::Realtime => -20,
        }
    }

    /// Parses a kernel CPU list such as `0-7,16-23`.
    pub(crate) fn parse_cpulist(s: &str) -> Vec<usize> {
        let mut cpus = Vec::new();
        for part in s.trim().split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some((start, end)) = part.split_once('-') {
                if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                    cpus.extend(start..=end);
                }
            } else if let Ok(cpu) = part.parse::<usize>() {
                cpus.push(cpu);
            }
        }
        cpus
    }

    fn read_cpulist(path: &Path) -> Option<Vec<usize>> {
        fs::read_to_string(path)
            .ok()
            .map(|content| Self::parse_cpulist(&content))
    }

    /// Numeric suffixes of `<prefix>N` entries in `dir`, sorted ascending.
    fn numbered_entries(dir: &Path, prefix: &str) -> io::Result<Vec<usize>> {
        let mut ids: Vec<usize> = fs::read_dir(dir)?
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.strip_prefix(prefix)?.parse::<usize>().ok()
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn comm_of(pid: u32) -> Option<String> {
        fs::read_to_string(format!("/proc/{pid}/comm"))
            .ok()
            .map(|comm| comm.trim().to_string())
    }

    // ---- affinity & priority ----

    /// Sets the CPU affinity mask for every thread of a process by PID.
    ///
    /// `sched_setaffinity` on a PID only touches its main thread, so the remaining tasks are
    /// updated best-effort afterwards. The result reflects the main thread.
    pub fn set_process_affinity_by_pid(pid: u32, mask: u64) -> Result<(), OsError> {
        Self::set_affinity_for("process", pid, mask)?;
        for tid in Self::thread_ids(pid) {
            if tid != pid {
                let _ = Self::set_affinity_for("thread", tid, mask);
            }
        }
        Ok(())
    }

    /// Sets the CPU affinity mask for a single thread (task) id.
    pub fn set_thread_affinity_by_tid(tid: u32, mask: u64) -> Result<(), OsError> {
        Self::set_affinity_for("thread", tid, mask)
    }

    /// Sets the priority class for a process by PID.
    pub fn set_process_priority_by_pid(pid: u32, priority: PriorityClass) -> Result<(), OsError> {
        Self::set_priority_for_pid(pid, priority)
    }

    // ---- process discovery ----

    /// Lists the task ids of a process from `/proc/{pid}/task`.
    pub fn thread_ids(pid: u32) -> Vec<u32> {
        let mut tids: Vec<u32> = match fs::read_dir(format!("/proc/{pid}/task")) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|entry| entry.file_name().to_string_lossy().parse::<u32>().ok())
                .collect(),
            Err(_) => Vec::new(),
        };
        tids.sort_unstable();
        tids
    }

    /// Returns every live process whose name satisfies `matches`, with its thread ids.
    ///
    /// Linux has no window titles at this layer, so `window_title` is always `None`.
    pub fn find_processes<F>(matches: F) -> Vec<ProcessEntry>
    where
        F: Fn(&str) -> bool,
    {
        let mut results = Vec::new();
        if let Ok(entries) = fs::read_dir("/proc") {
            for entry in entries.flatten() {
                let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                    continue;
                };
                let Some(name) = Self::comm_of(pid) else {
                    continue;
                };
                if matches(&name) {
                    results.push(ProcessEntry {
                        pid,
                        name,
                        window_title: None,
                        thread_ids: Self::thread_ids(pid),
                    });
                }
            }
        }
        results.sort_by_key(|p| p.pid);
        results
    }

    // ---- processor description ----

    pub fn get_cpu_model() -> String {
        fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|line| line.starts_with("model name"))
                    .and_then(|line| line.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "Unknown CPU".to_string())
    }

    /// Number of online logical processors.
    pub fn logical_processor_count() -> usize {
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if n > 0 { n as usize } else { 1 }
    }

    /// Builds one record per physical core from `/sys/devices/system/cpu`.
    ///
    /// Cores are grouped by `thread_siblings_list`. The class byte comes from the hybrid PMU
    /// listing when present, otherwise from `cpu_capacity` (big.LITTLE), otherwise it is 0
    /// for every core.
    pub fn query_processor_topology() -> Result<Vec<ProcessorCoreRecord>, OsError> {
        let cpu_dir = Path::new(SYS_CPU);
        let cpus = Self::numbered_entries(cpu_dir, "cpu")?;
        if cpus.is_empty() {
            return Err(OsError::Unsupported("no cpu entries in sysfs"));
        }

        let performance = Self::read_cpulist(Path::new(SYS_HYBRID_CORE))
            .map(|list| Self::mask_from_list(&list));

        let capacities: Vec<(usize, u32)> = cpus
            .iter()
            .filter_map(|&cpu| {
                let path = cpu_dir.join(format!("cpu{cpu}/cpu_capacity"));
                let raw = fs::read_to_string(path).ok()?;
                Some((cpu, raw.trim().parse::<u32>().ok()?))
            })
            .collect();
        let max_capacity = capacities.iter().map(|&(_, c)| c).max();

        let mut seen: u64 = 0;
        let mut records = Vec::new();
        for &cpu in &cpus {
            if cpu >= u64::BITS as usize || seen & (1u64 << cpu) != 0 {
                continue;
            }
            let siblings = cpu_dir.join(format!("cpu{cpu}/topology/thread_siblings_list"));
            let group_mask = match Self::read_cpulist(&siblings) {
                Some(list) if !list.is_empty() => Self::mask_from_list(&list),
                // offline or missing topology: treat it as a core of its own
                _ => 1u64 << cpu,
            };
            seen |= group_mask;

            let efficiency_class = match (performance, max_capacity) {
                (Some(p_mask), _) => u8::from(p_mask & group_mask != 0),
                (None, Some(max)) => {
                    let capacity = capacities
                        .iter()
                        .find(|&&(c, _)| c == cpu)
                        .map(|&(_, cap)| cap);
                    u8::from(capacity == Some(max))
                }
                (None, None) => 0,
            };

            records.push(ProcessorCoreRecord {
                group_mask,
                efficiency_class,
            });
        }
        Ok(records)
    }

    /// Reads the NUMA layout from `/sys/devices/system/node`.
    pub fn query_numa_nodes() -> Result<Vec<NumaNodeRecord>, OsError> {
        let node_dir = Path::new(SYS_NODE);
        if !node_dir.exists() {
            return Err(OsError::Unsupported("sysfs node directory not found"));
        }

        let mut nodes = Vec::new();
        for node_id in Self::numbered_entries(node_dir, "node")? {
            let dir = node_dir.join(format!("node{node_id}"));
            let processor_mask = Self::read_cpulist(&dir.join("cpulist"))
                .map(|list| Self::mask_from_list(&list))
                .unwrap_or(0);
            let available_memory_bytes = fs::read_to_string(dir.join("meminfo"))
                .map(|content| Self::parse_meminfo_free(&content))
                .unwrap_or(0);
            nodes.push(NumaNodeRecord {
                node_id: node_id as u32,
                processor_mask,
                available_memory_bytes,
            });
        }
        Ok(nodes)
    }

    /// Extracts `MemFree` in bytes from a per-node meminfo file.
    fn parse_meminfo_free(s: &str) -> u64 {
        // Lines look like "Node 0 MemFree:  123456 kB"
        s.lines()
            .find(|line| line.contains("MemFree:"))
            .and_then(|line| {
                let mut parts = line.split_whitespace().skip_while(|p| *p != "MemFree:");
                parts.next();
                let value = parts.next()?.parse::<u64>().ok()?;
                Some(match parts.next() {
                    Some("kB") => value * 1024,
                    _ => value,
                })
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ranges_and_singles() {
        assert_eq!(OS::parse_cpulist("0-3,8,10-11\n"), vec![0, 1, 2, 3, 8, 10, 11]);
        assert!(OS::parse_cpulist("").is_empty());
    }

    #[test]
    fn meminfo_free_is_reported_in_bytes() {
        let meminfo = "Node 0 MemTotal:       32768 kB\nNode 0 MemFree:        2048 kB\n";
        assert_eq!(OS::parse_meminfo_free(meminfo), 2048 * 1024);
    }

    #[test]
    fn empty_mask_is_rejected_before_the_syscall() {
        assert!(matches!(OS::cpuset_from_mask(0), Err(OsError::EmptyMask)));
    }

    #[test]
    fn current_process_is_discoverable() {
        let me = std::process::id();
        assert!(OS::thread_ids(me).contains(&me));
        let found = OS::find_processes(|_| true);
        assert!(found.iter().any(|p| p.pid == me && !p.thread_ids.is_empty()));
    }
}
