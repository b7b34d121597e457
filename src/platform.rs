//! The platform seam: everything the engine asks of the operating system.

use os_api::{NumaNodeRecord, OS, OsError, PriorityClass, ProcessEntry, ProcessorCoreRecord};

use crate::affinity::{AffinityMask, NamePattern};

/// Scheduling calls the engine consumes.
///
/// [`SystemApi`] forwards to the real OS; tests substitute scripted implementations.
pub trait SchedulingApi: Send + Sync {
    /// One record per physical core.
    fn query_processor_topology(&self) -> Result<Vec<ProcessorCoreRecord>, OsError>;

    fn logical_processor_count(&self) -> usize;

    fn physical_core_count(&self) -> usize;

    fn cpu_model_name(&self) -> String;

    fn set_process_affinity(&self, pid: u32, mask: AffinityMask) -> Result<(), OsError>;

    fn set_thread_affinity(&self, tid: u32, mask: AffinityMask) -> Result<(), OsError>;

    fn set_priority_class(&self, pid: u32, level: PriorityClass) -> Result<(), OsError>;

    fn enumerate_processes_by_name(
        &self,
        pattern: &NamePattern,
    ) -> Result<Vec<ProcessEntry>, OsError>;

    fn query_numa_nodes(&self) -> Result<Vec<NumaNodeRecord>, OsError>;
}

/// [`SchedulingApi`] backed by [`os_api::OS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemApi;

impl SchedulingApi for SystemApi {
    fn query_processor_topology(&self) -> Result<Vec<ProcessorCoreRecord>, OsError> {
        OS::query_processor_topology()
    }

    fn logical_processor_count(&self) -> usize {
        OS::logical_processor_count()
    }

    fn physical_core_count(&self) -> usize {
        num_cpus::get_physical()
    }

    fn cpu_model_name(&self) -> String {
        OS::get_cpu_model()
    }

    fn set_process_affinity(&self, pid: u32, mask: AffinityMask) -> Result<(), OsError> {
        OS::set_process_affinity_by_pid(pid, mask.bits())
    }

    fn set_thread_affinity(&self, tid: u32, mask: AffinityMask) -> Result<(), OsError> {
        OS::set_thread_affinity_by_tid(tid, mask.bits())
    }

    fn set_priority_class(&self, pid: u32, level: PriorityClass) -> Result<(), OsError> {
        OS::set_process_priority_by_pid(pid, level)
    }

    fn enumerate_processes_by_name(
        &self,
        pattern: &NamePattern,
    ) -> Result<Vec<ProcessEntry>, OsError> {
        Ok(OS::find_processes(|name| pattern.matches(name)))
    }

    fn query_numa_nodes(&self) -> Result<Vec<NumaNodeRecord>, OsError> {
        OS::query_numa_nodes()
    }
}
