/// One physical core as reported by the processor relationship query.
///
/// `group_mask` holds every logical processor sharing the core, lowest index first when
/// iterated. `efficiency_class` is the raw class byte: larger means faster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorCoreRecord {
    pub group_mask: u64,
    pub efficiency_class: u8,
}

/// One NUMA node as reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NumaNodeRecord {
    pub node_id: u32,
    pub processor_mask: u64,
    pub available_memory_bytes: u64,
}

/// A live process matched by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub window_title: Option<String>,
    pub thread_ids: Vec<u32>,
}
