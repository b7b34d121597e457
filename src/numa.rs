//! NUMA node discovery and latency-oriented core grouping.

use serde::Serialize;
use tracing::{info, warn};

use crate::affinity::AffinityMask;
use crate::platform::SchedulingApi;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumaNode {
    pub node_id: u32,
    pub processor_mask: AffinityMask,
    /// Logical core indices of this node, ascending.
    pub cores: Vec<usize>,
    pub available_memory_bytes: u64,
}

/// Recommended placement for latency-sensitive work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupingSuggestion {
    pub recommended_node: u32,
    pub cores: Vec<usize>,
    /// Nodes left for background work, ascending.
    pub remaining_nodes: Vec<u32>,
}

/// Immutable node-to-core map.
#[derive(Debug, Clone, Serialize)]
pub struct NumaTopology {
    nodes: Vec<NumaNode>,
}

impl NumaTopology {
    /// Queries the platform once. A failed or empty query yields one implicit node covering
    /// every logical processor.
    pub fn initialize(api: &dyn SchedulingApi) -> Self {
        let logical = api.logical_processor_count();
        let records = match api.query_numa_nodes() {
            Ok(records) => records,
            Err(err) => {
                warn!(%err, "numa query failed, assuming a single node");
                Vec::new()
            }
        };

        let topology = if records.is_empty() {
            Self::single_node(logical)
        } else {
            let records = records.into_iter().map(|r| {
                (
                    r.node_id,
                    AffinityMask::from_bits(r.processor_mask),
                    r.available_memory_bytes,
                )
            });
            Self::from_records(records, logical)
        };

        info!(nodes = topology.nodes.len(), "numa topology initialized");
        topology
    }

    fn single_node(logical: usize) -> Self {
        let mask = AffinityMask::full(logical);
        Self {
            nodes: vec![NumaNode {
                node_id: 0,
                processor_mask: mask,
                cores: mask.indices().collect(),
                available_memory_bytes: 0,
            }],
        }
    }

    /// Builds nodes in ascending id order. A core already claimed by an earlier node is not
    /// claimed again; bits beyond `logical` are dropped.
    pub fn from_records<I>(records: I, logical: usize) -> Self
    where
        I: IntoIterator<Item = (u32, AffinityMask, u64)>,
    {
        let mut records: Vec<_> = records.into_iter().collect();
        records.sort_by_key(|&(id, _, _)| id);

        let mut claimed = AffinityMask::EMPTY;
        let nodes = records
            .into_iter()
            .map(|(node_id, mask, available_memory_bytes)| {
                let own = mask.clamp_to(logical).difference(claimed);
                claimed = claimed | own;
                NumaNode {
                    node_id,
                    processor_mask: own,
                    cores: own.indices().collect(),
                    available_memory_bytes,
                }
            })
            .collect();

        Self { nodes }
    }

    pub fn nodes(&self) -> &[NumaNode] {
        &self.nodes
    }

    pub fn node_for_core(&self, index: usize) -> Option<u32> {
        self.nodes
            .iter()
            .find(|n| n.processor_mask.contains(index))
            .map(|n| n.node_id)
    }

    /// True when the indices resolve to two or more nodes. Unknown indices are ignored.
    pub fn is_cross_node_selection(&self, indices: &[usize]) -> bool {
        let mut first = None;
        for node in indices.iter().filter_map(|&i| self.node_for_core(i)) {
            match first {
                None => first = Some(node),
                Some(f) if f != node => return true,
                Some(_) => {}
            }
        }
        false
    }

    /// Node with the most cores for latency-sensitive work, ties going to the lowest id.
    pub fn suggest_grouping(&self) -> Option<GroupingSuggestion> {
        let best = self
            .nodes
            .iter()
            .fold(None::<&NumaNode>, |best, node| match best {
                Some(b) if b.cores.len() >= node.cores.len() => Some(b),
                _ => Some(node),
            })?;

        Some(GroupingSuggestion {
            recommended_node: best.node_id,
            cores: best.cores.clone(),
            remaining_nodes: self
                .nodes
                .iter()
                .map(|n| n.node_id)
                .filter(|&id| id != best.node_id)
                .collect(),
        })
    }

    pub fn total_available_memory(&self) -> u64 {
        self.nodes.iter().map(|n| n.available_memory_bytes).sum()
    }
}
