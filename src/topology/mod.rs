//! CPU topology model and its detection.
//!
//! A [`CpuTopology`] is built once at startup by [`TopologyDetector`] and is read-only
//! afterwards, apart from the per-core selection flags the user toggles.

mod detector;
mod generate;
mod known_models;

pub use detector::{DetectionSignals, TopologyDetector, detect_topology};
pub use generate::{Layout, solve_hybrid};
pub use known_models::{KnownModel, lookup_model, normalize_model_name};

use serde::{Deserialize, Serialize};

use crate::affinity::AffinityMask;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CoreType {
    Performance,
    Efficiency,
    Standard,
    CacheVariant,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Vendor {
    Intel,
    Amd,
    Unknown,
}

impl Vendor {
    pub fn from_model_name(model: &str) -> Self {
        let lower = model.to_lowercase();
        if lower.contains("intel") || lower.contains("core(tm)") {
            Vendor::Intel
        } else if lower.contains("amd") || lower.contains("ryzen") || lower.contains("epyc") {
            Vendor::Amd
        } else {
            Vendor::Unknown
        }
    }
}

/// Which branch of detection produced the topology.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DetectionPath {
    /// Built from the OS processor relationship records.
    Relationship,
    /// Built from the embedded known-model table.
    KnownModel,
    /// Built from the hybrid core-count equation.
    Algebraic,
    /// Every core treated alike.
    Uniform,
}

/// One logical processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoreDescriptor {
    pub index: usize,
    pub physical_id: usize,
    pub core_type: CoreType,
    pub die_id: usize,
    pub sub_complex_id: usize,
    pub is_secondary_thread: bool,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuTopology {
    pub vendor: Vendor,
    pub model: String,
    pub logical_count: usize,
    pub physical_count: usize,
    pub is_hybrid: bool,
    pub has_cache_variant: bool,
    pub has_smt: bool,
    pub path: DetectionPath,
    pub cores: Vec<CoreDescriptor>,
}

impl CpuTopology {
    /// Derives the summary flags and counts from an ordered core list.
    pub(crate) fn from_cores(
        vendor: Vendor,
        model: String,
        path: DetectionPath,
        cores: Vec<CoreDescriptor>,
    ) -> Self {
        let physical_ids: std::collections::HashSet<usize> =
            cores.iter().map(|c| c.physical_id).collect();
        let has = |t: CoreType| cores.iter().any(|c| c.core_type == t);

        Self {
            vendor,
            model,
            logical_count: cores.len(),
            physical_count: physical_ids.len(),
            is_hybrid: has(CoreType::Performance) && has(CoreType::Efficiency),
            has_cache_variant: has(CoreType::CacheVariant),
            has_smt: cores.iter().any(|c| c.is_secondary_thread),
            path,
            cores,
        }
    }

    fn indices_where<P>(&self, predicate: P) -> Vec<usize>
    where
        P: Fn(&CoreDescriptor) -> bool,
    {
        self.cores
            .iter()
            .filter(|c| predicate(c))
            .map(|c| c.index)
            .collect()
    }

    pub fn performance_cores(&self) -> Vec<usize> {
        self.indices_where(|c| c.core_type == CoreType::Performance)
    }

    pub fn efficiency_cores(&self) -> Vec<usize> {
        self.indices_where(|c| c.core_type == CoreType::Efficiency)
    }

    pub fn cache_variant_cores(&self) -> Vec<usize> {
        self.indices_where(|c| c.core_type == CoreType::CacheVariant)
    }

    /// Logical indices that are the first thread of their physical core.
    pub fn primary_threads(&self) -> Vec<usize> {
        self.indices_where(|c| !c.is_secondary_thread)
    }

    pub fn die_count(&self) -> usize {
        self.cores.iter().map(|c| c.die_id).max().map_or(0, |d| d + 1)
    }

    pub fn cores_of_die(&self, die_id: usize) -> Vec<usize> {
        self.indices_where(|c| c.die_id == die_id)
    }

    /// Number of logical processors per physical core when the design is uniform.
    pub fn threads_per_core(&self) -> usize {
        if self.physical_count == 0 {
            1
        } else {
            (self.logical_count / self.physical_count).max(1)
        }
    }

    /// Mask of the given indices, ignoring anything outside this topology.
    pub fn mask_for<I>(&self, indices: I) -> AffinityMask
    where
        I: IntoIterator<Item = usize>,
    {
        AffinityMask::from_cores(indices).clamp_to(self.logical_count)
    }

    /// Mask with every logical processor set.
    pub fn full_mask(&self) -> AffinityMask {
        AffinityMask::full(self.logical_count)
    }

    /// Marks exactly the given indices as selected; unknown indices are ignored.
    pub fn select<I>(&mut self, indices: I)
    where
        I: IntoIterator<Item = usize>,
    {
        self.clear_selection();
        for index in indices {
            if let Some(core) = self.cores.get_mut(index) {
                core.selected = true;
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.cores.iter_mut().for_each(|c| c.selected = false);
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.indices_where(|c| c.selected)
    }

    pub fn selected_mask(&self) -> AffinityMask {
        self.mask_for(self.selected_indices())
    }
}
