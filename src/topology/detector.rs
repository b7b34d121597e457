use os_api::ProcessorCoreRecord;
use tracing::{info, warn};

use super::generate::{die_slot, sub_complex_of, uniform_split};
use super::known_models::{lookup_model, normalize_model_name};
use super::{CoreDescriptor, CoreType, CpuTopology, DetectionPath, Layout, Vendor, solve_hybrid};
use crate::affinity::AffinityMask;
use crate::error::EngineError;
use crate::platform::SchedulingApi;

/// Raw inputs to detection, gathered from the platform in one go.
#[derive(Debug)]
pub struct DetectionSignals {
    pub model_name: String,
    pub logical_count: usize,
    pub physical_count: usize,
    pub relationship: Result<Vec<ProcessorCoreRecord>, EngineError>,
}

/// Gathers [`DetectionSignals`] from a [`SchedulingApi`] and turns them into a topology.
pub struct TopologyDetector<'a> {
    api: &'a dyn SchedulingApi,
}

impl<'a> TopologyDetector<'a> {
    pub fn new(api: &'a dyn SchedulingApi) -> Self {
        Self { api }
    }

    pub fn signals(&self) -> DetectionSignals {
        DetectionSignals {
            model_name: self.api.cpu_model_name(),
            logical_count: self.api.logical_processor_count(),
            physical_count: self.api.physical_core_count(),
            relationship: self
                .api
                .query_processor_topology()
                .map_err(|e| EngineError::DetectionUnavailable(e.to_string())),
        }
    }

    pub fn detect(&self) -> CpuTopology {
        detect_topology(&self.signals())
    }
}

fn is_cache_augmented(model: &str) -> bool {
    normalize_model_name(model).contains("x3d")
}

/// Builds the topology from the signals.
///
/// The result always has exactly `logical_count` cores indexed `0..logical_count`, whichever
/// branch produced it.
pub fn detect_topology(signals: &DetectionSignals) -> CpuTopology {
    let vendor = Vendor::from_model_name(&signals.model_name);
    let logical = signals.logical_count.max(1);

    let (cores, path) = match &signals.relationship {
        Ok(records) if !records.is_empty() => {
            (from_records(records, vendor, signals), DetectionPath::Relationship)
        }
        Ok(_) => {
            let err = EngineError::DetectionUnavailable("no processor records returned".into());
            warn!(%err, "falling back to model heuristics");
            heuristic(signals, vendor)
        }
        Err(err) => {
            warn!(%err, "falling back to model heuristics");
            heuristic(signals, vendor)
        }
    };

    let (cores, path) = if is_consistent(&cores, logical) {
        (cores, path)
    } else {
        let err = EngineError::ClassificationMismatch {
            generated: cores.len(),
            reported: logical,
        };
        warn!(%err, ?path, "discarding generated topology");
        let (cores, path) = algebraic(signals, vendor);
        if is_consistent(&cores, logical) {
            (cores, path)
        } else {
            (Layout::Uniform.generate(logical, logical), DetectionPath::Uniform)
        }
    };

    let topology = CpuTopology::from_cores(vendor, signals.model_name.clone(), path, cores);
    info!(
        model = %topology.model,
        path = ?topology.path,
        logical = topology.logical_count,
        physical = topology.physical_count,
        hybrid = topology.is_hybrid,
        cache_variant = topology.has_cache_variant,
        "cpu topology detected"
    );
    topology
}

/// Exactly `logical` cores with indices `0..logical` in order.
fn is_consistent(cores: &[CoreDescriptor], logical: usize) -> bool {
    cores.len() == logical && cores.iter().enumerate().all(|(i, c)| c.index == i)
}

fn heuristic(signals: &DetectionSignals, vendor: Vendor) -> (Vec<CoreDescriptor>, DetectionPath) {
    match lookup_model(&signals.model_name, signals.logical_count) {
        Some(entry) => {
            info!(entry = %entry.name, "matched known cpu model");
            (
                entry
                    .layout
                    .generate(signals.physical_count, signals.logical_count),
                DetectionPath::KnownModel,
            )
        }
        None => algebraic(signals, vendor),
    }
}

/// Equation-based fallback, then uniform generation.
///
/// Die-partitioned vendors never run the hybrid equation: an SMT part would solve to all
/// performance cores and lose its die grouping.
fn algebraic(signals: &DetectionSignals, vendor: Vendor) -> (Vec<CoreDescriptor>, DetectionPath) {
    let physical = signals.physical_count;
    let logical = signals.logical_count.max(1);

    if vendor != Vendor::Amd {
        if let Some((performance, efficiency)) = solve_hybrid(physical, logical) {
            if performance > 0 && efficiency > 0 {
                let layout = Layout::Hybrid {
                    performance,
                    efficiency,
                };
                return (layout.generate(physical, logical), DetectionPath::Algebraic);
            }
        }
    }

    let layout = if vendor == Vendor::Amd {
        let (effective_physical, _) = uniform_split(physical, logical);
        Layout::default_dies(effective_physical, is_cache_augmented(&signals.model_name))
    } else {
        Layout::Uniform
    };
    (layout.generate(physical, logical), DetectionPath::Uniform)
}

/// Cores from relationship records: one record per physical core, the lowest logical index
/// of each record is its primary thread.
fn from_records(
    records: &[ProcessorCoreRecord],
    vendor: Vendor,
    signals: &DetectionSignals,
) -> Vec<CoreDescriptor> {
    let mut ordered: Vec<&ProcessorCoreRecord> =
        records.iter().filter(|r| r.group_mask != 0).collect();
    ordered.sort_by_key(|r| r.group_mask.trailing_zeros());

    let uniform_class = ordered
        .windows(2)
        .all(|pair| pair[0].efficiency_class == pair[1].efficiency_class);
    let physical = ordered.len();

    // Uniform parts still get die grouping: from the table, or sized by core count for AMD.
    let (dies, cache_variant_cores) = if uniform_class {
        match lookup_model(&signals.model_name, signals.logical_count).map(|m| m.layout) {
            Some(Layout::Dies {
                dies,
                cache_variant_cores,
            }) => (dies, cache_variant_cores),
            _ if vendor == Vendor::Amd => {
                match Layout::default_dies(physical, is_cache_augmented(&signals.model_name)) {
                    Layout::Dies {
                        dies,
                        cache_variant_cores,
                    } => (dies, cache_variant_cores),
                    _ => (1, 0),
                }
            }
            _ => (1, 0),
        }
    } else {
        (1, 0)
    };

    let mut claimed = AffinityMask::EMPTY;
    let mut efficiency_seen = 0usize;
    let mut cores = Vec::new();

    for (physical_id, record) in ordered.iter().enumerate() {
        let own = AffinityMask::from_bits(record.group_mask).difference(claimed);
        claimed = claimed.union(own);

        let (core_type, die_id, sub_complex_id) = if uniform_class {
            let (die_id, position) = die_slot(physical_id, physical, dies);
            let core_type = if die_id == 0 && position < cache_variant_cores {
                CoreType::CacheVariant
            } else {
                CoreType::Standard
            };
            (core_type, die_id, sub_complex_of(position))
        } else if record.efficiency_class != 0 {
            (CoreType::Performance, 0, 0)
        } else {
            efficiency_seen += 1;
            (CoreType::Efficiency, 0, 1 + sub_complex_of(efficiency_seen - 1))
        };

        for (thread, index) in own.indices().enumerate() {
            cores.push(CoreDescriptor {
                index,
                physical_id,
                core_type,
                die_id,
                sub_complex_id,
                is_secondary_thread: thread > 0,
                selected: false,
            });
        }
    }

    cores.sort_by_key(|c| c.index);
    cores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bits: &[usize], class: u8) -> ProcessorCoreRecord {
        ProcessorCoreRecord {
            group_mask: AffinityMask::from_cores(bits.iter().copied()).bits(),
            efficiency_class: class,
        }
    }

    fn unavailable(model: &str, physical: usize, logical: usize) -> DetectionSignals {
        DetectionSignals {
            model_name: model.into(),
            logical_count: logical,
            physical_count: physical,
            relationship: Err(EngineError::DetectionUnavailable("test".into())),
        }
    }

    #[test]
    fn hybrid_records_classify_by_class_byte() {
        // 2 P-cores with SMT, 4 E-cores
        let mut records = vec![record(&[0, 1], 1), record(&[2, 3], 1)];
        records.extend((4..8).map(|i| record(&[i], 0)));
        let topo = detect_topology(&DetectionSignals {
            model_name: "12th Gen Intel(R) Core(TM) i3-1215U".into(),
            logical_count: 8,
            physical_count: 6,
            relationship: Ok(records),
        });

        assert_eq!(topo.path, DetectionPath::Relationship);
        assert!(topo.is_hybrid);
        assert_eq!(topo.performance_cores(), vec![0, 1, 2, 3]);
        assert_eq!(topo.efficiency_cores(), vec![4, 5, 6, 7]);
        assert!(topo.cores[1].is_secondary_thread);
        assert!(!topo.cores[2].is_secondary_thread);
        assert_eq!(topo.physical_count, 6);
    }

    #[test]
    fn uniform_records_on_a_cache_part_mark_the_first_die() {
        // Linux-style numbering: siblings are 16 apart
        let records: Vec<_> = (0..16).map(|i| record(&[i, i + 16], 0)).collect();
        let topo = detect_topology(&DetectionSignals {
            model_name: "AMD Ryzen 9 7950X3D 16-Core Processor".into(),
            logical_count: 32,
            physical_count: 16,
            relationship: Ok(records),
        });

        assert_eq!(topo.path, DetectionPath::Relationship);
        assert!(!topo.is_hybrid);
        assert!(topo.has_cache_variant);
        assert_eq!(topo.die_count(), 2);
        assert_eq!(topo.cache_variant_cores().len(), 16);
        assert_eq!(topo.cores[16].physical_id, 0);
        assert!(topo.cores[16].is_secondary_thread);
        assert_eq!(topo.cores[8].die_id, 1);
    }

    #[test]
    fn unavailable_query_uses_the_model_table() {
        let topo = detect_topology(&unavailable(
            "13th Gen Intel(R) Core(TM) i9-13900K",
            24,
            32,
        ));
        assert_eq!(topo.path, DetectionPath::KnownModel);
        assert_eq!(topo.performance_cores().len(), 16);
        assert_eq!(topo.efficiency_cores().len(), 16);
    }

    #[test]
    fn empty_record_list_falls_back_like_a_failed_query() {
        let signals = DetectionSignals {
            relationship: Ok(Vec::new()),
            ..unavailable("13th Gen Intel(R) Core(TM) i9-13900K", 24, 32)
        };
        let topo = detect_topology(&signals);
        assert_eq!(topo.path, DetectionPath::KnownModel);
        assert_eq!(topo.cores.len(), 32);
        assert_eq!(topo.performance_cores().len(), 16);
    }

    #[test]
    fn unknown_model_is_solved_algebraically() {
        let topo = detect_topology(&unavailable("Intel(R) Core(TM) Ultra Mystery", 20, 28));
        assert_eq!(topo.path, DetectionPath::Algebraic);
        assert_eq!(topo.performance_cores().len(), 2 * 8);
        assert_eq!(topo.efficiency_cores().len(), 12);
        assert_eq!(topo.physical_count, 20);
    }

    #[test]
    fn table_entry_contradicting_the_os_is_discarded() {
        // i9-13900K entry says 32 threads; the OS reports 28
        let topo = detect_topology(&unavailable(
            "13th Gen Intel(R) Core(TM) i9-13900K",
            20,
            28,
        ));
        assert_eq!(topo.path, DetectionPath::Algebraic);
        assert_eq!(topo.logical_count, 28);
    }

    #[test]
    fn records_with_gaps_are_rejected() {
        // cpu 3 offline: records cover 0,1,2,4 while the OS counts 4 processors
        let records = vec![record(&[0], 0), record(&[1], 0), record(&[2], 0), record(&[4], 0)];
        let topo = detect_topology(&DetectionSignals {
            model_name: "Generic".into(),
            logical_count: 4,
            physical_count: 4,
            relationship: Ok(records),
        });
        assert_ne!(topo.path, DetectionPath::Relationship);
        assert_eq!(topo.logical_count, 4);
        assert!(topo.cores.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn amd_without_table_entry_gets_default_dies() {
        let topo = detect_topology(&unavailable("AMD Ryzen Something X3D", 16, 32));
        assert_eq!(topo.path, DetectionPath::Uniform);
        assert_eq!(topo.die_count(), 2);
        assert_eq!(topo.cache_variant_cores().len(), 16);
    }

    #[test]
    fn every_branch_matches_the_reported_logical_count() {
        let models = [
            "13th Gen Intel(R) Core(TM) i9-13900K",
            "AMD Ryzen 9 7950X3D 16-Core Processor",
            "Intel(R) Core(TM) i5-12400F",
            "Unknown",
        ];
        for model in models {
            let counts = [(1, 1), (4, 8), (6, 12), (20, 28), (24, 32), (16, 32), (5, 7)];
            for (physical, logical) in counts {
                let topo = detect_topology(&unavailable(model, physical, logical));
                assert_eq!(topo.cores.len(), logical, "{model} {physical}/{logical}");

                if topo.is_hybrid {
                    let p = topo.performance_cores().len() / 2;
                    let e = topo.efficiency_cores().len();
                    assert_eq!(2 * p + e, logical);
                } else {
                    assert_eq!(topo.physical_count * topo.threads_per_core(), logical);
                }
            }
        }
    }
}
