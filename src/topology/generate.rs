use serde::Deserialize;

use super::{CoreDescriptor, CoreType};

/// Physical cores per sub-complex inside a die, and per E-core cluster on hybrid parts.
const CORES_PER_CLUSTER: usize = 4;

/// Shape of a synthesized core list.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    /// SMT performance cores first, then single-thread efficiency cores.
    Hybrid { performance: usize, efficiency: usize },
    /// Physical cores split evenly over `dies`; the first `cache_variant_cores` physical cores
    /// of die 0 carry the extra cache.
    Dies { dies: usize, cache_variant_cores: usize },
    /// All cores alike, SMT-duplicated when the counts allow it.
    Uniform,
}

/// Die count guessed from the physical core count when no table entry says otherwise.
pub fn default_die_count(physical: usize) -> usize {
    match physical {
        n if n >= 32 => 4,
        n if n >= 24 => 3,
        n if n >= 16 => 2,
        _ => 1,
    }
}

/// Splits the hybrid equation `2P + E = logical`, `P + E = physical`.
///
/// Returns `(performance, efficiency)` only when both are non-negative and consistent.
pub fn solve_hybrid(physical: usize, logical: usize) -> Option<(usize, usize)> {
    let performance = logical.checked_sub(physical)?;
    if performance > physical {
        return None;
    }
    let efficiency = physical - performance;
    (2 * performance + efficiency == logical).then_some((performance, efficiency))
}

/// `(die_id, position within die)` for a physical core when `physical` cores are split
/// evenly over `dies`.
pub(super) fn die_slot(physical_id: usize, physical: usize, dies: usize) -> (usize, usize) {
    let dies = dies.clamp(1, physical.max(1));
    let die_id = physical_id * dies / physical.max(1);
    let die_start = (die_id * physical).div_ceil(dies);
    (die_id, physical_id - die_start)
}

/// Sub-complex id of a physical core at `position` within its die.
pub(super) fn sub_complex_of(position: usize) -> usize {
    position / CORES_PER_CLUSTER
}

/// `(physical, threads_per_core)` that exactly covers `logical`.
pub(super) fn uniform_split(physical: usize, logical: usize) -> (usize, usize) {
    if physical > 0 && logical >= physical && logical % physical == 0 {
        (physical, logical / physical)
    } else {
        (logical, 1)
    }
}

impl Layout {
    /// Layout for a die-partitioned part without a table entry.
    pub fn default_dies(physical: usize, cache_augmented: bool) -> Self {
        let dies = default_die_count(physical);
        let cache_variant_cores = if cache_augmented { physical / dies } else { 0 };
        Layout::Dies {
            dies,
            cache_variant_cores,
        }
    }

    /// Builds the ordered core list. Sibling threads of one physical core get adjacent
    /// logical indices.
    pub fn generate(&self, physical: usize, logical: usize) -> Vec<CoreDescriptor> {
        match *self {
            Layout::Hybrid {
                performance,
                efficiency,
            } => Self::hybrid(performance, efficiency),
            Layout::Dies {
                dies,
                cache_variant_cores,
            } => {
                let (physical, threads) = uniform_split(physical, logical);
                Self::dies(physical, threads, dies, cache_variant_cores)
            }
            Layout::Uniform => {
                let (physical, threads) = uniform_split(physical, logical);
                Self::dies(physical, threads, 1, 0)
                    .into_iter()
                    .map(|mut core| {
                        core.sub_complex_id = 0;
                        core
                    })
                    .collect()
            }
        }
    }

    fn hybrid(performance: usize, efficiency: usize) -> Vec<CoreDescriptor> {
        let mut cores = Vec::with_capacity(2 * performance + efficiency);
        for physical_id in 0..performance {
            for thread in 0..2 {
                cores.push(CoreDescriptor {
                    index: cores.len(),
                    physical_id,
                    core_type: CoreType::Performance,
                    die_id: 0,
                    sub_complex_id: 0,
                    is_secondary_thread: thread > 0,
                    selected: false,
                });
            }
        }
        for e in 0..efficiency {
            cores.push(CoreDescriptor {
                index: cores.len(),
                physical_id: performance + e,
                core_type: CoreType::Efficiency,
                die_id: 0,
                sub_complex_id: 1 + sub_complex_of(e),
                is_secondary_thread: false,
                selected: false,
            });
        }
        cores
    }

    fn dies(
        physical: usize,
        threads: usize,
        dies: usize,
        cache_variant_cores: usize,
    ) -> Vec<CoreDescriptor> {
        let mut cores = Vec::with_capacity(physical * threads);
        for physical_id in 0..physical {
            let (die_id, position) = die_slot(physical_id, physical, dies);
            let core_type = if die_id == 0 && position < cache_variant_cores {
                CoreType::CacheVariant
            } else {
                CoreType::Standard
            };
            for thread in 0..threads {
                cores.push(CoreDescriptor {
                    index: cores.len(),
                    physical_id,
                    core_type,
                    die_id,
                    sub_complex_id: sub_complex_of(position),
                    is_secondary_thread: thread > 0,
                    selected: false,
                });
            }
        }
        cores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_splits_twenty_physical_twenty_eight_logical() {
        assert_eq!(solve_hybrid(20, 28), Some((8, 12)));
    }

    #[test]
    fn solver_rejects_impossible_counts() {
        // fewer logical than physical
        assert_eq!(solve_hybrid(8, 4), None);
        // more than two threads per core
        assert_eq!(solve_hybrid(4, 16), None);
    }

    #[test]
    fn hybrid_layout_honours_the_thread_equation() {
        let cores = Layout::Hybrid {
            performance: 6,
            efficiency: 8,
        }
        .generate(0, 0);
        let p = cores.iter().filter(|c| c.core_type == CoreType::Performance).count();
        let e = cores.iter().filter(|c| c.core_type == CoreType::Efficiency).count();
        assert_eq!(p, 12);
        assert_eq!(e, 8);
        assert_eq!(cores.len(), 2 * 6 + 8);
        assert!(cores[1].is_secondary_thread);
        assert_eq!(cores[1].physical_id, cores[0].physical_id);
        // E-cores are clustered in fours
        assert_eq!(cores[12].sub_complex_id, 1);
        assert_eq!(cores[16].sub_complex_id, 2);
    }

    #[test]
    fn dies_partition_evenly_and_mark_the_cache_die() {
        let cores = Layout::Dies {
            dies: 2,
            cache_variant_cores: 8,
        }
        .generate(16, 32);
        assert_eq!(cores.len(), 32);

        let first_die: Vec<_> = cores.iter().filter(|c| c.die_id == 0).collect();
        assert_eq!(first_die.len(), 16);
        assert!(first_die.iter().all(|c| c.core_type == CoreType::CacheVariant));
        assert!(
            cores
                .iter()
                .filter(|c| c.die_id == 1)
                .all(|c| c.core_type == CoreType::Standard)
        );
        // four physical cores per sub-complex
        assert_eq!(cores[0].sub_complex_id, 0);
        assert_eq!(cores[8].sub_complex_id, 1);
        assert_eq!(cores[16].sub_complex_id, 0);
    }

    #[test]
    fn default_die_count_follows_core_count() {
        assert_eq!(default_die_count(64), 4);
        assert_eq!(default_die_count(24), 3);
        assert_eq!(default_die_count(16), 2);
        assert_eq!(default_die_count(8), 1);
    }

    #[test]
    fn uniform_layout_always_covers_the_logical_count() {
        assert_eq!(Layout::Uniform.generate(8, 16).len(), 16);
        // 12 does not divide by 5: one thread per logical processor
        let odd = Layout::Uniform.generate(5, 12);
        assert_eq!(odd.len(), 12);
        assert!(odd.iter().all(|c| !c.is_secondary_thread));
    }
}
