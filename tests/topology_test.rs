mod common;

use common::ScriptedApi;
use cpu_affinity_engine::{CoreType, DetectionPath, NumaTopology, TopologyDetector};
use os_api::{NumaNodeRecord, ProcessorCoreRecord};

fn api(model: &str, physical: usize, logical: usize) -> ScriptedApi {
    ScriptedApi {
        model: model.to_string(),
        physical,
        logical,
        ..ScriptedApi::default()
    }
}

#[test]
fn detector_prefers_relationship_records() {
    let mut scripted = api("12th Gen Intel(R) Core(TM) i5-1235U", 10, 12);
    let mut records: Vec<_> = (0..2)
        .map(|p| ProcessorCoreRecord {
            group_mask: 0b11 << (2 * p),
            efficiency_class: 1,
        })
        .collect();
    records.extend((4..12).map(|i| ProcessorCoreRecord {
        group_mask: 1 << i,
        efficiency_class: 0,
    }));
    scripted.core_records = Some(records);

    let topo = TopologyDetector::new(&scripted).detect();
    assert_eq!(topo.path, DetectionPath::Relationship);
    assert_eq!(topo.logical_count, 12);
    assert_eq!(topo.physical_count, 10);
    assert_eq!(topo.performance_cores(), vec![0, 1, 2, 3]);
    assert_eq!(topo.efficiency_cores().len(), 8);
    // E-cores clustered in fours
    assert_eq!(topo.cores[4].sub_complex_id, topo.cores[7].sub_complex_id);
    assert_ne!(topo.cores[7].sub_complex_id, topo.cores[8].sub_complex_id);
}

#[test]
fn detector_falls_back_to_the_equation_without_records() {
    let scripted = api("Intel(R) Core(TM) Ultra 7 Unlisted", 20, 28);
    let topo = TopologyDetector::new(&scripted).detect();

    assert_eq!(topo.path, DetectionPath::Algebraic);
    assert!(topo.is_hybrid);
    assert_eq!(topo.performance_cores().len(), 16);
    assert_eq!(topo.efficiency_cores().len(), 12);
    assert_eq!(topo.cores.len(), 28);
}

#[test]
fn uniform_fallback_honours_smt() {
    let scripted = api("Generic Processor", 8, 16);
    let mut topo = TopologyDetector::new(&scripted).detect();

    assert_eq!(topo.path, DetectionPath::Uniform);
    assert!(topo.cores.iter().all(|c| c.core_type == CoreType::Standard));
    assert_eq!(topo.physical_count * topo.threads_per_core(), topo.logical_count);

    topo.select(topo.primary_threads());
    assert_eq!(topo.selected_mask().bits(), 0x5555);
}

#[test]
fn numa_without_nodes_is_one_implicit_node() {
    let scripted = api("Generic Processor", 4, 8);
    let numa = NumaTopology::initialize(&scripted);

    assert_eq!(numa.nodes().len(), 1);
    assert_eq!(numa.nodes()[0].cores, (0..8).collect::<Vec<_>>());
    assert!(!numa.is_cross_node_selection(&[0, 7]));
    assert_eq!(numa.suggest_grouping().unwrap().remaining_nodes, Vec::<u32>::new());
}

#[test]
fn numa_nodes_from_the_platform() {
    let mut scripted = api("Generic Processor", 16, 32);
    scripted.numa = vec![
        NumaNodeRecord {
            node_id: 0,
            processor_mask: 0x0000_ffff,
            available_memory_bytes: 8 << 30,
        },
        NumaNodeRecord {
            node_id: 1,
            processor_mask: 0xffff_0000,
            available_memory_bytes: 8 << 30,
        },
    ];
    let numa = NumaTopology::initialize(&scripted);

    assert_eq!(numa.node_for_core(20), Some(1));
    assert!(numa.is_cross_node_selection(&[0, 31]));
    assert!(!numa.is_cross_node_selection(&[16, 17, 31]));
    assert_eq!(numa.total_available_memory(), 16 << 30);

    let suggestion = numa.suggest_grouping().unwrap();
    assert_eq!(suggestion.recommended_node, 0);
    assert_eq!(suggestion.remaining_nodes, vec![1]);
}
