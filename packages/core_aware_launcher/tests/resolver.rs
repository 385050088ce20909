//! Selection rules, exercised through the public API on simulated machines.

use core_aware_launcher::{
    AffinityMask, AffinityResolver, CoreKind, CoreKindTag, CoreKindTags, CpuCapabilities, Error,
    Selection, SelectionRequest,
};

const P: CoreKindTag = CoreKindTag::new(0x40);
const E: CoreKindTag = CoreKindTag::new(0x20);
const LPE: CoreKindTag = CoreKindTag::new(0x30);

/// 12 logical processors: 4 P-cores with 2 threads each, 2 E-cores, 2 LP E-cores.
fn laptop() -> CpuCapabilities {
    CpuCapabilities::from_classification(
        "Simulated Hybrid",
        12,
        CoreKindTags::default(),
        vec![P, P, P, P, P, P, P, P, E, E, LPE, LPE],
    )
}

fn uniform(processor_count: u32) -> CpuCapabilities {
    CpuCapabilities::without_core_types("Simulated Uniform", processor_count)
}

fn resolve(
    capabilities: &CpuCapabilities,
    selection: Selection,
    invert: bool,
) -> Result<AffinityMask, Error> {
    AffinityResolver::new(capabilities).resolve(&SelectionRequest::new(selection, invert))
}

#[test]
fn kind_masks_partition_probed_processors() {
    let caps = laptop();

    let p = caps.mask(CoreKind::Performance);
    let e = caps.mask(CoreKind::Efficiency);
    let lpe = caps.mask(CoreKind::LowPowerEfficiency);

    assert_eq!(p.bits() & e.bits(), 0);
    assert_eq!(p.bits() & lpe.bits(), 0);
    assert_eq!(e.bits() & lpe.bits(), 0);
    assert_eq!((p | e | lpe).bits(), caps.all_cores_mask().unwrap().bits());
    assert!(caps.unclassified_mask().is_empty());
}

#[test]
fn every_resolved_mask_is_non_empty_and_within_machine() {
    let caps = laptop();
    let all = caps.all_cores_mask().unwrap();

    let selections = [
        Selection::PerformanceOnly,
        Selection::EfficiencyOnly,
        Selection::LowPowerEfficiencyOnly,
        Selection::AllEfficiency,
        Selection::AllCores,
        Selection::ExplicitList(vec![0, 11]),
    ];

    for selection in selections {
        for invert in [false, true] {
            if let Ok(mask) = resolve(&caps, selection.clone(), invert) {
                assert!(!mask.is_empty());
                assert_eq!(mask.bits() & !all.bits(), 0, "{selection:?} {invert}");
            }
        }
    }
}

#[test]
fn inverted_selection_is_complement() {
    let caps = laptop();

    let performance = resolve(&caps, Selection::PerformanceOnly, false).unwrap();
    let not_performance = resolve(&caps, Selection::PerformanceOnly, true).unwrap();

    assert_eq!(
        not_performance,
        resolve(&caps, Selection::AllEfficiency, false).unwrap()
    );
    assert_eq!(performance.bits() & not_performance.bits(), 0);
    assert_eq!(
        (performance | not_performance).bits(),
        caps.all_cores_mask().unwrap().bits()
    );
}

#[test]
fn double_inversion_is_identity() {
    let caps = laptop();
    let resolver = AffinityResolver::new(&caps);
    let mask = AffinityMask::from_bits(0b1010_0000_0101);

    let twice = resolver.invert(resolver.invert(mask).unwrap()).unwrap();

    assert_eq!(twice, mask);
}

#[test]
fn explicit_list_on_uniform_machine() {
    let caps = uniform(4);

    assert_eq!(
        resolve(&caps, Selection::ExplicitList(vec![3, 0]), false)
            .unwrap()
            .bits(),
        0b1001
    );
    assert_eq!(
        resolve(&caps, Selection::ExplicitList(vec![3, 0]), true)
            .unwrap()
            .bits(),
        0b0110
    );
}

#[test]
fn kinds_on_non_hybrid_machine_are_hybrid_unsupported() {
    let caps = CpuCapabilities::from_classification(
        "Simulated Non-Hybrid",
        8,
        CoreKindTags::default(),
        vec![CoreKindTag::NONE; 8],
    );

    for selection in [
        Selection::PerformanceOnly,
        Selection::EfficiencyOnly,
        Selection::LowPowerEfficiencyOnly,
        Selection::AllEfficiency,
    ] {
        for invert in [false, true] {
            assert!(matches!(
                resolve(&caps, selection.clone(), invert),
                Err(Error::HybridUnsupported { .. })
            ));
        }
    }

    resolve(&caps, Selection::AllCores, false).unwrap();
    resolve(&caps, Selection::ExplicitList(vec![1, 5]), false).unwrap();
}

#[test]
fn explicit_list_is_order_independent() {
    let caps = laptop();

    let ascending = resolve(&caps, Selection::ExplicitList(vec![1, 4, 9]), false).unwrap();
    let shuffled = resolve(&caps, Selection::ExplicitList(vec![9, 1, 4]), false).unwrap();

    assert_eq!(ascending, shuffled);
    assert_eq!(ascending.iter().collect::<Vec<_>>(), [1, 4, 9]);
}

#[test]
fn all_cores_has_one_bit_per_processor() {
    for processor_count in [1_u32, 2, 7, 8, 31] {
        let caps = uniform(processor_count);

        let mask = resolve(&caps, Selection::AllCores, false).unwrap();

        assert_eq!(mask.len(), processor_count);
        assert_eq!(mask.bits(), (1_usize << processor_count) - 1);
    }
}

#[test]
fn inverted_performance_on_two_kind_machine() {
    let caps = CpuCapabilities::from_classification(
        "Simulated 4P+4E",
        8,
        CoreKindTags::default(),
        vec![P, P, P, P, E, E, E, E],
    );

    let mask = resolve(&caps, Selection::PerformanceOnly, true).unwrap();

    assert_eq!(mask.bits(), 0b1111_0000);
}

#[test]
fn explicit_id_at_processor_count_is_rejected() {
    let caps = uniform(8);

    assert!(matches!(
        resolve(&caps, Selection::ExplicitList(vec![0, 8]), false),
        Err(Error::InvalidCoreId { id: 8, .. })
    ));
}

#[test]
fn kinds_never_fall_back_on_uniform_machine() {
    let caps = uniform(4);

    for selection in [
        Selection::PerformanceOnly,
        Selection::EfficiencyOnly,
        Selection::LowPowerEfficiencyOnly,
        Selection::AllEfficiency,
    ] {
        assert!(matches!(
            resolve(&caps, selection, false),
            Err(Error::TopologyUnsupported { .. })
        ));
    }
}

#[test]
fn all_cores_of_full_width_machine() {
    let caps = uniform(AffinityMask::WIDTH);

    let mask = resolve(&caps, Selection::AllCores, false).unwrap();

    assert_eq!(mask.bits(), usize::MAX);
    assert_eq!(mask.len(), AffinityMask::WIDTH);
}

#[test]
fn machine_wider_than_mask_is_rejected() {
    let caps = uniform(AffinityMask::WIDTH + 1);

    assert!(matches!(
        resolve(&caps, Selection::AllCores, false),
        Err(Error::TooManyProcessors { .. })
    ));
}

#[test]
fn query_report_lists_each_kind() {
    let report = laptop().to_string();

    assert!(report.contains("Hybrid Architecture: Yes"), "{report}");
    assert!(report.contains("Mask: 0xFF\nThreads: 0-7"), "{report}");
    assert!(report.contains("Threads: 8,9"), "{report}");
    assert!(report.contains("Threads: 10,11"), "{report}");
}
