use std::collections::BTreeSet;
use std::env::consts::ARCH;
use std::fmt;

use crate::{AffinityMask, CoreKind, CoreKindTag, CoreKindTags, Result};

/// What the current machine can tell us about its processors, captured once per run.
///
/// Obtain a snapshot of the real machine via [`CoreClassifier::capabilities()`][1]. Snapshots of
/// simulated machines can be built with [`from_classification()`][Self::from_classification] and
/// [`without_core_types()`][Self::without_core_types], which is how selection logic is exercised
/// without hybrid hardware at hand.
///
/// The `Display` implementation renders the topology report shown in query mode.
///
/// [1]: crate::CoreClassifier::capabilities
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CpuCapabilities {
    brand: String,
    processor_count: u32,
    supports_topology_leaf: bool,
    tags: CoreKindTags,

    // Raw tag of each processor, indexed by processor ID. `None` if it was not examined.
    classification: Vec<Option<CoreKindTag>>,

    performance: AffinityMask,
    efficiency: AffinityMask,
    low_power_efficiency: AffinityMask,
    unclassified: AffinityMask,
    unexamined: AffinityMask,
}

impl CpuCapabilities {
    /// Creates a snapshot of a machine that reports core types, from the raw tag of each
    /// logical processor.
    ///
    /// `classification[i]` is the tag reported by logical processor `i`. The table may be shorter
    /// than `processor_count` if not every processor fits into an affinity mask, in which case the
    /// remaining processors count as unexamined rather than unclassified.
    #[must_use]
    pub fn from_classification(
        brand: impl Into<String>,
        processor_count: u32,
        tags: CoreKindTags,
        classification: Vec<CoreKindTag>,
    ) -> Self {
        Self::from_partial_classification(
            brand,
            processor_count,
            tags,
            classification.into_iter().map(Some).collect(),
        )
    }

    /// Like [`from_classification()`][Self::from_classification], for machines where some
    /// processors could not be examined.
    ///
    /// A `None` entry marks a processor whose kind is unknown, typically because the current
    /// process is not allowed to run on it. Such processors are in none of the kind masks and
    /// are not unclassified either.
    #[must_use]
    pub fn from_partial_classification(
        brand: impl Into<String>,
        processor_count: u32,
        tags: CoreKindTags,
        classification: Vec<Option<CoreKindTag>>,
    ) -> Self {
        let mut performance = AffinityMask::EMPTY;
        let mut efficiency = AffinityMask::EMPTY;
        let mut low_power_efficiency = AffinityMask::EMPTY;
        let mut unclassified = AffinityMask::EMPTY;
        let mut unexamined = AffinityMask::EMPTY;

        for id in 0..processor_count {
            let tag = classification.get(id as usize).copied().flatten();

            let mask = match tag.map(|tag| tags.kind_of(tag)) {
                Some(Some(CoreKind::Performance)) => &mut performance,
                Some(Some(CoreKind::Efficiency)) => &mut efficiency,
                Some(Some(CoreKind::LowPowerEfficiency)) => &mut low_power_efficiency,
                Some(None) => &mut unclassified,
                None => &mut unexamined,
            };

            mask.insert(id);
        }

        Self {
            brand: brand.into(),
            processor_count,
            supports_topology_leaf: true,
            tags,
            classification,
            performance,
            efficiency,
            low_power_efficiency,
            unclassified,
            unexamined,
        }
    }

    /// Creates a snapshot of a machine whose processors cannot report their core type.
    #[must_use]
    pub fn without_core_types(brand: impl Into<String>, processor_count: u32) -> Self {
        Self {
            brand: brand.into(),
            processor_count,
            supports_topology_leaf: false,
            tags: CoreKindTags::default(),
            classification: Vec::new(),
            performance: AffinityMask::EMPTY,
            efficiency: AffinityMask::EMPTY,
            low_power_efficiency: AffinityMask::EMPTY,
            unclassified: AffinityMask::EMPTY,
            unexamined: AffinityMask::EMPTY,
        }
    }

    /// The processor brand string, empty if the processor does not report one.
    #[must_use]
    pub fn brand(&self) -> &str {
        &self.brand
    }

    /// The number of logical processors reported by the operating system.
    #[must_use]
    pub fn processor_count(&self) -> u32 {
        self.processor_count
    }

    /// Whether the processor offers the CPU identification leaf that reports core types.
    #[must_use]
    pub fn supports_topology_leaf(&self) -> bool {
        self.supports_topology_leaf
    }

    /// Whether the processor is a hybrid design, i.e. at least one processor was identified as a
    /// performance core.
    #[must_use]
    pub fn is_hybrid(&self) -> bool {
        self.supports_topology_leaf && !self.performance.is_empty()
    }

    /// The processors identified as the given kind. Empty if core types cannot be detected.
    #[must_use]
    pub fn mask(&self, kind: CoreKind) -> AffinityMask {
        match kind {
            CoreKind::Performance => self.performance,
            CoreKind::Efficiency => self.efficiency,
            CoreKind::LowPowerEfficiency => self.low_power_efficiency,
        }
    }

    /// The processors that reported a tag not matching any named kind.
    #[must_use]
    pub fn unclassified_mask(&self) -> AffinityMask {
        self.unclassified
    }

    /// The processors whose kind is unknown because they could not be examined, e.g. because the
    /// current process is restricted to other processors.
    #[must_use]
    pub fn unexamined_mask(&self) -> AffinityMask {
        self.unexamined
    }

    /// Every logical processor of the machine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyProcessors`][crate::Error::TooManyProcessors] if the machine has
    /// more processors than fit into an affinity mask.
    pub fn all_cores_mask(&self) -> Result<AffinityMask> {
        AffinityMask::all(self.processor_count)
    }

    /// The tag values that were used to recognize the named kinds.
    #[must_use]
    pub fn core_kind_tags(&self) -> &CoreKindTags {
        &self.tags
    }

    /// The raw core type tag of each logical processor, indexed by processor ID, or `None` for
    /// processors that could not be examined.
    ///
    /// Empty if core types cannot be detected.
    #[must_use]
    pub fn classification(&self) -> &[Option<CoreKindTag>] {
        &self.classification
    }

    fn architecture_name() -> &'static str {
        match ARCH {
            "x86_64" => "x64 (AMD or Intel)",
            "x86" => "x86",
            "aarch64" => "ARM64",
            _ => "Other",
        }
    }
}

fn write_mask_block(f: &mut fmt::Formatter<'_>, title: &str, mask: AffinityMask) -> fmt::Result {
    writeln!(f)?;
    writeln!(f, "{title}:")?;
    writeln!(f, "Mask: {mask}")?;
    writeln!(f, "Threads: {}", cpulist::emit(mask.iter()))
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

impl fmt::Display for CpuCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let brand = if self.brand.is_empty() {
            "Unknown"
        } else {
            &self.brand
        };

        writeln!(f, "System CPU Information:")?;
        writeln!(f, "Processor: {brand}")?;
        writeln!(f, "Number of processors: {}", self.processor_count)?;
        writeln!(f, "Processor architecture: {}", Self::architecture_name())?;
        writeln!(f, "Hybrid Architecture: {}", yes_no(self.is_hybrid()))?;
        writeln!(
            f,
            "Supports Core Type Detection: {}",
            yes_no(self.supports_topology_leaf)
        )?;

        if !self.is_hybrid() {
            let all = AffinityMask::all(self.processor_count.min(AffinityMask::WIDTH))
                .map_err(|_| fmt::Error)?;

            return write_mask_block(f, "All Cores", all);
        }

        for kind in CoreKind::ALL {
            write_mask_block(f, kind.display_name(), self.mask(kind))?;
        }

        if !self.unclassified.is_empty() {
            write_mask_block(f, "Unclassified Cores", self.unclassified)?;

            let unknown_tags = self
                .unclassified
                .iter()
                .filter_map(|id| self.classification.get(id as usize).copied().flatten())
                .collect::<BTreeSet<_>>();

            let unknown_tags = unknown_tags
                .into_iter()
                .map(|tag| tag.to_string())
                .collect::<Vec<_>>()
                .join(", ");

            writeln!(f, "Tags: {unknown_tags}")?;
        }

        if !self.unexamined.is_empty() {
            write_mask_block(f, "Unexamined Cores", self.unexamined)?;
        }

        Ok(())
    }
}
