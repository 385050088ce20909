use tracing::debug;

use crate::{AffinityMask, CoreKind, CpuCapabilities, Error, LogicalProcessorId, Result};

/// Which logical processors a launched process may run on, before any inversion.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "the selection model is closed, new ways to select are breaking changes anyway"
)]
pub enum Selection {
    /// The processors identified as performance cores.
    PerformanceOnly,

    /// The processors identified as efficiency cores.
    EfficiencyOnly,

    /// The processors identified as low-power efficiency cores.
    LowPowerEfficiencyOnly,

    /// Efficiency and low-power efficiency cores together.
    AllEfficiency,

    /// Every logical processor of the machine.
    AllCores,

    /// The listed logical processors. Duplicates are rejected before a list gets here.
    ExplicitList(Vec<LogicalProcessorId>),

    /// Nothing was selected. Resolving this is an error.
    #[default]
    Unset,
}

impl Selection {
    /// The named kinds this selection consists of, if it is a selection by kind.
    #[must_use]
    pub fn kinds(&self) -> Option<&'static [CoreKind]> {
        match self {
            Self::PerformanceOnly => Some(&[CoreKind::Performance]),
            Self::EfficiencyOnly => Some(&[CoreKind::Efficiency]),
            Self::LowPowerEfficiencyOnly => Some(&[CoreKind::LowPowerEfficiency]),
            Self::AllEfficiency => Some(&[CoreKind::Efficiency, CoreKind::LowPowerEfficiency]),
            Self::AllCores | Self::ExplicitList(_) | Self::Unset => None,
        }
    }
}

/// A [`Selection`] plus whether to invert it, i.e. to select every processor except the ones
/// the selection names.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct SelectionRequest {
    /// What to select.
    pub selection: Selection,

    /// Whether the final mask is every processor *not* in the selection.
    pub invert: bool,
}

impl SelectionRequest {
    /// Creates a request for the given selection.
    #[must_use]
    pub fn new(selection: Selection, invert: bool) -> Self {
        Self { selection, invert }
    }
}

/// Turns a [`SelectionRequest`] into the concrete affinity mask for one machine.
///
/// The resolver never falls back to a broader selection: a request that cannot be satisfied
/// exactly on the machine described by the capabilities is an error.
///
/// # Example
///
/// ```
/// use core_aware_launcher::{AffinityResolver, CpuCapabilities, Selection, SelectionRequest};
///
/// let capabilities = CpuCapabilities::without_core_types("Example CPU", 8);
/// let resolver = AffinityResolver::new(&capabilities);
///
/// let cores = Selection::ExplicitList(vec![0, 2, 4]);
///
/// let mask = resolver.resolve(&SelectionRequest::new(cores.clone(), false))?;
/// assert_eq!(mask.bits(), 0b0001_0101);
///
/// let mask = resolver.resolve(&SelectionRequest::new(cores, true))?;
/// assert_eq!(mask.bits(), 0b1110_1010);
/// # Ok::<(), core_aware_launcher::Error>(())
/// ```
#[derive(Clone, Copy, Debug)]
pub struct AffinityResolver<'a> {
    capabilities: &'a CpuCapabilities,
}

impl<'a> AffinityResolver<'a> {
    /// Creates a resolver for the machine described by `capabilities`.
    #[must_use]
    pub fn new(capabilities: &'a CpuCapabilities) -> Self {
        Self { capabilities }
    }

    /// Resolves the request into a non-empty affinity mask.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidSelection`] if nothing was selected.
    /// * [`Error::TopologyUnsupported`] or [`Error::HybridUnsupported`] if a kind was selected on a
    ///   machine that cannot tell kinds apart.
    /// * [`Error::InvalidCoreId`] if a listed processor does not exist.
    /// * [`Error::TooManyProcessors`] if the machine has more processors than fit into a mask.
    /// * [`Error::SelectionEmpty`] if the resulting mask contains no processors.
    pub fn resolve(&self, request: &SelectionRequest) -> Result<AffinityMask> {
        let base_mask = self.base_mask(&request.selection)?;

        let mask = if request.invert {
            self.invert(base_mask)?
        } else {
            base_mask
        };

        debug!(
            selection = ?request.selection,
            invert = request.invert,
            %base_mask,
            %mask,
            "resolved selection"
        );

        if mask.is_empty() {
            return Err(Error::SelectionEmpty {
                base_mask,
                inverted: request.invert,
            });
        }

        Ok(mask)
    }

    /// Returns every processor of the machine that is not in `mask`.
    ///
    /// Inverting twice yields the original mask, as long as it only contains existing processors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyProcessors`] if the machine has more processors than fit into a mask.
    pub fn invert(&self, mask: AffinityMask) -> Result<AffinityMask> {
        Ok(mask.complement_within(self.capabilities.all_cores_mask()?))
    }

    fn base_mask(&self, selection: &Selection) -> Result<AffinityMask> {
        match selection {
            Selection::Unset => Err(Error::InvalidSelection),
            Selection::AllCores => self.capabilities.all_cores_mask(),
            Selection::ExplicitList(ids) => self.explicit_mask(ids),
            Selection::PerformanceOnly
            | Selection::EfficiencyOnly
            | Selection::LowPowerEfficiencyOnly
            | Selection::AllEfficiency => {
                let kinds = selection.kinds().unwrap_or_default();

                kinds.iter().try_fold(AffinityMask::EMPTY, |mask, kind| {
                    Ok(mask | self.kind_mask(*kind)?)
                })
            }
        }
    }

    fn kind_mask(&self, kind: CoreKind) -> Result<AffinityMask> {
        if !self.capabilities.supports_topology_leaf() {
            return Err(Error::TopologyUnsupported { kind });
        }

        if !self.capabilities.is_hybrid() {
            return Err(Error::HybridUnsupported { kind });
        }

        Ok(self.capabilities.mask(kind))
    }

    fn explicit_mask(&self, ids: &[LogicalProcessorId]) -> Result<AffinityMask> {
        let processor_count = self.capabilities.processor_count();

        ids.iter().try_fold(AffinityMask::EMPTY, |mask, id| {
            if *id >= processor_count {
                return Err(Error::InvalidCoreId {
                    id: *id,
                    processor_count,
                });
            }

            Ok(mask | AffinityMask::single(*id)?)
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{CoreKindTag, CoreKindTags};

    assert_impl_all!(SelectionRequest: Send, Sync, Clone);
    assert_impl_all!(AffinityResolver<'static>: Send, Sync, Copy);

    fn hybrid() -> CpuCapabilities {
        let p = CoreKindTag::new(0x40);
        let e = CoreKindTag::new(0x20);
        let lpe = CoreKindTag::new(0x30);

        CpuCapabilities::from_classification(
            "Hybrid",
            8,
            CoreKindTags::default(),
            vec![p, p, p, p, e, e, lpe, lpe],
        )
    }

    fn resolve(caps: &CpuCapabilities, selection: Selection, invert: bool) -> Result<AffinityMask> {
        AffinityResolver::new(caps).resolve(&SelectionRequest::new(selection, invert))
    }

    #[test]
    fn named_kinds_resolve_to_their_masks() {
        let caps = hybrid();

        assert_eq!(
            resolve(&caps, Selection::PerformanceOnly, false).unwrap().bits(),
            0b0000_1111
        );
        assert_eq!(
            resolve(&caps, Selection::EfficiencyOnly, false).unwrap().bits(),
            0b0011_0000
        );
        assert_eq!(
            resolve(&caps, Selection::LowPowerEfficiencyOnly, false)
                .unwrap()
                .bits(),
            0b1100_0000
        );
        assert_eq!(
            resolve(&caps, Selection::AllEfficiency, false).unwrap().bits(),
            0b1111_0000
        );
    }

    #[test]
    fn kind_without_topology_leaf_is_topology_unsupported() {
        let caps = CpuCapabilities::without_core_types("Old", 4);

        let result = resolve(&caps, Selection::EfficiencyOnly, false);

        assert!(matches!(
            result,
            Err(Error::TopologyUnsupported {
                kind: CoreKind::Efficiency
            })
        ));
    }

    #[test]
    fn kind_on_uniform_cpu_is_hybrid_unsupported() {
        let caps = CpuCapabilities::from_classification(
            "Uniform",
            4,
            CoreKindTags::default(),
            vec![CoreKindTag::NONE; 4],
        );

        let result = resolve(&caps, Selection::PerformanceOnly, true);

        assert!(matches!(
            result,
            Err(Error::HybridUnsupported {
                kind: CoreKind::Performance
            })
        ));
    }

    #[test]
    fn absent_kind_on_hybrid_cpu_is_selection_empty() {
        let p = CoreKindTag::new(0x40);
        let e = CoreKindTag::new(0x20);
        let classification = vec![p, p, e, e];
        let caps =
            CpuCapabilities::from_classification("No LP-E", 4, CoreKindTags::default(), classification);

        let result = resolve(&caps, Selection::LowPowerEfficiencyOnly, false);

        assert!(matches!(
            result,
            Err(Error::SelectionEmpty {
                base_mask: AffinityMask::EMPTY,
                inverted: false
            })
        ));
    }

    #[test]
    fn unset_is_invalid_selection() {
        let caps = hybrid();

        assert!(matches!(
            resolve(&caps, Selection::Unset, false),
            Err(Error::InvalidSelection)
        ));
    }

    #[test]
    fn explicit_id_at_processor_count_is_rejected() {
        let caps = hybrid();

        let result = resolve(&caps, Selection::ExplicitList(vec![1, 8]), false);

        assert!(matches!(
            result,
            Err(Error::InvalidCoreId {
                id: 8,
                processor_count: 8
            })
        ));
    }

    #[test]
    fn inverted_all_cores_is_empty() {
        let caps = hybrid();

        let result = resolve(&caps, Selection::AllCores, true);

        assert!(matches!(
            result,
            Err(Error::SelectionEmpty {
                inverted: true,
                ..
            })
        ));
    }

    #[test]
    fn inverted_kind_is_complement() {
        let caps = hybrid();

        assert_eq!(
            resolve(&caps, Selection::AllEfficiency, true).unwrap().bits(),
            0b0000_1111
        );
    }

    #[test]
    fn selection_kinds() {
        assert_eq!(
            Selection::AllEfficiency.kinds(),
            Some(&[CoreKind::Efficiency, CoreKind::LowPowerEfficiency][..])
        );
        assert_eq!(Selection::AllCores.kinds(), None);
        assert_eq!(Selection::ExplicitList(vec![1]).kinds(), None);
        assert_eq!(Selection::default(), Selection::Unset);
    }
}
