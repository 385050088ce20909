use scopeguard::defer;
use tracing::{debug, info, warn};

use crate::pal::{Platform, PlatformFacade};
use crate::{
    AffinityMask, CoreKindTag, CoreKindTags, CpuCapabilities, Error, LogicalProcessorId, Result,
};

/// CPU identification leaf reporting the highest supported basic leaf.
const VENDOR_LEAF: u32 = 0;

/// CPU identification leaf reporting the core type of the current logical processor.
const TOPOLOGY_LEAF: u32 = 0x1A;

/// CPU identification leaf reporting the highest supported extended leaf.
const EXTENDED_MAX_LEAF: u32 = 0x8000_0000;

/// The three extended leaves that together hold the 48-byte processor brand string.
const BRAND_LEAVES: [u32; 3] = [0x8000_0002, 0x8000_0003, 0x8000_0004];

/// Identifies the core type of every logical processor of the current machine.
///
/// The core type is a per-core property that the CPU identification instruction only reports for
/// the processor it executes on. To learn the type of processor `i`, the classifier pins the
/// calling thread to processor `i` before executing the instruction. Probing therefore
/// temporarily changes the affinity of the calling thread, which is restored to what it was
/// before once probing ends, on every exit path.
///
/// Only the processors the calling thread is allowed to run on can be examined. When the process
/// is restricted to a subset of processors, e.g. by a cgroup cpuset or a job object, the others are
/// reported as unexamined.
///
/// Do not probe from multiple threads that expect their affinity to stay put meanwhile.
///
/// # Example
///
/// ```no_run
/// use core_aware_launcher::{CoreClassifier, CoreKind};
///
/// let capabilities = CoreClassifier::new().capabilities()?;
///
/// if capabilities.is_hybrid() {
///     println!("P-cores: {}", capabilities.mask(CoreKind::Performance));
/// }
/// # Ok::<(), core_aware_launcher::Error>(())
/// ```
#[derive(Debug)]
pub struct CoreClassifier {
    pal: PlatformFacade,
    tags: CoreKindTags,
}

impl CoreClassifier {
    /// Creates a classifier that recognizes the named kinds by their default tags.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tags(CoreKindTags::default())
    }

    /// Creates a classifier that recognizes the named kinds by the given tags.
    #[must_use]
    pub fn with_tags(tags: CoreKindTags) -> Self {
        Self {
            pal: PlatformFacade::target(),
            tags,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_platform(pal: PlatformFacade, tags: CoreKindTags) -> Self {
        Self { pal, tags }
    }

    /// Takes a snapshot of the processor capabilities of the current machine.
    ///
    /// If the processor reports core types, this examines every logical processor that the calling
    /// thread is allowed to run on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProbeFailed`][crate::Error::ProbeFailed] if the calling thread could not be
    /// moved onto one of the processors.
    pub fn capabilities(&self) -> Result<CpuCapabilities> {
        let brand = self.brand_string();
        let processor_count = self.pal.logical_processor_count();
        let supports_topology_leaf = self.pal.cpuid(VENDOR_LEAF, 0).eax >= TOPOLOGY_LEAF;

        info!(
            brand = brand.as_str(),
            processor_count,
            supports_topology_leaf,
            "identified processor"
        );

        if !supports_topology_leaf {
            return Ok(CpuCapabilities::without_core_types(brand, processor_count));
        }

        let classification = self.classify(processor_count)?;

        let capabilities = CpuCapabilities::from_partial_classification(
            brand,
            processor_count,
            self.tags,
            classification,
        );

        info!(
            hybrid = capabilities.is_hybrid(),
            unclassified = %capabilities.unclassified_mask(),
            unexamined = %capabilities.unexamined_mask(),
            "classified logical processors"
        );

        Ok(capabilities)
    }

    /// Returns the processors whose core type is `tag`.
    ///
    /// On processors that do not report core types, every processor reads as untagged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProbeFailed`][crate::Error::ProbeFailed] if the calling thread could not be
    /// moved onto one of the processors.
    pub fn probe_mask(&self, tag: CoreKindTag) -> Result<AffinityMask> {
        info!(%tag, "detecting cores by core type");

        let classification = self.classify(self.pal.logical_processor_count())?;

        let mask = (0..)
            .zip(classification)
            .filter(|(_, processor_tag)| *processor_tag == Some(tag))
            .map(|(id, _)| id)
            .collect::<AffinityMask>();

        info!(%tag, %mask, "detected core mask");

        Ok(mask)
    }

    /// Probes the core type of each logical processor, in one serial pass on the calling thread.
    ///
    /// Processors the calling thread is not allowed to run on are left out as `None`.
    fn classify(&self, processor_count: u32) -> Result<Vec<Option<CoreKindTag>>> {
        let probed_count = processor_count.min(AffinityMask::WIDTH);

        if probed_count < processor_count {
            warn!(
                processor_count,
                probed_count,
                "only the processors that fit into an affinity mask are probed"
            );
        }

        let full = AffinityMask::all(probed_count)?;

        let original = match self.pal.current_thread_affinity() {
            Ok(bits) => AffinityMask::from_bits(bits),
            Err(error) => {
                warn!(%error, "failed to read thread affinity, assuming every processor is allowed");
                full
            }
        };

        let allowed = original & full;

        if allowed != full {
            info!(
                %allowed,
                skipped = %allowed.complement_within(full),
                "thread affinity is restricted, other processors are left unexamined"
            );
        }

        // Whatever happens below, the thread must not stay pinned to the last probed processor.
        defer! {
            if let Err(error) = self.pal.set_current_thread_affinity(original.bits()) {
                warn!(%error, mask = %original, "failed to restore thread affinity after probing");
            }
        }

        (0..probed_count)
            .map(|processor| {
                if allowed.contains(processor) {
                    self.probe(processor).map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect()
    }

    fn probe(&self, processor: LogicalProcessorId) -> Result<CoreKindTag> {
        let mask = AffinityMask::single(processor)?;

        self.pal
            .set_current_thread_affinity(mask.bits())
            .map_err(|source| Error::ProbeFailed { processor, source })?;

        // The new affinity only takes effect once the thread is next scheduled.
        self.pal.yield_current_thread();

        let tag = core_kind_tag(self.pal.cpuid(TOPOLOGY_LEAF, 0).eax);

        debug!(processor, %tag, "probed logical processor");

        Ok(tag)
    }

    fn brand_string(&self) -> String {
        if self.pal.cpuid(EXTENDED_MAX_LEAF, 0).eax < BRAND_LEAVES[2] {
            return String::new();
        }

        let bytes = BRAND_LEAVES
            .iter()
            .flat_map(|leaf| {
                let registers = self.pal.cpuid(*leaf, 0);

                [registers.eax, registers.ebx, registers.ecx, registers.edx]
            })
            .flat_map(u32::to_le_bytes)
            .take_while(|byte| *byte != 0)
            .collect::<Vec<_>>();

        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

impl Default for CoreClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The core type occupies the top byte of EAX of the topology leaf.
fn core_kind_tag(eax: u32) -> CoreKindTag {
    CoreKindTag::new(eax.to_be_bytes()[0])
}
