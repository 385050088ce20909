use std::fmt;

use serde::Deserialize;

/// Identifies a specific logical processor.
///
/// Values range from zero to one less than the processor count reported by the operating system
/// when the run started. Identifiers are only meaningful for the lifetime of one run, as processors
/// that come and go while the tool is running are not accounted for.
pub type LogicalProcessorId = u32;

/// The raw core type byte reported by the CPU identification instruction for one logical processor.
///
/// This is deliberately not an enumeration: vendors may introduce new core types at any time. The
/// tool recognizes the named kinds via [`CoreKindTags`] and treats every other value as
/// unclassified.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(transparent)]
pub struct CoreKindTag(u8);

impl CoreKindTag {
    /// The value reported when the processor does not identify its core type at all.
    pub const NONE: Self = Self(0);

    /// Wraps a raw core type byte.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// The raw core type byte.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for CoreKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// The named core kinds the tool knows how to select.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "adding a kind requires new tag configuration, which is a breaking change anyway"
)]
pub enum CoreKind {
    /// Cores optimized for single-threaded performance.
    Performance,

    /// Cores optimized for energy efficiency.
    Efficiency,

    /// Efficiency cores placed outside the main compute tile, optimized for idle workloads.
    LowPowerEfficiency,
}

impl CoreKind {
    /// All named kinds, in report order.
    pub const ALL: [Self; 3] = [
        Self::Performance,
        Self::Efficiency,
        Self::LowPowerEfficiency,
    ];

    /// Human-readable plural name, as used in reports.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Performance => "Performance Cores",
            Self::Efficiency => "Efficiency Cores",
            Self::LowPowerEfficiency => "Low Power Efficiency Cores",
        }
    }
}

/// The core type bytes that identify each named [`CoreKind`].
///
/// The defaults match the values observed on current Intel hybrid processors. They are not
/// guaranteed to carry over to other vendors or future generations, so a launch profile may
/// override any of them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct CoreKindTags {
    /// Tag reported by performance cores.
    pub performance: CoreKindTag,

    /// Tag reported by efficiency cores.
    pub efficiency: CoreKindTag,

    /// Tag reported by low-power efficiency cores.
    pub low_power_efficiency: CoreKindTag,
}

impl CoreKindTags {
    /// Returns the tag that identifies the given kind.
    #[must_use]
    pub const fn tag_of(&self, kind: CoreKind) -> CoreKindTag {
        match kind {
            CoreKind::Performance => self.performance,
            CoreKind::Efficiency => self.efficiency,
            CoreKind::LowPowerEfficiency => self.low_power_efficiency,
        }
    }

    /// Returns the named kind that carries the given tag, if any.
    #[must_use]
    pub fn kind_of(&self, tag: CoreKindTag) -> Option<CoreKind> {
        CoreKind::ALL
            .into_iter()
            .find(|kind| self.tag_of(*kind) == tag)
    }
}

impl Default for CoreKindTags {
    fn default() -> Self {
        Self {
            performance: CoreKindTag::new(0x40),
            efficiency: CoreKindTag::new(0x20),
            low_power_efficiency: CoreKindTag::new(0x30),
        }
    }
}
