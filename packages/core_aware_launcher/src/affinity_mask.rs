use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::{Error, LogicalProcessorId, Result};

/// A set of logical processors, one bit per processor.
///
/// Bit `i` is set if and only if logical processor `i` is included. The width matches the machine
/// word, which is also the width of the affinity masks accepted by the operating system.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct AffinityMask(usize);

impl AffinityMask {
    /// The number of logical processors a mask can describe.
    pub const WIDTH: u32 = usize::BITS;

    /// A mask with no processors in it.
    pub const EMPTY: Self = Self(0);

    /// Wraps raw mask bits.
    #[must_use]
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    /// The raw mask bits, in the form expected by the operating system.
    #[must_use]
    pub const fn bits(self) -> usize {
        self.0
    }

    /// Returns a mask that includes each of the first `processor_count` logical processors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyProcessors`] if the processors do not fit into one mask.
    pub fn all(processor_count: u32) -> Result<Self> {
        match processor_count {
            0 => Ok(Self::EMPTY),
            count if count <= Self::WIDTH => Ok(Self(usize::MAX >> (Self::WIDTH - count))),
            count => Err(Error::TooManyProcessors {
                processor_count: count,
                max_supported: Self::WIDTH,
            }),
        }
    }

    /// Returns a mask with exactly one processor in it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyProcessors`] if the identifier does not fit into a mask.
    pub fn single(id: LogicalProcessorId) -> Result<Self> {
        1_usize
            .checked_shl(id)
            .map(Self)
            .ok_or(Error::TooManyProcessors {
                processor_count: id.saturating_add(1),
                max_supported: Self::WIDTH,
            })
    }

    /// Whether the mask includes no processors at all.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether the given processor is part of the mask.
    #[must_use]
    pub fn contains(self, id: LogicalProcessorId) -> bool {
        1_usize
            .checked_shl(id)
            .is_some_and(|bit| self.0 & bit != 0)
    }

    /// Adds a processor to the mask. Identifiers beyond the mask width are ignored.
    pub fn insert(&mut self, id: LogicalProcessorId) {
        if let Some(bit) = 1_usize.checked_shl(id) {
            self.0 |= bit;
        }
    }

    /// The number of processors in the mask.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Returns every processor that is in `full` but not in `self`.
    #[must_use]
    pub const fn complement_within(self, full: Self) -> Self {
        Self(full.0 & !self.0)
    }

    /// Iterates over the identifiers of the processors in the mask, in ascending order.
    pub fn iter(self) -> impl Iterator<Item = LogicalProcessorId> {
        (0..Self::WIDTH).filter(move |id| self.contains(*id))
    }
}

impl BitAnd for AffinityMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for AffinityMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AffinityMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<LogicalProcessorId> for AffinityMask {
    fn from_iter<I: IntoIterator<Item = LogicalProcessorId>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;

        for id in iter {
            mask.insert(id);
        }

        mask
    }
}

impl fmt::Display for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl fmt::LowerHex for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Binary for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Binary::fmt(&self.0, f)
    }
}
