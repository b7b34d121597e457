use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

/// Highest logical processor a mask can address.
pub const MAX_CORES: usize = 64;

/// Bitset of logical processors, bit `i` is core index `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffinityMask(u64);

impl AffinityMask {
    pub const EMPTY: AffinityMask = AffinityMask(0);

    pub const fn from_bits(bits: u64) -> Self {
        AffinityMask(bits)
    }

    /// Single-bit mask, or empty for an index the mask cannot hold.
    pub fn single(index: usize) -> Self {
        if index < MAX_CORES {
            AffinityMask(1u64 << index)
        } else {
            AffinityMask::EMPTY
        }
    }

    pub fn from_cores<I>(indices: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        indices
            .into_iter()
            .fold(AffinityMask::EMPTY, |acc, i| acc | AffinityMask::single(i))
    }

    /// Mask with the lowest `count` bits set.
    pub fn full(count: usize) -> Self {
        match count {
            0 => AffinityMask::EMPTY,
            n if n >= MAX_CORES => AffinityMask(u64::MAX),
            n => AffinityMask((1u64 << n) - 1),
        }
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, index: usize) -> bool {
        index < MAX_CORES && self.0 & (1u64 << index) != 0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Drops every bit at or above `logical_count`.
    pub fn clamp_to(self, logical_count: usize) -> Self {
        self & AffinityMask::full(logical_count)
    }

    pub fn union(self, other: AffinityMask) -> Self {
        self | other
    }

    pub fn difference(self, other: AffinityMask) -> Self {
        AffinityMask(self.0 & !other.0)
    }

    /// Set bit indices in ascending order.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        (0..MAX_CORES).filter(move |&i| self.contains(i))
    }
}

impl BitOr for AffinityMask {
    type Output = AffinityMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        AffinityMask(self.0 | rhs.0)
    }
}

impl BitAnd for AffinityMask {
    type Output = AffinityMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        AffinityMask(self.0 & rhs.0)
    }
}

impl fmt::Display for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// OR of the single-bit masks of `selected`; the empty selection gives the empty mask.
pub fn compute_mask<I>(selected: I) -> AffinityMask
where
    I: IntoIterator<Item = usize>,
{
    AffinityMask::from_cores(selected)
}
