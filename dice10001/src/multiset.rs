use crate::u32_sum_all_nibs;
use std::{
    fmt,
    hash::{Hash, Hasher},
    ops,
};

/// A compressed representation of a multiset (a set with potential duplicates
/// of the same item), that can store up to 8 entries with individual counts
/// in the range `0..=15`.
///
/// `MultisetU4x8` is laid out like `0x7654_3210`, where each nibble `X` is the
/// number of items at index `0 <= X < 8` in the multiset.
#[repr(transparent)]
#[derive(Copy, Clone, Eq)]
pub struct MultisetU4x8(u32);

impl MultisetU4x8 {
    /// A new empty set of counts.
    #[inline]
    pub const fn new() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn from_count(idx: u8, count: u8) -> Self {
        Self((count as u32) << (4 * (idx as u32)))
    }

    #[inline]
    pub const fn into_counts(self) -> [u8; 8] {
        [
            self.get_count(0),
            self.get_count(1),
            self.get_count(2),
            self.get_count(3),
            self.get_count(4),
            self.get_count(5),
            self.get_count(6),
            self.get_count(7),
        ]
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self == Self::new()
    }

    #[inline]
    pub fn len(self) -> u8 {
        // the length of a multiset is the sum of the counts of each element.
        // since we represent each elements' count as a nibble packed into a
        // u32, the total length is the sum of all the nibbles.
        u32_sum_all_nibs(self.0) as u8
    }

    #[inline]
    pub const fn get_count(self, idx: u8) -> u8 {
        (self.0 >> (4 * (idx as u32)) & 0x0f) as u8
    }

    pub fn from_iter_flat(iter: impl Iterator<Item = u8>) -> Self {
        iter.map(|idx| Self::from_count(idx, 1))
            .fold(Self::new(), |acc, single| acc + single)
    }

    /// The number of distinct entries with a non-zero count.
    #[inline]
    pub fn num_distinct(self) -> u8 {
        self.into_counts().into_iter().filter(|&count| count > 0).count() as u8
    }

    pub fn into_iter(self) -> impl Iterator<Item = (u8, u8)> {
        self.into_counts()
            .into_iter()
            .enumerate()
            .map(|(idx, count)| (idx as u8, count))
    }
}

impl fmt::Debug for MultisetU4x8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.into_iter().filter(|(_idx, count)| count > &0);
        f.debug_map().entries(entries).finish()
    }
}

impl ops::Add for MultisetU4x8 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl PartialEq for MultisetU4x8 {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.as_u32().eq(&other.as_u32())
    }
}

impl Hash for MultisetU4x8 {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.as_u32())
    }
}
