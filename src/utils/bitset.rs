//! A fixed-capacity bit vector.
//!
//! Liveness sets, loop bodies and reference bitmaps are all sets of small
//! dense integers (instruction ids, block ids, virtual register numbers), so a
//! word-packed bit vector is the representation used throughout the compiler.
//!
//! # Example
//!
//! ```rust
//! use methodc::utils::BitSet;
//!
//! let mut live = BitSet::new(100);
//! live.insert(3);
//! live.insert(64);
//!
//! assert!(live.contains(64));
//! assert_eq!(live.iter().collect::<Vec<_>>(), vec![3, 64]);
//! ```

use std::fmt;

/// A bit vector over the indices `0..len`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates an empty set able to hold indices below `capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Returns the capacity of this set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no index is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Adds `index` to the set, returning `true` if it was not present before.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index {index} out of bounds ({})", self.len);
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    /// Removes `index` from the set.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) {
        assert!(index < self.len, "index {index} out of bounds ({})", self.len);
        self.words[index / 64] &= !(1u64 << (index % 64));
    }

    /// Returns `true` if `index` is in the set. Out-of-range indices are never members.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Returns the number of members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// In-place union. Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        debug_assert_eq!(self.len, other.len);
        let mut changed = false;
        for (lhs, rhs) in self.words.iter_mut().zip(&other.words) {
            let merged = *lhs | rhs;
            changed |= merged != *lhs;
            *lhs = merged;
        }
        changed
    }

    /// In-place intersection. Returns `true` if `self` changed.
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        debug_assert_eq!(self.len, other.len);
        let mut changed = false;
        for (lhs, rhs) in self.words.iter_mut().zip(&other.words) {
            let merged = *lhs & rhs;
            changed |= merged != *lhs;
            *lhs = merged;
        }
        changed
    }

    /// In-place difference (`self - other`). Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        debug_assert_eq!(self.len, other.len);
        let mut changed = false;
        for (lhs, rhs) in self.words.iter_mut().zip(&other.words) {
            let merged = *lhs & !rhs;
            changed |= merged != *lhs;
            *lhs = merged;
        }
        changed
    }

    /// Iterates over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(word_index * 64 + bit)
            })
        })
    }

    /// Packs the first `len` bits into little-endian bytes, bit `i` at byte `i / 8`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.len.div_ceil(8)];
        for index in self.iter() {
            bytes[index / 8] |= 1 << (index % 8);
        }
        bytes
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
