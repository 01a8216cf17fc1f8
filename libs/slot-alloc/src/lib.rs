// SPDX-License-Identifier: MPL-2.0

//! A bitmap-backed allocator for fixed-size slot pools.
//!
//! A `SlotPool` hands out slot indices from `0..capacity`. It backs the
//! kernel's swap table (one slot per on-disk page) and the file-system
//! free map (one slot per sector), both of which need single-slot and
//! contiguous-run allocation with O(capacity) worst-case scans.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

use core::ops::Range;

use bitvec::prelude::BitVec;

/// A pool of equally-sized slots tracked by a bitmap.
///
/// A set bit means the slot is allocated. The pool remembers the lowest
/// free index so that the common allocate-after-free pattern does not
/// rescan the whole map.
#[derive(Clone)]
pub struct SlotPool {
    bitset: BitVec<u8>,
    first_free: usize,
    allocated: usize,
}

impl SlotPool {
    /// Creates a pool with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        let mut bitset = BitVec::with_capacity(capacity);
        bitset.resize(capacity, false);
        Self {
            bitset,
            first_free: 0,
            allocated: 0,
        }
    }

    /// Total number of slots, free or not.
    pub fn capacity(&self) -> usize {
        self.bitset.len()
    }

    /// Number of currently allocated slots.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Whether every slot is allocated.
    pub fn is_full(&self) -> bool {
        self.allocated == self.bitset.len()
    }

    /// Whether `slot` is currently allocated.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of bounds.
    pub fn is_allocated(&self, slot: usize) -> bool {
        self.bitset[slot]
    }

    /// Allocates one slot, returning its index, or `None` if the pool is
    /// exhausted.
    pub fn alloc(&mut self) -> Option<usize> {
        if self.first_free >= self.bitset.len() {
            return None;
        }
        let slot = self.first_free;
        self.bitset.set(slot, true);
        self.allocated += 1;
        self.first_free = self.next_free_from(slot + 1);
        Some(slot)
    }

    /// Allocates `count` contiguous slots and returns the range, or `None`
    /// if no run of that length exists. A `count` of zero never succeeds.
    pub fn alloc_run(&mut self, count: usize) -> Option<Range<usize>> {
        if count == 0 {
            return None;
        }

        let mut run_start = self.first_free;
        while run_start + count <= self.bitset.len() {
            match (run_start..run_start + count).find(|&i| self.bitset[i]) {
                // The run is broken at `taken`; resume past it.
                Some(taken) => run_start = self.next_free_from(taken + 1),
                None => {
                    for slot in run_start..run_start + count {
                        self.bitset.set(slot, true);
                    }
                    self.allocated += count;
                    if run_start == self.first_free {
                        self.first_free = self.next_free_from(run_start + count);
                    }
                    return Some(run_start..run_start + count);
                }
            }
        }
        None
    }

    /// Releases one previously allocated slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of bounds or not allocated; a double free
    /// indicates corrupted bookkeeping in the caller.
    pub fn free(&mut self, slot: usize) {
        assert!(self.bitset[slot], "freeing an unallocated slot {}", slot);
        self.bitset.set(slot, false);
        self.allocated -= 1;
        if slot < self.first_free {
            self.first_free = slot;
        }
    }

    /// Releases a contiguous run of previously allocated slots.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`SlotPool::free`].
    pub fn free_run(&mut self, range: Range<usize>) {
        for slot in range {
            self.free(slot);
        }
    }

    fn next_free_from(&self, start: usize) -> usize {
        (start..self.bitset.len())
            .find(|&i| !self.bitset[i])
            .unwrap_or(self.bitset.len())
    }
}

impl core::fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlotPool")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated)
            .field("first_free", &self.first_free)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_dense_from_zero() {
        let mut pool = SlotPool::new(4);
        assert_eq!(pool.alloc(), Some(0));
        assert_eq!(pool.alloc(), Some(1));
        assert_eq!(pool.alloc(), Some(2));
        assert_eq!(pool.alloc(), Some(3));
        assert!(pool.is_full());
        assert_eq!(pool.alloc(), None);
    }

    #[test]
    fn free_reopens_lowest_slot() {
        let mut pool = SlotPool::new(4);
        for _ in 0..4 {
            pool.alloc();
        }
        pool.free(1);
        pool.free(3);
        assert_eq!(pool.alloc(), Some(1));
        assert_eq!(pool.alloc(), Some(3));
    }

    #[test]
    fn run_skips_broken_stretches() {
        let mut pool = SlotPool::new(16);
        let first = pool.alloc_run(4).unwrap();
        assert_eq!(first, 0..4);
        pool.free(2);
        // The hole at 2 is too small for a run of 3.
        assert_eq!(pool.alloc_run(3), Some(4..7));
        assert_eq!(pool.alloc(), Some(2));
    }

    #[test]
    fn run_of_zero_fails() {
        let mut pool = SlotPool::new(8);
        assert_eq!(pool.alloc_run(0), None);
    }

    #[test]
    fn run_never_exceeds_capacity() {
        let mut pool = SlotPool::new(8);
        assert_eq!(pool.alloc_run(9), None);
        assert_eq!(pool.alloc_run(8), Some(0..8));
        pool.free_run(0..8);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    #[should_panic(expected = "unallocated")]
    fn double_free_panics() {
        let mut pool = SlotPool::new(2);
        pool.alloc();
        pool.free(0);
        pool.free(0);
    }
}
