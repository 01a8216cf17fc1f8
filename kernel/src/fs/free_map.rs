// SPDX-License-Identifier: MPL-2.0

//! Free sector map.
//!
//! In-memory allocator over the file-system device. The on-disk free-map
//! file (sector 0) exists only as a reserved inode; persistence of the
//! bitmap itself is a collaborator concern, so the map is rebuilt at
//! format time.

use slot_alloc::SlotPool;

use crate::device::Sector;
use crate::prelude::*;

lazy_static::lazy_static! {
    static ref FREE_MAP: SpinLock<Option<SlotPool>> = SpinLock::new(None);
}

/// Initializes the map with `sectors` total sectors, reserving the
/// `reserved` lowest ones (free-map and root-directory inodes).
pub(crate) fn init(sectors: usize, reserved: usize) {
    let mut pool = SlotPool::new(sectors);
    for i in 0..reserved {
        assert_eq!(pool.alloc(), Some(i));
    }
    *FREE_MAP.lock() = Some(pool);
}

pub(crate) fn reset() {
    *FREE_MAP.lock() = None;
}

/// Allocates `count` consecutive sectors, returning the first.
pub fn allocate(count: usize) -> Option<Sector> {
    let mut map = FREE_MAP.lock();
    let pool = map.as_mut().expect("free map not initialized");
    pool.alloc_run(count).map(|r| r.start as Sector)
}

/// Releases `count` consecutive sectors starting at `first`.
pub fn release(first: Sector, count: usize) {
    let mut map = FREE_MAP.lock();
    let pool = map.as_mut().expect("free map not initialized");
    pool.free_run(first as usize..first as usize + count);
}

/// Number of currently allocated sectors; test hook.
pub fn allocated_sectors() -> usize {
    FREE_MAP
        .lock()
        .as_ref()
        .map(|p| p.allocated())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_then_allocates_densely() {
        init(8, 2);
        assert_eq!(allocated_sectors(), 2);
        assert_eq!(allocate(1), Some(2));
        assert_eq!(allocate(2), Some(3));
        release(3, 2);
        assert_eq!(allocate(1), Some(3));
        // Only sectors 4..8 remain free; a run of 5 cannot fit.
        assert_eq!(allocate(5), None);
        assert_eq!(allocate(4), Some(4));
        reset();
        assert_eq!(allocated_sectors(), 0);
    }
}
