// SPDX-License-Identifier: MPL-2.0

//! Swap partition.
//!
//! A dedicated block device carved into page-sized slots of 8 contiguous
//! sectors, tracked by an in-memory bitmap. The bitmap does not survive a
//! boot; swap contents are meaningless across boots anyway.

use slot_alloc::SlotPool;

use crate::device::{BlockDevice, Sector, SECTOR_SIZE};
use crate::prelude::*;
use crate::vm::PGSIZE;

/// Sectors per swap slot.
pub const SECTORS_PER_PAGE: usize = PGSIZE / SECTOR_SIZE;

/// A page-sized reservation on the swap device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapSlot(u32);

impl SwapSlot {
    fn first_sector(self) -> Sector {
        self.0 * SECTORS_PER_PAGE as Sector
    }
}

struct SwapState {
    pool: SlotPool,
    device: Arc<dyn BlockDevice>,
}

lazy_static::lazy_static! {
    static ref SWAP: SpinLock<Option<SwapState>> = SpinLock::new(None);
}

pub(crate) fn init(device: Arc<dyn BlockDevice>) {
    let slots = device.sector_count() as usize / SECTORS_PER_PAGE;
    *SWAP.lock() = Some(SwapState {
        pool: SlotPool::new(slots),
        device,
    });
}

pub(crate) fn reset() {
    *SWAP.lock() = None;
}

/// Reserves a slot.
///
/// # Panics
///
/// Panics when the swap device is full; there is nowhere left to put an
/// evicted page and the kernel cannot continue.
pub fn alloc() -> SwapSlot {
    let mut swap = SWAP.lock();
    let state = swap.as_mut().expect("swap not initialized");
    let slot = state.pool.alloc().expect("swap partition full");
    SwapSlot(slot as u32)
}

/// Releases a slot.
pub fn free(slot: SwapSlot) {
    let mut swap = SWAP.lock();
    let state = swap.as_mut().expect("swap not initialized");
    state.pool.free(slot.0 as usize);
}

/// Copies a page into `slot`.
pub fn write_page(slot: SwapSlot, data: &[u8; PGSIZE]) {
    let device = SWAP
        .lock()
        .as_ref()
        .expect("swap not initialized")
        .device
        .clone();
    let first = slot.first_sector();
    for i in 0..SECTORS_PER_PAGE {
        let at = i * SECTOR_SIZE;
        let sector: &[u8; SECTOR_SIZE] = data[at..at + SECTOR_SIZE].try_into().unwrap();
        device.write_sector(first + i as Sector, sector);
    }
}

/// Copies a page out of `slot`.
pub fn read_page(slot: SwapSlot, data: &mut [u8; PGSIZE]) {
    let device = SWAP
        .lock()
        .as_ref()
        .expect("swap not initialized")
        .device
        .clone();
    let first = slot.first_sector();
    for i in 0..SECTORS_PER_PAGE {
        let at = i * SECTOR_SIZE;
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sector(first + i as Sector, &mut sector);
        data[at..at + SECTOR_SIZE].copy_from_slice(&sector);
    }
}

/// Allocated slot count; test hook.
pub fn allocated_slots() -> usize {
    SWAP.lock().as_ref().map_or(0, |s| s.pool.allocated())
}
