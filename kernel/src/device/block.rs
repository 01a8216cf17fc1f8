// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

/// Size of a device sector, the granularity of all block I/O.
pub const SECTOR_SIZE: usize = 512;

/// Index of a sector on a block device.
pub type Sector = u32;

/// A synchronous block device.
///
/// The contract is the collaborator one: reads and writes are whole
/// sectors, complete when the call returns, and never fail. Out-of-range
/// sectors are a kernel bug and panic.
pub trait BlockDevice: Send + Sync {
    fn sector_count(&self) -> Sector;

    fn read_sector(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]);

    fn write_sector(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]);
}

/// An in-memory block device.
pub struct MemDisk {
    sectors: SpinLock<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemDisk {
    pub fn new(sector_count: Sector) -> Arc<Self> {
        Arc::new(Self {
            sectors: SpinLock::new(vec![[0u8; SECTOR_SIZE]; sector_count as usize]),
        })
    }

    /// A copy of the whole disk image, for comparing before/after states
    /// in tests.
    pub fn snapshot(&self) -> Vec<u8> {
        let sectors = self.sectors.lock();
        let mut image = Vec::with_capacity(sectors.len() * SECTOR_SIZE);
        for s in sectors.iter() {
            image.extend_from_slice(s);
        }
        image
    }
}

impl BlockDevice for MemDisk {
    fn sector_count(&self) -> Sector {
        self.sectors.lock().len() as Sector
    }

    fn read_sector(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) {
        let sectors = self.sectors.lock();
        let src = sectors
            .get(sector as usize)
            .unwrap_or_else(|| panic!("read of sector {} beyond device end", sector));
        buf.copy_from_slice(src);
    }

    fn write_sector(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) {
        let mut sectors = self.sectors.lock();
        let count = sectors.len();
        let dst = sectors
            .get_mut(sector as usize)
            .unwrap_or_else(|| panic!("write of sector {} beyond device end ({})", sector, count));
        dst.copy_from_slice(buf);
    }
}
