// SPDX-License-Identifier: MPL-2.0

//! Indexed inodes.
//!
//! An on-disk inode occupies exactly one sector. The data-block index has
//! three levels: [`FIRSTLEVEL`] direct pointers in the inode itself, one
//! indirect sector of [`PTRS_PER_SECTOR`] pointers, and one
//! doubly-indirect sector of pointer sectors. The index is grown
//! left-to-right, one block per append, with no holes; the sector for a
//! new index level is allocated by the first append that needs it.
//!
//! All sector traffic goes through the buffer cache.

use crate::device::{Sector, SECTOR_SIZE};
use crate::fs::{cache, free_map};
use crate::prelude::*;
use crate::sync::{Lock, Mutex};

/// Identifies an inode.
const INODE_MAGIC: u32 = 0x494e4f44;

/// Words of metadata in the on-disk inode; the rest of the sector is the
/// direct-pointer array.
const METADATA_WORDS: usize = 6;

/// Number of direct block pointers held in the inode sector itself.
pub const FIRSTLEVEL: usize = SECTOR_SIZE / 4 - METADATA_WORDS;

/// Pointers per indirect sector.
pub const PTRS_PER_SECTOR: usize = SECTOR_SIZE / 4;

/// Largest addressable block index + 1.
pub const MAX_BLOCKS: usize = FIRSTLEVEL + PTRS_PER_SECTOR + PTRS_PER_SECTOR * PTRS_PER_SECTOR;

/// Largest representable file size in bytes.
pub const MAX_LENGTH: u64 = (MAX_BLOCKS * SECTOR_SIZE) as u64;

/// On-disk inode. Exactly [`SECTOR_SIZE`] bytes in declaration order.
struct InodeDisk {
    length: u32,
    num_blocks: u32,
    magic: u32,
    is_file: u32,
    first_level: [u32; FIRSTLEVEL],
    indir_level: u32,
    doub_indir_level: u32,
}

impl InodeDisk {
    fn new(is_file: bool) -> Self {
        Self {
            length: 0,
            num_blocks: 0,
            magic: INODE_MAGIC,
            is_file: is_file as u32,
            first_level: [0; FIRSTLEVEL],
            indir_level: 0,
            doub_indir_level: 0,
        }
    }

    fn to_bytes(&self) -> [u8; SECTOR_SIZE] {
        let mut b = [0u8; SECTOR_SIZE];
        b[0..4].copy_from_slice(&self.length.to_le_bytes());
        b[4..8].copy_from_slice(&self.num_blocks.to_le_bytes());
        b[8..12].copy_from_slice(&self.magic.to_le_bytes());
        b[12..16].copy_from_slice(&self.is_file.to_le_bytes());
        for (i, ptr) in self.first_level.iter().enumerate() {
            let at = 16 + i * 4;
            b[at..at + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        let at = 16 + FIRSTLEVEL * 4;
        b[at..at + 4].copy_from_slice(&self.indir_level.to_le_bytes());
        b[at + 4..at + 8].copy_from_slice(&self.doub_indir_level.to_le_bytes());
        b
    }

    fn from_bytes(b: &[u8; SECTOR_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes(b[i..i + 4].try_into().unwrap());
        let mut first_level = [0u32; FIRSTLEVEL];
        for (i, ptr) in first_level.iter_mut().enumerate() {
            *ptr = word(16 + i * 4);
        }
        let at = 16 + FIRSTLEVEL * 4;
        Self {
            length: word(0),
            num_blocks: word(4),
            magic: word(8),
            is_file: word(12),
            first_level,
            indir_level: word(at),
            doub_indir_level: word(at + 4),
        }
    }

    fn read_from(sector: Sector) -> Self {
        let mut b = [0u8; SECTOR_SIZE];
        cache::read(sector, &mut b, 0);
        let disk = Self::from_bytes(&b);
        debug_assert_eq!(disk.magic, INODE_MAGIC, "bad inode magic at {}", sector);
        disk
    }

    fn write_to(&self, sector: Sector) {
        cache::write(sector, &self.to_bytes(), 0);
    }
}

fn read_index(sector: Sector, idx: usize) -> Sector {
    let mut b = [0u8; 4];
    cache::read(sector, &mut b, idx * 4);
    u32::from_le_bytes(b)
}

fn write_index(sector: Sector, idx: usize, val: Sector) {
    cache::write(sector, &val.to_le_bytes(), idx * 4);
}

fn bytes_to_sectors(len: u64) -> u64 {
    (len + SECTOR_SIZE as u64 - 1) / SECTOR_SIZE as u64
}

/// Resolves block index `n` of the file to its device sector.
fn block_lookup(disk: &InodeDisk, n: usize) -> Sector {
    assert!(n < MAX_BLOCKS);
    if n < FIRSTLEVEL {
        disk.first_level[n]
    } else if n < FIRSTLEVEL + PTRS_PER_SECTOR {
        read_index(disk.indir_level, n - FIRSTLEVEL)
    } else {
        let rel = n - FIRSTLEVEL - PTRS_PER_SECTOR;
        let row_sector = read_index(disk.doub_indir_level, rel / PTRS_PER_SECTOR);
        read_index(row_sector, rel % PTRS_PER_SECTOR)
    }
}

/// Allocates one sector and zeroes it through the cache.
fn allocate_zeroed() -> Result<Sector> {
    let sector = free_map::allocate(1).ok_or(Error::new(Errno::ENOSPC))?;
    cache::write(sector, &[0u8; SECTOR_SIZE], 0);
    Ok(sector)
}

/// Appends one data block to the index, setting up index-level sectors on
/// the appends that first need them.
fn grow_one(disk: &mut InodeDisk) -> Result<()> {
    let n = disk.num_blocks as usize;
    if n >= MAX_BLOCKS {
        return_errno_with_message!(Errno::EFBIG, "file index exhausted");
    }

    if n == FIRSTLEVEL {
        disk.indir_level = allocate_zeroed()?;
    } else if n == FIRSTLEVEL + PTRS_PER_SECTOR {
        disk.doub_indir_level = allocate_zeroed()?;
    }

    let data = allocate_zeroed()?;
    if n < FIRSTLEVEL {
        disk.first_level[n] = data;
    } else if n < FIRSTLEVEL + PTRS_PER_SECTOR {
        write_index(disk.indir_level, n - FIRSTLEVEL, data);
    } else {
        let rel = n - FIRSTLEVEL - PTRS_PER_SECTOR;
        let row = rel / PTRS_PER_SECTOR;
        let col = rel % PTRS_PER_SECTOR;
        if col == 0 {
            let row_sector = allocate_zeroed()?;
            write_index(disk.doub_indir_level, row, row_sector);
        }
        let row_sector = read_index(disk.doub_indir_level, row);
        write_index(row_sector, col, data);
    }

    disk.num_blocks += 1;
    Ok(())
}

/// Returns every sector the index owns (data blocks and index sectors) to
/// the free map.
fn free_blocks(disk: &InodeDisk) {
    let n = disk.num_blocks as usize;
    for i in 0..n {
        free_map::release(block_lookup(disk, i), 1);
    }
    if n > FIRSTLEVEL {
        free_map::release(disk.indir_level, 1);
    }
    if n > FIRSTLEVEL + PTRS_PER_SECTOR {
        let rows = (n - FIRSTLEVEL - PTRS_PER_SECTOR + PTRS_PER_SECTOR - 1) / PTRS_PER_SECTOR;
        for row in 0..rows {
            free_map::release(read_index(disk.doub_indir_level, row), 1);
        }
        free_map::release(disk.doub_indir_level, 1);
    }
}

struct InodeShared {
    open_cnt: u32,
    removed: bool,
    deny_write_cnt: u32,
}

/// In-memory inode. At most one exists per sector; [`open`] keys the
/// global table by sector number.
pub struct Inode {
    sector: Sector,
    state: SpinLock<InodeShared>,
    /// Guards length changes and EOF-crossing accesses.
    lock: Lock,
}

lazy_static::lazy_static! {
    static ref OPEN_INODES: Mutex<Vec<Arc<Inode>>> = Mutex::new(Vec::new());
}

/// Writes a fresh inode of `length` zero bytes to `sector`.
///
/// Frees anything it allocated if the disk fills up mid-way.
pub fn create(sector: Sector, length: u32, is_file: bool) -> Result<()> {
    let mut disk = InodeDisk::new(is_file);
    let sectors = bytes_to_sectors(length as u64);
    for _ in 0..sectors {
        if let Err(e) = grow_one(&mut disk) {
            free_blocks(&disk);
            return Err(e);
        }
    }
    disk.length = length;
    disk.write_to(sector);
    Ok(())
}

/// Opens the inode at `sector`, returning the existing in-memory object
/// if some opener already has it.
pub fn open(sector: Sector) -> Arc<Inode> {
    let mut table = OPEN_INODES.lock();
    if let Some(inode) = table.iter().find(|i| i.sector == sector) {
        inode.state.lock().open_cnt += 1;
        return inode.clone();
    }
    let inode = Arc::new(Inode {
        sector,
        state: SpinLock::new(InodeShared {
            open_cnt: 1,
            removed: false,
            deny_write_cnt: 0,
        }),
        lock: Lock::new(),
    });
    table.push(inode.clone());
    inode
}

/// Number of distinct inodes currently open; test hook.
pub fn open_inode_count() -> usize {
    OPEN_INODES.lock().len()
}

pub(crate) fn reset() {
    OPEN_INODES.lock().clear();
}

impl Inode {
    /// Takes another reference to this inode, bumping the open count.
    pub fn reopen(self: &Arc<Self>) -> Arc<Inode> {
        self.state.lock().open_cnt += 1;
        self.clone()
    }

    /// Drops one reference. The last close of a removed inode returns all
    /// its sectors to the free map.
    pub fn close(self: &Arc<Self>) {
        let mut table = OPEN_INODES.lock();
        let (last, removed) = {
            let mut st = self.state.lock();
            assert!(st.open_cnt > 0, "inode close underflow");
            st.open_cnt -= 1;
            (st.open_cnt == 0, st.removed)
        };
        if !last {
            return;
        }
        table.retain(|i| !Arc::ptr_eq(i, self));
        drop(table);

        if removed {
            let disk = InodeDisk::read_from(self.sector);
            free_blocks(&disk);
            free_map::release(self.sector, 1);
        }
    }

    /// Marks the inode for deletion at final close. Monotonic.
    pub fn remove(&self) {
        self.state.lock().removed = true;
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    pub fn inumber(&self) -> Sector {
        self.sector
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().open_cnt
    }

    pub fn is_file(&self) -> bool {
        InodeDisk::read_from(self.sector).is_file != 0
    }

    pub fn length(&self) -> u32 {
        InodeDisk::read_from(self.sector).length
    }

    /// Number of data blocks the index currently holds; test hook.
    pub fn num_blocks(&self) -> u32 {
        InodeDisk::read_from(self.sector).num_blocks
    }

    /// Forbids writes through any handle until a matching
    /// [`Inode::allow_write`].
    pub fn deny_write(&self) {
        let mut st = self.state.lock();
        st.deny_write_cnt += 1;
        assert!(
            st.deny_write_cnt <= st.open_cnt,
            "deny_write_cnt above open_cnt"
        );
    }

    pub fn allow_write(&self) {
        let mut st = self.state.lock();
        assert!(st.deny_write_cnt > 0, "deny_write underflow");
        st.deny_write_cnt -= 1;
    }

    /// Reads up to `buf.len()` bytes starting at `offset`. A read that
    /// overlaps EOF returns the short count; a read past EOF returns 0.
    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> usize {
        let mut disk = InodeDisk::read_from(self.sector);
        // Crossing EOF must serialize with a concurrent extension.
        let crosses_eof = offset as u64 + buf.len() as u64 > disk.length as u64;
        if crosses_eof {
            self.lock.acquire();
            disk = InodeDisk::read_from(self.sector);
        }

        let mut pos = offset as usize;
        let mut bytes_read = 0usize;
        while bytes_read < buf.len() {
            let inode_left = (disk.length as usize).saturating_sub(pos);
            if inode_left == 0 {
                break;
            }
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (buf.len() - bytes_read)
                .min(SECTOR_SIZE - sector_ofs)
                .min(inode_left);
            let sector = block_lookup(&disk, pos / SECTOR_SIZE);
            cache::read(sector, &mut buf[bytes_read..bytes_read + chunk], sector_ofs);
            pos += chunk;
            bytes_read += chunk;
        }

        if crosses_eof {
            self.lock.release();
        }

        // Hand the block after the one just returned to the read-ahead
        // daemon.
        if bytes_read > 0 {
            let next_block = (pos + SECTOR_SIZE - 1) / SECTOR_SIZE;
            if next_block * SECTOR_SIZE < disk.length as usize {
                cache::readahead_submit(block_lookup(&disk, next_block));
            }
        }

        bytes_read
    }

    /// Writes `buf` at `offset`, extending the file first when the write
    /// lands past EOF. Returns the bytes written: 0 if writes are denied
    /// or the extension could not be fully allocated.
    pub fn write_at(&self, buf: &[u8], offset: u32) -> usize {
        if self.state.lock().deny_write_cnt > 0 {
            return 0;
        }
        if buf.is_empty() {
            return 0;
        }
        let end = offset as u64 + buf.len() as u64;
        if end > MAX_LENGTH {
            return 0;
        }

        let mut disk = InodeDisk::read_from(self.sector);
        let extends = end > disk.length as u64;
        if extends {
            self.lock.acquire();
            // Someone may have extended past us while we waited.
            disk = InodeDisk::read_from(self.sector);
            if end > disk.length as u64 {
                let needed = bytes_to_sectors(end);
                while (disk.num_blocks as u64) < needed {
                    if grow_one(&mut disk).is_err() {
                        // Keep what was allocated consistent on disk.
                        disk.write_to(self.sector);
                        self.lock.release();
                        return 0;
                    }
                }
                disk.length = end as u32;
                disk.write_to(self.sector);
            }
        }

        let mut pos = offset as usize;
        let mut bytes_written = 0usize;
        while bytes_written < buf.len() {
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (buf.len() - bytes_written).min(SECTOR_SIZE - sector_ofs);
            let sector = block_lookup(&disk, pos / SECTOR_SIZE);
            cache::write(sector, &buf[bytes_written..bytes_written + chunk], sector_ofs);
            pos += chunk;
            bytes_written += chunk;
        }

        if extends {
            self.lock.release();
        }
        bytes_written
    }
}
