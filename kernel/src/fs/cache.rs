// SPDX-License-Identifier: MPL-2.0

//! The sector buffer cache.
//!
//! A 64-slot write-back cache in front of the file-system device. Lookup
//! is a linear scan; on a miss, a free slot is claimed or a victim is
//! chosen by a clock sweep over the accessed bits, writing a dirty victim
//! back first.
//!
//! Which slot a sector lives in is decided under a single lookup lock; as
//! soon as the choice is tagged on the slot (`next_sector`), the global
//! lock is dropped and the I/O runs under the slot's own lock. A reader
//! that raced the decision confirms the slot identity after acquiring the
//! slot lock and restarts its lookup if the slot was repurposed.
//!
//! Two daemons serve the cache: write-behind flushes all dirty slots every
//! couple of seconds, and read-ahead drains a small ring of predicted
//! sectors that `inode_read_at` fills with the sector following each read.

use crate::device::{BlockDevice, Sector, SECTOR_SIZE};
use crate::prelude::*;
use crate::sync::{Condvar, Lock, Mutex, MutexGuard};
use crate::thread::{self, scheduler, PRI_DEFAULT};
use crate::time;

pub const CACHE_SIZE: usize = 64;
pub const READAHEAD_SIZE: usize = CACHE_SIZE / 4;

/// Milliseconds between write-behind flushes.
const WRITE_BEHIND_MS: i64 = 2000;

struct Slot {
    /// Cached sector, or -1 when the slot is free.
    sector: i64,
    /// Sector this slot is being repurposed for; -1 outside eviction.
    next_sector: i64,
    accessed: bool,
    dirty: bool,
    data: Box<[u8; SECTOR_SIZE]>,
}

impl Slot {
    fn free() -> Self {
        Slot {
            sector: -1,
            next_sector: -1,
            accessed: false,
            dirty: false,
            data: Box::new([0; SECTOR_SIZE]),
        }
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
}

struct RaState {
    ring: [i64; READAHEAD_SIZE],
    produced: u64,
}

struct BufferCache {
    entries: Vec<Mutex<Slot>>,
    lookup_lock: Lock,
    hand: SpinLock<usize>,
    taken: SpinLock<usize>,
    stats: SpinLock<CacheStats>,
    device: SpinLock<Option<Arc<dyn BlockDevice>>>,
    ra_lock: Lock,
    ra_state: SpinLock<RaState>,
    ra_cond: Condvar,
}

lazy_static::lazy_static! {
    static ref CACHE: BufferCache = BufferCache {
        entries: (0..CACHE_SIZE).map(|_| Mutex::new(Slot::free())).collect(),
        lookup_lock: Lock::new(),
        hand: SpinLock::new(0),
        taken: SpinLock::new(0),
        stats: SpinLock::new(CacheStats::default()),
        device: SpinLock::new(None),
        ra_lock: Lock::new(),
        ra_state: SpinLock::new(RaState {
            ring: [-1; READAHEAD_SIZE],
            produced: 0,
        }),
        ra_cond: Condvar::new(),
    };
}

fn cache() -> &'static BufferCache {
    &CACHE
}

fn device() -> Arc<dyn BlockDevice> {
    CACHE.device.lock().clone().expect("buffer cache not initialized")
}

/// Initializes the cache for `device` and spawns the write-behind and
/// read-ahead daemons.
pub(crate) fn init(device: Arc<dyn BlockDevice>) {
    for e in &CACHE.entries {
        *e.lock() = Slot::free();
    }
    *CACHE.hand.lock() = 0;
    *CACHE.taken.lock() = 0;
    *CACHE.stats.lock() = CacheStats::default();
    {
        let mut ra = CACHE.ra_state.lock();
        ra.ring = [-1; READAHEAD_SIZE];
        ra.produced = 0;
    }
    *CACHE.device.lock() = Some(device);

    thread::spawn("write-behind", PRI_DEFAULT, write_behind_loop);
    thread::spawn("read-ahead", PRI_DEFAULT, read_ahead_loop);
}

/// Wakes the read-ahead daemon so it can observe shutdown.
pub(crate) fn shutdown_wake() {
    CACHE.ra_lock.acquire();
    CACHE.ra_cond.broadcast(&CACHE.ra_lock);
    CACHE.ra_lock.release();
}

pub(crate) fn reset() {
    for e in &CACHE.entries {
        *e.lock() = Slot::free();
    }
    *CACHE.hand.lock() = 0;
    *CACHE.taken.lock() = 0;
    *CACHE.device.lock() = None;
}

/// Copies `buf.len()` bytes out of the cached copy of `sector`, starting
/// at `offset` within the sector. Fetches on a miss.
pub fn read(sector: Sector, buf: &mut [u8], offset: usize) {
    assert!(offset + buf.len() <= SECTOR_SIZE);
    let mut slot = slot_for(sector);
    buf.copy_from_slice(&slot.data[offset..offset + buf.len()]);
    slot.accessed = true;
}

/// Copies `buf.len()` bytes into the cached copy of `sector`, starting at
/// `offset` within the sector, and marks it dirty.
pub fn write(sector: Sector, buf: &[u8], offset: usize) {
    assert!(offset + buf.len() <= SECTOR_SIZE);
    let mut slot = slot_for(sector);
    slot.data[offset..offset + buf.len()].copy_from_slice(buf);
    slot.accessed = true;
    slot.dirty = true;
}

/// Writes every dirty slot back to the device.
pub fn flush() {
    let dev = device();
    for e in &CACHE.entries {
        let mut slot = e.lock();
        if slot.sector >= 0 && slot.dirty {
            dev.write_sector(slot.sector as Sector, &slot.data);
            slot.dirty = false;
            CACHE.stats.lock().writebacks += 1;
        }
    }
}

pub fn stats() -> CacheStats {
    *CACHE.stats.lock()
}

/// Whether `sector` is currently cached.
pub fn contains(sector: Sector) -> bool {
    match lookup(sector) {
        Some(i) => CACHE.entries[i].lock().sector == sector as i64,
        None => false,
    }
}

pub fn dirty_count() -> usize {
    CACHE
        .entries
        .iter()
        .filter(|e| {
            let slot = e.lock();
            slot.sector >= 0 && slot.dirty
        })
        .count()
}

/// Returns the locked slot holding `sector`, fetching it on a miss.
fn slot_for(sector: Sector) -> MutexGuard<'static, Slot> {
    loop {
        if let Some(i) = lookup(sector) {
            let slot = cache().entries[i].lock();
            if slot.sector == sector as i64 {
                CACHE.stats.lock().hits += 1;
                return slot;
            }
            // Repurposed while we waited for the slot lock; start over.
            continue;
        }
        CACHE.stats.lock().misses += 1;
        if let Some(slot) = fetch(sector) {
            return slot;
        }
    }
}

/// Linear scan for `sector`, matching both settled identity and an
/// eviction in flight toward it.
fn lookup(sector: Sector) -> Option<usize> {
    let wanted = sector as i64;
    for (i, e) in CACHE.entries.iter().enumerate() {
        let slot = e.lock();
        if slot.sector == wanted || slot.next_sector == wanted {
            return Some(i);
        }
    }
    None
}

/// Brings `sector` into the cache and returns its locked slot, or `None`
/// if another thread won the race (caller restarts its lookup).
fn fetch(sector: Sector) -> Option<MutexGuard<'static, Slot>> {
    let dev = device();
    CACHE.lookup_lock.acquire();

    // Someone may have fetched it while we waited for the lookup lock.
    if let Some(i) = lookup(sector) {
        let slot = cache().entries[i].lock();
        CACHE.lookup_lock.release();
        if slot.sector == sector as i64 {
            return Some(slot);
        }
        return None;
    }

    let mut slot = claim_slot();
    slot.next_sector = sector as i64;
    if slot.sector >= 0 {
        CACHE.stats.lock().evictions += 1;
    }
    CACHE.lookup_lock.release();

    // The slot lock is held through the I/O; anyone who finds this slot
    // by either identity blocks here until the new contents are in place.
    if slot.dirty && slot.sector >= 0 {
        dev.write_sector(slot.sector as Sector, &slot.data);
        CACHE.stats.lock().writebacks += 1;
    }
    dev.read_sector(sector, &mut slot.data);
    slot.sector = sector as i64;
    slot.next_sector = -1;
    slot.accessed = false;
    slot.dirty = false;
    Some(slot)
}

/// Picks the slot a new sector will live in: a free slot while any
/// remain, otherwise the clock sweep's victim. Called with the lookup
/// lock held; returns the slot locked.
fn claim_slot() -> MutexGuard<'static, Slot> {
    {
        let mut taken = CACHE.taken.lock();
        if *taken < CACHE_SIZE {
            *taken += 1;
            drop(taken);
            for e in &cache().entries {
                let slot = e.lock();
                if slot.sector == -1 && slot.next_sector == -1 {
                    return slot;
                }
            }
            // All slots claimed concurrently; fall through to the clock.
        }
    }

    loop {
        let i = {
            let mut hand = CACHE.hand.lock();
            let i = *hand;
            *hand = (*hand + 1) % CACHE_SIZE;
            i
        };
        let mut slot = cache().entries[i].lock();
        if slot.accessed {
            slot.accessed = false;
            continue;
        }
        return slot;
    }
}

fn write_behind_loop() {
    loop {
        time::msleep(WRITE_BEHIND_MS);
        if scheduler::is_shutting_down() {
            return;
        }
        flush();
    }
}

/// Queues `sector` for the read-ahead daemon.
pub(crate) fn readahead_submit(sector: Sector) {
    CACHE.ra_lock.acquire();
    {
        let mut ra = CACHE.ra_state.lock();
        let i = (ra.produced % READAHEAD_SIZE as u64) as usize;
        ra.ring[i] = sector as i64;
        ra.produced += 1;
    }
    CACHE.ra_cond.signal(&CACHE.ra_lock);
    CACHE.ra_lock.release();
}

fn read_ahead_loop() {
    let mut index: u64 = 0;
    loop {
        CACHE.ra_lock.acquire();
        let sector = loop {
            if scheduler::is_shutting_down() {
                CACHE.ra_lock.release();
                return;
            }
            let next = {
                let ra = CACHE.ra_state.lock();
                if index < ra.produced {
                    // Fallen a full window behind: jump to the most
                    // recent one.
                    if index + (READAHEAD_SIZE as u64) < ra.produced {
                        index = ra.produced - 1;
                    }
                    Some(ra.ring[(index % READAHEAD_SIZE as u64) as usize])
                } else {
                    None
                }
            };
            match next {
                Some(s) => break s,
                None => CACHE.ra_cond.wait(&CACHE.ra_lock),
            }
        };
        CACHE.ra_lock.release();
        index += 1;

        if sector >= 0 {
            let sector = sector as Sector;
            if !contains(sector) {
                if let Some(mut slot) = fetch(sector) {
                    slot.accessed = true;
                }
            }
        }
    }
}
