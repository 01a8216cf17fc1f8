// SPDX-License-Identifier: MPL-2.0

//! The global frame table.
//!
//! All user-pool frames live in a ring created at boot. Allocation hands
//! out free frames until the pool runs dry, then runs the clock sweep:
//! skip pinned or busy pages, give accessed pages a second chance by
//! clearing the bit, and evict the first page found cold. Eviction
//! clears the owner's hardware mapping first, then routes the contents by
//! status: NonZeros pages (and dirtied Zeros/Code pages) go to a fresh
//! swap slot, dirty Mmap pages go back to their file range, everything
//! else is recoverable from its origin and is discarded.
//!
//! Lock order: frame table, then a victim's page-table-entry state. The
//! table lock is dropped before any blocking write-back; the victim is
//! marked busy so faults on it wait out the I/O.

use crate::prelude::*;
use crate::thread::Thread;
use crate::vm::page::{PageStatus, Spte};
use crate::vm::{swap, PGSIZE};

/// One physical user frame.
pub struct FrameEntry {
    index: usize,
    pub(crate) data: SpinLock<Box<[u8; PGSIZE]>>,
    owner: SpinLock<FrameOwner>,
}

#[derive(Clone)]
struct FrameOwner {
    spte: Weak<Spte>,
    thread: Weak<Thread>,
}

impl FrameEntry {
    /// Stable stand-in for the frame's physical address.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn owner_spte(&self) -> Option<Arc<Spte>> {
        self.owner.lock().spte.upgrade()
    }
}

struct FrameTable {
    frames: Vec<Arc<FrameEntry>>,
    free: Vec<usize>,
    hand: usize,
}

lazy_static::lazy_static! {
    static ref FRAME_TABLE: SpinLock<Option<FrameTable>> = SpinLock::new(None);
}

pub(crate) fn init(user_frames: usize) {
    assert!(user_frames > 0);
    let frames = (0..user_frames)
        .map(|index| {
            Arc::new(FrameEntry {
                index,
                data: SpinLock::new(Box::new([0u8; PGSIZE])),
                owner: SpinLock::new(FrameOwner {
                    spte: Weak::new(),
                    thread: Weak::new(),
                }),
            })
        })
        .collect();
    *FRAME_TABLE.lock() = Some(FrameTable {
        frames,
        free: (0..user_frames).rev().collect(),
        hand: 0,
    });
}

pub(crate) fn reset() {
    *FRAME_TABLE.lock() = None;
}

/// Frames currently handed out; test hook.
pub fn frames_in_use() -> usize {
    let table = FRAME_TABLE.lock();
    let t = table.as_ref().expect("frame table not initialized");
    t.frames.len() - t.free.len()
}

/// Acquires a frame for `spte`, owned by `thread`, evicting a victim if
/// the pool is exhausted.
///
/// # Panics
///
/// Panics if every frame stays pinned or busy across repeated sweeps;
/// with no evictable victim the kernel cannot make progress.
pub(crate) fn alloc(thread: &Arc<Thread>, spte: &Arc<Spte>) -> Arc<FrameEntry> {
    for _attempt in 0..64 {
        let mut deferred: Option<DeferredWriteback> = None;
        let claimed = {
            let mut table = FRAME_TABLE.lock();
            let t = table.as_mut().expect("frame table not initialized");
            if let Some(i) = t.free.pop() {
                let f = t.frames[i].clone();
                *f.owner.lock() = FrameOwner {
                    spte: Arc::downgrade(spte),
                    thread: Arc::downgrade(thread),
                };
                Some(f)
            } else {
                match evict_one(t, &mut deferred) {
                    Some(f) => {
                        *f.owner.lock() = FrameOwner {
                            spte: Arc::downgrade(spte),
                            thread: Arc::downgrade(thread),
                        };
                        Some(f)
                    }
                    None => None,
                }
            }
        };

        // Write-back runs outside the frame-table lock; the victim's
        // entry stays busy until the data is safely out.
        if let Some(d) = deferred {
            d.complete();
        }
        if let Some(f) = claimed {
            return f;
        }
        // Everything pinned or busy right now; let the pinners run.
        crate::thread::yield_now();
    }
    panic!("no evictable frame in the user pool");
}

/// A write-back that must happen after the table lock is released.
struct DeferredWriteback {
    spte: Arc<Spte>,
    kind: WritebackKind,
    data: Box<[u8; PGSIZE]>,
}

enum WritebackKind {
    Swap(swap::SwapSlot),
    MmapFile,
}

impl DeferredWriteback {
    fn complete(self) {
        match self.kind {
            WritebackKind::Swap(slot) => {
                swap::write_page(slot, &self.data);
            }
            WritebackKind::MmapFile => {
                let (file, offset, valid) = {
                    let st = self.spte.state.lock();
                    let b = st.backing.as_ref().expect("mmap page without backing");
                    (b.file.clone(), b.offset, b.valid_bytes as usize)
                };
                file.write_at(&self.data[..valid], offset);
            }
        }
        self.spte.state.lock().busy = false;
    }
}

/// One clock sweep over the ring. On success the victim's previous
/// mapping has been dissolved and any required write-back has been set up
/// in `deferred`.
fn evict_one(t: &mut FrameTable, deferred: &mut Option<DeferredWriteback>) -> Option<Arc<FrameEntry>> {
    let n = t.frames.len();
    // Two passes: the first may only be clearing accessed bits.
    for _ in 0..2 * n {
        let f = t.frames[t.hand].clone();
        t.hand = (t.hand + 1) % n;

        let owner = f.owner.lock().clone();
        let Some(o_spte) = owner.spte.upgrade() else {
            continue;
        };
        let Some(o_thread) = owner.thread.upgrade() else {
            continue;
        };
        let Some(o_us) = o_thread.user_space() else {
            continue;
        };

        let mut st = o_spte.state.lock();
        if st.busy || st.pinned {
            continue;
        }
        match &st.frame {
            Some(held) if Arc::ptr_eq(held, &f) => {}
            _ => continue, // stale owner link
        }

        let vpn = o_spte.vpn();
        if o_us.pagedir.is_accessed(vpn) {
            o_us.pagedir.set_accessed(vpn, false);
            continue;
        }

        // Victim found. Tear the mapping down so the owner faults on its
        // next access, then route the contents.
        let dirty = o_us.pagedir.is_dirty(vpn);
        o_us.pagedir.clear_page(vpn);
        st.frame = None;

        let needs_save = match st.status {
            PageStatus::NonZeros => true,
            PageStatus::Zeros | PageStatus::Code => dirty,
            PageStatus::Mmap => false,
            PageStatus::Swap => unreachable!("resident page in Swap status"),
        };
        if needs_save {
            let slot = swap::alloc();
            st.status = PageStatus::Swap;
            st.swap_slot = Some(slot);
            st.busy = true;
            let data = Box::new(**f.data.lock());
            *deferred = Some(DeferredWriteback {
                spte: o_spte.clone(),
                kind: WritebackKind::Swap(slot),
                data,
            });
        } else if matches!(st.status, PageStatus::Mmap) && dirty {
            st.busy = true;
            let data = Box::new(**f.data.lock());
            *deferred = Some(DeferredWriteback {
                spte: o_spte.clone(),
                kind: WritebackKind::MmapFile,
                data,
            });
        }
        // Clean Zeros/Code/Mmap pages are recoverable from their origin
        // and are simply dropped.

        return Some(f);
    }
    None
}

/// Returns `frame` to the free pool, dissolving its owner link.
pub(crate) fn free(frame: &Arc<FrameEntry>) {
    let mut table = FRAME_TABLE.lock();
    let t = table.as_mut().expect("frame table not initialized");
    *frame.owner.lock() = FrameOwner {
        spte: Weak::new(),
        thread: Weak::new(),
    };
    debug_assert!(!t.free.contains(&frame.index));
    t.free.push(frame.index);
}
