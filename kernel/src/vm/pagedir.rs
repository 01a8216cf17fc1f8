// SPDX-License-Identifier: MPL-2.0

//! Software page directory.
//!
//! The model's stand-in for the hardware page table: one per process,
//! mapping virtual page numbers to frames with present/writable/
//! accessed/dirty bits. Kernel accessors that touch user memory update
//! the accessed and dirty bits the way the MMU would; the clock sweep and
//! the write-back decisions read them.

use hashbrown::HashMap;

use crate::prelude::*;
use crate::vm::frame::FrameEntry;

bitflags! {
    pub struct PdFlags: u8 {
        const WRITABLE = 1 << 0;
        const ACCESSED = 1 << 1;
        const DIRTY    = 1 << 2;
    }
}

struct PdEntry {
    frame: Weak<FrameEntry>,
    flags: PdFlags,
}

pub struct PageDir {
    map: SpinLock<HashMap<usize, PdEntry>>,
}

impl PageDir {
    pub fn new() -> Self {
        Self {
            map: SpinLock::new(HashMap::new()),
        }
    }

    /// Installs a mapping from `vpn` to `frame`.
    pub fn set_page(&self, vpn: usize, frame: &Arc<FrameEntry>, writable: bool) {
        let mut flags = PdFlags::empty();
        if writable {
            flags |= PdFlags::WRITABLE;
        }
        self.map.lock().insert(
            vpn,
            PdEntry {
                frame: Arc::downgrade(frame),
                flags,
            },
        );
    }

    /// Removes the mapping for `vpn`; later accesses fault.
    pub fn clear_page(&self, vpn: usize) {
        self.map.lock().remove(&vpn);
    }

    /// Resolves `vpn` if present.
    pub fn lookup(&self, vpn: usize) -> Option<(Arc<FrameEntry>, PdFlags)> {
        let map = self.map.lock();
        let e = map.get(&vpn)?;
        Some((e.frame.upgrade()?, e.flags))
    }

    pub fn is_present(&self, vpn: usize) -> bool {
        self.lookup(vpn).is_some()
    }

    pub fn is_accessed(&self, vpn: usize) -> bool {
        self.map
            .lock()
            .get(&vpn)
            .map_or(false, |e| e.flags.contains(PdFlags::ACCESSED))
    }

    pub fn set_accessed(&self, vpn: usize, accessed: bool) {
        if let Some(e) = self.map.lock().get_mut(&vpn) {
            e.flags.set(PdFlags::ACCESSED, accessed);
        }
    }

    pub fn is_dirty(&self, vpn: usize) -> bool {
        self.map
            .lock()
            .get(&vpn)
            .map_or(false, |e| e.flags.contains(PdFlags::DIRTY))
    }

    pub fn set_dirty(&self, vpn: usize, dirty: bool) {
        if let Some(e) = self.map.lock().get_mut(&vpn) {
            e.flags.set(PdFlags::DIRTY, dirty);
        }
    }

    /// Records an access the way the MMU would: accessed always, dirty on
    /// writes.
    pub fn mark_access(&self, vpn: usize, write: bool) {
        if let Some(e) = self.map.lock().get_mut(&vpn) {
            e.flags |= PdFlags::ACCESSED;
            if write {
                e.flags |= PdFlags::DIRTY;
            }
        }
    }

    pub fn clear_all(&self) {
        self.map.lock().clear();
    }
}

impl Default for PageDir {
    fn default() -> Self {
        Self::new()
    }
}
