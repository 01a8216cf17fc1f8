// SPDX-License-Identifier: MPL-2.0

//! Memory-mapped files.
//!
//! A mapping reopens the file, so it survives the descriptor it was made
//! from, and installs one lazy Mmap page entry per file page; no frames
//! are touched until the process faults on them. Unmapping writes
//! resident dirty pages back to the file and drops the reopened handle.
//! Mappings never grow the file: the tail page is zero-padded in memory
//! and only its valid bytes are ever written back.

use crate::fs::File;
use crate::prelude::*;
use crate::process::UserSpace;
use crate::thread::Thread;
use crate::vm::page::{FileBacking, Spte};
use crate::vm::{frame, is_user_vaddr, page_offset, PGSIZE};

pub type MapId = i32;

pub(crate) struct MmapRegion {
    pub id: MapId,
    pub file: Arc<File>,
    pub base_vpn: usize,
    pub pages: usize,
}

pub(crate) struct MmapState {
    next_id: MapId,
    pub regions: Vec<MmapRegion>,
}

impl MmapState {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            regions: Vec::new(),
        }
    }
}

/// Maps `file` at `addr`, returning the mapping id.
pub fn mmap(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    file: &Arc<File>,
    addr: usize,
) -> Result<MapId> {
    let _ = thread;
    if addr == 0 || page_offset(addr) != 0 {
        return_errno!(Errno::EINVAL);
    }
    let len = file.len() as usize;
    if len == 0 {
        return_errno!(Errno::EINVAL);
    }
    let pages = (len + PGSIZE - 1) / PGSIZE;
    let end = addr
        .checked_add(pages * PGSIZE)
        .ok_or(Error::new(Errno::EINVAL))?;
    if !is_user_vaddr(end - 1) {
        return_errno!(Errno::EINVAL);
    }
    if !us.spt.range_is_empty(addr, pages) {
        return_errno!(Errno::EINVAL);
    }

    // Reopen so closing the descriptor does not tear the mapping down.
    let mapped = Arc::new(file.reopen());
    let id = {
        let mut mm = us.mmaps.lock();
        let id = mm.next_id;
        mm.next_id += 1;
        mm.regions.push(MmapRegion {
            id,
            file: mapped.clone(),
            base_vpn: addr,
            pages,
        });
        id
    };

    for i in 0..pages {
        let offset = i * PGSIZE;
        let valid = (len - offset).min(PGSIZE) as u32;
        let spte = Spte::new_mmap(
            addr + offset,
            FileBacking {
                file: mapped.clone(),
                offset: offset as u32,
                valid_bytes: valid,
            },
            id,
        );
        us.spt.insert(spte);
    }
    Ok(id)
}

/// Dissolves mapping `id`: resident dirty pages go back to the file,
/// every page entry is removed, and the reopened handle is closed.
pub fn munmap(us: &Arc<UserSpace>, id: MapId) -> Result<()> {
    let region = {
        let mut mm = us.mmaps.lock();
        let at = mm
            .regions
            .iter()
            .position(|r| r.id == id)
            .ok_or(Error::new(Errno::EINVAL))?;
        mm.regions.remove(at)
    };

    for i in 0..region.pages {
        let vpn = region.base_vpn + i * PGSIZE;
        let Some(spte) = us.spt.remove(vpn) else {
            continue;
        };
        let writeback = loop {
            let mut st = spte.state.lock();
            if st.busy {
                drop(st);
                crate::thread::yield_now();
                continue;
            }
            debug_assert!(st.swap_slot.is_none(), "mmap page in swap");
            match st.frame.take() {
                Some(frame) => {
                    let dirty = us.pagedir.is_dirty(vpn);
                    us.pagedir.clear_page(vpn);
                    let contents = if dirty {
                        Some(Box::new(**frame.data.lock()))
                    } else {
                        None
                    };
                    frame::free(&frame);
                    let valid = st
                        .backing
                        .as_ref()
                        .map(|b| (b.offset, b.valid_bytes as usize));
                    break contents.zip(valid);
                }
                None => break None,
            }
        };
        if let Some((contents, (offset, valid))) = writeback {
            region.file.write_at(&contents[..valid], offset);
        }
    }
    // Dropping `region` drops the reopened file handle.
    Ok(())
}

/// Unmaps every live mapping; the exit path calls this before the address
/// space is torn down.
pub fn unmap_all(us: &Arc<UserSpace>) {
    loop {
        let id = {
            let mm = us.mmaps.lock();
            match mm.regions.first() {
                Some(r) => r.id,
                None => return,
            }
        };
        let _ = munmap(us, id);
    }
}
