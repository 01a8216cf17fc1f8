// SPDX-License-Identifier: MPL-2.0

//! Supplemental page table and the page-fault path.
//!
//! Every live user page of a process has exactly one entry here. The
//! entry records how to (re)materialize the page: zero fill, a swap slot,
//! or a file range; a resident entry additionally links to its frame.
//! The hardware mapping is only ever installed after the entry exists, so
//! a fault observer never sees a mapping without its record.

use crate::fs::File;
use crate::prelude::*;
use crate::process::UserSpace;
use crate::thread::Thread;
use crate::vm::frame::{self, FrameEntry};
use crate::vm::{
    self, swap, page_round_down, PGSIZE, PHYS_BASE, STACK_LIMIT, STACK_PUSH_SLACK,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PageStatus {
    /// Zero-filled page never yet materialized dirty.
    Zeros,
    /// Contents exist only in memory (or in swap once evicted).
    NonZeros,
    /// Clean executable-image page, recoverable from the file.
    Code,
    /// Contents live in a swap slot.
    Swap,
    /// File-backed mapping page.
    Mmap,
}

/// Where a Code or Mmap page's bytes come from.
pub struct FileBacking {
    pub file: Arc<File>,
    pub offset: u32,
    /// Bytes to read from the file; the rest of the page is zeros.
    pub valid_bytes: u32,
}

pub struct SpteState {
    pub status: PageStatus,
    pub frame: Option<Arc<FrameEntry>>,
    pub swap_slot: Option<swap::SwapSlot>,
    pub backing: Option<FileBacking>,
    pub writable: bool,
    pub pinned: bool,
    /// A fill or write-back is in flight; faulters wait.
    pub busy: bool,
    pub mmap_id: Option<i32>,
}

/// A supplemental page-table entry.
pub struct Spte {
    vpn: usize,
    pub(crate) state: SpinLock<SpteState>,
}

impl Spte {
    pub fn new_zeros(vpn: usize) -> Arc<Spte> {
        Arc::new(Spte {
            vpn,
            state: SpinLock::new(SpteState {
                status: PageStatus::Zeros,
                frame: None,
                swap_slot: None,
                backing: None,
                writable: true,
                pinned: false,
                busy: false,
                mmap_id: None,
            }),
        })
    }

    pub fn new_code(vpn: usize, backing: FileBacking, writable: bool) -> Arc<Spte> {
        Arc::new(Spte {
            vpn,
            state: SpinLock::new(SpteState {
                status: PageStatus::Code,
                frame: None,
                swap_slot: None,
                backing: Some(backing),
                writable,
                pinned: false,
                busy: false,
                mmap_id: None,
            }),
        })
    }

    pub fn new_mmap(vpn: usize, backing: FileBacking, mmap_id: i32) -> Arc<Spte> {
        Arc::new(Spte {
            vpn,
            state: SpinLock::new(SpteState {
                status: PageStatus::Mmap,
                frame: None,
                swap_slot: None,
                backing: Some(backing),
                writable: true,
                pinned: false,
                busy: false,
                mmap_id: Some(mmap_id),
            }),
        })
    }

    pub fn vpn(&self) -> usize {
        self.vpn
    }

    pub fn is_writable(&self) -> bool {
        self.state.lock().writable
    }

    pub fn set_pinned(&self, pinned: bool) {
        self.state.lock().pinned = pinned;
    }
}

/// Per-process map from virtual page number to entry.
pub struct SuppPageTable {
    map: SpinLock<BTreeMap<usize, Arc<Spte>>>,
}

impl SuppPageTable {
    pub fn new() -> Self {
        Self {
            map: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Inserts `spte`; at most one entry may exist per page.
    pub fn insert(&self, spte: Arc<Spte>) {
        let prev = self.map.lock().insert(spte.vpn(), spte);
        assert!(prev.is_none(), "duplicate supplemental page-table entry");
    }

    pub fn lookup(&self, vpn: usize) -> Option<Arc<Spte>> {
        self.map.lock().get(&vpn).cloned()
    }

    pub fn remove(&self, vpn: usize) -> Option<Arc<Spte>> {
        self.map.lock().remove(&vpn)
    }

    /// Whether `[start_vpn, start_vpn + pages·PGSIZE)` holds no entries.
    pub fn range_is_empty(&self, start_vpn: usize, pages: usize) -> bool {
        let end = start_vpn + pages * PGSIZE;
        self.map.lock().range(start_vpn..end).next().is_none()
    }

    pub fn entries(&self) -> Vec<Arc<Spte>> {
        self.map.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().len() == 0
    }
}

impl Default for SuppPageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles a user-mode fault at `fa` with stack pointer `esp`.
///
/// `Err` means the access was illegal and the process must die with
/// status −1.
pub fn handle_fault(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    fa: usize,
    esp: usize,
    write: bool,
) -> Result<()> {
    if fa >= PHYS_BASE || fa == 0 {
        return_errno_with_message!(Errno::EFAULT, "fault outside user space");
    }
    let vpn = page_round_down(fa);

    if let Some(spte) = us.spt.lookup(vpn) {
        if write && !spte.is_writable() {
            return_errno_with_message!(Errno::EFAULT, "write to read-only page");
        }
        ensure_resident(thread, us, &spte, false)?;
        return Ok(());
    }

    // Not a known page: stack growth, or an illegal access.
    let grows_stack = esp != 0 && fa + STACK_PUSH_SLACK >= esp && fa >= PHYS_BASE - STACK_LIMIT;
    if !grows_stack {
        return_errno_with_message!(Errno::EFAULT, "access outside any segment");
    }
    let spte = Spte::new_zeros(vpn);
    us.spt.insert(spte.clone());
    ensure_resident(thread, us, &spte, false)?;
    Ok(())
}

/// Makes `spte` resident and installed in the page directory, optionally
/// pinning it against eviction in the same step.
pub fn ensure_resident(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    spte: &Arc<Spte>,
    pin: bool,
) -> Result<Arc<FrameEntry>> {
    loop {
        let plan = {
            let mut st = spte.state.lock();
            if st.busy {
                None
            } else if let Some(f) = &st.frame {
                let f = f.clone();
                if pin {
                    st.pinned = true;
                }
                // The mapping may have been cleared by a half-finished
                // eviction that then chose someone else; reinstall.
                if !us.pagedir.is_present(spte.vpn()) {
                    us.pagedir.set_page(spte.vpn(), &f, st.writable);
                }
                return Ok(f);
            } else {
                st.busy = true;
                Some(FillPlan {
                    status: st.status,
                    swap_slot: st.swap_slot,
                    backing: st.backing.as_ref().map(|b| (b.file.clone(), b.offset, b.valid_bytes)),
                })
            }
        };

        let Some(plan) = plan else {
            // Another thread is filling or evicting this page.
            crate::thread::yield_now();
            continue;
        };

        let frame = frame::alloc(thread, spte);
        let mut contents = Box::new([0u8; PGSIZE]);
        match plan.status {
            PageStatus::Zeros => {}
            PageStatus::Swap => {
                let slot = plan.swap_slot.expect("Swap status without slot");
                swap::read_page(slot, &mut contents);
                swap::free(slot);
            }
            PageStatus::Code | PageStatus::Mmap => {
                let (file, offset, valid) = plan.backing.expect("file page without backing");
                let n = file.read_at(&mut contents[..valid as usize], offset);
                debug_assert_eq!(n, valid as usize, "short read of backing file");
            }
            PageStatus::NonZeros => {
                // A non-resident NonZeros page would have gone to swap.
                unreachable!("NonZeros page with no frame and no slot")
            }
        }
        **frame.data.lock() = *contents;

        let mut st = spte.state.lock();
        st.frame = Some(frame.clone());
        if st.status == PageStatus::Swap {
            st.status = PageStatus::NonZeros;
            st.swap_slot = None;
        }
        if pin {
            st.pinned = true;
        }
        us.pagedir.set_page(spte.vpn(), &frame, st.writable);
        st.busy = false;
        return Ok(frame);
    }
}

struct FillPlan {
    status: PageStatus,
    swap_slot: Option<swap::SwapSlot>,
    backing: Option<(Arc<File>, u32, u32)>,
}

/// Releases every page of a dying process: frames back to the pool, swap
/// slots back to the bitmap, hardware mappings dropped wholesale.
pub fn destroy(us: &Arc<UserSpace>) {
    for spte in us.spt.entries() {
        loop {
            let mut st = spte.state.lock();
            if st.busy {
                drop(st);
                crate::thread::yield_now();
                continue;
            }
            if let Some(frame) = st.frame.take() {
                frame::free(&frame);
            }
            if let Some(slot) = st.swap_slot.take() {
                swap::free(slot);
            }
            break;
        }
        us.spt.remove(spte.vpn());
    }
    us.pagedir.clear_all();
}

/// Creates and materializes one writable zero page at `vpn`. Used for the
/// initial user stack page.
pub fn install_zero_page(thread: &Arc<Thread>, us: &Arc<UserSpace>, vpn: usize) -> Result<()> {
    debug_assert_eq!(vm::page_offset(vpn), 0);
    let spte = Spte::new_zeros(vpn);
    us.spt.insert(spte.clone());
    ensure_resident(thread, us, &spte, false)?;
    Ok(())
}
