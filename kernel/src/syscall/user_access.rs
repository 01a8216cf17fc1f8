// SPDX-License-Identifier: MPL-2.0

//! Validated access to user memory.
//!
//! Every byte the kernel touches on behalf of user code goes through a
//! page-directory walk that faults pages in on demand (including stack
//! growth for the buffer itself) and maintains the accessed/dirty bits.
//! An illegal address surfaces as `EFAULT`, which the dispatcher turns
//! into termination with status −1.
//!
//! Buffers handed to blocking I/O must be pinned first: [`PinnedRange`]
//! faults every page of the buffer in, marks it ineligible for eviction,
//! and unpins on drop. Without the pin, the pages could be evicted while
//! the I/O blocks and the copy would land in a reassigned frame.

use crate::prelude::*;
use crate::process::UserSpace;
use crate::thread::Thread;
use crate::vm::frame::FrameEntry;
use crate::vm::page::Spte;
use crate::vm::{self, is_user_vaddr, page_round_down, PGSIZE};

/// Resolves one user page for an access, faulting it in as needed.
fn ensure_accessible(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    addr: usize,
    write: bool,
    esp: usize,
) -> Result<Arc<FrameEntry>> {
    if !is_user_vaddr(addr) {
        return_errno!(Errno::EFAULT);
    }
    let vpn = page_round_down(addr);
    loop {
        if let Some((frame, flags)) = us.pagedir.lookup(vpn) {
            if write && !flags.contains(vm::pagedir::PdFlags::WRITABLE) {
                return_errno_with_message!(Errno::EFAULT, "write to read-only page");
            }
            us.pagedir.mark_access(vpn, write);
            return Ok(frame);
        }
        vm::page::handle_fault(thread, us, addr, esp, write)?;
    }
}

/// Copies `buf.len()` bytes from user memory at `addr`.
pub(crate) fn read_bytes_in(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    addr: usize,
    buf: &mut [u8],
    esp: usize,
) -> Result<()> {
    let mut done = 0usize;
    while done < buf.len() {
        let at = addr.checked_add(done).ok_or(Error::new(Errno::EFAULT))?;
        let frame = ensure_accessible(thread, us, at, false, esp)?;
        let ofs = vm::page_offset(at);
        let chunk = (buf.len() - done).min(PGSIZE - ofs);
        let data = frame.data.lock();
        buf[done..done + chunk].copy_from_slice(&data[ofs..ofs + chunk]);
        done += chunk;
    }
    Ok(())
}

/// Copies `bytes` into user memory at `addr`.
pub(crate) fn write_bytes_in(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    addr: usize,
    bytes: &[u8],
    esp: usize,
) -> Result<()> {
    let mut done = 0usize;
    while done < bytes.len() {
        let at = addr.checked_add(done).ok_or(Error::new(Errno::EFAULT))?;
        let frame = ensure_accessible(thread, us, at, true, esp)?;
        let ofs = vm::page_offset(at);
        let chunk = (bytes.len() - done).min(PGSIZE - ofs);
        let mut data = frame.data.lock();
        data[ofs..ofs + chunk].copy_from_slice(&bytes[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

pub(crate) fn read_u32_in(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    addr: usize,
    esp: usize,
) -> Result<u32> {
    let mut b = [0u8; 4];
    read_bytes_in(thread, us, addr, &mut b, esp)?;
    Ok(u32::from_le_bytes(b))
}

/// Copies a NUL-terminated string out of user memory, byte-validated,
/// bounded by `max` bytes.
pub(crate) fn copy_cstr_in(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    addr: usize,
    max: usize,
    esp: usize,
) -> Result<String> {
    let mut out = Vec::new();
    loop {
        if out.len() >= max {
            return_errno!(Errno::ENAMETOOLONG);
        }
        let at = addr.checked_add(out.len()).ok_or(Error::new(Errno::EFAULT))?;
        let mut b = [0u8; 1];
        read_bytes_in(thread, us, at, &mut b, esp)?;
        if b[0] == 0 {
            break;
        }
        out.push(b[0]);
    }
    String::from_utf8(out).map_err(|_| Error::new(Errno::EINVAL))
}

/// A user buffer faulted in and pinned for the duration of a blocking
/// I/O. Unpins on drop.
pub(crate) struct PinnedRange {
    sptes: Vec<Arc<Spte>>,
    chunks: Vec<PinnedChunk>,
}

/// One page-sized piece of the pinned buffer.
pub(crate) struct PinnedChunk {
    pub frame: Arc<FrameEntry>,
    /// Offset of this chunk within the frame.
    pub frame_ofs: usize,
    /// Offset of this chunk within the user buffer.
    pub buf_ofs: usize,
    pub len: usize,
}

impl PinnedRange {
    /// Faults in and pins every page of `[addr, addr + len)`. `write`
    /// demands writable pages (a read syscall stores into the buffer).
    pub(crate) fn pin(
        thread: &Arc<Thread>,
        us: &Arc<UserSpace>,
        addr: usize,
        len: usize,
        write: bool,
        esp: usize,
    ) -> Result<PinnedRange> {
        let mut range = PinnedRange {
            sptes: Vec::new(),
            chunks: Vec::new(),
        };
        let mut done = 0usize;
        while done < len {
            let at = addr.checked_add(done).ok_or(Error::new(Errno::EFAULT))?;
            if !is_user_vaddr(at) {
                return_errno!(Errno::EFAULT);
            }
            let vpn = page_round_down(at);
            let spte = loop {
                match us.spt.lookup(vpn) {
                    Some(spte) => break spte,
                    // May be a stack page the buffer itself grows into.
                    None => vm::page::handle_fault(thread, us, at, esp, write)?,
                }
            };
            if write && !spte.is_writable() {
                return_errno_with_message!(Errno::EFAULT, "write to read-only page");
            }
            let frame = vm::page::ensure_resident(thread, us, &spte, true)?;
            us.pagedir.mark_access(vpn, write);

            let ofs = vm::page_offset(at);
            let chunk = (len - done).min(PGSIZE - ofs);
            range.sptes.push(spte);
            range.chunks.push(PinnedChunk {
                frame,
                frame_ofs: ofs,
                buf_ofs: done,
                len: chunk,
            });
            done += chunk;
        }
        Ok(range)
    }

    pub(crate) fn chunks(&self) -> &[PinnedChunk] {
        &self.chunks
    }
}

impl Drop for PinnedRange {
    fn drop(&mut self) {
        for spte in &self.sptes {
            spte.set_pinned(false);
        }
    }
}
