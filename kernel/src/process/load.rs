// SPDX-License-Identifier: MPL-2.0

//! Executable images.
//!
//! Image parsing proper is a collaborator; this module implements the
//! loader contract over a minimal segment-table format. An image names
//! its entry function (resolved through the boot-time program registry,
//! which stands in for machine code) and lists loadable segments. The
//! loader installs every segment page lazily as a file-backed entry in
//! the supplemental page table, denies writes to the image file while it
//! is mapped, and builds the initial argument stack.
//!
//! On-disk layout, all little-endian u32 unless noted:
//! magic, entry-name length, entry-name bytes, segment count, then per
//! segment: vaddr, file offset, file bytes, memory bytes, writable.

use hashbrown::HashMap;

use crate::fs::{self, File, FsNode};
use crate::prelude::*;
use crate::process::{UserContext, UserSpace};
use crate::syscall::user_access;
use crate::thread::Thread;
use crate::vm::page::{FileBacking, Spte};
use crate::vm::{self, PGSIZE, PHYS_BASE};

const IMAGE_MAGIC: u32 = 0x474D4956; // "VIMG"

/// A user program body. Receives the simulated CPU context; the return
/// value becomes the exit status, as if `main`'s result were passed to
/// `exit`.
pub type ProgramFn = fn(&mut UserContext) -> i32;

lazy_static::lazy_static! {
    static ref REGISTRY: SpinLock<HashMap<String, ProgramFn>> = SpinLock::new(HashMap::new());
}

/// Registers `f` as the code behind entry symbol `name`.
pub fn register_program(name: &str, f: ProgramFn) {
    REGISTRY.lock().insert(name.to_string(), f);
}

pub(crate) fn reset_registry() {
    REGISTRY.lock().clear();
}

/// A loadable segment handed to [`build_image`].
pub struct ImageSegment {
    pub vaddr: usize,
    pub data: Vec<u8>,
    /// Total in-memory size; the tail past `data` is zero-filled.
    pub mem_bytes: usize,
    pub writable: bool,
}

/// Serializes an image file that [`load`] accepts.
pub fn build_image(entry: &str, segments: &[ImageSegment]) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
    image.extend_from_slice(&(entry.len() as u32).to_le_bytes());
    image.extend_from_slice(entry.as_bytes());
    image.extend_from_slice(&(segments.len() as u32).to_le_bytes());

    // Segment data follows the header region sequentially.
    let header_len = image.len() + segments.len() * 20;
    let mut offset = header_len;
    for seg in segments {
        image.extend_from_slice(&(seg.vaddr as u32).to_le_bytes());
        image.extend_from_slice(&(offset as u32).to_le_bytes());
        image.extend_from_slice(&(seg.data.len() as u32).to_le_bytes());
        image.extend_from_slice(&(seg.mem_bytes as u32).to_le_bytes());
        image.extend_from_slice(&(seg.writable as u32).to_le_bytes());
        offset += seg.data.len();
    }
    for seg in segments {
        image.extend_from_slice(&seg.data);
    }
    image
}

struct SegmentHeader {
    vaddr: usize,
    file_ofs: u32,
    file_bytes: u32,
    mem_bytes: u32,
    writable: bool,
}

fn read_u32(file: &File, offset: u32) -> Result<u32> {
    let mut b = [0u8; 4];
    if file.read_at(&mut b, offset) != 4 {
        return_errno_with_message!(Errno::ENOEXEC, "truncated image");
    }
    Ok(u32::from_le_bytes(b))
}

/// Loads the executable named by `cmdline`'s first token into `us` and
/// sets up the argument stack. Returns the entry function and the
/// initial stack pointer.
pub(crate) fn load(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    cmdline: &str,
) -> Result<(ProgramFn, usize)> {
    let prog = cmdline
        .split_whitespace()
        .next()
        .ok_or(Error::new(Errno::EINVAL))?;

    let file = match fs::open(prog)? {
        FsNode::File(f) => f,
        FsNode::Dir(_) => return_errno!(Errno::EISDIR),
    };

    if read_u32(&file, 0)? != IMAGE_MAGIC {
        return_errno_with_message!(Errno::ENOEXEC, "bad image magic");
    }
    let entry_len = read_u32(&file, 4)?;
    if entry_len == 0 || entry_len > 64 {
        return_errno_with_message!(Errno::ENOEXEC, "bad entry name");
    }
    let mut name_bytes = vec![0u8; entry_len as usize];
    if file.read_at(&mut name_bytes, 8) != entry_len as usize {
        return_errno_with_message!(Errno::ENOEXEC, "truncated image");
    }
    let entry_name =
        String::from_utf8(name_bytes).map_err(|_| Error::new(Errno::ENOEXEC))?;
    let entry = {
        let registry = REGISTRY.lock();
        *registry
            .get(&entry_name)
            .ok_or(Error::with_message(Errno::ENOEXEC, "unknown entry symbol"))?
    };

    let seg_table = 8 + entry_len;
    let nsegs = read_u32(&file, seg_table)?;
    if nsegs > 64 {
        return_errno_with_message!(Errno::ENOEXEC, "unreasonable segment count");
    }
    let mut segments = Vec::new();
    for i in 0..nsegs {
        let at = seg_table + 4 + i * 20;
        segments.push(SegmentHeader {
            vaddr: read_u32(&file, at)? as usize,
            file_ofs: read_u32(&file, at + 4)?,
            file_bytes: read_u32(&file, at + 8)?,
            mem_bytes: read_u32(&file, at + 12)?,
            writable: read_u32(&file, at + 16)? != 0,
        });
    }

    // The image stays read-only while it is mapped.
    file.deny_write();
    *us.executable.lock() = Some(file.clone());

    for seg in &segments {
        install_segment(us, &file, seg)?;
    }

    let esp = setup_stack(thread, us, cmdline)?;
    Ok((entry, esp))
}

/// Installs one segment as lazy file-backed pages.
fn install_segment(us: &Arc<UserSpace>, file: &Arc<File>, seg: &SegmentHeader) -> Result<()> {
    if vm::page_offset(seg.vaddr) != 0 {
        return_errno_with_message!(Errno::ENOEXEC, "unaligned segment");
    }
    if seg.file_bytes > seg.mem_bytes {
        return_errno_with_message!(Errno::ENOEXEC, "segment larger in file than in memory");
    }
    if seg.mem_bytes == 0 {
        return Ok(());
    }
    let pages = (seg.mem_bytes as usize + PGSIZE - 1) / PGSIZE;
    let end = seg
        .vaddr
        .checked_add(pages * PGSIZE)
        .ok_or(Error::new(Errno::ENOEXEC))?;
    if !vm::is_user_vaddr(end - 1) {
        return_errno_with_message!(Errno::ENOEXEC, "segment outside user space");
    }
    if !us.spt.range_is_empty(seg.vaddr, pages) {
        return_errno_with_message!(Errno::ENOEXEC, "overlapping segments");
    }

    for i in 0..pages {
        let page_ofs = i * PGSIZE;
        let valid = (seg.file_bytes as usize)
            .saturating_sub(page_ofs)
            .min(PGSIZE) as u32;
        let spte = Spte::new_code(
            seg.vaddr + page_ofs,
            FileBacking {
                file: file.clone(),
                offset: seg.file_ofs + page_ofs as u32,
                valid_bytes: valid,
            },
            seg.writable,
        );
        us.spt.insert(spte);
    }
    Ok(())
}

/// Builds the initial user stack: argument strings (right to left), word
/// alignment, the NULL sentinel, the argv array, argv, argc, and a zero
/// return address. Returns the resulting stack pointer.
fn setup_stack(thread: &Arc<Thread>, us: &Arc<UserSpace>, cmdline: &str) -> Result<usize> {
    vm::page::install_zero_page(thread, us, PHYS_BASE - PGSIZE)?;

    let args: Vec<&str> = cmdline.split_whitespace().collect();
    let mut esp = PHYS_BASE;

    let mut push_bytes = |esp: &mut usize, bytes: &[u8]| -> Result<()> {
        *esp -= bytes.len();
        user_access::write_bytes_in(thread, us, *esp, bytes, *esp)
    };

    // Strings, last argument first.
    let mut arg_addrs = Vec::with_capacity(args.len());
    for arg in args.iter().rev() {
        let mut bytes = arg.as_bytes().to_vec();
        bytes.push(0);
        push_bytes(&mut esp, &bytes)?;
        arg_addrs.push(esp);
    }
    esp &= !3;

    // argv[argc] = NULL, then the pointers, last first.
    push_bytes(&mut esp, &0u32.to_le_bytes())?;
    for addr in &arg_addrs {
        push_bytes(&mut esp, &(*addr as u32).to_le_bytes())?;
    }
    let argv = esp;
    push_bytes(&mut esp, &(argv as u32).to_le_bytes())?;
    push_bytes(&mut esp, &(args.len() as u32).to_le_bytes())?;
    // Fake return address.
    push_bytes(&mut esp, &0u32.to_le_bytes())?;

    Ok(esp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_header_layout() {
        let image = build_image(
            "main",
            &[ImageSegment {
                vaddr: 0x8000,
                data: vec![1, 2, 3],
                mem_bytes: PGSIZE,
                writable: true,
            }],
        );
        assert_eq!(&image[0..4], &IMAGE_MAGIC.to_le_bytes());
        assert_eq!(&image[4..8], &4u32.to_le_bytes());
        assert_eq!(&image[8..12], b"main");
        assert_eq!(&image[12..16], &1u32.to_le_bytes());
        // One 20-byte segment header, then the segment bytes.
        let seg = &image[16..36];
        assert_eq!(&seg[0..4], &0x8000u32.to_le_bytes());
        assert_eq!(&seg[4..8], &36u32.to_le_bytes());
        assert_eq!(&seg[8..12], &3u32.to_le_bytes());
        assert_eq!(&seg[12..16], &(PGSIZE as u32).to_le_bytes());
        assert_eq!(&seg[16..20], &1u32.to_le_bytes());
        assert_eq!(&image[36..], &[1, 2, 3]);
    }

    #[test]
    fn segment_data_offsets_are_sequential() {
        let image = build_image(
            "m",
            &[
                ImageSegment {
                    vaddr: 0x1000,
                    data: vec![9; 5],
                    mem_bytes: 5,
                    writable: false,
                },
                ImageSegment {
                    vaddr: 0x2000,
                    data: vec![8; 7],
                    mem_bytes: 7,
                    writable: false,
                },
            ],
        );
        let header_len = 4 + 4 + 1 + 4 + 2 * 20;
        let first_ofs = u32::from_le_bytes(image[13 + 4..13 + 8].try_into().unwrap());
        let second_ofs = u32::from_le_bytes(image[33 + 4..33 + 8].try_into().unwrap());
        assert_eq!(first_ofs as usize, header_len);
        assert_eq!(second_ofs, first_ofs + 5);
        assert_eq!(image.len(), header_len + 5 + 7);
    }
}
