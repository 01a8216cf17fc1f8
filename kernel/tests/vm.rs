// SPDX-License-Identifier: MPL-2.0

//! Virtual memory: mmap write-back, stack growth, eviction to swap,
//! lazy code pages, and syscall-buffer pinning.

use std::sync::Arc;

use vireo_kernel::fs::{self, File, FsNode};
use vireo_kernel::process::{self, build_image, register_program, ImageSegment};
use vireo_kernel::vm::{frame, swap, PGSIZE, PHYS_BASE};
use vireo_kernel::{thread, BootOptions, Kernel};

fn open_file(path: &str) -> Arc<File> {
    match fs::open(path).expect("open failed") {
        FsNode::File(f) => f,
        FsNode::Dir(_) => panic!("{} is a directory", path),
    }
}

fn write_file(path: &str, bytes: &[u8]) {
    fs::create(path, 0).unwrap();
    let f = open_file(path);
    assert_eq!(f.write_at(bytes, 0), bytes.len());
}

fn install_program(name: &str, f: process::ProgramFn) {
    register_program(name, f);
    write_file(name, &build_image(name, &[]));
}

/// The S5 scenario: a byte stored through a mapping lands in the file
/// after munmap, and the mapping survives closing the descriptor.
#[test]
fn mmap_store_reaches_the_file() {
    let _kernel = Kernel::boot(BootOptions::default());

    let mut content = b"abcd".to_vec();
    content.resize(PGSIZE, 0);
    write_file("mfile", &content);

    install_program("mmapper", |ctx| {
        let fd = ctx.open("mfile");
        if fd < 2 {
            return 10;
        }
        let id = ctx.mmap(fd, 0x2000_0000);
        if id == -1 {
            return 11;
        }
        ctx.close(fd); // the mapping must survive this
        if ctx.read_u8(0x2000_0000) != b'a' {
            return 12;
        }
        ctx.write_u8(0x2000_0000, b'X');
        if ctx.read_u8(0x2000_0003) != b'd' {
            return 13;
        }
        ctx.munmap(id);
        0
    });

    let pid = process::exec("mmapper").unwrap();
    assert_eq!(process::wait(pid), 0);

    let f = open_file("mfile");
    let mut b = [0u8; 4];
    assert_eq!(f.read_at(&mut b, 0), 4);
    assert_eq!(&b, b"Xbcd");
}

/// The S6 scenario: an access within the push slack below the stack
/// pointer grows the stack with a fresh zero page; one further below is
/// fatal.
#[test]
fn stack_grows_within_push_slack_only() {
    let _kernel = Kernel::boot(BootOptions::default());

    install_program("stacker", |ctx| {
        // Simulate a deep stack: esp well below any mapped page.
        ctx.esp = PHYS_BASE - 0x80000;
        let v = ctx.read_u8(ctx.esp - 28);
        v as i32 // the fresh page reads as zeros
    });
    install_program("wildstack", |ctx| {
        ctx.esp = PHYS_BASE - 0x80000;
        let _ = ctx.read_u8(ctx.esp - 64);
        5 // never reached
    });

    let pid = process::exec("stacker").unwrap();
    assert_eq!(process::wait(pid), 0);

    let pid = process::exec("wildstack").unwrap();
    assert_eq!(process::wait(pid), -1);
}

#[test]
fn stack_cannot_grow_past_its_limit() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("deepstack", |ctx| {
        // Below PHYS_BASE − 8 MB: outside the stack region entirely.
        ctx.esp = PHYS_BASE - 9 * 1024 * 1024;
        let _ = ctx.read_u8(ctx.esp);
        5
    });
    let pid = process::exec("deepstack").unwrap();
    assert_eq!(process::wait(pid), -1);
}

#[test]
fn working_set_larger_than_frame_pool_swaps_correctly() {
    let _kernel = Kernel::boot(BootOptions {
        user_frames: 8,
        ..Default::default()
    });

    install_program("thrash", |ctx| {
        let pages = 16usize;
        ctx.esp = PHYS_BASE - 32 * PGSIZE;
        let base = ctx.esp;
        for i in 0..pages {
            ctx.write_u8(base + i * PGSIZE + 7, i as u8 + 1);
        }
        // Re-touching everything forces swap-ins of evicted pages.
        for i in 0..pages {
            if ctx.read_u8(base + i * PGSIZE + 7) != i as u8 + 1 {
                return 20 + i as i32;
            }
        }
        0
    });

    let pid = process::exec("thrash").unwrap();
    assert_eq!(process::wait(pid), 0);

    // Exit returned every frame and swap slot.
    assert_eq!(frame::frames_in_use(), 0);
    assert_eq!(swap::allocated_slots(), 0);
}

#[test]
fn code_pages_load_lazily_and_zero_fill() {
    let _kernel = Kernel::boot(BootOptions::default());

    let seg_addr = 0x0804_8000usize;
    register_program("codeseg", move |ctx| {
        let base = 0x0804_8000usize;
        if ctx.read_u8(base) != 7 || ctx.read_u8(base + 99) != 7 {
            return 30;
        }
        // Past the file bytes, the page is zero-filled.
        if ctx.read_u8(base + 100) != 0 || ctx.read_u8(base + PGSIZE - 1) != 0 {
            return 31;
        }
        0
    });
    let image = build_image(
        "codeseg",
        &[ImageSegment {
            vaddr: seg_addr,
            data: vec![7u8; 100],
            mem_bytes: PGSIZE,
            writable: false,
        }],
    );
    write_file("codeseg", &image);

    let pid = process::exec("codeseg").unwrap();
    assert_eq!(process::wait(pid), 0);
}

#[test]
fn store_to_read_only_code_page_kills() {
    let _kernel = Kernel::boot(BootOptions::default());

    register_program("codewrite", |ctx| {
        ctx.write_u8(0x0804_8000, 1);
        40 // never reached
    });
    let image = build_image(
        "codewrite",
        &[ImageSegment {
            vaddr: 0x0804_8000,
            data: vec![7u8; 100],
            mem_bytes: PGSIZE,
            writable: false,
        }],
    );
    write_file("codewrite", &image);

    let pid = process::exec("codewrite").unwrap();
    assert_eq!(process::wait(pid), -1);
}

#[test]
fn mmap_argument_validation() {
    let _kernel = Kernel::boot(BootOptions::default());

    write_file("mapfile", &vec![1u8; 2 * PGSIZE]);
    write_file("empty", &[]);

    install_program("mmaprej", |ctx| {
        let fd = ctx.open("mapfile");
        if ctx.mmap(fd, 0x2000_0004) != -1 {
            return 50; // unaligned
        }
        if ctx.mmap(fd, 0) != -1 {
            return 51; // null address
        }
        if ctx.mmap(1, 0x2000_0000) != -1 {
            return 52; // console descriptor
        }
        let empty = ctx.open("empty");
        if ctx.mmap(empty, 0x2000_0000) != -1 {
            return 53; // zero-length file
        }
        let id = ctx.mmap(fd, 0x2000_0000);
        if id == -1 {
            return 54;
        }
        if ctx.mmap(fd, 0x2000_1000) != -1 {
            return 55; // overlaps the live mapping's second page
        }
        ctx.munmap(id);
        if ctx.mmap(fd, 0x2000_1000) == -1 {
            return 56; // free again after munmap
        }
        0
    });

    let pid = process::exec("mmaprej").unwrap();
    assert_eq!(process::wait(pid), 0);
}

#[test]
fn dirty_mmap_pages_write_back_under_eviction() {
    let _kernel = Kernel::boot(BootOptions {
        user_frames: 8,
        ..Default::default()
    });

    write_file("evfile", &vec![0u8; 4 * PGSIZE]);

    install_program("mmapevict", |ctx| {
        let fd = ctx.open("evfile");
        let id = ctx.mmap(fd, 0x3000_0000);
        if id == -1 {
            return 60;
        }
        for i in 0..4usize {
            ctx.write_u8(0x3000_0000 + i * PGSIZE, 0xB0 + i as u8);
        }
        // Blow the frame pool so the dirty mapping pages get evicted
        // (written back to the file) and faulted in again.
        ctx.esp = PHYS_BASE - 32 * PGSIZE;
        for i in 0..12usize {
            ctx.write_u8(ctx.esp + i * PGSIZE, 1);
        }
        for i in 0..4usize {
            if ctx.read_u8(0x3000_0000 + i * PGSIZE) != 0xB0 + i as u8 {
                return 61 + i as i32;
            }
        }
        ctx.munmap(id);
        ctx.close(fd);
        0
    });

    let pid = process::exec("mmapevict").unwrap();
    assert_eq!(process::wait(pid), 0);

    let f = open_file("evfile");
    let mut b = [0u8; 1];
    for i in 0..4u32 {
        assert_eq!(f.read_at(&mut b, i * PGSIZE as u32), 1);
        assert_eq!(b[0], 0xB0 + i as u8, "page {} not written back", i);
    }
}

#[test]
fn read_syscall_grows_and_pins_its_buffer() {
    let _kernel = Kernel::boot(BootOptions::default());

    let payload: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
    write_file("pindata", &payload);

    install_program("pinread", |ctx| {
        let fd = ctx.open("pindata");
        if fd < 2 {
            return 70;
        }
        // The buffer sits on not-yet-mapped stack pages.
        ctx.esp = PHYS_BASE - 0x40000;
        let buf = ctx.esp;
        if ctx.read(fd, buf, 600) != 600 {
            return 71;
        }
        for i in 0..600usize {
            if ctx.read_u8(buf + i) != (i % 251) as u8 {
                return 72;
            }
        }
        ctx.close(fd);
        0
    });

    let pid = process::exec("pinread").unwrap();
    assert_eq!(process::wait(pid), 0);
}

#[test]
fn exit_releases_every_frame() {
    let _kernel = Kernel::boot(BootOptions::default());
    install_program("toucher", |ctx| {
        ctx.esp = PHYS_BASE - 16 * PGSIZE;
        for i in 0..8usize {
            ctx.write_u8(ctx.esp + i * PGSIZE, 3);
        }
        0
    });
    let pid = process::exec("toucher").unwrap();
    assert_eq!(process::wait(pid), 0);
    assert_eq!(frame::frames_in_use(), 0);
    assert_eq!(swap::allocated_slots(), 0);
    thread::yield_now();
}
