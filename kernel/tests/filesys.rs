// SPDX-License-Identifier: MPL-2.0

//! File-system behavior: growth, directories, paths, removal.

use std::sync::Arc;

use proptest::prelude::*;
use vireo_kernel::fs::{self, inode, File, FsNode};
use vireo_kernel::{BootOptions, Kernel};

fn open_file(path: &str) -> Arc<File> {
    match fs::open(path).expect("open failed") {
        FsNode::File(f) => f,
        FsNode::Dir(_) => panic!("{} is a directory", path),
    }
}

#[test]
fn grow_then_read_past_end_is_short() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::create("/a", 0).unwrap();
    let f = open_file("/a");

    let data = vec![0x5Au8; 600];
    assert_eq!(f.write_at(&data, 0), 600);
    assert_eq!(f.len(), 600);

    let mut buf = vec![0u8; 100];
    let n = f.read_at(&mut buf, 580);
    assert_eq!(n, 20, "read overlapping EOF must return exactly the tail");
    assert!(buf[..20].iter().all(|&b| b == 0x5A));

    // Fully past EOF: nothing.
    assert_eq!(f.read_at(&mut buf, 600), 0);
    assert_eq!(f.read_at(&mut buf, 7000), 0);
}

#[test]
fn write_past_eof_zero_fills_the_gap() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::create("/gap", 0).unwrap();
    let f = open_file("/gap");

    assert_eq!(f.write_at(b"tail", 2000), 4);
    assert_eq!(f.len(), 2004);
    assert_eq!(f.inode().num_blocks(), 4); // ceil(2004 / 512)

    let mut buf = vec![0xFFu8; 2004];
    assert_eq!(f.read_at(&mut buf, 0), 2004);
    assert!(buf[..2000].iter().all(|&b| b == 0));
    assert_eq!(&buf[2000..], b"tail");
}

#[test]
fn growth_crosses_indirect_boundary() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::create("/big", 0).unwrap();
    let f = open_file("/big");

    // One byte in block 122 + 5 forces the indirect level into existence.
    let offset = (inode::FIRSTLEVEL as u32 + 5) * 512;
    assert_eq!(f.write_at(&[7u8], offset), 1);
    assert_eq!(f.len(), offset + 1);
    assert_eq!(f.inode().num_blocks(), inode::FIRSTLEVEL as u32 + 6);

    let mut b = [0u8; 1];
    assert_eq!(f.read_at(&mut b, offset), 1);
    assert_eq!(b[0], 7);
    // The gap before it reads as zeros.
    assert_eq!(f.read_at(&mut b, 1000), 1);
    assert_eq!(b[0], 0);
}

#[test]
fn growth_crosses_doubly_indirect_boundary() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::create("/huge", 0).unwrap();
    let f = open_file("/huge");

    let blocks = (inode::FIRSTLEVEL + inode::PTRS_PER_SECTOR + 3) as u32;
    let offset = blocks * 512 - 1; // last byte of block 252
    assert_eq!(f.write_at(&[9u8], offset), 1);
    assert_eq!(f.len(), offset + 1);
    assert_eq!(f.inode().num_blocks(), blocks);

    let mut b = [0u8; 1];
    assert_eq!(f.read_at(&mut b, offset), 1);
    assert_eq!(b[0], 9);
}

#[test]
fn allocation_failure_returns_zero_bytes() {
    // A deliberately tiny disk: the write cannot be fully allocated.
    let _kernel = Kernel::boot(BootOptions {
        fs_sectors: 16,
        ..Default::default()
    });
    fs::create("/f", 0).unwrap();
    let f = open_file("/f");
    let huge = vec![1u8; 64 * 512];
    assert_eq!(f.write_at(&huge, 0), 0);
    assert_eq!(f.len(), 0, "a failed extension must not change the length");
}

#[test]
fn directories_nest_and_resolve() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::mkdir("/d").unwrap();
    fs::mkdir("/d/e").unwrap();
    fs::create("/d/e/f", 10).unwrap();

    // Absolute with . and .. mixed in.
    let f = open_file("/d/./e/../e/f");
    assert_eq!(f.len(), 10);

    // Relative through the working directory, inherited semantics.
    fs::chdir("/d").unwrap();
    let f2 = open_file("e/f");
    assert_eq!(f2.inode().inumber(), f.inode().inumber());
    fs::chdir("/").unwrap();

    // Root's parent is root.
    let root = fs::resolve("/..").unwrap();
    assert_eq!(root.inumber(), fs::ROOT_DIR_SECTOR);
    root.close();
}

#[test]
fn directory_entries_are_unique_and_bounded() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::create("/x", 0).unwrap();
    assert!(fs::create("/x", 0).is_err(), "duplicate names must fail");

    assert!(fs::create("/abcdefghijklmn", 0).is_ok()); // 14 chars
    assert!(fs::create("/abcdefghijklmno", 0).is_err()); // 15 chars

    assert!(fs::create("/", 0).is_err());
    assert!(fs::mkdir("/.").is_err());
    assert!(fs::mkdir("/..").is_err());
}

#[test]
fn remove_semantics() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::mkdir("/d").unwrap();
    fs::create("/d/f", 100).unwrap();

    // Non-empty directory: refuse.
    assert!(fs::remove("/d").is_err());

    // Removing an open file succeeds; the handle keeps working and the
    // path is gone at once.
    let f = open_file("/d/f");
    let used_before = fs::free_map::allocated_sectors();
    fs::remove("/d/f").unwrap();
    assert!(fs::open("/d/f").is_err());
    let mut buf = [0u8; 4];
    assert_eq!(f.read_at(&mut buf, 0), 4);
    assert_eq!(f.write_at(b"zz", 0), 2);

    // Final close frees the storage (data block + inode sector).
    drop(f);
    assert!(fs::free_map::allocated_sectors() < used_before);

    // Now empty: removable.
    fs::remove("/d").unwrap();
    assert!(fs::open("/d").is_err());
}

#[test]
fn removed_cwd_blocks_relative_resolution() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::mkdir("/gone").unwrap();
    fs::chdir("/gone").unwrap();
    // The directory is our cwd, so removal is refused while we sit in it.
    assert!(fs::remove("/gone").is_err());
    fs::chdir("/").unwrap();
    fs::remove("/gone").unwrap();
}

#[test]
fn open_inode_table_dedups_by_sector() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::create("/same", 0).unwrap();
    let a = open_file("/same");
    let b = open_file("/same");
    assert_eq!(a.inode().inumber(), b.inode().inumber());
    assert!(Arc::ptr_eq(a.inode(), b.inode()));
    assert_eq!(a.inode().open_count(), 2);
    drop(a);
    assert_eq!(b.inode().open_count(), 1);
}

#[test]
fn deny_write_blocks_until_allowed() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::create("/ro", 0).unwrap();
    let writer = open_file("/ro");
    let guard = open_file("/ro");
    guard.deny_write();
    assert_eq!(writer.write_at(b"nope", 0), 0);
    drop(guard); // re-allows on close
    assert_eq!(writer.write_at(b"yes", 0), 3);
}

#[test]
fn file_cursor_tracks_reads_writes_and_seeks() {
    let _kernel = Kernel::boot(BootOptions::default());
    fs::create("/cur", 0).unwrap();
    let f = open_file("/cur");
    assert_eq!(f.write(b"hello world"), 11);
    assert_eq!(f.tell(), 11);
    f.seek(6);
    let mut buf = [0u8; 5];
    assert_eq!(f.read(&mut buf), 5);
    assert_eq!(&buf, b"world");
    assert_eq!(f.tell(), 11);

    // An independent handle has its own cursor.
    let g = f.reopen();
    assert_eq!(g.tell(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Writes strictly before EOF compose last-write-wins, and any read
    /// overlapping EOF returns exactly the available bytes.
    #[test]
    fn writes_compose_last_write_wins(
        ops in prop::collection::vec(
            (0u32..2048, 1usize..256, any::<u8>()),
            1..24,
        ),
        read_ofs in 0u32..4096,
        read_len in 1usize..512,
    ) {
        let _kernel = Kernel::boot(BootOptions::default());
        fs::create("/model", 0).unwrap();
        let f = open_file("/model");
        let mut model: Vec<u8> = Vec::new();

        for (ofs, len, byte) in ops {
            let data = vec![byte; len];
            prop_assert_eq!(f.write_at(&data, ofs), len);
            let end = ofs as usize + len;
            if model.len() < end {
                model.resize(end, 0);
            }
            model[ofs as usize..end].copy_from_slice(&data);
        }

        prop_assert_eq!(f.len() as usize, model.len());

        let mut whole = vec![0u8; model.len()];
        prop_assert_eq!(f.read_at(&mut whole, 0), model.len());
        prop_assert_eq!(&whole, &model);

        let mut buf = vec![0u8; read_len];
        let expect = model.len().saturating_sub(read_ofs as usize).min(read_len);
        prop_assert_eq!(f.read_at(&mut buf, read_ofs), expect);
        if expect > 0 {
            prop_assert_eq!(&buf[..expect], &model[read_ofs as usize..read_ofs as usize + expect]);
        }
    }
}
