// SPDX-License-Identifier: MPL-2.0

//! The file system.
//!
//! Layout: sector 0 is reserved for the free-map file inode, sector 1
//! holds the root directory inode. Path resolution tokenizes on `/`,
//! reroots on a leading slash, and walks `.`/`..`; the working directory
//! is per-thread and inherited at spawn.
//!
//! A single coarse lock ([`fs_lock`]) serializes file operations at the
//! system-call boundary. The layers below have their own finer locking
//! (per-inode, per-cache-slot), which internal writers such as page
//! eviction rely on directly without taking the coarse lock.

use crate::device::Sector;
use crate::prelude::*;
use crate::sync::Lock;

pub mod cache;
pub mod directory;
pub mod file;
pub mod free_map;
pub mod inode;

pub use directory::{Dir, NAME_MAX};
pub use file::File;

use inode::Inode;

/// Sector of the free-map file inode.
pub const FREE_MAP_SECTOR: Sector = 0;
/// Sector of the root directory inode.
pub const ROOT_DIR_SECTOR: Sector = 1;

lazy_static::lazy_static! {
    static ref FS_LOCK: Lock = Lock::new();
}

/// The coarse file-system lock serializing `file_*` operations at the
/// syscall boundary.
pub fn fs_lock() -> &'static Lock {
    &FS_LOCK
}

/// Initializes the file system over the registered fs device.
pub(crate) fn init(sectors: usize, format_disk: bool) -> Result<()> {
    free_map::init(sectors, 2);
    if format_disk {
        format()
    } else {
        Ok(())
    }
}

pub(crate) fn reset() {
    inode::reset();
    free_map::reset();
}

/// Writes an empty file system: the reserved free-map inode and an empty
/// root directory.
fn format() -> Result<()> {
    inode::create(FREE_MAP_SECTOR, 0, true)?;
    directory::create(ROOT_DIR_SECTOR, ROOT_DIR_SECTOR)
}

/// An opened path: either kind of node can sit behind a descriptor.
pub enum FsNode {
    File(Arc<File>),
    Dir(Arc<Dir>),
}

/// Opens the directory resolution starts from for `path`.
fn start_dir(path: &str) -> Result<Dir> {
    if path.starts_with('/') {
        return Ok(Dir::open_root());
    }
    match current_thread!().cwd_inode() {
        Some(cwd) => {
            if cwd.is_removed() {
                return_errno_with_message!(Errno::ENOENT, "cwd removed");
            }
            Ok(Dir::open(cwd.reopen()))
        }
        None => Ok(Dir::open_root()),
    }
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Resolves `path` to an open inode.
pub fn resolve(path: &str) -> Result<Arc<Inode>> {
    if path.is_empty() {
        return_errno!(Errno::ENOENT);
    }
    let mut dir = start_dir(path)?;
    let comps = components(path);
    if comps.is_empty() {
        // "/" or a path that collapses to the start directory.
        return Ok(dir.inode().reopen());
    }

    for (i, comp) in comps.iter().enumerate() {
        let inode = dir.lookup(comp).ok_or(Error::new(Errno::ENOENT))?;
        if inode.is_removed() {
            inode.close();
            return_errno!(Errno::ENOENT);
        }
        if i + 1 == comps.len() {
            return Ok(inode);
        }
        if inode.is_file() {
            inode.close();
            return_errno!(Errno::ENOTDIR);
        }
        dir = Dir::open(inode);
    }
    unreachable!()
}

/// Resolves everything up to the final component, returning the open
/// parent directory and the final name.
fn resolve_parent(path: &str) -> Result<(Dir, String)> {
    if path.is_empty() {
        return_errno!(Errno::ENOENT);
    }
    let comps = components(path);
    let Some((last, parents)) = comps.split_last() else {
        // "/" has no final component to create or remove.
        return_errno!(Errno::EBUSY);
    };

    let mut dir = start_dir(path)?;
    for comp in parents {
        let inode = dir.lookup(comp).ok_or(Error::new(Errno::ENOENT))?;
        if inode.is_removed() || inode.is_file() {
            let is_file = inode.is_file();
            inode.close();
            if is_file {
                return_errno!(Errno::ENOTDIR);
            }
            return_errno!(Errno::ENOENT);
        }
        dir = Dir::open(inode);
    }
    Ok((dir, last.to_string()))
}

/// Creates a file of `initial_size` zero bytes at `path`.
pub fn create(path: &str, initial_size: u32) -> Result<()> {
    let (dir, name) = resolve_parent(path)?;
    if name == "." || name == ".." {
        return_errno!(Errno::EEXIST);
    }
    let sector = free_map::allocate(1).ok_or(Error::new(Errno::ENOSPC))?;
    if let Err(e) = inode::create(sector, initial_size, true) {
        free_map::release(sector, 1);
        return Err(e);
    }
    if let Err(e) = dir.add(&name, sector) {
        // Unwind the inode we just wrote.
        let inode = inode::open(sector);
        inode.remove();
        inode.close();
        return Err(e);
    }
    Ok(())
}

/// Creates an empty directory at `path`.
pub fn mkdir(path: &str) -> Result<()> {
    let (dir, name) = resolve_parent(path)?;
    if name == "." || name == ".." {
        return_errno!(Errno::EEXIST);
    }
    let sector = free_map::allocate(1).ok_or(Error::new(Errno::ENOSPC))?;
    if let Err(e) = directory::create(sector, dir.inode().inumber()) {
        free_map::release(sector, 1);
        return Err(e);
    }
    if let Err(e) = dir.add(&name, sector) {
        let inode = inode::open(sector);
        inode.remove();
        inode.close();
        return Err(e);
    }
    Ok(())
}

/// Opens `path` as a file or directory node.
pub fn open(path: &str) -> Result<FsNode> {
    let inode = resolve(path)?;
    if inode.is_file() {
        Ok(FsNode::File(Arc::new(File::open(inode))))
    } else {
        Ok(FsNode::Dir(Arc::new(Dir::open(inode))))
    }
}

/// Removes the node at `path`. Removing an open file defers reclamation
/// to its final close; removing a non-empty or in-use directory fails.
pub fn remove(path: &str) -> Result<()> {
    let (dir, name) = resolve_parent(path)?;
    dir.remove(&name)
}

/// Changes the calling thread's working directory.
pub fn chdir(path: &str) -> Result<()> {
    let inode = resolve(path)?;
    if inode.is_file() {
        inode.close();
        return_errno!(Errno::ENOTDIR);
    }
    let me = current_thread!();
    let old = me.cwd.lock().replace(inode);
    if let Some(old) = old {
        old.close();
    }
    Ok(())
}
