// SPDX-License-Identifier: MPL-2.0

//! Directories.
//!
//! A directory is a file whose content is a packed array of fixed-size
//! entries. Non-root directories carry `.` and `..` entries created with
//! them; the root is its own parent and resolves both names implicitly.

use crate::device::Sector;
use crate::fs::inode::{self, Inode};
use crate::fs::ROOT_DIR_SECTOR;
use crate::prelude::*;

/// Longest permitted entry name.
pub const NAME_MAX: usize = 14;

/// Bytes per on-disk entry: sector, NUL-padded name, in-use flag.
const DIR_ENTRY_SIZE: usize = 4 + (NAME_MAX + 1) + 1;

struct DirEntry {
    inode_sector: Sector,
    name: String,
    in_use: bool,
}

impl DirEntry {
    fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut b = [0u8; DIR_ENTRY_SIZE];
        b[0..4].copy_from_slice(&self.inode_sector.to_le_bytes());
        let name = self.name.as_bytes();
        debug_assert!(name.len() <= NAME_MAX);
        b[4..4 + name.len()].copy_from_slice(name);
        b[DIR_ENTRY_SIZE - 1] = self.in_use as u8;
        b
    }

    fn from_bytes(b: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let inode_sector = u32::from_le_bytes(b[0..4].try_into().unwrap());
        let name_bytes = &b[4..4 + NAME_MAX + 1];
        let len = name_bytes.iter().position(|&c| c == 0).unwrap_or(NAME_MAX);
        let name = String::from_utf8_lossy(&name_bytes[..len]).into_owned();
        Self {
            inode_sector,
            name,
            in_use: b[DIR_ENTRY_SIZE - 1] != 0,
        }
    }
}

/// An open directory.
pub struct Dir {
    inode: Arc<Inode>,
    /// Cursor for `read_entry`.
    pos: SpinLock<u32>,
}

/// Creates a directory inode at `sector` whose parent is
/// `parent_sector`, with its `.` and `..` entries. The root passes
/// itself as parent and gets no explicit entries.
pub fn create(sector: Sector, parent_sector: Sector) -> Result<()> {
    inode::create(sector, 0, false)?;
    if sector != ROOT_DIR_SECTOR {
        let dir = Dir::open(inode::open(sector));
        dir.add(".", sector)?;
        dir.add("..", parent_sector)?;
    }
    Ok(())
}

impl Dir {
    /// Wraps an open inode as a directory, taking ownership of the
    /// reference.
    pub fn open(inode: Arc<Inode>) -> Dir {
        Dir {
            inode,
            pos: SpinLock::new(0),
        }
    }

    pub fn open_root() -> Dir {
        Dir::open(inode::open(ROOT_DIR_SECTOR))
    }

    pub fn reopen(&self) -> Dir {
        Dir::open(self.inode.reopen())
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    fn is_root(&self) -> bool {
        self.inode.inumber() == ROOT_DIR_SECTOR
    }

    fn entry_at(&self, ofs: u32) -> Option<DirEntry> {
        let mut b = [0u8; DIR_ENTRY_SIZE];
        if self.inode.read_at(&mut b, ofs) != DIR_ENTRY_SIZE {
            return None;
        }
        Some(DirEntry::from_bytes(&b))
    }

    /// Finds `name`, returning the entry's byte offset and inode sector.
    fn lookup_entry(&self, name: &str) -> Option<(u32, Sector)> {
        let mut ofs = 0u32;
        while let Some(e) = self.entry_at(ofs) {
            if e.in_use && e.name == name {
                return Some((ofs, e.inode_sector));
            }
            ofs += DIR_ENTRY_SIZE as u32;
        }
        None
    }

    /// Looks `name` up and opens its inode. `.` and `..` resolve on the
    /// root without entries.
    pub fn lookup(&self, name: &str) -> Option<Arc<Inode>> {
        if self.is_root() && (name == "." || name == "..") {
            return Some(inode::open(ROOT_DIR_SECTOR));
        }
        let (_, sector) = self.lookup_entry(name)?;
        Some(inode::open(sector))
    }

    /// Adds an entry for `name` pointing at `inode_sector`.
    ///
    /// This is also the path that writes `.` and `..` at directory
    /// creation; the name-resolution layer keeps user requests for those
    /// names from reaching here.
    pub fn add(&self, name: &str, inode_sector: Sector) -> Result<()> {
        if name.is_empty() {
            return_errno!(Errno::ENOENT);
        }
        if name.len() > NAME_MAX {
            return_errno!(Errno::ENAMETOOLONG);
        }
        if name.contains('/') {
            return_errno!(Errno::EINVAL);
        }
        if self.lookup_entry(name).is_some() {
            return_errno!(Errno::EEXIST);
        }

        // Reuse a freed slot if one exists, else append at EOF.
        let mut ofs = 0u32;
        while let Some(e) = self.entry_at(ofs) {
            if !e.in_use {
                break;
            }
            ofs += DIR_ENTRY_SIZE as u32;
        }
        let entry = DirEntry {
            inode_sector,
            name: name.to_string(),
            in_use: true,
        };
        if self.inode.write_at(&entry.to_bytes(), ofs) != DIR_ENTRY_SIZE {
            return_errno_with_message!(Errno::ENOSPC, "directory full");
        }
        Ok(())
    }

    /// Removes the entry for `name`.
    ///
    /// A file's entry can be removed while the file is open; the data
    /// disappears on its final close. A directory must be empty and not
    /// open anywhere else.
    pub fn remove(&self, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return_errno!(Errno::EINVAL);
        }
        let (ofs, sector) = self.lookup_entry(name).ok_or(Error::new(Errno::ENOENT))?;
        if sector == ROOT_DIR_SECTOR {
            return_errno!(Errno::EBUSY);
        }

        let target = inode::open(sector);
        if !target.is_file() {
            let dir = Dir::open(target.reopen());
            if !dir.is_empty() {
                target.close();
                return_errno!(Errno::ENOTEMPTY);
            }
            // Open anywhere beyond our two references (ours and the
            // cursor above) means it is in use as a cwd or descriptor.
            if target.open_count() > 2 {
                target.close();
                return_errno!(Errno::EBUSY);
            }
        }

        let mut e = self.entry_at(ofs).unwrap();
        e.in_use = false;
        self.inode.write_at(&e.to_bytes(), ofs);
        target.remove();
        target.close();
        Ok(())
    }

    /// Whether the directory holds nothing but `.` and `..`.
    pub fn is_empty(&self) -> bool {
        let mut ofs = 0u32;
        while let Some(e) = self.entry_at(ofs) {
            if e.in_use && e.name != "." && e.name != ".." {
                return false;
            }
            ofs += DIR_ENTRY_SIZE as u32;
        }
        true
    }

    /// Reads the next entry name, skipping `.`, `..` and free slots.
    /// Returns `None` at the end.
    pub fn read_entry(&self) -> Option<String> {
        loop {
            let ofs = {
                let mut pos = self.pos.lock();
                let ofs = *pos;
                *pos += DIR_ENTRY_SIZE as u32;
                ofs
            };
            let e = self.entry_at(ofs)?;
            if e.in_use && e.name != "." && e.name != ".." {
                return Some(e.name);
            }
        }
    }

    /// Closes the directory, dropping its inode reference.
    pub fn close(self) {
        // Drop impl does the work.
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        self.inode.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips() {
        let e = DirEntry {
            inode_sector: 42,
            name: "grow-two-files".to_string(),
            in_use: true,
        };
        assert_eq!(e.name.len(), NAME_MAX);
        let d = DirEntry::from_bytes(&e.to_bytes());
        assert_eq!(d.inode_sector, 42);
        assert_eq!(d.name, "grow-two-files");
        assert!(d.in_use);
    }

    #[test]
    fn free_entry_decodes_unused() {
        let d = DirEntry::from_bytes(&[0u8; DIR_ENTRY_SIZE]);
        assert!(!d.in_use);
        assert_eq!(d.name, "");
    }
}
