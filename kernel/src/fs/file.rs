// SPDX-License-Identifier: MPL-2.0

use crate::fs::inode::Inode;
use crate::prelude::*;

/// An open file: an inode reference plus a position cursor.
///
/// Dropping the handle closes its inode reference (re-allowing writes
/// first if this handle denied them), so a removed file's storage is
/// reclaimed when the last handle goes away.
pub struct File {
    inode: Arc<Inode>,
    pos: SpinLock<u32>,
    denied_write: SpinLock<bool>,
}

impl File {
    /// Wraps an open inode, taking ownership of the reference.
    pub fn open(inode: Arc<Inode>) -> File {
        File {
            inode,
            pos: SpinLock::new(0),
            denied_write: SpinLock::new(false),
        }
    }

    /// Opens an independent handle (own cursor) on the same inode.
    pub fn reopen(&self) -> File {
        File::open(self.inode.reopen())
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn len(&self) -> u32 {
        self.inode.length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads at the cursor, advancing it by the bytes read.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let offset = *self.pos.lock();
        let n = self.inode.read_at(buf, offset);
        *self.pos.lock() += n as u32;
        n
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> usize {
        self.inode.read_at(buf, offset)
    }

    /// Writes at the cursor, advancing it by the bytes written.
    pub fn write(&self, buf: &[u8]) -> usize {
        let offset = *self.pos.lock();
        let n = self.inode.write_at(buf, offset);
        *self.pos.lock() += n as u32;
        n
    }

    pub fn write_at(&self, buf: &[u8], offset: u32) -> usize {
        self.inode.write_at(buf, offset)
    }

    /// Moves the cursor. Seeking past EOF is allowed; a later write there
    /// extends the file.
    pub fn seek(&self, pos: u32) {
        *self.pos.lock() = pos;
    }

    pub fn tell(&self) -> u32 {
        *self.pos.lock()
    }

    /// Denies writes to the backing inode for this handle's lifetime.
    /// At most once per handle.
    pub fn deny_write(&self) {
        let mut denied = self.denied_write.lock();
        if !*denied {
            *denied = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&self) {
        let mut denied = self.denied_write.lock();
        if *denied {
            *denied = false;
            self.inode.allow_write();
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if *self.denied_write.lock() {
            self.inode.allow_write();
        }
        self.inode.close();
    }
}
