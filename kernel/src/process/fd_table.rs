// SPDX-License-Identifier: MPL-2.0

use crate::fs::{Dir, File};
use crate::prelude::*;

/// Console input descriptor.
pub const STDIN_FD: i32 = 0;
/// Console output descriptor.
pub const STDOUT_FD: i32 = 1;

/// What a descriptor refers to.
#[derive(Clone)]
pub enum FdEntry {
    File(Arc<File>),
    Dir(Arc<Dir>),
}

/// Per-process descriptor table. Values start at 2 (0 and 1 are the
/// console) and are unique for the process's lifetime.
pub struct FdTable {
    next: i32,
    map: BTreeMap<i32, FdEntry>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            next: 2,
            map: BTreeMap::new(),
        }
    }

    pub fn alloc(&mut self, entry: FdEntry) -> i32 {
        let fd = self.next;
        self.next += 1;
        self.map.insert(fd, entry);
        fd
    }

    pub fn get(&self, fd: i32) -> Option<FdEntry> {
        self.map.get(&fd).cloned()
    }

    /// Closes `fd`, handing the entry back so the caller can drop it
    /// outside any lock (dropping does blocking I/O for removed files).
    /// A descriptor is closed exactly once; a second close is an error.
    pub fn close(&mut self, fd: i32) -> Result<FdEntry> {
        self.map.remove(&fd).ok_or(Error::new(Errno::EBADF))
    }

    /// Empties the table, returning the entries so the caller can drop
    /// them outside any lock.
    pub fn take_all(&mut self) -> Vec<FdEntry> {
        let entries = core::mem::take(&mut self.map);
        entries.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
