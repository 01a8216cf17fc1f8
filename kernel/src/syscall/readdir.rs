// SPDX-License-Identifier: MPL-2.0

use super::user_access;
use crate::fs::NAME_MAX;
use crate::prelude::*;
use crate::process::{FdEntry, UserSpace};
use crate::thread::Thread;

/// Copies the next entry name of the directory behind `fd` into the user
/// buffer (`NAME_MAX` characters plus NUL). Returns 0 when exhausted.
pub fn sys_readdir(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    fd: i32,
    name_ptr: usize,
    esp: usize,
) -> Result<i32> {
    let dir = match us.fds.lock().get(fd) {
        Some(FdEntry::Dir(d)) => d,
        _ => return_errno!(Errno::ENOTDIR),
    };
    match dir.read_entry() {
        Some(name) => {
            debug_assert!(name.len() <= NAME_MAX);
            let mut bytes = name.into_bytes();
            bytes.push(0);
            user_access::write_bytes_in(thread, us, name_ptr, &bytes, esp)?;
            Ok(1)
        }
        None => Ok(0),
    }
}
