// SPDX-License-Identifier: MPL-2.0

use super::{user_access, MAX_USER_STR};
use crate::fs::{self, FsNode};
use crate::prelude::*;
use crate::process::{FdEntry, UserSpace};
use crate::thread::Thread;

pub fn sys_open(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    name_ptr: usize,
    esp: usize,
) -> Result<i32> {
    let name = user_access::copy_cstr_in(thread, us, name_ptr, MAX_USER_STR, esp)?;
    fs::fs_lock().acquire();
    let node = fs::open(&name);
    fs::fs_lock().release();
    let entry = match node? {
        FsNode::File(f) => FdEntry::File(f),
        FsNode::Dir(d) => FdEntry::Dir(d),
    };
    Ok(us.fds.lock().alloc(entry))
}
