// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::process::{FdEntry, UserSpace};
use crate::thread::Thread;
use crate::vm;

pub fn sys_mmap(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    fd: i32,
    addr: usize,
) -> Result<i32> {
    // The console descriptors cannot be mapped.
    let file = match us.fds.lock().get(fd) {
        Some(FdEntry::File(f)) => f,
        _ => return_errno!(Errno::EBADF),
    };
    vm::mmap::mmap(thread, us, &file, addr)
}
