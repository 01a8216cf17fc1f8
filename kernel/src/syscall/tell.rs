// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::process::{FdEntry, UserSpace};

pub fn sys_tell(us: &Arc<UserSpace>, fd: i32) -> Result<i32> {
    match us.fds.lock().get(fd) {
        Some(FdEntry::File(f)) => Ok(f.tell() as i32),
        _ => Err(Error::new(Errno::EBADF)),
    }
}
