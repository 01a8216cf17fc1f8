// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::process::{FdEntry, UserSpace};

pub fn sys_isdir(us: &Arc<UserSpace>, fd: i32) -> Result<i32> {
    match us.fds.lock().get(fd) {
        Some(FdEntry::Dir(_)) => Ok(1),
        Some(FdEntry::File(_)) => Ok(0),
        None => Err(Error::new(Errno::EBADF)),
    }
}
