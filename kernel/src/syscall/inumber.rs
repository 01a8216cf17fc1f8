// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::process::{FdEntry, UserSpace};

pub fn sys_inumber(us: &Arc<UserSpace>, fd: i32) -> Result<i32> {
    match us.fds.lock().get(fd) {
        Some(FdEntry::File(f)) => Ok(f.inode().inumber() as i32),
        Some(FdEntry::Dir(d)) => Ok(d.inode().inumber() as i32),
        None => Err(Error::new(Errno::EBADF)),
    }
}
