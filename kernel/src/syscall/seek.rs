// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::process::{FdEntry, UserSpace};

pub fn sys_seek(us: &Arc<UserSpace>, fd: i32, pos: u32) -> Result<i32> {
    match us.fds.lock().get(fd) {
        Some(FdEntry::File(f)) => {
            f.seek(pos);
            Ok(0)
        }
        _ => Err(Error::new(Errno::EBADF)),
    }
}
