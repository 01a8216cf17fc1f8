// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::process::UserSpace;

pub fn sys_close(us: &Arc<UserSpace>, fd: i32) -> Result<i32> {
    let entry = us.fds.lock().close(fd)?;
    // Dropping the entry outside the table lock closes the underlying
    // file or directory handle.
    drop(entry);
    Ok(0)
}
