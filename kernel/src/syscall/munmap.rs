// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::process::UserSpace;
use crate::vm;

pub fn sys_munmap(us: &Arc<UserSpace>, mapid: i32) -> Result<i32> {
    vm::mmap::munmap(us, mapid)?;
    Ok(0)
}
