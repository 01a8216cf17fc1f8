// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::process;

pub fn sys_wait(pid: i32) -> Result<i32> {
    Ok(process::wait(pid))
}
