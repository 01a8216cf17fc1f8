// SPDX-License-Identifier: MPL-2.0

use super::{user_access, MAX_USER_STR};
use crate::prelude::*;
use crate::process::{self, UserSpace};
use crate::thread::Thread;

pub fn sys_exec(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    cmdline_ptr: usize,
    esp: usize,
) -> Result<i32> {
    let cmdline = user_access::copy_cstr_in(thread, us, cmdline_ptr, MAX_USER_STR, esp)?;
    debug!("exec {:?}", cmdline);
    let pid = process::exec(&cmdline)?;
    Ok(pid)
}
