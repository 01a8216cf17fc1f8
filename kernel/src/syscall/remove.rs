// SPDX-License-Identifier: MPL-2.0

use super::{user_access, MAX_USER_STR};
use crate::fs;
use crate::prelude::*;
use crate::process::UserSpace;
use crate::thread::Thread;

pub fn sys_remove(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    name_ptr: usize,
    esp: usize,
) -> Result<i32> {
    let name = user_access::copy_cstr_in(thread, us, name_ptr, MAX_USER_STR, esp)?;
    fs::fs_lock().acquire();
    let result = fs::remove(&name);
    fs::fs_lock().release();
    result.map(|_| 1)
}
