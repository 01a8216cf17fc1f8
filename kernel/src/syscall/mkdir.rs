// SPDX-License-Identifier: MPL-2.0

use super::{user_access, MAX_USER_STR};
use crate::fs;
use crate::prelude::*;
use crate::process::UserSpace;
use crate::thread::Thread;

pub fn sys_mkdir(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    path_ptr: usize,
    esp: usize,
) -> Result<i32> {
    let path = user_access::copy_cstr_in(thread, us, path_ptr, MAX_USER_STR, esp)?;
    fs::fs_lock().acquire();
    let result = fs::mkdir(&path);
    fs::fs_lock().release();
    result.map(|_| 1)
}
