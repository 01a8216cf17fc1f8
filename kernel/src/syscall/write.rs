// SPDX-License-Identifier: MPL-2.0

use super::user_access::PinnedRange;
use crate::console;
use crate::fs;
use crate::prelude::*;
use crate::process::{FdEntry, UserSpace, STDIN_FD, STDOUT_FD};
use crate::thread::Thread;

/// Writes `n` bytes from the user buffer. fd 1 goes straight to the
/// console, bypassing the file system; file descriptors go through the
/// file system with the buffer pinned for the duration of the I/O.
pub fn sys_write(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    fd: i32,
    buf: usize,
    n: u32,
    esp: usize,
) -> Result<i32> {
    if fd == STDIN_FD {
        return_errno!(Errno::EBADF);
    }

    let pinned = PinnedRange::pin(thread, us, buf, n as usize, false, esp)?;

    if fd == STDOUT_FD {
        for chunk in pinned.chunks() {
            let tmp = {
                let data = chunk.frame.data.lock();
                data[chunk.frame_ofs..chunk.frame_ofs + chunk.len].to_vec()
            };
            console::write_bytes(&tmp);
        }
        return Ok(n as i32);
    }

    let file = match us.fds.lock().get(fd) {
        Some(FdEntry::File(f)) => f,
        _ => return_errno!(Errno::EBADF),
    };

    fs::fs_lock().acquire();
    let mut total = 0usize;
    for chunk in pinned.chunks() {
        let tmp = {
            let data = chunk.frame.data.lock();
            data[chunk.frame_ofs..chunk.frame_ofs + chunk.len].to_vec()
        };
        let put = file.write(&tmp);
        total += put;
        if put < chunk.len {
            break;
        }
    }
    fs::fs_lock().release();
    Ok(total as i32)
}
