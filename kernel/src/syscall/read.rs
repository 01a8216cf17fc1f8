// SPDX-License-Identifier: MPL-2.0

use super::user_access::PinnedRange;
use crate::console;
use crate::fs;
use crate::prelude::*;
use crate::process::{FdEntry, UserSpace, STDIN_FD, STDOUT_FD};
use crate::thread::Thread;

/// Reads `n` bytes into the user buffer. fd 0 drains the console input;
/// file descriptors go through the file system with the buffer pinned
/// for the duration of the I/O.
pub fn sys_read(
    thread: &Arc<Thread>,
    us: &Arc<UserSpace>,
    fd: i32,
    buf: usize,
    n: u32,
    esp: usize,
) -> Result<i32> {
    if fd == STDOUT_FD {
        return_errno!(Errno::EBADF);
    }

    // The destination pages must be writable user memory; fault them in
    // and pin them so eviction cannot take them mid-copy.
    let pinned = PinnedRange::pin(thread, us, buf, n as usize, true, esp)?;

    if fd == STDIN_FD {
        let mut total = 0usize;
        for chunk in pinned.chunks() {
            let mut tmp = vec![0u8; chunk.len];
            let got = console::read_bytes(&mut tmp);
            let mut data = chunk.frame.data.lock();
            data[chunk.frame_ofs..chunk.frame_ofs + got].copy_from_slice(&tmp[..got]);
            total += got;
            if got < chunk.len {
                break;
            }
        }
        return Ok(total as i32);
    }

    let file = match us.fds.lock().get(fd) {
        Some(FdEntry::File(f)) => f,
        _ => return_errno!(Errno::EBADF),
    };

    fs::fs_lock().acquire();
    let mut total = 0usize;
    for chunk in pinned.chunks() {
        let mut tmp = vec![0u8; chunk.len];
        let got = file.read(&mut tmp[..]);
        let mut data = chunk.frame.data.lock();
        data[chunk.frame_ofs..chunk.frame_ofs + got].copy_from_slice(&tmp[..got]);
        total += got;
        if got < chunk.len {
            break;
        }
    }
    fs::fs_lock().release();
    Ok(total as i32)
}
