// SPDX-License-Identifier: MPL-2.0

//! System-call dispatch.
//!
//! The trap reads `[number, arg1, arg2, arg3]` off the user stack at the
//! captured stack pointer, validating each slot, then routes to the
//! handler module for that call. Each sub-module handles the real logic
//! of one call.
//!
//! Failure policy: a bad pointer (`EFAULT`) terminates the process with
//! status −1 wherever it occurs; a bad descriptor terminates for the
//! cursor-style calls (`filesize`, `seek`, `tell`, `close`) and yields
//! the documented failure value everywhere else.

use crate::prelude::*;
use crate::process::UserSpace;
use crate::thread::Thread;

pub mod user_access;

mod chdir;
mod close;
mod create;
mod exec;
mod filesize;
mod inumber;
mod isdir;
mod mkdir;
mod mmap;
mod munmap;
mod open;
mod read;
mod readdir;
mod remove;
mod seek;
mod tell;
mod wait;
mod write;

/// Call numbers, in ABI order.
pub mod nr {
    pub const SYS_HALT: u32 = 0;
    pub const SYS_EXIT: u32 = 1;
    pub const SYS_EXEC: u32 = 2;
    pub const SYS_WAIT: u32 = 3;
    pub const SYS_CREATE: u32 = 4;
    pub const SYS_REMOVE: u32 = 5;
    pub const SYS_OPEN: u32 = 6;
    pub const SYS_FILESIZE: u32 = 7;
    pub const SYS_READ: u32 = 8;
    pub const SYS_WRITE: u32 = 9;
    pub const SYS_SEEK: u32 = 10;
    pub const SYS_TELL: u32 = 11;
    pub const SYS_CLOSE: u32 = 12;
    pub const SYS_MMAP: u32 = 13;
    pub const SYS_MUNMAP: u32 = 14;
    pub const SYS_CHDIR: u32 = 15;
    pub const SYS_MKDIR: u32 = 16;
    pub const SYS_READDIR: u32 = 17;
    pub const SYS_ISDIR: u32 = 18;
    pub const SYS_INUMBER: u32 = 19;
}

/// What the trap hands back to the user context.
pub enum TrapOutcome {
    /// Value for the return register.
    Ret(i32),
    /// The process is done (normal exit, kill, or halt).
    Exit { status: i32, halt: bool },
}

/// Longest accepted user string argument.
const MAX_USER_STR: usize = 4096;

/// Entry from the simulated trap instruction.
pub(crate) fn trap(thread: &Arc<Thread>, us: &Arc<UserSpace>, esp: usize) -> TrapOutcome {
    *us.cur_esp.lock() = Some(esp);
    let outcome = dispatch(thread, us, esp);
    *us.cur_esp.lock() = None;
    outcome
}

fn dispatch(thread: &Arc<Thread>, us: &Arc<UserSpace>, esp: usize) -> TrapOutcome {
    // The four argument slots must themselves be readable user memory.
    let mut words = [0u32; 4];
    for (i, w) in words.iter_mut().enumerate() {
        match user_access::read_u32_in(thread, us, esp + 4 * i, esp) {
            Ok(v) => *w = v,
            Err(_) => {
                return TrapOutcome::Exit {
                    status: -1,
                    halt: false,
                }
            }
        }
    }
    let [num, a1, a2, a3] = words;
    trace!("syscall {} ({:#x}, {:#x}, {:#x})", num, a1, a2, a3);

    let result: Result<i32> = match num {
        nr::SYS_HALT => {
            return TrapOutcome::Exit {
                status: -1,
                halt: true,
            }
        }
        nr::SYS_EXIT => {
            return TrapOutcome::Exit {
                status: a1 as i32,
                halt: false,
            }
        }
        nr::SYS_EXEC => exec::sys_exec(thread, us, a1 as usize, esp),
        nr::SYS_WAIT => wait::sys_wait(a1 as i32),
        nr::SYS_CREATE => create::sys_create(thread, us, a1 as usize, a2, esp),
        nr::SYS_REMOVE => remove::sys_remove(thread, us, a1 as usize, esp),
        nr::SYS_OPEN => open::sys_open(thread, us, a1 as usize, esp),
        nr::SYS_FILESIZE => filesize::sys_filesize(us, a1 as i32),
        nr::SYS_READ => read::sys_read(thread, us, a1 as i32, a2 as usize, a3, esp),
        nr::SYS_WRITE => write::sys_write(thread, us, a1 as i32, a2 as usize, a3, esp),
        nr::SYS_SEEK => seek::sys_seek(us, a1 as i32, a2),
        nr::SYS_TELL => tell::sys_tell(us, a1 as i32),
        nr::SYS_CLOSE => close::sys_close(us, a1 as i32),
        nr::SYS_MMAP => mmap::sys_mmap(thread, us, a1 as i32, a2 as usize),
        nr::SYS_MUNMAP => munmap::sys_munmap(us, a1 as i32),
        nr::SYS_CHDIR => chdir::sys_chdir(thread, us, a1 as usize, esp),
        nr::SYS_MKDIR => mkdir::sys_mkdir(thread, us, a1 as usize, esp),
        nr::SYS_READDIR => readdir::sys_readdir(thread, us, a1 as i32, a2 as usize, esp),
        nr::SYS_ISDIR => isdir::sys_isdir(us, a1 as i32),
        nr::SYS_INUMBER => inumber::sys_inumber(us, a1 as i32),
        _ => {
            // Unknown call number: kill.
            return TrapOutcome::Exit {
                status: -1,
                halt: false,
            }
        }
    };

    match result {
        Ok(v) => TrapOutcome::Ret(v),
        Err(e) => failure_outcome(num, e),
    }
}

fn failure_outcome(num: u32, e: Error) -> TrapOutcome {
    if e.error() == Errno::EFAULT {
        return TrapOutcome::Exit {
            status: -1,
            halt: false,
        };
    }
    match num {
        nr::SYS_FILESIZE | nr::SYS_SEEK | nr::SYS_TELL | nr::SYS_CLOSE => TrapOutcome::Exit {
            status: -1,
            halt: false,
        },
        nr::SYS_EXEC
        | nr::SYS_WAIT
        | nr::SYS_OPEN
        | nr::SYS_READ
        | nr::SYS_WRITE
        | nr::SYS_MMAP
        | nr::SYS_INUMBER => TrapOutcome::Ret(-1),
        _ => TrapOutcome::Ret(0),
    }
}
