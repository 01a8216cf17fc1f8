// SPDX-License-Identifier: MPL-2.0

//! Process lifecycle.
//!
//! A process is a thread with a [`UserSpace`]. `exec` spawns the child
//! and blocks until it reports whether its image loaded; `wait` rendezvous
//! with the child's exit through a parent-owned [`ChildRecord`]; the exit
//! path releases every resource the process holds and wakes the parent.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::prelude::*;
use crate::process::fd_table::FdTable;
use crate::sync::Semaphore;
use crate::thread::{self, Thread, Tid, PRI_DEFAULT};
use crate::vm::mmap::MmapState;
use crate::vm::page::SuppPageTable;
use crate::vm::pagedir::PageDir;
use crate::{println, vm};

mod context;
pub mod fd_table;
pub mod load;

pub use context::{ExitRequest, UserContext};
pub use fd_table::{FdEntry, STDIN_FD, STDOUT_FD};
pub use load::{build_image, register_program, ImageSegment, ProgramFn};

/// The user-space half of a process thread.
pub struct UserSpace {
    pub pagedir: PageDir,
    pub spt: SuppPageTable,
    pub mmaps: SpinLock<MmapState>,
    /// User stack pointer captured at trap entry; consulted by the
    /// stack-growth check when the kernel faults on a user buffer.
    pub cur_esp: SpinLock<Option<usize>>,
    pub fds: SpinLock<FdTable>,
    pub executable: SpinLock<Option<Arc<crate::fs::File>>>,
}

impl UserSpace {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pagedir: PageDir::new(),
            spt: SuppPageTable::new(),
            mmaps: SpinLock::new(MmapState::new()),
            cur_esp: SpinLock::new(None),
            fds: SpinLock::new(FdTable::new()),
            executable: SpinLock::new(None),
        })
    }
}

/// What a parent knows about one child. Owned by the parent; the child
/// reaches it through a back-reference to fill in the exit status.
pub struct ChildRecord {
    pid: Tid,
    child: SpinLock<Weak<Thread>>,
    state: SpinLock<ChildState>,
}

struct ChildState {
    terminated: bool,
    waited: bool,
    status: i32,
}

impl ChildRecord {
    pub fn pid(&self) -> Tid {
        self.pid
    }
}

struct LoadInfo {
    cmdline: String,
    /// Downed by the child until the parent has linked the child record.
    attached: Semaphore,
    /// Upped by the child once the load outcome is known.
    done: Semaphore,
    success: SpinLock<bool>,
}

static HALTED: AtomicBool = AtomicBool::new(false);

/// Whether a process has invoked `halt`.
pub fn halted() -> bool {
    HALTED.load(Ordering::Acquire)
}

pub(crate) fn reset_halted() {
    HALTED.store(false, Ordering::Release);
}

/// Spawns a process running the executable named by the first token of
/// `cmdline`, passing the remaining tokens as arguments. Returns once
/// the child has loaded (or failed to).
pub fn exec(cmdline: &str) -> Result<Tid> {
    let me = current_thread!();
    let cmdline = cmdline.trim();
    let prog = cmdline
        .split_whitespace()
        .next()
        .ok_or(Error::new(Errno::EINVAL))?;
    if cmdline.len() >= 1024 {
        return_errno_with_message!(Errno::EINVAL, "command line too long");
    }

    let info = Arc::new(LoadInfo {
        cmdline: cmdline.to_string(),
        attached: Semaphore::new(0),
        done: Semaphore::new(0),
        success: SpinLock::new(false),
    });

    let child = {
        let info = info.clone();
        thread::spawn(prog, PRI_DEFAULT, move || start_process(info))
    };

    let record = Arc::new(ChildRecord {
        pid: child.tid(),
        child: SpinLock::new(Arc::downgrade(&child)),
        state: SpinLock::new(ChildState {
            terminated: false,
            waited: false,
            status: 0,
        }),
    });
    me.children.lock().push(record.clone());
    *child.my_record.lock() = Some(record.clone());
    info.attached.up();

    info.done.down();
    if !*info.success.lock() {
        me.children.lock().retain(|r| !Arc::ptr_eq(r, &record));
        return_errno_with_message!(Errno::ENOEXEC, "load failed");
    }
    Ok(child.tid())
}

fn start_process(info: Arc<LoadInfo>) {
    info.attached.down();
    let me = current_thread!();
    let us = UserSpace::new();
    *me.user.lock() = Some(us.clone());

    match load::load(&me, &us, &info.cmdline) {
        Ok((entry, esp)) => {
            *info.success.lock() = true;
            info.done.up();

            let mut ctx = UserContext::new(me.clone(), us, esp);
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| entry(&mut ctx)));
            let (status, print) = match outcome {
                Ok(code) => (code, true),
                Err(payload) => match payload.downcast::<ExitRequest>() {
                    Ok(req) => {
                        if req.halt {
                            HALTED.store(true, Ordering::Release);
                        }
                        (req.status, !req.halt)
                    }
                    Err(other) => std::panic::resume_unwind(other),
                },
            };
            exit_current_process(status, print);
        }
        Err(e) => {
            debug!("load of {:?} failed: {}", info.cmdline, e);
            info.done.up();
            exit_current_process(-1, true);
        }
    }
}

/// Waits for child `pid` to exit and returns its status. Returns −1 if
/// `pid` is not an un-waited child of the caller.
pub fn wait(pid: Tid) -> i32 {
    let me = current_thread!();
    let record = {
        let children = me.children.lock();
        children.iter().find(|r| r.pid == pid).cloned()
    };
    let Some(record) = record else {
        return -1;
    };

    me.wait_lock.acquire();
    {
        let mut st = record.state.lock();
        if st.waited {
            me.wait_lock.release();
            return -1;
        }
        st.waited = true;
    }
    loop {
        if record.state.lock().terminated {
            break;
        }
        me.wait_cond.wait(&me.wait_lock);
    }
    let status = record.state.lock().status;
    me.wait_lock.release();

    me.children.lock().retain(|r| !Arc::ptr_eq(r, &record));
    status
}

/// Releases everything the current process holds and reports its exit.
///
/// Runs on the process's own thread, with no kernel locks held. The
/// order matters: descriptors close first, mappings flush before the
/// address space is torn down, and the parent is woken last.
pub(crate) fn exit_current_process(status: i32, print: bool) {
    let me = current_thread!();
    if print {
        println!("{}: exit({})", me.name(), status);
    }

    if let Some(us) = me.user.lock().take() {
        let fds = us.fds.lock().take_all();
        drop(fds);
        vm::mmap::unmap_all(&us);
        vm::page::destroy(&us);
        let exe = us.executable.lock().take();
        drop(exe);
    }
    if let Some(cwd) = me.cwd.lock().take() {
        cwd.close();
    }

    // Records of terminated children die with us; live children are
    // orphaned and free their own records on exit.
    let children: Vec<_> = me.children.lock().drain(..).collect();
    for r in children {
        if let Some(child) = r.child.lock().upgrade() {
            *child.parent.lock() = Weak::new();
        }
    }

    let parent = me.parent.lock().upgrade();
    if let Some(parent) = parent {
        if let Some(record) = me.my_record.lock().take() {
            parent.wait_lock.acquire();
            {
                let mut st = record.state.lock();
                st.terminated = true;
                st.status = status;
            }
            parent.wait_cond.broadcast(&parent.wait_lock);
            parent.wait_lock.release();
        }
    } else {
        *me.my_record.lock() = None;
    }
}

/// Terminates the current process as if it called `exit(status)`. Only
/// valid while user code (or a trap on its behalf) is running; unwinds to
/// the process entry frame.
pub(crate) fn kill_current(status: i32) -> ! {
    std::panic::panic_any(ExitRequest {
        status,
        halt: false,
    })
}
