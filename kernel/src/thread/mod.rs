// SPDX-License-Identifier: MPL-2.0

//! Kernel threads.
//!
//! Each kernel thread owns one host thread; the dispatcher in
//! [`scheduler`] serializes them so that exactly one runs kernel code at a
//! time, which preserves the uniprocessor semantics everything above this
//! layer assumes. A thread's scheduling fields live behind a `SpinLock`
//! and are only touched with the interrupt gate held.

use core::cell::RefCell;

use crate::fs::inode::Inode;
use crate::prelude::*;
use crate::process::{ChildRecord, UserSpace};
use crate::sync::{intr, Condvar, Lock, LockInner};
use crate::thread::fixed_point::Fixed;
use crate::thread::parker::Parker;

pub mod fixed_point;
pub(crate) mod parker;
pub mod scheduler;
pub mod thread_table;

pub use scheduler::{
    get_load_avg, NICE_DEFAULT, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX, PRI_MIN,
};

/// Thread identifier.
pub type Tid = i32;

/// States in a thread's life cycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    /// Not running but ready to run.
    Ready,
    /// Running on the (one) processor.
    Running,
    /// Waiting for an event to trigger.
    Blocked,
    /// About to be destroyed.
    Dying,
}

pub(crate) struct SchedInfo {
    pub status: Status,
    pub base_priority: i32,
    pub effective_priority: i32,
    pub donations: Vec<Donation>,
    pub waiting_on: Option<Weak<LockInner>>,
    pub nice: i32,
    pub recent_cpu: Fixed,
    pub needs_yield: bool,
    pub slice_ticks: u32,
}

/// A received priority donation, tied to the lock whose release withdraws
/// it.
pub(crate) struct Donation {
    pub donor: Tid,
    pub lock_id: u64,
    pub priority: i32,
}

/// A kernel thread or user process.
pub struct Thread {
    tid: Tid,
    name: String,
    pub(crate) parker: Parker,
    pub(crate) sched: SpinLock<SchedInfo>,

    /// Current working directory; `None` means the file-system root.
    pub(crate) cwd: SpinLock<Option<Arc<Inode>>>,

    // Process bookkeeping (meaningful for threads that exec or are
    // exec'd; inert for plain kernel threads).
    pub(crate) children: SpinLock<Vec<Arc<ChildRecord>>>,
    pub(crate) parent: SpinLock<Weak<Thread>>,
    pub(crate) wait_lock: Lock,
    pub(crate) wait_cond: Condvar,
    pub(crate) my_record: SpinLock<Option<Arc<ChildRecord>>>,
    pub(crate) user: SpinLock<Option<Arc<UserSpace>>>,
}

std::thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = RefCell::new(None);
}

lazy_static::lazy_static! {
    static ref HOST_HANDLES: std::sync::Mutex<Vec<std::thread::JoinHandle<()>>> =
        std::sync::Mutex::new(Vec::new());
}

impl Thread {
    /// Returns the running thread.
    ///
    /// # Panics
    ///
    /// Panics when called from a host thread that is not a kernel thread
    /// (e.g. before `Kernel::boot`).
    pub fn current() -> Arc<Thread> {
        Thread::try_current().expect("not running on a kernel thread")
    }

    pub fn try_current() -> Option<Arc<Thread>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The thread's effective priority: its base raised by any donations.
    pub fn priority(&self) -> i32 {
        self.effective_priority()
    }

    pub fn base_priority(&self) -> i32 {
        self.sched.lock().base_priority
    }

    pub(crate) fn effective_priority(&self) -> i32 {
        self.sched.lock().effective_priority
    }

    pub(crate) fn mark_blocked(&self) {
        self.sched.lock().status = Status::Blocked;
    }

    pub(crate) fn status(&self) -> Status {
        self.sched.lock().status
    }

    pub(crate) fn add_donation(&self, donor: Tid, lock_id: u64, priority: i32) {
        let mut s = self.sched.lock();
        match s
            .donations
            .iter_mut()
            .find(|d| d.donor == donor && d.lock_id == lock_id)
        {
            Some(d) => d.priority = d.priority.max(priority),
            None => s.donations.push(Donation {
                donor,
                lock_id,
                priority,
            }),
        }
        recompute_effective(&mut s);
    }

    pub(crate) fn remove_donations_for_lock(&self, lock_id: u64) {
        let mut s = self.sched.lock();
        s.donations.retain(|d| d.lock_id != lock_id);
        recompute_effective(&mut s);
    }

    pub(crate) fn waiting_on(&self) -> Option<Arc<LockInner>> {
        self.sched.lock().waiting_on.clone()?.upgrade()
    }

    pub(crate) fn set_waiting_on(&self, lock: Option<Weak<LockInner>>) {
        self.sched.lock().waiting_on = lock;
    }

    /// The user-space half of a process thread, if this thread has one.
    pub(crate) fn user_space(&self) -> Option<Arc<UserSpace>> {
        self.user.lock().clone()
    }

    pub(crate) fn cwd_inode(&self) -> Option<Arc<Inode>> {
        self.cwd.lock().clone()
    }
}

fn recompute_effective(s: &mut SchedInfo) {
    let donated = s.donations.iter().map(|d| d.priority).max();
    s.effective_priority = match donated {
        Some(d) => s.base_priority.max(d),
        None => s.base_priority,
    };
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .finish()
    }
}

/// Spawns a new kernel thread and makes it ready. The spawner is
/// preempted immediately if the new thread outranks it.
pub fn spawn<F>(name: &str, priority: i32, f: F) -> Arc<Thread>
where
    F: FnOnce() + Send + 'static,
{
    assert!((PRI_MIN..=PRI_MAX).contains(&priority));
    let parent = Thread::try_current();

    let (tid, inherited_nice, inherited_recent) = {
        let _guard = intr::disable();
        let tid = scheduler::PROCESSOR.lock().alloc_tid();
        match &parent {
            Some(p) => {
                let s = p.sched.lock();
                (tid, s.nice, s.recent_cpu)
            }
            None => (tid, NICE_DEFAULT, Fixed::ZERO),
        }
    };

    let cwd = parent
        .as_ref()
        .and_then(|p| p.cwd_inode())
        .map(|inode| inode.reopen());

    let thread = Arc::new(Thread {
        tid,
        name: name.to_string(),
        parker: Parker::new(),
        sched: SpinLock::new(SchedInfo {
            status: Status::Blocked,
            base_priority: priority,
            effective_priority: priority,
            donations: Vec::new(),
            waiting_on: None,
            nice: inherited_nice,
            recent_cpu: inherited_recent,
            needs_yield: false,
            slice_ticks: 0,
        }),
        cwd: SpinLock::new(cwd),
        children: SpinLock::new(Vec::new()),
        parent: SpinLock::new(match &parent {
            Some(p) => Arc::downgrade(p),
            None => Weak::new(),
        }),
        wait_lock: Lock::new(),
        wait_cond: Condvar::new(),
        my_record: SpinLock::new(None),
        user: SpinLock::new(None),
    });

    {
        let _guard = intr::disable();
        scheduler::PROCESSOR.lock().all.push(Arc::downgrade(&thread));
    }
    thread_table::add(&thread);

    let for_host = thread.clone();
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || trampoline(for_host, f))
        .expect("failed to spawn host thread");
    HOST_HANDLES
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(handle);

    let outranks = unblock(&thread);
    if outranks && Thread::try_current().is_some() {
        yield_now();
    }
    thread
}

/// Panic payload used by [`exit`] to unwind a thread body early.
pub(crate) struct ThreadExit;

/// Ends the calling kernel thread without running the rest of its body.
pub fn exit() -> ! {
    let _me = Thread::current();
    std::panic::panic_any(ThreadExit)
}

fn trampoline<F: FnOnce()>(me: Arc<Thread>, f: F) {
    CURRENT.with(|c| *c.borrow_mut() = Some(me.clone()));
    // Wait for the first dispatch.
    me.parker.park();
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        if !payload.is::<ThreadExit>() {
            std::panic::resume_unwind(payload);
        }
    }
    finish_current();
    CURRENT.with(|c| *c.borrow_mut() = None);
}

/// Tears the calling thread down and schedules away for good.
pub(crate) fn finish_current() {
    let me = Thread::current();
    if let Some(cwd) = me.cwd.lock().take() {
        cwd.close();
    }
    thread_table::remove(me.tid());

    let guard = intr::disable();
    me.sched.lock().status = Status::Dying;
    // The dying path in `schedule` releases the gate wholesale and never
    // comes back, so the guard must not run its drop handler.
    core::mem::forget(guard);
    scheduler::schedule(false);
}

/// Deschedules the calling thread, which must already be Blocked and
/// parked on some wait list. Requires the interrupt gate.
pub(crate) fn schedule_blocked() {
    debug_assert!(!intr::enabled());
    scheduler::schedule(false);
}

/// Yields the processor, staying ready.
pub fn yield_now() {
    let _me = Thread::current();
    let _guard = intr::disable();
    scheduler::schedule(true);
}

/// Moves a blocked thread to the ready queue (or straight onto an idle
/// CPU). Safe from interrupt context. Returns whether the woken thread
/// outranks the running one, in which case a preemption request has been
/// recorded.
pub fn unblock(t: &Arc<Thread>) -> bool {
    let _guard = intr::disable();
    let mut p = scheduler::PROCESSOR.lock();
    {
        let mut s = t.sched.lock();
        if s.status != Status::Blocked {
            return false;
        }
        s.status = Status::Ready;
    }

    if p.current.is_none() && !p.shutting_down {
        t.sched.lock().status = Status::Running;
        p.current = Some(t.clone());
        drop(p);
        t.parker.unpark();
        return false;
    }

    p.ready.push_back(t.clone());
    match &p.current {
        Some(cur) if t.effective_priority() > cur.effective_priority() => {
            cur.sched.lock().needs_yield = true;
            true
        }
        _ => false,
    }
}

/// Honors a preemption request recorded by the tick handler or a wake-up.
/// Called when the outermost interrupt guard is dropped.
pub(crate) fn honor_pending_yield() {
    let Some(me) = Thread::try_current() else {
        return;
    };
    let should_yield = {
        let mut s = me.sched.lock();
        if s.needs_yield && s.status == Status::Running {
            s.needs_yield = false;
            true
        } else {
            false
        }
    };
    if should_yield {
        yield_now();
    }
}

/// Sets the running thread's base priority. Ignored under the feedback
/// queue scheduler. Yields if the thread no longer has the highest
/// priority.
pub fn set_priority(priority: i32) {
    assert!((PRI_MIN..=PRI_MAX).contains(&priority));
    if scheduler::mlfqs_enabled() {
        return;
    }
    let me = Thread::current();
    let _guard = intr::disable();
    {
        let mut s = me.sched.lock();
        s.base_priority = priority;
        recompute_effective(&mut s);
    }
    let mine = me.effective_priority();
    let outranked = scheduler::PROCESSOR
        .lock()
        .ready
        .iter()
        .any(|t| t.effective_priority() > mine);
    if outranked {
        scheduler::schedule(true);
    }
}

/// The running thread's effective priority.
pub fn get_priority() -> i32 {
    Thread::current().effective_priority()
}

/// Sets the running thread's nice value and recomputes its priority.
pub fn set_nice(nice: i32) {
    assert!((NICE_MIN..=NICE_MAX).contains(&nice));
    let me = Thread::current();
    let _guard = intr::disable();
    {
        let mut s = me.sched.lock();
        s.nice = nice;
        if scheduler::mlfqs_enabled() {
            let priority = PRI_MAX - s.recent_cpu.div_int(4).to_int_nearest() - 2 * nice;
            let priority = priority.clamp(PRI_MIN, PRI_MAX);
            s.base_priority = priority;
            s.effective_priority = priority;
        }
    }
    let mine = me.effective_priority();
    let outranked = scheduler::PROCESSOR
        .lock()
        .ready
        .iter()
        .any(|t| t.effective_priority() > mine);
    if outranked {
        scheduler::schedule(true);
    }
}

pub fn get_nice() -> i32 {
    Thread::current().sched.lock().nice
}

/// 100 times the running thread's `recent_cpu`, as the user ABI reports
/// it.
pub fn get_recent_cpu() -> i32 {
    Thread::current()
        .sched
        .lock()
        .recent_cpu
        .mul_int(100)
        .to_int_nearest()
}

/// Applies `f` to every live thread, with interrupts disabled.
pub fn foreach(mut f: impl FnMut(&Arc<Thread>)) {
    let _guard = intr::disable();
    let threads = scheduler::PROCESSOR.lock().live_threads();
    for t in &threads {
        f(t);
    }
}

/// Adopts the calling host thread as a kernel thread. Used once at boot
/// for the thread that drives the kernel.
pub(crate) fn adopt_current_host_thread(name: &str) -> Arc<Thread> {
    assert!(Thread::try_current().is_none(), "already a kernel thread");
    let tid = scheduler::PROCESSOR.lock().alloc_tid();
    let thread = Arc::new(Thread {
        tid,
        name: name.to_string(),
        parker: Parker::new(),
        sched: SpinLock::new(SchedInfo {
            status: Status::Running,
            base_priority: PRI_DEFAULT,
            effective_priority: PRI_DEFAULT,
            donations: Vec::new(),
            waiting_on: None,
            nice: NICE_DEFAULT,
            recent_cpu: Fixed::ZERO,
            needs_yield: false,
            slice_ticks: 0,
        }),
        cwd: SpinLock::new(None),
        children: SpinLock::new(Vec::new()),
        parent: SpinLock::new(Weak::new()),
        wait_lock: Lock::new(),
        wait_cond: Condvar::new(),
        my_record: SpinLock::new(None),
        user: SpinLock::new(None),
    });
    {
        let mut p = scheduler::PROCESSOR.lock();
        p.all.push(Arc::downgrade(&thread));
        p.current = Some(thread.clone());
    }
    thread_table::add(&thread);
    CURRENT.with(|c| *c.borrow_mut() = Some(thread.clone()));
    thread
}

/// Detaches the boot thread at kernel teardown.
pub(crate) fn detach_current_host_thread() {
    let me = Thread::current();
    if let Some(cwd) = me.cwd.lock().take() {
        cwd.close();
    }
    thread_table::remove(me.tid());
    {
        let mut p = scheduler::PROCESSOR.lock();
        p.current = None;
    }
    CURRENT.with(|c| *c.borrow_mut() = None);
}

/// Joins every host thread spawned since the last call. Used at kernel
/// teardown, after all kernel threads have been asked to exit.
pub(crate) fn join_all_host_threads() {
    let handles: Vec<_> = HOST_HANDLES
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .drain(..)
        .collect();
    for h in handles {
        let _ = h.join();
    }
}
