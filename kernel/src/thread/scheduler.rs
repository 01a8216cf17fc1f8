// SPDX-License-Identifier: MPL-2.0

//! The single-CPU dispatcher.
//!
//! The processor runs the ready thread with the highest effective
//! priority; ties dispatch FIFO. All state here is touched with the
//! interrupt gate held (directly or from the tick handler).

use crate::prelude::*;
use crate::sync::intr;
use crate::thread::fixed_point::Fixed;
use crate::thread::{Status, Thread};

pub const PRI_MIN: i32 = 0;
pub const PRI_DEFAULT: i32 = 31;
pub const PRI_MAX: i32 = 63;

pub const NICE_MIN: i32 = -20;
pub const NICE_DEFAULT: i32 = 0;
pub const NICE_MAX: i32 = 20;

/// Scheduling quantum in ticks.
const TIME_SLICE: u32 = 4;

pub(crate) struct Processor {
    pub ready: VecDeque<Arc<Thread>>,
    pub current: Option<Arc<Thread>>,
    pub all: Vec<Weak<Thread>>,
    pub mlfqs: bool,
    pub load_avg: Fixed,
    pub shutting_down: bool,
    next_tid: i32,
}

lazy_static::lazy_static! {
    pub(crate) static ref PROCESSOR: SpinLock<Processor> = SpinLock::new(Processor::new());
}

impl Processor {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            current: None,
            all: Vec::new(),
            mlfqs: false,
            load_avg: Fixed::ZERO,
            shutting_down: false,
            next_tid: 1,
        }
    }

    pub fn alloc_tid(&mut self) -> i32 {
        let tid = self.next_tid;
        self.next_tid += 1;
        tid
    }

    /// Removes and returns the highest-priority ready thread; the earliest
    /// enqueued wins among equals.
    pub fn pick_next(&mut self) -> Option<Arc<Thread>> {
        let mut best: Option<(usize, i32)> = None;
        for (i, t) in self.ready.iter().enumerate() {
            let priority = t.effective_priority();
            if best.map_or(true, |(_, bp)| priority > bp) {
                best = Some((i, priority));
            }
        }
        best.and_then(|(i, _)| self.ready.remove(i))
    }

    pub fn live_threads(&mut self) -> Vec<Arc<Thread>> {
        self.all.retain(|w| w.strong_count() > 0);
        self.all.iter().filter_map(Weak::upgrade).collect()
    }
}

pub(crate) fn init(mlfqs: bool) {
    let mut p = PROCESSOR.lock();
    *p = Processor::new();
    p.mlfqs = mlfqs;
}

pub(crate) fn reset() {
    *PROCESSOR.lock() = Processor::new();
}

pub(crate) fn set_shutting_down() {
    PROCESSOR.lock().shutting_down = true;
}

pub(crate) fn is_shutting_down() -> bool {
    PROCESSOR.lock().shutting_down
}

pub(crate) fn mlfqs_enabled() -> bool {
    PROCESSOR.lock().mlfqs
}

/// Deschedules the calling thread and parks until dispatched again.
///
/// Must be entered with the interrupt gate held. The caller has already
/// recorded its own disposition: `requeue` puts it back on the ready
/// queue, otherwise it must be Blocked (on some wait list) or Dying.
pub(crate) fn schedule(requeue: bool) {
    debug_assert!(!intr::enabled(), "schedule with interrupts enabled");
    let me = Thread::current();

    let parked = {
        let mut p = PROCESSOR.lock();
        debug_assert!(p
            .current
            .as_ref()
            .map_or(false, |c| Arc::ptr_eq(c, &me)));
        if requeue {
            me.sched.lock().status = Status::Ready;
            p.ready.push_back(me.clone());
        }
        match p.pick_next() {
            Some(next) if Arc::ptr_eq(&next, &me) => {
                me.sched.lock().status = Status::Running;
                p.current = Some(next);
                false
            }
            Some(next) => {
                next.sched.lock().status = Status::Running;
                p.current = Some(next.clone());
                drop(p);
                next.parker.unpark();
                true
            }
            None => {
                p.current = None;
                true
            }
        }
    };

    if !parked {
        return;
    }
    if me.sched.lock().status == Status::Dying {
        // The host thread unwinds out of the kernel; nothing to restore.
        let _ = intr::release_all();
        return;
    }

    let depth = intr::release_all();
    me.parker.park();
    intr::reacquire(depth);
}

/// Called by the tick interrupt, with the gate held, after the sleep queue
/// has been serviced. Charges the running thread's time slice and, in
/// feedback-queue mode, runs the per-tick statistics at their cadences.
pub(crate) fn on_tick(ticks: i64, freq: i64) {
    let (mlfqs, current) = {
        let p = PROCESSOR.lock();
        (p.mlfqs, p.current.clone())
    };

    if let Some(cur) = &current {
        let mut s = cur.sched.lock();
        if mlfqs {
            s.recent_cpu = s.recent_cpu.add_int(1);
        }
        s.slice_ticks += 1;
        if s.slice_ticks >= TIME_SLICE {
            s.slice_ticks = 0;
            s.needs_yield = true;
        }
    }

    if !mlfqs {
        return;
    }
    if ticks % freq == 0 {
        update_load_avg_and_recent_cpu();
    }
    if ticks % 4 == 0 {
        recompute_mlfqs_priorities();
    }
}

/// Once per second: `load_avg = (59/60)·load_avg + (1/60)·ready_threads`,
/// then `recent_cpu = (2·load_avg)/(2·load_avg + 1)·recent_cpu + nice`
/// for every thread.
fn update_load_avg_and_recent_cpu() {
    let (threads, load_avg) = {
        let mut p = PROCESSOR.lock();
        let ready_threads = p.ready.len() as i32 + p.current.is_some() as i32;
        p.load_avg = Fixed::from_ratio(59, 60)
            .mul(p.load_avg)
            .add(Fixed::from_ratio(1, 60).mul_int(ready_threads));
        (p.live_threads(), p.load_avg)
    };

    let twice_load = load_avg.mul_int(2);
    let decay = twice_load.div(twice_load.add_int(1));
    for t in threads {
        let mut s = t.sched.lock();
        s.recent_cpu = decay.mul(s.recent_cpu).add_int(s.nice);
    }
}

/// Every fourth tick: `priority = PRI_MAX − recent_cpu/4 − 2·nice`,
/// clamped to the priority band. Donation is disabled in this mode, so
/// base and effective priority move together.
fn recompute_mlfqs_priorities() {
    let threads = PROCESSOR.lock().live_threads();
    for t in &threads {
        let mut s = t.sched.lock();
        let priority = PRI_MAX - s.recent_cpu.div_int(4).to_int_nearest() - 2 * s.nice;
        let priority = priority.clamp(PRI_MIN, PRI_MAX);
        s.base_priority = priority;
        s.effective_priority = priority;
    }

    let p = PROCESSOR.lock();
    if let Some(cur) = &p.current {
        let cur_priority = cur.effective_priority();
        if p.ready
            .iter()
            .any(|t| t.effective_priority() > cur_priority)
        {
            cur.sched.lock().needs_yield = true;
        }
    }
}

/// System load average scaled by 100, as the user ABI reports it.
pub fn get_load_avg() -> i32 {
    let _guard = intr::disable();
    PROCESSOR.lock().load_avg.mul_int(100).to_int_nearest()
}
