// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::sync::intr;
use crate::thread::{self, Thread};

/// A counting semaphore.
///
/// `down` suspends the caller until the value is positive, then decrements
/// it. `up` increments the value and wakes the highest-effective-priority
/// waiter; if that waiter outranks the running thread, the running thread
/// yields on the way out.
pub struct Semaphore {
    inner: SpinLock<SemInner>,
}

struct SemInner {
    value: usize,
    waiters: Vec<Arc<Thread>>,
}

impl Semaphore {
    pub const fn new(value: usize) -> Self {
        Self {
            inner: SpinLock::new(SemInner {
                value,
                waiters: Vec::new(),
            }),
        }
    }

    /// Decrements the value, waiting until it is positive.
    ///
    /// Must not be called from interrupt context; handlers cannot suspend.
    pub fn down(&self) {
        assert!(
            !intr::is_interrupt_context(),
            "semaphore down in interrupt context"
        );
        let me = current_thread!();
        loop {
            let _guard = intr::disable();
            {
                let mut inner = self.inner.lock();
                if inner.value > 0 {
                    inner.value -= 1;
                    return;
                }
                inner.waiters.push(me.clone());
                me.mark_blocked();
            }
            thread::schedule_blocked();
            // Woken by `up`; the permit may have been consumed by a
            // higher-priority thread in the meantime, so re-check.
        }
    }

    /// Decrements the value if it is positive, without waiting.
    pub fn try_down(&self) -> bool {
        let _guard = intr::disable();
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            true
        } else {
            false
        }
    }

    /// Increments the value and wakes the best waiter, if any.
    ///
    /// Safe to call from interrupt context.
    pub fn up(&self) {
        let mut yield_after = false;
        {
            let _guard = intr::disable();
            let woken = {
                let mut inner = self.inner.lock();
                inner.value += 1;
                pop_highest(&mut inner.waiters)
            };
            if let Some(waiter) = woken {
                let outranks = thread::unblock(&waiter);
                yield_after = outranks && !intr::is_interrupt_context();
            }
        }
        if yield_after {
            thread::yield_now();
        }
    }

    pub fn value(&self) -> usize {
        self.inner.lock().value
    }
}

/// Removes and returns the waiter with the highest effective priority.
/// Among equals the earliest-queued one wins.
fn pop_highest(waiters: &mut Vec<Arc<Thread>>) -> Option<Arc<Thread>> {
    let mut best: Option<(usize, i32)> = None;
    for (i, t) in waiters.iter().enumerate() {
        let priority = t.effective_priority();
        if best.map_or(true, |(_, bp)| priority > bp) {
            best = Some((i, priority));
        }
    }
    best.map(|(i, _)| waiters.remove(i))
}
