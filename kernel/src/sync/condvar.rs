// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;
use crate::sync::{Lock, Semaphore};
use crate::thread::Thread;

/// A condition variable.
///
/// Implemented as a list of one-shot semaphores, one per waiter, so that
/// `signal` can pick the waiter with the highest effective priority.
pub struct Condvar {
    waiters: SpinLock<Vec<Waiter>>,
}

struct Waiter {
    sema: Arc<Semaphore>,
    thread: Arc<Thread>,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(Vec::new()),
        }
    }

    /// Atomically releases `lock` and waits to be signalled, then
    /// reacquires `lock` before returning.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        assert!(lock.held_by_current_thread());
        let sema = Arc::new(Semaphore::new(0));
        self.waiters.lock().push(Waiter {
            sema: sema.clone(),
            thread: current_thread!(),
        });
        lock.release();
        sema.down();
        lock.acquire();
    }

    /// Wakes the highest-priority waiter, if any. `lock` must be held.
    pub fn signal(&self, lock: &Lock) {
        assert!(lock.held_by_current_thread());
        let woken = {
            let mut waiters = self.waiters.lock();
            let mut best: Option<(usize, i32)> = None;
            for (i, w) in waiters.iter().enumerate() {
                let priority = w.thread.effective_priority();
                if best.map_or(true, |(_, bp)| priority > bp) {
                    best = Some((i, priority));
                }
            }
            best.map(|(i, _)| waiters.remove(i))
        };
        if let Some(w) = woken {
            w.sema.up();
        }
    }

    /// Wakes every waiter. `lock` must be held.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(lock.held_by_current_thread());
        loop {
            let next = {
                let mut waiters = self.waiters.lock();
                if waiters.is_empty() {
                    return;
                }
                waiters.remove(0)
            };
            next.sema.up();
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
