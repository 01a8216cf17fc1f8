// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicU64, Ordering};

use crate::prelude::*;
use crate::sync::{intr, Semaphore};
use crate::thread::{self, Thread};

/// Maximum length of a donation chain. Cycles or pathological chains stop
/// donating past this depth instead of looping.
pub const MAX_DONATION_DEPTH: usize = 8;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// A mutual-exclusion lock with priority donation.
///
/// A lock is a binary semaphore plus an owner. When a thread blocks on a
/// lock held by a lower-priority thread, it donates its effective priority
/// to the holder, transitively along the holder's own waiting-on chain up
/// to [`MAX_DONATION_DEPTH`]. Releasing withdraws the donations tied to
/// this lock and recomputes the releaser's effective priority.
pub struct Lock {
    inner: Arc<LockInner>,
}

pub(crate) struct LockInner {
    id: u64,
    sema: Semaphore,
    holder: SpinLock<Weak<Thread>>,
}

impl LockInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn holder(&self) -> Option<Arc<Thread>> {
        self.holder.lock().upgrade()
    }
}

impl Lock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
                sema: Semaphore::new(1),
                holder: SpinLock::new(Weak::new()),
            }),
        }
    }

    /// Acquires the lock, suspending until it is free.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock.
    pub fn acquire(&self) {
        let me = current_thread!();
        assert!(
            !self.held_by_current_thread(),
            "thread {:?} double-acquired a lock",
            me.name()
        );

        {
            let _guard = intr::disable();
            if self.inner.holder().is_some() {
                me.set_waiting_on(Some(Arc::downgrade(&self.inner)));
                donate_chain(&me, &self.inner);
            }
        }

        self.inner.sema.down();

        let _guard = intr::disable();
        *self.inner.holder.lock() = Arc::downgrade(&me);
        me.set_waiting_on(None);
    }

    /// Acquires the lock only if it is free right now.
    pub fn try_acquire(&self) -> bool {
        let me = current_thread!();
        let _guard = intr::disable();
        if self.inner.sema.try_down() {
            *self.inner.holder.lock() = Arc::downgrade(&me);
            true
        } else {
            false
        }
    }

    /// Releases the lock and wakes the best waiter.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn release(&self) {
        let me = current_thread!();
        assert!(
            self.held_by_current_thread(),
            "thread {:?} released a lock it does not hold",
            me.name()
        );
        {
            let _guard = intr::disable();
            *self.inner.holder.lock() = Weak::new();
            me.remove_donations_for_lock(self.inner.id);
        }
        // The wake may immediately preempt us if the waiter now outranks
        // us, which is exactly the donation hand-off order.
        self.inner.sema.up();
    }

    pub fn held_by_current_thread(&self) -> bool {
        match self.inner.holder() {
            Some(holder) => holder.tid() == current_thread!().tid(),
            None => false,
        }
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the waiting-on chain starting at `lock`, donating `donor`'s
/// effective priority to each holder, up to [`MAX_DONATION_DEPTH`] hops.
fn donate_chain(donor: &Arc<Thread>, lock: &Arc<LockInner>) {
    let priority = donor.effective_priority();
    let donor_tid = donor.tid();
    let mut lock = lock.clone();
    for _ in 0..MAX_DONATION_DEPTH {
        let Some(holder) = lock.holder() else {
            return;
        };
        holder.add_donation(donor_tid, lock.id, priority);
        match holder.waiting_on() {
            Some(next) => lock = next,
            None => return,
        }
    }
}
