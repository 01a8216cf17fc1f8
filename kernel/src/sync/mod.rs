// SPDX-License-Identifier: MPL-2.0

//! Synchronization primitives.
//!
//! Two layers coexist here, mirroring how the modeled machine works:
//!
//! - `SpinLock` protects data that is never held across a suspension
//!   point. It is a plain spin mutex and may be taken from interrupt
//!   context.
//! - [`Semaphore`], [`Lock`], [`Condvar`] and [`Mutex`] are *blocking*
//!   primitives: a contended acquire suspends the calling thread and the
//!   scheduler picks someone else. [`Lock`] carries priority donation.
//!
//! The [`intr`] module provides the interrupt gate that stands in for
//! `cli`/`sti` on the modeled uniprocessor.

pub mod intr;

mod condvar;
mod lock;
mod mutex;
mod semaphore;

pub use condvar::Condvar;
pub use lock::Lock;
pub(crate) use lock::LockInner;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::Semaphore;

/// A spin mutex for short, non-suspending critical sections.
pub type SpinLock<T> = spin::Mutex<T>;
