// SPDX-License-Identifier: MPL-2.0

//! Interrupt gate.
//!
//! On the real machine, disabling interrupts makes the running thread
//! atomic with respect to the tick handler. The hosted equivalent is a
//! reentrant gate that both kernel threads (via [`disable`]) and the tick
//! interrupt must hold while touching scheduler state. A section that runs
//! with the gate held therefore excludes the interrupt handler exactly as
//! a `cli`-protected section would.
//!
//! The gate is reentrant per host thread, mirroring the
//! `intr_disable`/`intr_set_level` nesting of the modeled hardware. A
//! context switch releases the gate in full and restores the nesting depth
//! when the thread is scheduled again; see `thread::schedule`.

use core::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use crate::prelude::*;

struct GateState {
    owner: Option<ThreadId>,
    depth: usize,
}

static GATE: SpinLock<GateState> = SpinLock::new(GateState {
    owner: None,
    depth: 0,
});

/// Whether the caller currently runs in interrupt context (inside the tick
/// handler) rather than in a thread.
static IN_INTERRUPT: AtomicBool = AtomicBool::new(false);

/// A token proving interrupts are off. Dropping the outermost guard
/// re-enables them and honors any preemption request raised while they
/// were off.
pub struct IntrGuard {
    // Prevents construction outside this module and makes the guard !Send.
    _not_send: core::marker::PhantomData<*const ()>,
}

/// Disables interrupts, i.e. closes the gate for the calling host thread.
/// Nesting is allowed.
pub fn disable() -> IntrGuard {
    let me = std::thread::current().id();
    loop {
        let mut gate = GATE.lock();
        match gate.owner {
            None => {
                gate.owner = Some(me);
                gate.depth = 1;
                break;
            }
            Some(owner) if owner == me => {
                gate.depth += 1;
                break;
            }
            _ => {
                drop(gate);
                std::thread::yield_now();
            }
        }
    }
    IntrGuard {
        _not_send: core::marker::PhantomData,
    }
}

/// Whether interrupts are enabled for the calling host thread.
pub fn enabled() -> bool {
    let gate = GATE.lock();
    gate.owner != Some(std::thread::current().id())
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        let reenabled = {
            let mut gate = GATE.lock();
            debug_assert_eq!(gate.owner, Some(std::thread::current().id()));
            gate.depth -= 1;
            if gate.depth == 0 {
                gate.owner = None;
                true
            } else {
                false
            }
        };
        if reenabled {
            crate::thread::honor_pending_yield();
        }
    }
}

/// Releases the gate entirely regardless of depth, returning the depth so
/// it can be restored by [`reacquire`]. Used by the context switch, which
/// must let other threads (and the tick handler) in while the caller is
/// parked.
pub(crate) fn release_all() -> usize {
    let mut gate = GATE.lock();
    debug_assert_eq!(gate.owner, Some(std::thread::current().id()));
    let depth = gate.depth;
    gate.owner = None;
    gate.depth = 0;
    depth
}

/// Restores a nesting depth previously returned by [`release_all`].
pub(crate) fn reacquire(depth: usize) {
    debug_assert!(depth > 0);
    let me = std::thread::current().id();
    loop {
        let mut gate = GATE.lock();
        if gate.owner.is_none() {
            gate.owner = Some(me);
            gate.depth = depth;
            return;
        }
        drop(gate);
        std::thread::yield_now();
    }
}

/// Runs `f` as the interrupt handler: gate held, interrupt context marked.
/// Handlers must not suspend.
pub(crate) fn in_interrupt_context<R>(f: impl FnOnce() -> R) -> R {
    let _guard = disable();
    IN_INTERRUPT.store(true, Ordering::Release);
    let r = f();
    IN_INTERRUPT.store(false, Ordering::Release);
    r
}

pub(crate) fn is_interrupt_context() -> bool {
    IN_INTERRUPT.load(Ordering::Acquire)
}
