// SPDX-License-Identifier: MPL-2.0

//! Tick source and sleep queue.
//!
//! The tick counter is the kernel's only clock. Ticks arrive through
//! [`interrupt_tick`], driven either by a test harness or by the optional
//! periodic ticker started at boot. Sleeping threads sit on a wait list
//! ordered by wake tick; the tick handler unblocks the due prefix and
//! stops at the first thread whose time has not come.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::prelude::*;
use crate::sync::intr;
use crate::thread::{self, Thread};

/// Default tick frequency in Hz. Configurable at boot within
/// [`MIN_FREQ`, `MAX_FREQ`].
pub const DEFAULT_FREQ: i64 = 100;
pub const MIN_FREQ: i64 = 19;
pub const MAX_FREQ: i64 = 1000;

struct Sleeper {
    thread: Arc<Thread>,
    wake_at: i64,
}

struct TimeState {
    ticks: i64,
    freq: i64,
    sleepers: Vec<Sleeper>,
}

lazy_static::lazy_static! {
    static ref TIME: SpinLock<TimeState> = SpinLock::new(TimeState {
        ticks: 0,
        freq: DEFAULT_FREQ,
        sleepers: Vec::new(),
    });
}

/// Calibrated busy-loop count per tick. The hosted model has no real
/// timing loop to calibrate against, so a fixed power of two stands in.
static LOOPS_PER_TICK: AtomicU64 = AtomicU64::new(1 << 10);

pub(crate) fn reset(freq: i64) {
    assert!((MIN_FREQ..=MAX_FREQ).contains(&freq), "bad timer frequency");
    let mut time = TIME.lock();
    time.ticks = 0;
    time.freq = freq;
    time.sleepers.clear();
}

/// Number of timer ticks since boot.
pub fn ticks() -> i64 {
    let _guard = intr::disable();
    TIME.lock().ticks
}

/// Ticks elapsed since `then`, a value previously returned by [`ticks`].
pub fn elapsed(then: i64) -> i64 {
    ticks() - then
}

pub fn freq() -> i64 {
    TIME.lock().freq
}

/// Suspends the calling thread for at least `count` ticks. Returns
/// immediately for non-positive counts. Interrupts must be on.
pub fn sleep(count: i64) {
    if count <= 0 {
        return;
    }
    assert!(intr::enabled(), "sleep with interrupts disabled");
    let start = ticks();
    let me = current_thread!();

    let _guard = intr::disable();
    {
        let mut time = TIME.lock();
        let wake_at = start + count;
        // Keep the list ordered so the tick handler only scans the due
        // prefix.
        let idx = time.sleepers.partition_point(|s| s.wake_at <= wake_at);
        time.sleepers.insert(
            idx,
            Sleeper {
                thread: me.clone(),
                wake_at,
            },
        );
        me.mark_blocked();
    }
    thread::schedule_blocked();
}

/// Advances the tick counter by one and wakes due sleepers. This is the
/// timer interrupt; it runs with the gate held and must not suspend.
pub fn interrupt_tick() {
    intr::in_interrupt_context(|| {
        let (now, freq, due) = {
            let mut time = TIME.lock();
            time.ticks += 1;
            let now = time.ticks;
            let n = time.sleepers.partition_point(|s| s.wake_at <= now);
            let due: Vec<Sleeper> = time.sleepers.drain(..n).collect();
            (now, time.freq, due)
        };
        for sleeper in due {
            thread::unblock(&sleeper.thread);
        }
        thread::scheduler::on_tick(now, freq);
    });
}

/// Wakes every sleeper regardless of its wake tick. Only used at kernel
/// shutdown; `sleep` may therefore return early while the kernel is going
/// down.
pub(crate) fn wake_all_sleepers() {
    let _guard = intr::disable();
    let due: Vec<Sleeper> = TIME.lock().sleepers.drain(..).collect();
    for sleeper in due {
        thread::unblock(&sleeper.thread);
    }
}

/// Sleeps for approximately `ms` milliseconds.
pub fn msleep(ms: i64) {
    real_time_sleep(ms, 1000);
}

/// Sleeps for approximately `us` microseconds.
pub fn usleep(us: i64) {
    real_time_sleep(us, 1000 * 1000);
}

/// Sleeps for approximately `ns` nanoseconds.
pub fn nsleep(ns: i64) {
    real_time_sleep(ns, 1000 * 1000 * 1000);
}

/// Busy-waits for approximately `ms` milliseconds without suspending.
pub fn mdelay(ms: i64) {
    real_time_delay(ms, 1000);
}

pub fn udelay(us: i64) {
    real_time_delay(us, 1000 * 1000);
}

pub fn ndelay(ns: i64) {
    real_time_delay(ns, 1000 * 1000 * 1000);
}

/// Sleeps for `num / denom` seconds, busy-waiting when the interval is
/// shorter than a tick.
fn real_time_sleep(num: i64, denom: i64) {
    let freq = freq();
    let ticks = num * freq / denom;
    if ticks > 0 {
        sleep(ticks);
    } else {
        real_time_delay(num, denom);
    }
}

fn real_time_delay(num: i64, denom: i64) {
    let freq = freq();
    let loops = LOOPS_PER_TICK.load(Ordering::Relaxed) as i64 * num * freq / denom;
    busy_wait(loops.max(0));
}

fn busy_wait(loops: i64) {
    for _ in 0..loops {
        core::hint::spin_loop();
    }
}
