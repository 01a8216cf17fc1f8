// SPDX-License-Identifier: MPL-2.0

//! Scheduler, sleep-queue, and donation behavior.

use std::sync::{Arc, Mutex};

use vireo_kernel::sync::{Lock, Semaphore};
use vireo_kernel::{thread, time, BootOptions, Kernel};

type EventLog = Arc<Mutex<Vec<String>>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn log_event(log: &EventLog, s: impl Into<String>) {
    log.lock().unwrap().push(s.into());
}

fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn sleepers_wake_in_deadline_order() {
    init_logging();
    let kernel = Kernel::boot(BootOptions::default());
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    for (name, ticks) in [("first", 30i64), ("second", 10), ("third", 20)] {
        let log = log.clone();
        thread::spawn(name, thread::PRI_DEFAULT, move || {
            time::sleep(ticks);
            log_event(&log, name);
        });
    }
    // Let all three reach their sleep at the same tick.
    thread::yield_now();
    assert!(events(&log).is_empty());

    kernel.ticks(9);
    thread::yield_now();
    assert!(events(&log).is_empty(), "woke before the deadline");

    kernel.ticks(1); // tick 10
    thread::yield_now();
    assert_eq!(events(&log), ["second"]);

    kernel.ticks(10); // tick 20
    thread::yield_now();
    assert_eq!(events(&log), ["second", "third"]);

    kernel.ticks(10); // tick 30
    thread::yield_now();
    assert_eq!(events(&log), ["second", "third", "first"]);
}

#[test]
fn sleep_zero_and_negative_return_immediately() {
    let _kernel = Kernel::boot(BootOptions::default());
    time::sleep(0);
    time::sleep(-5);
    assert_eq!(time::ticks(), 0);
}

#[test]
fn elapsed_tracks_ticks() {
    let kernel = Kernel::boot(BootOptions::default());
    let then = time::ticks();
    kernel.ticks(7);
    assert_eq!(time::elapsed(then), 7);
}

/// The S1 scenario. The driving thread plays L: at priority 10 it holds
/// lock A; M (31) takes B and blocks on A; H (63) blocks on B. The
/// donation must carry 63 through M to L, the releases happen A first
/// (by L) then B (by M), and H finishes before M.
///
/// Every hand-off below is a preemption, so the interleaving is fixed:
/// spawning a higher-priority thread runs it until it blocks, and each
/// release immediately yields to the woken waiter.
#[test]
fn donation_chains_through_two_locks() {
    let _kernel = Kernel::boot(BootOptions::default());
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let lock_a = Arc::new(Lock::new());
    let lock_b = Arc::new(Lock::new());
    let done = Arc::new(Semaphore::new(0));

    thread::set_priority(10);
    lock_a.acquire();

    let mid = {
        let (lock_a, lock_b, done, log) =
            (lock_a.clone(), lock_b.clone(), done.clone(), log.clone());
        // Preempts us at once; runs until it blocks on A.
        thread::spawn("mid", 31, move || {
            lock_b.acquire();
            lock_a.acquire();
            log_event(&log, format!("M got A at {}", thread::get_priority()));
            lock_a.release();
            lock_b.release();
            log_event(&log, "M done");
            done.up();
        })
    };
    assert_eq!(thread::get_priority(), 31, "M's donation did not arrive");
    assert_eq!(mid.priority(), 31);

    let high = {
        let (lock_b, done, log) = (lock_b.clone(), done.clone(), log.clone());
        // Preempts us; blocks on B, donating down the chain.
        thread::spawn("high", 63, move || {
            lock_b.acquire();
            log_event(&log, format!("H got B at {}", thread::get_priority()));
            lock_b.release();
            log_event(&log, "H done");
            done.up();
        })
    };
    assert_eq!(mid.priority(), 63, "H's donation did not reach M");
    assert_eq!(
        thread::get_priority(),
        63,
        "H's donation did not chain through M to the holder of A"
    );

    // Releasing A ends our donation and hands the CPU to M, which
    // finishes A, then B (waking H above itself).
    lock_a.release();
    assert_eq!(thread::get_priority(), 10);

    done.down();
    done.down();
    assert_eq!(
        events(&log),
        ["M got A at 63", "H got B at 63", "H done", "M done"]
    );
    assert_eq!(mid.priority(), 31);
    assert_eq!(high.priority(), 63);
    thread::set_priority(thread::PRI_DEFAULT);
}

#[test]
fn semaphore_wakes_highest_priority_waiter_first() {
    let _kernel = Kernel::boot(BootOptions::default());
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sema = Arc::new(Semaphore::new(0));
    let done = Arc::new(Semaphore::new(0));

    for (name, priority) in [("mid", 45), ("high", 50), ("low", 40)] {
        let (sema, done, log) = (sema.clone(), done.clone(), log.clone());
        // Each outranks main, runs immediately, and blocks on the sema.
        thread::spawn(name, priority, move || {
            sema.down();
            log_event(&log, name);
            done.up();
        });
    }

    sema.up();
    sema.up();
    sema.up();
    done.down();
    done.down();
    done.down();
    assert_eq!(events(&log), ["high", "mid", "low"]);
}

#[test]
fn lowering_priority_yields_to_ready_thread() {
    let _kernel = Kernel::boot(BootOptions::default());
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    {
        let log = log.clone();
        thread::spawn("peer", 31, move || {
            log_event(&log, "peer ran");
        });
    }
    assert!(events(&log).is_empty(), "equal priority must not preempt");

    thread::set_priority(10);
    assert_eq!(events(&log), ["peer ran"]);
    assert_eq!(thread::get_priority(), 10);
    thread::set_priority(thread::PRI_DEFAULT);
}

#[test]
fn donation_respects_lock_identity_on_release() {
    let _kernel = Kernel::boot(BootOptions::default());
    let lock_a = Arc::new(Lock::new());
    let lock_b = Arc::new(Lock::new());
    let done = Arc::new(Semaphore::new(0));

    lock_a.acquire();
    lock_b.acquire();

    for (name, priority, lock) in [("wa", 40, lock_a.clone()), ("wb", 50, lock_b.clone())] {
        let done = done.clone();
        thread::spawn(name, priority, move || {
            lock.acquire();
            lock.release();
            done.up();
        });
    }
    // Both donations are in effect.
    assert_eq!(thread::get_priority(), 50);

    // Releasing A withdraws only A's donation.
    lock_a.release();
    assert_eq!(thread::get_priority(), 50);
    lock_b.release();
    assert_eq!(thread::get_priority(), thread::PRI_DEFAULT);
    done.down();
    done.down();
}

#[test]
fn periodic_ticker_drives_sleep_in_real_time() {
    init_logging();
    let _kernel = Kernel::boot(BootOptions {
        periodic_ticker: true,
        ..Default::default()
    });
    let then = time::ticks();
    time::sleep(5);
    assert!(time::elapsed(then) >= 5);
}

#[test]
fn mlfqs_tracks_nice_load_and_recent_cpu() {
    let kernel = Kernel::boot(BootOptions {
        mlfqs: true,
        ..Default::default()
    });

    assert_eq!(thread::get_nice(), 0);
    thread::set_nice(5);
    // priority = 63 − recent_cpu/4 − 2·nice with recent_cpu still 0.
    assert_eq!(thread::get_priority(), 53);

    // A full second of ticks charges recent_cpu to the running thread
    // and folds it into load_avg once.
    kernel.ticks(time::freq() as u64);
    assert!(thread::get_recent_cpu() > 0);
    let load = thread::get_load_avg();
    assert!((1..=2).contains(&load), "load_avg x100 = {}", load);
    assert!(thread::get_priority() < 53);

    thread::set_nice(0);
}
