// SPDX-License-Identifier: MPL-2.0

//! Kernel bring-up and teardown.
//!
//! [`Kernel::boot`] owns every global table for its lifetime: it wires up
//! the devices, the frame pool, the swap table, the buffer cache (and its
//! daemons), and the file system, and adopts the calling host thread as
//! the kernel's main thread. Dropping the handle flushes the cache,
//! stops the daemons, joins every kernel thread, and resets the globals
//! so the next boot starts clean.
//!
//! Boots are serialized process-wide; tests each boot their own kernel.
//! All threads spawned during a boot must have exited (user processes:
//! been waited for) before the handle is dropped, or teardown will wait
//! for them forever.

use std::sync::{Mutex, MutexGuard, Once, PoisonError};

use crate::device::{self, MemDisk};
use crate::prelude::*;
use crate::process::ExitRequest;
use crate::vm::swap::SECTORS_PER_PAGE;
use crate::{console, fs, process, thread, time, vm};

pub struct BootOptions {
    /// Use the multilevel-feedback-queue scheduler instead of strict
    /// priority with donation.
    pub mlfqs: bool,
    /// Tick frequency in Hz, within [19, 1000].
    pub timer_freq: i64,
    /// Size of the user frame pool.
    pub user_frames: usize,
    /// File-system device size in sectors.
    pub fs_sectors: u32,
    /// Swap device size in pages.
    pub swap_pages: usize,
    /// Write a fresh file system at boot.
    pub format: bool,
    /// Drive the tick source from a real-time host thread instead of
    /// (only) explicit `Kernel::tick` calls.
    pub periodic_ticker: bool,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            mlfqs: false,
            timer_freq: time::DEFAULT_FREQ,
            user_frames: 64,
            fs_sectors: 4096,
            swap_pages: 1024,
            format: true,
            periodic_ticker: false,
        }
    }
}

lazy_static::lazy_static! {
    static ref BOOT_LOCK: Mutex<()> = Mutex::new(());
}

/// A running kernel. Dropping it shuts the kernel down.
pub struct Kernel {
    fs_disk: Arc<MemDisk>,
    swap_disk: Arc<MemDisk>,
    ticker: Option<std::thread::JoinHandle<()>>,
    _serialized: MutexGuard<'static, ()>,
}

impl Kernel {
    pub fn boot(opts: BootOptions) -> Kernel {
        let serialized = BOOT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        install_exit_panic_filter();

        console::reset();
        process::reset_halted();
        process::load::reset_registry();
        thread::scheduler::init(opts.mlfqs);
        time::reset(opts.timer_freq);
        thread::adopt_current_host_thread("main");

        let fs_disk = MemDisk::new(opts.fs_sectors);
        let swap_disk = MemDisk::new((opts.swap_pages * SECTORS_PER_PAGE) as u32);
        device::set_fs_device(fs_disk.clone());
        device::set_swap_device(swap_disk.clone());

        vm::frame::init(opts.user_frames);
        vm::swap::init(swap_disk.clone());
        fs::cache::init(fs_disk.clone());
        fs::init(opts.fs_sectors as usize, opts.format).expect("file system format failed");

        let ticker = opts.periodic_ticker.then(|| {
            let period = std::time::Duration::from_nanos(1_000_000_000 / opts.timer_freq as u64);
            std::thread::spawn(move || {
                while !thread::scheduler::is_shutting_down() {
                    std::thread::sleep(period);
                    time::interrupt_tick();
                }
            })
        });

        Kernel {
            fs_disk,
            swap_disk,
            ticker,
            _serialized: serialized,
        }
    }

    /// Fires the timer interrupt once.
    pub fn tick(&self) {
        time::interrupt_tick();
    }

    /// Fires the timer interrupt `n` times.
    pub fn ticks(&self, n: u64) {
        for _ in 0..n {
            time::interrupt_tick();
        }
    }

    /// The raw file-system device, for snapshotting in tests.
    pub fn fs_disk(&self) -> Arc<MemDisk> {
        self.fs_disk.clone()
    }

    pub fn swap_disk(&self) -> Arc<MemDisk> {
        self.swap_disk.clone()
    }

    /// Whether some process invoked the `halt` call.
    pub fn halted(&self) -> bool {
        process::halted()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        fs::cache::flush();
        thread::scheduler::set_shutting_down();
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }

        // Chase every kernel thread out: wake sleepers and the
        // read-ahead waiter, then lend them the CPU until only the main
        // thread remains.
        let mut rounds = 0u32;
        loop {
            time::wake_all_sleepers();
            fs::cache::shutdown_wake();
            let live = {
                let mut p = thread::scheduler::PROCESSOR.lock();
                p.live_threads().len()
            };
            if live <= 1 {
                break;
            }
            thread::yield_now();
            rounds += 1;
            assert!(
                rounds < 100_000,
                "kernel threads failed to exit at shutdown"
            );
        }
        thread::join_all_host_threads();

        // Release the main thread's directory reference and drain the
        // file-system tables while this host thread can still take
        // kernel locks.
        if let Some(cwd) = thread::Thread::current().cwd.lock().take() {
            cwd.close();
        }
        fs::reset();
        fs::cache::reset();
        vm::frame::reset();
        vm::swap::reset();
        device::reset();
        process::load::reset_registry();

        thread::detach_current_host_thread();
        thread::thread_table::reset();
        thread::scheduler::reset();
    }
}

/// Keeps the default panic hook quiet about the controlled unwinds that
/// implement process exit.
fn install_exit_panic_filter() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ExitRequest>().is_some()
                || info
                    .payload()
                    .downcast_ref::<crate::thread::ThreadExit>()
                    .is_some()
            {
                return;
            }
            prev(info);
        }));
    });
}
