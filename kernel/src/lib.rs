// SPDX-License-Identifier: MPL-2.0

//! Vireo: a hosted model of a uniprocessor teaching kernel.
//!
//! The four core subsystems are real implementations, not mocks: a
//! preemptive priority scheduler with donation and blocking primitives, a
//! demand-paged VM with a clock-evicted frame pool, swap, and mmap, an
//! indexed-inode file system behind a 64-slot sector cache with
//! write-behind and read-ahead daemons, and a 20-call system-call
//! boundary with byte-validated user pointers.
//!
//! The hardware edges are collaborator traits and simulations: block
//! devices are in-memory, ticks are delivered by the test driver (or an
//! optional periodic ticker), kernel threads are host threads serialized
//! onto one virtual CPU, and "machine code" is a registry of Rust
//! functions that may only touch the world through their
//! [`process::UserContext`].
//!
//! Boot a kernel with [`Kernel::boot`]; everything lives until the
//! handle drops.

pub mod boot;
pub mod console;
pub mod device;
pub mod error;
pub mod fs;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod time;
pub mod vm;

mod prelude;

pub use boot::{BootOptions, Kernel};
pub use error::{Errno, Error};
