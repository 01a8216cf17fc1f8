// SPDX-License-Identifier: MPL-2.0

//! Console collaborator.
//!
//! Output written through [`print`]/[`println`] is mirrored to the host
//! process's stdout and to an in-memory capture buffer so tests can assert
//! on kernel messages. Input for fd 0 comes from a buffer that tests fill
//! with [`push_input`].

use std::collections::VecDeque;
use std::io::Write;

use crate::prelude::*;

struct Console {
    captured: Vec<u8>,
    input: VecDeque<u8>,
}

lazy_static::lazy_static! {
    static ref CONSOLE: SpinLock<Console> = SpinLock::new(Console {
        captured: Vec::new(),
        input: VecDeque::new(),
    });
}

pub fn write_bytes(bytes: &[u8]) {
    let mut console = CONSOLE.lock();
    console.captured.extend_from_slice(bytes);
    drop(console);
    let _ = std::io::stdout().write_all(bytes);
}

/// Reads up to `buf.len()` bytes of console input, blocking never: a drained
/// input buffer yields a short (possibly zero) count.
pub fn read_bytes(buf: &mut [u8]) -> usize {
    let mut console = CONSOLE.lock();
    let n = buf.len().min(console.input.len());
    for slot in buf[..n].iter_mut() {
        *slot = console.input.pop_front().unwrap_or(0);
    }
    n
}

/// Queues bytes to be returned by reads of fd 0.
pub fn push_input(bytes: &[u8]) {
    CONSOLE.lock().input.extend(bytes.iter().copied());
}

/// Takes everything printed since the last call.
pub fn take_output() -> Vec<u8> {
    core::mem::take(&mut CONSOLE.lock().captured)
}

pub(crate) fn reset() {
    let mut console = CONSOLE.lock();
    console.captured.clear();
    console.input.clear();
}

#[doc(hidden)]
pub fn print_fmt(args: core::fmt::Arguments) {
    write_bytes(std::fmt::format(args).as_bytes());
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print_fmt(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($($arg:tt)*) => {
        $crate::console::print_fmt(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_drains_and_output_captures() {
        reset();
        push_input(b"abc");
        let mut buf = [0u8; 2];
        assert_eq!(read_bytes(&mut buf), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(read_bytes(&mut buf), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(read_bytes(&mut buf), 0);

        write_bytes(b"out");
        assert_eq!(take_output(), b"out");
        assert!(take_output().is_empty());
    }
}
