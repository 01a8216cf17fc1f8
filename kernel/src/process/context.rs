// SPDX-License-Identifier: MPL-2.0

//! Simulated user CPU context.
//!
//! A user program is a registered function that receives a
//! [`UserContext`] and may touch memory or enter the kernel only through
//! it. Memory accessors behave like the MMU: they walk the page
//! directory, fault pages in on demand, and terminate the process on an
//! illegal access. `syscall` reproduces the trap ABI by pushing the call
//! number and arguments onto the user stack and entering the dispatcher
//! with that stack pointer.

use crate::prelude::*;
use crate::process::UserSpace;
use crate::syscall::{self, nr, user_access, TrapOutcome};
use crate::thread::Thread;

/// Panic payload that unwinds user code back to the process entry frame.
pub struct ExitRequest {
    pub status: i32,
    pub halt: bool,
}

pub struct UserContext {
    thread: Arc<Thread>,
    us: Arc<UserSpace>,
    /// Simulated user stack pointer. Programs may move it, e.g. to model
    /// a large stack frame before touching memory below it.
    pub esp: usize,
}

impl UserContext {
    pub(crate) fn new(thread: Arc<Thread>, us: Arc<UserSpace>, esp: usize) -> Self {
        Self { thread, us, esp }
    }

    pub fn thread(&self) -> &Arc<Thread> {
        &self.thread
    }

    fn kill_on_fault<T>(&self, r: Result<T>) -> T {
        match r {
            Ok(v) => v,
            Err(_) => crate::process::kill_current(-1),
        }
    }

    pub fn read_bytes(&self, addr: usize, buf: &mut [u8]) {
        let r = user_access::read_bytes_in(&self.thread, &self.us, addr, buf, self.esp);
        self.kill_on_fault(r)
    }

    pub fn write_bytes(&mut self, addr: usize, bytes: &[u8]) {
        let r = user_access::write_bytes_in(&self.thread, &self.us, addr, bytes, self.esp);
        self.kill_on_fault(r)
    }

    pub fn read_u8(&self, addr: usize) -> u8 {
        let mut b = [0u8; 1];
        self.read_bytes(addr, &mut b);
        b[0]
    }

    pub fn write_u8(&mut self, addr: usize, val: u8) {
        self.write_bytes(addr, &[val]);
    }

    pub fn read_u32(&self, addr: usize) -> u32 {
        let mut b = [0u8; 4];
        self.read_bytes(addr, &mut b);
        u32::from_le_bytes(b)
    }

    pub fn write_u32(&mut self, addr: usize, val: u32) {
        self.write_bytes(addr, &val.to_le_bytes());
    }

    /// Copies a NUL-terminated string onto the user stack, moving `esp`
    /// down, and returns its address. Handy for passing path arguments.
    pub fn push_str(&mut self, s: &str) -> usize {
        self.esp -= s.len() + 1;
        let addr = self.esp;
        self.write_bytes(addr, s.as_bytes());
        self.write_u8(addr + s.len(), 0);
        addr
    }

    /// Enters the kernel with the trap ABI: `[nr, a1, a2, a3]` on the
    /// user stack at the trap-time stack pointer.
    pub fn syscall(&mut self, nr: u32, a1: u32, a2: u32, a3: u32) -> i32 {
        let esp = self.esp - 16;
        for (i, w) in [nr, a1, a2, a3].into_iter().enumerate() {
            self.write_bytes(esp + 4 * i, &w.to_le_bytes());
        }
        match syscall::trap(&self.thread, &self.us, esp) {
            TrapOutcome::Ret(v) => v,
            TrapOutcome::Exit { status, halt } => {
                std::panic::panic_any(ExitRequest { status, halt })
            }
        }
    }

    // The user-side call stubs.

    pub fn halt(&mut self) -> ! {
        self.syscall(nr::SYS_HALT, 0, 0, 0);
        unreachable!()
    }

    pub fn exit(&mut self, status: i32) -> ! {
        self.syscall(nr::SYS_EXIT, status as u32, 0, 0);
        unreachable!()
    }

    pub fn exec(&mut self, cmdline: &str) -> i32 {
        let p = self.push_str(cmdline);
        self.syscall(nr::SYS_EXEC, p as u32, 0, 0)
    }

    pub fn wait(&mut self, pid: i32) -> i32 {
        self.syscall(nr::SYS_WAIT, pid as u32, 0, 0)
    }

    pub fn create(&mut self, path: &str, initial_size: u32) -> bool {
        let p = self.push_str(path);
        self.syscall(nr::SYS_CREATE, p as u32, initial_size, 0) != 0
    }

    pub fn remove(&mut self, path: &str) -> bool {
        let p = self.push_str(path);
        self.syscall(nr::SYS_REMOVE, p as u32, 0, 0) != 0
    }

    pub fn open(&mut self, path: &str) -> i32 {
        let p = self.push_str(path);
        self.syscall(nr::SYS_OPEN, p as u32, 0, 0)
    }

    pub fn filesize(&mut self, fd: i32) -> i32 {
        self.syscall(nr::SYS_FILESIZE, fd as u32, 0, 0)
    }

    pub fn read(&mut self, fd: i32, buf: usize, n: u32) -> i32 {
        self.syscall(nr::SYS_READ, fd as u32, buf as u32, n)
    }

    pub fn write(&mut self, fd: i32, buf: usize, n: u32) -> i32 {
        self.syscall(nr::SYS_WRITE, fd as u32, buf as u32, n)
    }

    pub fn seek(&mut self, fd: i32, pos: u32) {
        self.syscall(nr::SYS_SEEK, fd as u32, pos, 0);
    }

    pub fn tell(&mut self, fd: i32) -> i32 {
        self.syscall(nr::SYS_TELL, fd as u32, 0, 0)
    }

    pub fn close(&mut self, fd: i32) {
        self.syscall(nr::SYS_CLOSE, fd as u32, 0, 0);
    }

    pub fn mmap(&mut self, fd: i32, addr: usize) -> i32 {
        self.syscall(nr::SYS_MMAP, fd as u32, addr as u32, 0)
    }

    pub fn munmap(&mut self, mapid: i32) {
        self.syscall(nr::SYS_MUNMAP, mapid as u32, 0, 0);
    }

    pub fn chdir(&mut self, path: &str) -> bool {
        let p = self.push_str(path);
        self.syscall(nr::SYS_CHDIR, p as u32, 0, 0) != 0
    }

    pub fn mkdir(&mut self, path: &str) -> bool {
        let p = self.push_str(path);
        self.syscall(nr::SYS_MKDIR, p as u32, 0, 0) != 0
    }

    /// `readdir(fd)` into a stack buffer; returns the entry name.
    pub fn readdir(&mut self, fd: i32) -> Option<String> {
        self.esp -= 16;
        let buf = self.esp;
        let ok = self.syscall(nr::SYS_READDIR, fd as u32, buf as u32, 0) != 0;
        let name = if ok {
            let mut bytes = [0u8; 15];
            self.read_bytes(buf, &mut bytes);
            let len = bytes.iter().position(|&c| c == 0).unwrap_or(15);
            Some(String::from_utf8_lossy(&bytes[..len]).into_owned())
        } else {
            None
        };
        self.esp += 16;
        name
    }

    pub fn isdir(&mut self, fd: i32) -> bool {
        self.syscall(nr::SYS_ISDIR, fd as u32, 0, 0) != 0
    }

    pub fn inumber(&mut self, fd: i32) -> i32 {
        self.syscall(nr::SYS_INUMBER, fd as u32, 0, 0)
    }
}
