// SPDX-License-Identifier: MPL-2.0

#![allow(dead_code)]

/// Error number.
///
/// The subset of POSIX errnos that kernel paths actually produce. The
/// syscall layer maps these onto the return conventions of the user ABI;
/// `EFAULT` additionally terminates the offending process.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    EPERM = 1,         /* Operation not permitted */
    ENOENT = 2,        /* No such file or directory */
    ESRCH = 3,         /* No such process */
    EINTR = 4,         /* Interrupted system call */
    EIO = 5,           /* I/O error */
    ENOEXEC = 8,       /* Exec format error */
    EBADF = 9,         /* Bad file number */
    ECHILD = 10,       /* No child processes */
    ENOMEM = 12,       /* Out of memory */
    EFAULT = 14,       /* Bad address */
    EBUSY = 16,        /* Device or resource busy */
    EEXIST = 17,       /* File exists */
    ENOTDIR = 20,      /* Not a directory */
    EISDIR = 21,       /* Is a directory */
    EINVAL = 22,       /* Invalid argument */
    ENFILE = 23,       /* File table overflow */
    EMFILE = 24,       /* Too many open files */
    EFBIG = 27,        /* File too large */
    ENOSPC = 28,       /* No space left on device */
    ENAMETOOLONG = 36, /* File name too long */
    ENOSYS = 38,       /* Invalid system call number */
    ENOTEMPTY = 39,    /* Directory not empty */
}

/// Error used in this crate.
#[derive(Debug, Clone, Copy)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }

    pub const fn message(&self) -> Option<&'static str> {
        self.msg
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{:?}: {}", self.errno, msg),
            None => write!(f, "{:?}", self.errno),
        }
    }
}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return core::result::Result::Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $message: expr) => {
        return core::result::Result::Err($crate::error::Error::with_message($errno, $message))
    };
}
