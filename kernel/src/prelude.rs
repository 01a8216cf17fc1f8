// SPDX-License-Identifier: MPL-2.0

#![allow(unused)]

pub(crate) use std::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};

pub(crate) use bitflags::bitflags;
pub(crate) use log::{debug, error, info, trace, warn};

pub(crate) use crate::{
    error::{Errno, Error},
    return_errno, return_errno_with_message,
    sync::SpinLock,
};

pub(crate) type Result<T> = core::result::Result<T, Error>;

/// Returns the current thread.
#[macro_export]
macro_rules! current_thread {
    () => {
        $crate::thread::Thread::current()
    };
}

pub(crate) use crate::current_thread;
