// SPDX-License-Identifier: MPL-2.0

//! Host-thread parking.
//!
//! This is the context-switch substrate: a descheduled kernel thread parks
//! its host thread here, and the dispatcher unparks the one it picked.
//! The token is sticky, so an unpark that races ahead of the park is not
//! lost.

use std::sync::{Condvar, Mutex, PoisonError};

pub(crate) struct Parker {
    token: Mutex<bool>,
    cvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            token: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Blocks the calling host thread until a token is available, then
    /// consumes it.
    pub(crate) fn park(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        while !*token {
            token = self
                .cvar
                .wait(token)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *token = false;
    }

    /// Makes a token available, waking the parked thread if there is one.
    pub(crate) fn unpark(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = true;
        self.cvar.notify_one();
    }
}
