// SPDX-License-Identifier: MPL-2.0

//! Global tid → thread map.

use hashbrown::HashMap;

use crate::prelude::*;
use crate::thread::{Thread, Tid};

lazy_static::lazy_static! {
    static ref THREAD_TABLE: SpinLock<HashMap<Tid, Weak<Thread>>> =
        SpinLock::new(HashMap::new());
}

pub(crate) fn add(thread: &Arc<Thread>) {
    THREAD_TABLE
        .lock()
        .insert(thread.tid(), Arc::downgrade(thread));
}

pub(crate) fn remove(tid: Tid) {
    THREAD_TABLE.lock().remove(&tid);
}

pub fn get(tid: Tid) -> Option<Arc<Thread>> {
    THREAD_TABLE.lock().get(&tid)?.upgrade()
}

pub(crate) fn reset() {
    THREAD_TABLE.lock().clear();
}
