// SPDX-License-Identifier: MPL-2.0

//! Device collaborators. Only block devices exist in this model; the
//! console lives in `crate::console`.

mod block;

pub use block::{BlockDevice, MemDisk, Sector, SECTOR_SIZE};

use crate::prelude::*;

struct Registry {
    fs_device: Option<Arc<dyn BlockDevice>>,
    swap_device: Option<Arc<dyn BlockDevice>>,
}

lazy_static::lazy_static! {
    static ref REGISTRY: SpinLock<Registry> = SpinLock::new(Registry {
        fs_device: None,
        swap_device: None,
    });
}

pub fn set_fs_device(dev: Arc<dyn BlockDevice>) {
    REGISTRY.lock().fs_device = Some(dev);
}

pub fn set_swap_device(dev: Arc<dyn BlockDevice>) {
    REGISTRY.lock().swap_device = Some(dev);
}

/// The block device holding the file system.
pub fn fs_device() -> Arc<dyn BlockDevice> {
    REGISTRY
        .lock()
        .fs_device
        .clone()
        .expect("fs device not registered")
}

/// The block device backing the swap partition.
pub fn swap_device() -> Arc<dyn BlockDevice> {
    REGISTRY
        .lock()
        .swap_device
        .clone()
        .expect("swap device not registered")
}

pub(crate) fn reset() {
    let mut r = REGISTRY.lock();
    r.fs_device = None;
    r.swap_device = None;
}
