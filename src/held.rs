//! Set of codes currently held down by a replay run.
//!
//! Written by the channel worker (press/release) and drained from the worker's finish
//! sequence, the orchestrator and the cleanup path, possibly all at once. Draining takes
//! a snapshot and clears it under one lock, so every code is handed to exactly one
//! drainer; a press that lands after a drain stays in the set for the next one.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::keycode::DeviceCode;

#[derive(Debug, Default)]
pub struct HeldSet {
    inner: Mutex<BTreeSet<DeviceCode>>,
}

impl HeldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the code was already held.
    pub fn press(&self, code: DeviceCode) -> bool {
        self.inner.lock().insert(code)
    }

    /// Returns `false` if the code was not held.
    pub fn release(&self, code: DeviceCode) -> bool {
        self.inner.lock().remove(&code)
    }

    pub fn contains(&self, code: DeviceCode) -> bool {
        self.inner.lock().contains(&code)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Take every held code, leaving the set empty.
    pub fn drain(&self) -> Vec<DeviceCode> {
        std::mem::take(&mut *self.inner.lock()).into_iter().collect()
    }
}
