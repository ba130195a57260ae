// SPDX-License-Identifier: MIT

use std::sync::{Arc, Condvar, Mutex};

/// Latch a job can block on until the test opens it. Used to wedge pool
/// workers at known points.
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Gate {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            signal: Condvar::new(),
        })
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
    }
}
