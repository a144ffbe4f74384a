// Copyright (C) 2026 the sdsampler authors
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Shutdown signalling between the control thread, the feed thread and the
//! output stream.

use std::sync::{Arc, Condvar, Mutex};

/// A cancel handle is held by the feed loop and the output stream; it is the
/// holder's responsibility to notice a cancel request and wind down.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<Mutex<bool>>,
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(Mutex::new(false)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().expect("Error getting lock")
    }

    /// Blocks until the handle is cancelled.
    pub fn wait(&self) {
        let _unused = self
            .condvar
            .wait_while(
                self.cancelled.lock().expect("Error getting lock"),
                |cancelled| !*cancelled,
            )
            .expect("Error getting lock");
    }

    /// Requests shutdown and wakes all waiters.
    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().expect("Error getting lock");
        if !*cancelled {
            *cancelled = true;
            self.condvar.notify_all();
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}
