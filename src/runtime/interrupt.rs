// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Per-thread interrupt flags.
//!
//! Responsibilities:
//! - Gives every thread a lazily-created interrupt flag and a cross-thread
//!   handle to set it.
//! - The driver polls the flag between operator calls as a cooperative
//!   cancellation point; blocking operators are expected to do the same.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

thread_local! {
    static CURRENT: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

fn with_flag<T>(f: impl FnOnce(&Arc<AtomicBool>) -> T) -> T {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        let flag = slot.get_or_insert_with(|| Arc::new(AtomicBool::new(false)));
        f(flag)
    })
}

/// Cross-thread handle to one thread's interrupt flag.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Handle to the calling thread's own flag, for handing to other threads.
pub fn current_handle() -> InterruptHandle {
    with_flag(|flag| InterruptHandle {
        flag: Arc::clone(flag),
    })
}

/// Whether the calling thread has a pending interrupt. Does not clear it.
pub fn is_interrupted() -> bool {
    with_flag(|flag| flag.load(Ordering::Acquire))
}

/// Snapshot and clear the calling thread's interrupt flag.
pub fn take_interrupted() -> bool {
    with_flag(|flag| flag.swap(false, Ordering::AcqRel))
}

/// Raise the interrupt flag on the calling thread.
pub fn set_interrupted() {
    with_flag(|flag| flag.store(true, Ordering::Release));
}
