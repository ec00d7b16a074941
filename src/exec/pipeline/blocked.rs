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
//! Back-pressure futures.
//!
//! Responsibilities:
//! - Defines the completion handle operators return from `is_blocked` and
//!   the always-complete `NOT_BLOCKED` sentinel.
//! - The external scheduler suspends on incomplete handles and resumes the
//!   driver when a completion listener fires.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Callback invoked exactly once when a blocked future completes.
pub type CompletionListener = Arc<dyn Fn() + Send + Sync + 'static>;

struct FutureState {
    done: AtomicBool,
    listeners: Mutex<Vec<CompletionListener>>,
}

/// Completion handle signaling when a blocked operator will next make
/// progress. Clones share the same underlying state.
#[derive(Clone)]
pub struct BlockedFuture {
    inner: Arc<FutureState>,
}

impl BlockedFuture {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FutureState {
                done: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Mark the future complete and fire pending listeners. Only the first
    /// call notifies; later calls are no-ops.
    pub fn complete(&self) {
        let listeners = {
            let mut guard = self.inner.listeners.lock().expect("blocked future lock");
            if self.inner.done.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *guard)
        };
        for listener in listeners {
            listener();
        }
    }

    /// Register a completion listener; fires immediately if already done.
    pub fn add_listener(&self, listener: CompletionListener) {
        {
            let mut guard = self.inner.listeners.lock().expect("blocked future lock");
            if !self.inner.done.load(Ordering::Acquire) {
                guard.push(listener);
                return;
            }
        }
        listener();
    }
}

impl Default for BlockedFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for BlockedFuture {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for BlockedFuture {}

impl fmt::Debug for BlockedFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockedFuture")
            .field("done", &self.is_done())
            .finish()
    }
}

static NOT_BLOCKED: OnceLock<BlockedFuture> = OnceLock::new();

/// The singleton already-complete back-pressure future.
pub fn not_blocked() -> BlockedFuture {
    NOT_BLOCKED
        .get_or_init(|| {
            let future = BlockedFuture::new();
            future.complete();
            future
        })
        .clone()
}
