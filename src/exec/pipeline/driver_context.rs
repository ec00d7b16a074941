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
//! Driver and operator accounting contexts.
//!
//! Responsibilities:
//! - Defines the task-side contract the driver reports into
//!   (`DriverContext`) and a default implementation of it.
//! - Tracks per-operator timing and row counters updated by the driver as
//!   it pumps pages between operators.
//!
//! Key exported interfaces:
//! - Types: `DriverContext`, `TaskDriverContext`, `OperatorContext`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::common::ids::TaskId;
use crate::exec::page::Page;
use crate::exec::pipeline::blocked::BlockedFuture;
use crate::exec::pipeline::error::{DriverError, OperatorError};
use crate::runtime::profile::{Counter, CounterRef, CounterUnit, clamp_u128_to_i64};

/// Task-side view of one driver. Thread-safe by contract; the driver calls
/// into it from whichever thread currently runs the pump.
pub trait DriverContext: Send + Sync {
    /// A worker thread is starting a processing quantum.
    fn start(&self);

    /// Whether the owning task no longer wants this driver to run
    /// (finished, canceled, or failed at the task level).
    fn is_done(&self) -> bool;

    /// The pump failed; recorded before the error is propagated.
    fn failed(&self, error: &DriverError);

    /// Destruction completed and all operators were torn down.
    fn finished(&self) -> Result<(), OperatorError>;

    fn task_id(&self) -> TaskId;
}

/// Per-operator timing and row accounting, updated only by the thread
/// holding the driver lock.
#[derive(Debug)]
pub struct OperatorContext {
    operator_id: usize,
    name: String,
    get_output_time: CounterRef,
    add_input_time: CounterRef,
    finish_time: CounterRef,
    close_time: CounterRef,
    input_rows: CounterRef,
    output_rows: CounterRef,
    blocked_count: CounterRef,
    blocked_time: CounterRef,
}

impl OperatorContext {
    pub fn new(operator_id: usize, name: impl Into<String>) -> Self {
        Self {
            operator_id,
            name: name.into(),
            get_output_time: Arc::new(Counter::new("GetOutputTime", CounterUnit::TimeNs)),
            add_input_time: Arc::new(Counter::new("AddInputTime", CounterUnit::TimeNs)),
            finish_time: Arc::new(Counter::new("FinishTime", CounterUnit::TimeNs)),
            close_time: Arc::new(Counter::new("CloseTime", CounterUnit::TimeNs)),
            input_rows: Arc::new(Counter::new("InputRowNum", CounterUnit::Unit)),
            output_rows: Arc::new(Counter::new("OutputRowNum", CounterUnit::Unit)),
            blocked_count: Arc::new(Counter::new("BlockedNum", CounterUnit::Unit)),
            blocked_time: Arc::new(Counter::new("BlockedTime", CounterUnit::TimeNs)),
        }
    }

    pub fn operator_id(&self) -> usize {
        self.operator_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_get_output(&self, elapsed: Duration, page: Option<&Page>) {
        self.get_output_time
            .add(clamp_u128_to_i64(elapsed.as_nanos()));
        if let Some(page) = page {
            self.output_rows.add(page.num_rows() as i64);
        }
    }

    pub fn record_add_input(&self, elapsed: Duration, rows: usize) {
        self.add_input_time
            .add(clamp_u128_to_i64(elapsed.as_nanos()));
        self.input_rows.add(rows as i64);
    }

    pub fn record_finish(&self, elapsed: Duration) {
        self.finish_time.add(clamp_u128_to_i64(elapsed.as_nanos()));
    }

    pub fn record_close(&self, elapsed: Duration) {
        self.close_time.add(clamp_u128_to_i64(elapsed.as_nanos()));
    }

    /// Count a blocked observation and accumulate blocked wall time once
    /// the future completes.
    pub fn record_blocked(&self, blocked: &BlockedFuture) {
        self.blocked_count.add(1);
        let timer = Arc::clone(&self.blocked_time);
        let started = Instant::now();
        blocked.add_listener(Arc::new(move || {
            timer.add(clamp_u128_to_i64(started.elapsed().as_nanos()));
        }));
    }

    pub fn get_output_time_ns(&self) -> i64 {
        self.get_output_time.value()
    }

    pub fn add_input_time_ns(&self) -> i64 {
        self.add_input_time.value()
    }

    pub fn finish_time_ns(&self) -> i64 {
        self.finish_time.value()
    }

    pub fn close_time_ns(&self) -> i64 {
        self.close_time.value()
    }

    pub fn input_rows(&self) -> i64 {
        self.input_rows.value()
    }

    pub fn output_rows(&self) -> i64 {
        self.output_rows.value()
    }

    pub fn blocked_count(&self) -> i64 {
        self.blocked_count.value()
    }

    pub fn blocked_time_ns(&self) -> i64 {
        self.blocked_time.value()
    }
}

/// Default `DriverContext`: tracks start time, quantum count, the first
/// failure, and the registry of operator contexts for one driver.
#[derive(Debug)]
pub struct TaskDriverContext {
    task_id: TaskId,
    start_instant: Mutex<Option<Instant>>,
    quanta: AtomicI64,
    done: AtomicBool,
    finished: AtomicBool,
    failure: Mutex<Option<String>>,
    operator_contexts: Mutex<Vec<Arc<OperatorContext>>>,
}

impl TaskDriverContext {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            start_instant: Mutex::new(None),
            quanta: AtomicI64::new(0),
            done: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            failure: Mutex::new(None),
            operator_contexts: Mutex::new(Vec::new()),
        }
    }

    /// Register the next operator position; ids are assigned in pipeline
    /// order starting at zero.
    pub fn add_operator_context(&self, name: impl Into<String>) -> Arc<OperatorContext> {
        let mut contexts = self
            .operator_contexts
            .lock()
            .expect("operator contexts lock");
        let context = Arc::new(OperatorContext::new(contexts.len(), name));
        contexts.push(Arc::clone(&context));
        context
    }

    pub fn operator_contexts(&self) -> Vec<Arc<OperatorContext>> {
        self.operator_contexts
            .lock()
            .expect("operator contexts lock")
            .clone()
    }

    /// Number of processing quanta started so far.
    pub fn quanta(&self) -> i64 {
        self.quanta.load(Ordering::Acquire)
    }

    pub fn has_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().expect("failure lock").clone()
    }
}

impl DriverContext for TaskDriverContext {
    fn start(&self) {
        self.quanta.fetch_add(1, Ordering::AcqRel);
        let mut start = self.start_instant.lock().expect("start instant lock");
        if start.is_none() {
            *start = Some(Instant::now());
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn failed(&self, error: &DriverError) {
        let mut failure = self.failure.lock().expect("failure lock");
        if failure.is_none() {
            *failure = Some(error.to_string());
        }
        self.done.store(true, Ordering::Release);
    }

    fn finished(&self) -> Result<(), OperatorError> {
        self.finished.store(true, Ordering::Release);
        self.done.store(true, Ordering::Release);
        Ok(())
    }

    fn task_id(&self) -> TaskId {
        self.task_id
    }
}
