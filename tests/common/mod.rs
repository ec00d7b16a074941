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
//! Mock operators and helpers for driver integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arrow::array::Int32Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use pipexec::runtime::interrupt;
use pipexec::{
    BlockedFuture, Operator, OperatorContext, OperatorError, Page, PlanNodeId, SourceOperator,
    Split, TaskDriverContext, not_blocked,
};

pub fn page(rows: usize) -> Page {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
    let values = Arc::new(Int32Array::from(vec![1; rows])) as arrow::array::ArrayRef;
    Page::new(RecordBatch::try_new(schema, vec![values]).expect("record batch"))
}

/// Source operator that starts emitting its preset pages once the first
/// split arrives and finishes when drained after `no_more_splits`.
pub struct SplitPageSource {
    context: Arc<OperatorContext>,
    source_id: PlanNodeId,
    pages: VecDeque<Page>,
    has_split: bool,
    no_more: bool,
    finish_called: bool,
    pub splits: Arc<Mutex<Vec<Split>>>,
    pub no_more_calls: Arc<AtomicUsize>,
    pub get_output_calls: Arc<AtomicUsize>,
    pub close_calls: Arc<AtomicUsize>,
}

impl SplitPageSource {
    pub fn new(
        context: &TaskDriverContext,
        source_id: PlanNodeId,
        pages: impl IntoIterator<Item = Page>,
    ) -> Self {
        Self {
            context: context.add_operator_context("SPLIT_SCAN"),
            source_id,
            pages: pages.into_iter().collect(),
            has_split: false,
            no_more: false,
            finish_called: false,
            splits: Arc::new(Mutex::new(Vec::new())),
            no_more_calls: Arc::new(AtomicUsize::new(0)),
            get_output_calls: Arc::new(AtomicUsize::new(0)),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Operator for SplitPageSource {
    fn operator_context(&self) -> &OperatorContext {
        self.context.as_ref()
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> Result<(), OperatorError> {
        Err(OperatorError::internal("source operator accepts no input"))
    }

    fn get_output(&mut self) -> Result<Option<Page>, OperatorError> {
        self.get_output_calls.fetch_add(1, Ordering::SeqCst);
        if !self.has_split {
            return Ok(None);
        }
        Ok(self.pages.pop_front())
    }

    fn finish(&mut self) -> Result<(), OperatorError> {
        self.finish_called = true;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finish_called || (self.no_more && self.pages.is_empty())
    }

    fn close(&mut self) -> Result<(), OperatorError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_source_ref(&self) -> Option<&dyn SourceOperator> {
        Some(self)
    }

    fn as_source_mut(&mut self) -> Option<&mut dyn SourceOperator> {
        Some(self)
    }
}

impl SourceOperator for SplitPageSource {
    fn source_id(&self) -> PlanNodeId {
        self.source_id
    }

    fn add_split(&mut self, split: Split) -> Result<(), OperatorError> {
        self.has_split = true;
        self.splits.lock().expect("splits lock").push(split);
        Ok(())
    }

    fn no_more_splits(&mut self) -> Result<(), OperatorError> {
        self.no_more = true;
        self.no_more_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Single-page buffer stage, optionally blocked behind a back-pressure
/// future or failing its close.
pub struct PassThrough {
    context: Arc<OperatorContext>,
    buffer: Option<Page>,
    finish_called: bool,
    pub blocked: Option<BlockedFuture>,
    pub close_error: Option<OperatorError>,
    pub close_calls: Arc<AtomicUsize>,
}

impl PassThrough {
    pub fn new(context: &TaskDriverContext) -> Self {
        Self {
            context: context.add_operator_context("PASS_THROUGH"),
            buffer: None,
            finish_called: false,
            blocked: None,
            close_error: None,
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Operator for PassThrough {
    fn operator_context(&self) -> &OperatorContext {
        self.context.as_ref()
    }

    fn needs_input(&self) -> bool {
        self.buffer.is_none() && !self.finish_called
    }

    fn add_input(&mut self, page: Page) -> Result<(), OperatorError> {
        self.buffer = Some(page);
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<Page>, OperatorError> {
        Ok(self.buffer.take())
    }

    fn finish(&mut self) -> Result<(), OperatorError> {
        self.finish_called = true;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finish_called && self.buffer.is_none()
    }

    fn is_blocked(&self) -> BlockedFuture {
        match self.blocked.as_ref() {
            Some(future) => future.clone(),
            None => not_blocked(),
        }
    }

    fn close(&mut self) -> Result<(), OperatorError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.close_error.take() {
            return Err(error);
        }
        Ok(())
    }
}

/// Terminal stage collecting every received page's row count.
pub struct CollectSink {
    context: Arc<OperatorContext>,
    finish_called: bool,
    pub rows: Arc<Mutex<Vec<usize>>>,
    pub close_error: Option<OperatorError>,
    pub close_calls: Arc<AtomicUsize>,
}

impl CollectSink {
    pub fn new(context: &TaskDriverContext) -> Self {
        Self {
            context: context.add_operator_context("COLLECT_SINK"),
            finish_called: false,
            rows: Arc::new(Mutex::new(Vec::new())),
            close_error: None,
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Operator for CollectSink {
    fn operator_context(&self) -> &OperatorContext {
        self.context.as_ref()
    }

    fn needs_input(&self) -> bool {
        !self.finish_called
    }

    fn add_input(&mut self, page: Page) -> Result<(), OperatorError> {
        self.rows.lock().expect("rows lock").push(page.num_rows());
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<Page>, OperatorError> {
        Ok(None)
    }

    fn finish(&mut self) -> Result<(), OperatorError> {
        self.finish_called = true;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finish_called
    }

    fn close(&mut self) -> Result<(), OperatorError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.close_error.take() {
            return Err(error);
        }
        Ok(())
    }
}

/// Source whose `get_output` spins until the pump thread is interrupted,
/// with a wall-clock bound so a missed interrupt cannot hang the suite.
pub struct SpinningSource {
    context: Arc<OperatorContext>,
    pub entered: Arc<AtomicUsize>,
    pub close_calls: Arc<AtomicUsize>,
}

impl SpinningSource {
    pub fn new(context: &TaskDriverContext) -> Self {
        Self {
            context: context.add_operator_context("SPINNING_SCAN"),
            entered: Arc::new(AtomicUsize::new(0)),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Operator for SpinningSource {
    fn operator_context(&self) -> &OperatorContext {
        self.context.as_ref()
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> Result<(), OperatorError> {
        Err(OperatorError::internal("source operator accepts no input"))
    }

    fn get_output(&mut self) -> Result<Option<Page>, OperatorError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        loop {
            if interrupt::is_interrupted() {
                return Err(OperatorError::Interrupted);
            }
            if started.elapsed() > Duration::from_secs(5) {
                return Ok(None);
            }
            std::thread::yield_now();
        }
    }

    fn finish(&mut self) -> Result<(), OperatorError> {
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), OperatorError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
