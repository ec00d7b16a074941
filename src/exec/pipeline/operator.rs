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
//! Core operator contracts.
//!
//! Responsibilities:
//! - Defines the pipeline operator capability set the driver pumps, and the
//!   source-operator extension that ingests externally delivered splits.
//! - Used by the driver to move pages between adjacent operators with
//!   blocking-future back-pressure.
//!
//! Key exported interfaces:
//! - Traits: `Operator`, `SourceOperator`.

use crate::common::ids::PlanNodeId;
use crate::exec::page::Page;
use crate::exec::pipeline::blocked::{BlockedFuture, not_blocked};
use crate::exec::pipeline::driver_context::OperatorContext;
use crate::exec::pipeline::error::OperatorError;
use crate::exec::pipeline::task_source::Split;

/// One stage of a pipeline: consumes input pages, emits output pages, and
/// reports finished/blocked status. Only the driver thread holding the
/// exclusive lock may call the `&mut self` methods.
pub trait Operator: Send {
    fn operator_context(&self) -> &OperatorContext;

    /// Whether the operator can accept a page via `add_input` right now.
    fn needs_input(&self) -> bool;

    fn add_input(&mut self, page: Page) -> Result<(), OperatorError>;

    fn get_output(&mut self) -> Result<Option<Page>, OperatorError>;

    /// No more input will arrive; drain any remaining output.
    fn finish(&mut self) -> Result<(), OperatorError>;

    fn is_finished(&self) -> bool;

    /// Completion handle for the operator's next chance to make progress.
    /// Ready operators return the `NOT_BLOCKED` sentinel.
    fn is_blocked(&self) -> BlockedFuture {
        not_blocked()
    }

    /// Release externally owned resources (streams, scanners). The default
    /// is a no-op; operators owning resources override it.
    fn close(&mut self) -> Result<(), OperatorError> {
        Ok(())
    }

    fn as_source_ref(&self) -> Option<&dyn SourceOperator> {
        None
    }

    fn as_source_mut(&mut self) -> Option<&mut dyn SourceOperator> {
        None
    }
}

/// Operator that ingests externally delivered splits for one plan node.
pub trait SourceOperator: Operator {
    fn source_id(&self) -> PlanNodeId;

    fn add_split(&mut self, split: Split) -> Result<(), OperatorError>;

    fn no_more_splits(&mut self) -> Result<(), OperatorError>;
}
