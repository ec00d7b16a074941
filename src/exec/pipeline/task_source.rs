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
//! Split delivery messages.
//!
//! Responsibilities:
//! - Defines the immutable `TaskSource` message the task scheduler sends to
//!   drivers, plus the split value types it carries.
//! - `TaskSource::update` implements the merge/identity contract that
//!   staging and draining rely on for deduplication.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::common::ids::PlanNodeId;

/// Opaque unit of data-source work (file range, shard, etc.).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Split {
    id: u64,
    descriptor: String,
}

impl Split {
    pub fn new(id: u64, descriptor: impl Into<String>) -> Self {
        Self {
            id,
            descriptor: descriptor.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

/// A split plus its task-level scheduling sequence number.
///
/// Two scheduled splits denote the same scheduling decision iff their
/// sequence ids match; set membership and deduplication key on that alone.
#[derive(Clone, Debug)]
pub struct ScheduledSplit {
    sequence_id: i64,
    split: Split,
}

impl ScheduledSplit {
    pub fn new(sequence_id: i64, split: Split) -> Self {
        Self { sequence_id, split }
    }

    pub fn sequence_id(&self) -> i64 {
        self.sequence_id
    }

    pub fn split(&self) -> &Split {
        &self.split
    }
}

impl PartialEq for ScheduledSplit {
    fn eq(&self, other: &Self) -> bool {
        self.sequence_id == other.sequence_id
    }
}

impl Eq for ScheduledSplit {}

impl Hash for ScheduledSplit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sequence_id.hash(state);
    }
}

/// Immutable split-set message for one source plan node.
#[derive(Clone, Debug)]
pub struct TaskSource {
    plan_node_id: PlanNodeId,
    splits: HashSet<ScheduledSplit>,
    no_more_splits: bool,
}

impl TaskSource {
    pub fn new(
        plan_node_id: PlanNodeId,
        splits: impl IntoIterator<Item = ScheduledSplit>,
        no_more_splits: bool,
    ) -> Self {
        Self {
            plan_node_id,
            splits: splits.into_iter().collect(),
            no_more_splits,
        }
    }

    pub fn plan_node_id(&self) -> PlanNodeId {
        self.plan_node_id
    }

    pub fn splits(&self) -> &HashSet<ScheduledSplit> {
        &self.splits
    }

    pub fn is_no_more_splits(&self) -> bool {
        self.no_more_splits
    }

    /// Merge `other` into this source. Returns the receiver unchanged (same
    /// allocation) when `other` contributes no new split and no new
    /// terminal flag, so callers can detect a no-op with `Arc::ptr_eq`.
    pub fn update(self: &Arc<Self>, other: &TaskSource) -> Arc<TaskSource> {
        assert_eq!(
            self.plan_node_id, other.plan_node_id,
            "update with a task source for a different plan node"
        );
        let has_new_splits = other.splits.iter().any(|s| !self.splits.contains(s));
        let has_new_flag = other.no_more_splits && !self.no_more_splits;
        if !has_new_splits && !has_new_flag {
            return Arc::clone(self);
        }
        let mut splits = self.splits.clone();
        splits.extend(other.splits.iter().cloned());
        Arc::new(TaskSource {
            plan_node_id: self.plan_node_id,
            splits,
            no_more_splits: self.no_more_splits || other.no_more_splits,
        })
    }
}
