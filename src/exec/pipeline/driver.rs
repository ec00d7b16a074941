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
//! Pipeline driver execution core.
//!
//! Responsibilities:
//! - Pumps pages between adjacent operators of one pipeline with
//!   blocking-future back-pressure and cooperative time slicing.
//! - Coalesces externally staged split updates and applies them to source
//!   operators under the exclusive lock.
//! - Runs the at-most-once destruction sequence with suppressed-error
//!   accumulation and interrupt preservation.
//!
//! Key exported interfaces:
//! - Types: `Driver`, `DriverState`.
//!
//! As a general strategy the public entry points stage a change lock-free
//! and the actual change is applied right before the exclusive lock is
//! released. Only one thread at a time works with the operators, and state
//! changer threads are never blocked on operator work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};

use crate::common::ids::PlanNodeId;
use crate::exec::pipeline::blocked::{BlockedFuture, not_blocked};
use crate::exec::pipeline::driver_context::DriverContext;
use crate::exec::pipeline::error::{DriverError, OperatorError};
use crate::exec::pipeline::operator::Operator;
use crate::exec::pipeline::task_source::TaskSource;
use crate::pipexec_logging::{debug, error};
use crate::runtime::interrupt::{self, InterruptHandle};

const LOCK_WAIT: Duration = Duration::from_millis(100);

const STATE_ALIVE: u8 = 0;
const STATE_NEED_DESTRUCTION: u8 = 1;
const STATE_DESTROYED: u8 = 2;

/// Driver lifecycle. Transitions are monotone and happen only through a
/// successful compare-and-swap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriverState {
    Alive,
    NeedDestruction,
    Destroyed,
}

impl DriverState {
    fn from_u8(value: u8) -> DriverState {
        match value {
            STATE_ALIVE => DriverState::Alive,
            STATE_NEED_DESTRUCTION => DriverState::NeedDestruction,
            STATE_DESTROYED => DriverState::Destroyed,
            _ => unreachable!("invalid driver state {}", value),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DriverState::Alive => STATE_ALIVE,
            DriverState::NeedDestruction => STATE_NEED_DESTRUCTION,
            DriverState::Destroyed => STATE_DESTROYED,
        }
    }
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(STATE_ALIVE))
    }

    fn load(&self) -> DriverState {
        DriverState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: DriverState, to: DriverState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Thread currently inside the exclusive lock, with a handle for delivering
/// a cooperative interrupt to it.
struct LockHolder {
    thread: ThreadId,
    interrupt: InterruptHandle,
}

/// State reachable only through the exclusive lock.
struct DriverInner {
    operators: Vec<Box<dyn Operator>>,
    source_positions: HashMap<PlanNodeId, usize>,
    applied_sources: HashMap<PlanNodeId, Arc<TaskSource>>,
}

/// Single-pipeline execution driver.
///
/// Owns an ordered, non-empty chain of operators: operator `i` produces
/// pages consumed by operator `i + 1`. Many threads may call the public API
/// concurrently; operator state is only ever touched by the one thread
/// holding the exclusive lock.
pub struct Driver {
    driver_context: Arc<dyn DriverContext>,
    source_ids: HashSet<PlanNodeId>,
    staged_sources: DashMap<PlanNodeId, Arc<TaskSource>>,
    state: StateCell,
    exclusive: Mutex<DriverInner>,
    lock_holder: StdMutex<Option<LockHolder>>,
}

impl Driver {
    /// Panics on an empty operator list or a duplicated source plan node id.
    pub fn new(driver_context: Arc<dyn DriverContext>, operators: Vec<Box<dyn Operator>>) -> Self {
        assert!(
            !operators.is_empty(),
            "there must be at least one operator"
        );
        let mut source_positions = HashMap::new();
        for (position, operator) in operators.iter().enumerate() {
            if let Some(source) = operator.as_source_ref() {
                let previous = source_positions.insert(source.source_id(), position);
                assert!(
                    previous.is_none(),
                    "duplicate source operator for plan node {}",
                    source.source_id()
                );
            }
        }
        let source_ids = source_positions.keys().copied().collect();
        Self {
            driver_context,
            source_ids,
            staged_sources: DashMap::new(),
            state: StateCell::new(),
            exclusive: Mutex::new(DriverInner {
                operators,
                source_positions,
                applied_sources: HashMap::new(),
            }),
            lock_holder: StdMutex::new(None),
        }
    }

    pub fn driver_context(&self) -> &Arc<dyn DriverContext> {
        &self.driver_context
    }

    /// The fixed set of plan node ids served by this driver's source
    /// operators.
    pub fn source_ids(&self) -> &HashSet<PlanNodeId> {
        &self.source_ids
    }

    pub fn state(&self) -> DriverState {
        self.state.load()
    }

    /// Request destruction. Never blocks on operator work: if the lock is
    /// contended the current holder is interrupted and performs the
    /// destruction on its way out.
    pub fn close(&self) -> Result<(), DriverError> {
        self.check_lock_not_held("can not close the driver while holding the driver lock");

        // mark the driver for destruction
        if !self
            .state
            .transition(DriverState::Alive, DriverState::NeedDestruction)
        {
            return Ok(());
        }

        // if we can get the lock, attempt a clean shutdown; otherwise the
        // holder will shut down during its lock release
        let lock = self.try_lock_and_process(Duration::ZERO);
        if !lock.was_acquired() {
            // benign race: the holder may change between this read and the
            // interrupt landing; destruction still runs on the next release
            // and a spuriously interrupted fresh holder unwinds harmlessly
            if let Some(holder) = self.lock_holder.lock().expect("lock holder mutex").as_ref() {
                debug!(
                    "interrupting driver lock holder: task_id={}",
                    self.driver_context.task_id()
                );
                holder.interrupt.interrupt();
            }
        }
        lock.release()
    }

    /// Whether the driver has terminated, naturally or by request. Must not
    /// be called while holding the driver lock.
    pub fn is_finished(&self) -> Result<bool, DriverError> {
        self.check_lock_not_held("can not check finished status while holding the driver lock");

        let mut lock = self.try_lock_and_process(Duration::ZERO);
        if lock.was_acquired() {
            let finished = self.state.load() != DriverState::Alive
                || self.driver_context.is_done()
                || lock
                    .inner_mut()
                    .operators
                    .last()
                    .expect("non-empty pipeline")
                    .is_finished();
            if finished {
                self.state
                    .transition(DriverState::Alive, DriverState::NeedDestruction);
            }
            lock.release()?;
            Ok(finished)
        } else {
            // without the lock the last operator is unknowable; answer
            // conservatively
            Ok(self.state.load() != DriverState::Alive || self.driver_context.is_done())
        }
    }

    /// Stage a split update for one of this driver's source operators.
    /// Updates for plan nodes owned by sibling drivers are ignored. The
    /// apply may happen on a different thread.
    pub fn update_source(&self, source: TaskSource) -> Result<(), DriverError> {
        self.check_lock_not_held("can not update sources while holding the driver lock");

        if !self.source_ids.contains(&source.plan_node_id()) {
            return Ok(());
        }

        self.stage_source(source);

        // the staged update is applied during lock release, by this thread
        // if the zero-wait acquisition succeeds or by the current holder
        // otherwise
        self.try_lock_and_process(Duration::ZERO).release()
    }

    fn stage_source(&self, source: TaskSource) {
        let plan_node_id = source.plan_node_id();
        let incoming = Arc::new(source);
        match self.staged_sources.entry(plan_node_id) {
            Entry::Vacant(entry) => {
                entry.insert(incoming);
            }
            Entry::Occupied(mut entry) => {
                let merged = entry.get().update(&incoming);
                if !Arc::ptr_eq(&merged, entry.get()) {
                    entry.insert(merged);
                }
            }
        }
    }

    /// Run one cooperative processing quantum. Returns the back-pressure
    /// future of the first blocked operator, or `NOT_BLOCKED` when the
    /// caller should reschedule immediately.
    pub fn process(&self) -> Result<BlockedFuture, DriverError> {
        self.check_lock_not_held("can not process while holding the driver lock");

        let mut lock = self.try_lock_and_process(LOCK_WAIT);
        if !lock.was_acquired() {
            // unlikely unless the driver is being destroyed; the caller
            // notices that state change through is_finished
            return Ok(not_blocked());
        }

        let pump_result = match self.run_pump(lock.inner_mut()) {
            Ok(future) => Ok(future),
            Err(error) => {
                let failure = DriverError::new(error);
                self.driver_context.failed(&failure);
                Err(failure)
            }
        };
        let release_result = lock.release();
        match (pump_result, release_result) {
            (Ok(future), Ok(())) => Ok(future),
            (Ok(_), Err(release_error)) => Err(release_error),
            (Err(failure), Ok(())) => Err(failure),
            (Err(mut failure), Err(release_error)) => {
                failure.absorb(release_error);
                Err(failure)
            }
        }
    }

    /// Repeatedly run quanta until blocked, finished, or the wall-clock
    /// budget expires.
    pub fn process_for(&self, duration: Duration) -> Result<BlockedFuture, DriverError> {
        self.check_lock_not_held("can not process for a duration while holding the driver lock");

        let start = Instant::now();
        loop {
            let future = self.process()?;
            if !future.is_done() {
                return Ok(future);
            }
            if start.elapsed() >= duration || self.is_finished()? {
                return Ok(not_blocked());
            }
        }
    }

    fn run_pump(&self, inner: &mut DriverInner) -> Result<BlockedFuture, OperatorError> {
        self.driver_context.start();

        if !self.staged_sources.is_empty() {
            self.process_new_sources(inner)?;
        }

        let operator_count = inner.operators.len();
        for i in 0..operator_count.saturating_sub(1) {
            if self.driver_context.is_done() {
                break;
            }
            // cooperative cancellation point; close() raises this flag on
            // the pump holder when it cannot take the lock
            if interrupt::is_interrupted() {
                return Err(OperatorError::Interrupted);
            }

            let (head, tail) = inner.operators.split_at_mut(i + 1);
            let current = &mut head[i];
            let next = &mut tail[0];

            let blocked = current.is_blocked();
            if !blocked.is_done() {
                current.operator_context().record_blocked(&blocked);
                return Ok(blocked);
            }
            let blocked = next.is_blocked();
            if !blocked.is_done() {
                next.operator_context().record_blocked(&blocked);
                return Ok(blocked);
            }

            if current.is_finished() {
                // let the next operator know there will be no more data;
                // keep walking so a finish chain propagates in one quantum
                let started = Instant::now();
                let result = next.finish();
                next.operator_context().record_finish(started.elapsed());
                result?;
            } else if next.needs_input() {
                let started = Instant::now();
                let page = current.get_output();
                current
                    .operator_context()
                    .record_get_output(started.elapsed(), page.as_ref().ok().and_then(|p| p.as_ref()));
                if let Some(page) = page? {
                    let rows = page.num_rows();
                    let started = Instant::now();
                    let result = next.add_input(page);
                    next.operator_context().record_add_input(started.elapsed(), rows);
                    result?;
                }
            }
        }
        // the last operator's output is never read; its is_finished alone
        // terminates the driver
        Ok(not_blocked())
    }

    fn process_new_sources(&self, inner: &mut DriverInner) -> Result<(), OperatorError> {
        self.check_lock_held("lock must be held to call process_new_sources");

        // only update while the driver is still alive
        if self.state.load() != DriverState::Alive {
            return Ok(());
        }

        // snapshot the staged entries; one staged during the copy is caught
        // on the next drain
        let staged: Vec<(PlanNodeId, Arc<TaskSource>)> = self
            .staged_sources
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        for (plan_node_id, source) in staged {
            // remove only if unchanged; a concurrently re-staged entry keeps
            // the newer value for the next drain
            self.staged_sources
                .remove_if(&plan_node_id, |_, value| Arc::ptr_eq(value, &source));
            self.process_new_source(inner, plan_node_id, source)?;
        }
        Ok(())
    }

    fn process_new_source(
        &self,
        inner: &mut DriverInner,
        plan_node_id: PlanNodeId,
        source: Arc<TaskSource>,
    ) -> Result<(), OperatorError> {
        let new_splits: Vec<_> = match inner.applied_sources.get(&plan_node_id) {
            None => {
                let splits = source.splits().iter().map(|s| s.split().clone()).collect();
                inner.applied_sources.insert(plan_node_id, Arc::clone(&source));
                splits
            }
            Some(current) => {
                let merged = current.update(&source);
                if Arc::ptr_eq(&merged, current) {
                    return Ok(());
                }
                let splits = merged
                    .splits()
                    .difference(current.splits())
                    .map(|s| s.split().clone())
                    .collect();
                inner.applied_sources.insert(plan_node_id, merged);
                splits
            }
        };

        let Some(&position) = inner.source_positions.get(&plan_node_id) else {
            return Ok(());
        };
        let operator = inner.operators[position]
            .as_source_mut()
            .expect("source position points at a source operator");
        for split in new_splits {
            operator.add_split(split)?;
        }
        if source.is_no_more_splits() {
            operator.no_more_splits()?;
        }
        Ok(())
    }

    fn destroy_if_necessary(&self, inner: &mut DriverInner) -> Result<(), DriverError> {
        self.check_lock_held("lock must be held to call destroy_if_necessary");

        if !self
            .state
            .transition(DriverState::NeedDestruction, DriverState::Destroyed)
        {
            return Ok(());
        }
        debug!(
            "destroying driver: task_id={}",
            self.driver_context.task_id()
        );

        // finish in pipeline order; the first failure stops finishing but
        // every close below is still attempted
        let mut in_flight: Option<DriverError> = None;
        for operator in inner.operators.iter_mut() {
            if let Err(failure) = operator.finish() {
                in_flight = Some(DriverError::new(failure));
                break;
            }
        }

        // snapshot and clear the interrupt flag; restored below
        let mut was_interrupted = interrupt::take_interrupted();

        for operator in inner.operators.iter_mut() {
            let started = Instant::now();
            let result = operator.close();
            operator.operator_context().record_close(started.elapsed());
            match result {
                Ok(()) => {}
                Err(OperatorError::Interrupted) => {
                    was_interrupted = true;
                }
                Err(failure) => {
                    let message = format!(
                        "error closing operator {} for task {}",
                        operator.operator_context().operator_id(),
                        self.driver_context.task_id()
                    );
                    in_flight = Self::add_suppressed(in_flight, failure, &message);
                }
            }
        }

        if let Err(failure) = self.driver_context.finished() {
            let message = format!(
                "error destroying driver for task {}",
                self.driver_context.task_id()
            );
            in_flight = Self::add_suppressed(in_flight, failure, &message);
        }

        if was_interrupted {
            interrupt::set_interrupted();
        }

        match in_flight {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Fatal errors chain onto the in-flight failure; anything else is
    /// logged and dropped so one noisy close cannot mask the rest.
    fn add_suppressed(
        in_flight: Option<DriverError>,
        failure: OperatorError,
        message: &str,
    ) -> Option<DriverError> {
        if failure.is_fatal() {
            match in_flight {
                None => Some(DriverError::new(failure)),
                Some(mut primary) => {
                    primary.add_suppressed(failure);
                    Some(primary)
                }
            }
        } else {
            error!("{}: {}", message, failure);
            in_flight
        }
    }

    fn try_lock_and_process(&self, timeout: Duration) -> DriverLockResult<'_> {
        self.check_lock_not_held(
            "can not acquire the driver lock while already holding the driver lock",
        );

        let guard = if timeout.is_zero() {
            self.exclusive.try_lock()
        } else {
            self.exclusive.try_lock_for(timeout)
        };
        if guard.is_some() {
            let mut holder = self.lock_holder.lock().expect("lock holder mutex");
            *holder = Some(LockHolder {
                thread: thread::current().id(),
                interrupt: interrupt::current_handle(),
            });
        }
        DriverLockResult {
            driver: self,
            guard,
        }
    }

    fn clear_lock_holder(&self) {
        *self.lock_holder.lock().expect("lock holder mutex") = None;
    }

    fn check_lock_not_held(&self, message: &str) {
        let holder = self.lock_holder.lock().expect("lock holder mutex");
        if let Some(holder) = holder.as_ref() {
            assert!(holder.thread != thread::current().id(), "{}", message);
        }
    }

    fn check_lock_held(&self, message: &str) {
        let holder = self.lock_holder.lock().expect("lock holder mutex");
        assert!(
            matches!(holder.as_ref(), Some(h) if h.thread == thread::current().id()),
            "{}",
            message
        );
    }
}

/// Scoped acquisition of the exclusive lock. Releasing drains staged source
/// updates and performs destruction if requested, so state staged lock-free
/// is always applied by whichever thread releases the lock next.
struct DriverLockResult<'a> {
    driver: &'a Driver,
    guard: Option<MutexGuard<'a, DriverInner>>,
}

impl DriverLockResult<'_> {
    fn was_acquired(&self) -> bool {
        self.guard.is_some()
    }

    fn inner_mut(&mut self) -> &mut DriverInner {
        self.guard.as_mut().expect("driver lock not acquired")
    }

    fn release(mut self) -> Result<(), DriverError> {
        let Some(mut guard) = self.guard.take() else {
            return Ok(());
        };

        let drain_result = self.driver.process_new_sources(&mut guard);
        let destroy_result = self.driver.destroy_if_necessary(&mut guard);

        self.driver.clear_lock_holder();
        drop(guard);

        let mut failure: Option<DriverError> = None;
        if let Err(drain_failure) = drain_result {
            failure = Some(DriverError::new(drain_failure));
        }
        if let Err(destroy_failure) = destroy_result {
            match failure.as_mut() {
                Some(primary) => primary.absorb(destroy_failure),
                None => failure = Some(destroy_failure),
            }
        }
        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

impl Drop for DriverLockResult<'_> {
    fn drop(&mut self) {
        // normal paths go through release(); reaching here with the guard
        // still attached means a contract-violation panic is unwinding
        if self.guard.take().is_some() {
            self.driver.clear_lock_holder();
        }
    }
}
