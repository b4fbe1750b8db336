//! WorkflowContext - the API workflow code uses to request effects
//!
//! Every method that reaches outside the workflow records a [`Call`] with the
//! next sequence number and returns a [`CallFuture`]. Calls are recorded when
//! the method is invoked, not when the future is first polled, so the order
//! of method invocations is the order of seqs.

use crate::error::{Result, WeftError};
use crate::workflow::future::CallFuture;
use crate::workflow::state::{ExecutorState, SignalHandlerRecord, Trigger};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use weft_core::{
    Call, DeleteOptions, EmittedEvent, EntityKey, EntityOperation, EntityWithMetadata,
    ParentExecution, PutOptions, PutResult, QueryRequest, QueryResult, Seq, SignalTarget,
    TransactItem,
};

/// Context for workflow execution.
///
/// Cheap to clone; all clones share the executor's state. Workflow code must
/// only depend on the context, its input and results of calls so that replay
/// issues the same calls in the same order.
#[derive(Clone)]
pub struct WorkflowContext {
    state: Arc<Mutex<ExecutorState>>,
    parent: Option<ParentExecution>,
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("execution_id", &self.execution_id())
            .field("parent", &self.parent)
            .finish()
    }
}

impl WorkflowContext {
    pub(crate) fn new(state: Arc<Mutex<ExecutorState>>, parent: Option<ParentExecution>) -> Self {
        Self { state, parent }
    }

    // === Identifiers ===

    /// Id of the running execution
    pub fn execution_id(&self) -> String {
        self.state.lock().execution_id.clone()
    }

    /// The execution and call that started this one, for child workflows
    pub fn parent(&self) -> Option<&ParentExecution> {
        self.parent.as_ref()
    }

    // === Deterministic time ===

    /// Logical time of the current orchestration pass (same on replay)
    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    // === Tasks and child workflows ===

    /// Run a task and wait for its result
    pub fn task<I, O>(&self, name: &str, input: &I) -> CallFuture<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        match serde_json::to_value(input) {
            Ok(input) => self.task_with_timeout(name, input, None),
            Err(e) => CallFuture::failed(WeftError::Serialization(e)),
        }
    }

    /// Run a task with a raw JSON input
    pub fn task_raw(&self, name: &str, input: Value) -> CallFuture<Value> {
        self.task_with_timeout(name, input, None)
    }

    /// Run a task with a per-attempt timeout enforced by the task worker
    pub fn task_with_timeout<O: DeserializeOwned>(
        &self,
        name: &str,
        input: Value,
        timeout: Option<Duration>,
    ) -> CallFuture<O> {
        self.request(
            Call::Task {
                name: name.to_string(),
                input,
                timeout_seconds: timeout.map(duration_seconds),
            },
            Trigger::Completion,
        )
    }

    /// Start a child workflow and wait for its result
    pub fn child_workflow<I, O>(&self, name: &str, input: &I) -> CallFuture<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        match serde_json::to_value(input) {
            Ok(input) => self.child_workflow_with_timeout(name, input, None),
            Err(e) => CallFuture::failed(WeftError::Serialization(e)),
        }
    }

    /// Start a child workflow whose whole execution is bounded by `timeout`.
    /// Without one the child's registered timeout applies.
    pub fn child_workflow_with_timeout<O: DeserializeOwned>(
        &self,
        name: &str,
        input: Value,
        timeout: Option<Duration>,
    ) -> CallFuture<O> {
        self.request(
            Call::ChildWorkflow {
                name: name.to_string(),
                input,
                timeout_seconds: timeout.map(duration_seconds),
            },
            Trigger::Completion,
        )
    }

    // === Timers ===

    /// Durable sleep relative to [`now`](Self::now)
    pub fn sleep(&self, duration: Duration) -> CallFuture<()> {
        match self.deadline(duration) {
            Ok(until) => self.sleep_until(until),
            Err(e) => CallFuture::failed(e),
        }
    }

    /// Durable sleep until an absolute time
    pub fn sleep_until(&self, until: DateTime<Utc>) -> CallFuture<()> {
        self.request(Call::AwaitTimer { until }, Trigger::Timer { until })
    }

    // === Signals and events ===

    /// Deliver a signal to another execution. Resolves immediately.
    pub fn send_signal<P: Serialize + ?Sized>(
        &self,
        target: SignalTarget,
        signal_id: &str,
        payload: &P,
    ) -> CallFuture<()> {
        match serde_json::to_value(payload) {
            Ok(payload) => self.request_resolved(
                Call::SendSignal {
                    target,
                    signal_id: signal_id.to_string(),
                    payload,
                },
                Ok(Value::Null),
            ),
            Err(e) => CallFuture::failed(WeftError::Serialization(e)),
        }
    }

    /// Publish events to the event bus. Resolves immediately.
    pub fn emit_events(&self, events: Vec<EmittedEvent>) -> CallFuture<()> {
        self.request_resolved(Call::EmitEvents { events }, Ok(Value::Null))
    }

    /// Wait for a signal sent to this execution.
    ///
    /// With a timeout, a timer call is recorded first and the future fails
    /// with [`WeftError::Timeout`] if the timer fires before the signal.
    pub fn expect_signal<T: DeserializeOwned>(
        &self,
        signal_id: &str,
        timeout: Option<Duration>,
    ) -> CallFuture<T> {
        let timeout_seq = match self.timeout_timer(timeout) {
            Ok(seq) => seq,
            Err(e) => return CallFuture::failed(e),
        };
        self.request(
            Call::ExpectSignal {
                signal_id: signal_id.to_string(),
                timeout_seq,
            },
            Trigger::Signal {
                signal_id: signal_id.to_string(),
                timeout_seq,
            },
        )
    }

    /// Run `handler` for every signal with this id until the returned
    /// [`SignalHandler`] is disposed.
    ///
    /// Handlers run synchronously while the executor applies the signal, in
    /// registration order with any `expect_signal` waiters. They must only
    /// touch workflow-local state and must not issue calls.
    pub fn on_signal<F>(&self, signal_id: &str, handler: F) -> Result<SignalHandler>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let seq = state.record_call(Call::RegisterSignalHandler {
            signal_id: signal_id.to_string(),
        })?;
        state.signal_handlers.insert(
            seq,
            SignalHandlerRecord {
                signal_id: signal_id.to_string(),
                callback: Arc::new(handler),
            },
        );
        Ok(SignalHandler {
            seq,
            state: Arc::downgrade(&self.state),
        })
    }

    /// Wait until `predicate` holds.
    ///
    /// The predicate is checked when the condition is created and again
    /// after every event the executor applies. Resolves `true` once it holds,
    /// or `false` if the optional timeout fires first. The predicate must not
    /// call back into the context.
    pub fn condition<F>(&self, predicate: F, timeout: Option<Duration>) -> CallFuture<bool>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        if predicate() {
            return self
                .request_resolved(Call::Condition { timeout_seq: None }, Ok(Value::Bool(true)));
        }
        let timeout_seq = match self.timeout_timer(timeout) {
            Ok(seq) => seq,
            Err(e) => return CallFuture::failed(e),
        };
        self.request(
            Call::Condition { timeout_seq },
            Trigger::Condition {
                predicate: Arc::new(predicate),
                timeout_seq,
            },
        )
    }

    // === Entities and transactions ===

    /// Handle for operations on one entity
    pub fn entity(&self, name: &str) -> EntityHandle {
        EntityHandle {
            ctx: self.clone(),
            entity: name.to_string(),
        }
    }

    /// Apply every item atomically, or none of them
    pub fn transact_write(&self, items: Vec<TransactItem>) -> CallFuture<()> {
        self.entity_request(EntityOperation::TransactWrite { items })
    }

    /// Run a named transaction registered with the transaction client
    pub fn invoke_transaction<I, O>(&self, name: &str, input: &I) -> CallFuture<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        match serde_json::to_value(input) {
            Ok(input) => self.request(
                Call::InvokeTransaction {
                    name: name.to_string(),
                    input,
                },
                Trigger::Completion,
            ),
            Err(e) => CallFuture::failed(WeftError::Serialization(e)),
        }
    }

    // === Internals ===

    fn entity_request<O: DeserializeOwned>(&self, operation: EntityOperation) -> CallFuture<O> {
        self.request(Call::Entity { operation }, Trigger::Completion)
    }

    fn request<O>(&self, call: Call, trigger: Trigger) -> CallFuture<O> {
        let mut state = self.state.lock();
        match state.record_call(call) {
            Ok(seq) => {
                let slot = state.register(seq, trigger);
                CallFuture::pending(seq, slot)
            }
            Err(e) => CallFuture::failed(e),
        }
    }

    fn request_resolved<O>(&self, call: Call, resolution: Result<Value>) -> CallFuture<O> {
        let mut state = self.state.lock();
        match state.record_call(call) {
            Ok(seq) => CallFuture::ready(seq, resolution),
            Err(e) => CallFuture::failed(e),
        }
    }

    fn deadline(&self, duration: Duration) -> Result<DateTime<Utc>> {
        let duration = chrono::Duration::from_std(duration)
            .map_err(|e| WeftError::Other(format!("invalid timer duration: {}", e)))?;
        self.now()
            .checked_add_signed(duration)
            .ok_or_else(|| WeftError::Other("timer deadline out of range".to_string()))
    }

    /// Record the timer backing a timeout and return its seq
    fn timeout_timer(&self, timeout: Option<Duration>) -> Result<Option<Seq>> {
        let Some(timeout) = timeout else {
            return Ok(None);
        };
        let until = self.deadline(timeout)?;
        let mut state = self.state.lock();
        let seq = state.record_call(Call::AwaitTimer { until })?;
        state.register(seq, Trigger::Timer { until });
        Ok(Some(seq))
    }
}

fn duration_seconds(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX)
}

// ============================================================================
// SignalHandler
// ============================================================================

/// Registration returned by [`WorkflowContext::on_signal`]
#[derive(Debug)]
pub struct SignalHandler {
    seq: Seq,
    state: Weak<Mutex<ExecutorState>>,
}

impl SignalHandler {
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Stop receiving signals
    pub fn dispose(self) {
        if let Some(state) = self.state.upgrade() {
            state.lock().signal_handlers.remove(&self.seq);
        }
    }
}

// ============================================================================
// EntityHandle
// ============================================================================

/// Entity operations issued from workflow code.
///
/// Each operation is a recorded call; its outcome arrives as an
/// `EntityRequestSucceeded`/`EntityRequestFailed` completion. Version
/// conflicts surface as [`WeftError::EntityRequestFailed`] with the error name
/// `UnexpectedVersion` or `TransactionCancelled`.
#[derive(Debug, Clone)]
pub struct EntityHandle {
    ctx: WorkflowContext,
    entity: String,
}

impl EntityHandle {
    pub fn name(&self) -> &str {
        &self.entity
    }

    pub fn get<T: DeserializeOwned>(&self, key: EntityKey) -> CallFuture<Option<T>> {
        self.ctx.entity_request(EntityOperation::Get {
            entity: self.entity.clone(),
            key,
        })
    }

    pub fn get_with_metadata(&self, key: EntityKey) -> CallFuture<Option<EntityWithMetadata>> {
        self.ctx.entity_request(EntityOperation::GetWithMetadata {
            entity: self.entity.clone(),
            key,
        })
    }

    pub fn put<T: Serialize + ?Sized>(
        &self,
        key: EntityKey,
        value: &T,
        options: PutOptions,
    ) -> CallFuture<PutResult> {
        match serde_json::to_value(value) {
            Ok(value) => self.ctx.entity_request(EntityOperation::Put {
                entity: self.entity.clone(),
                key,
                value,
                options,
            }),
            Err(e) => CallFuture::failed(WeftError::Serialization(e)),
        }
    }

    pub fn delete(&self, key: EntityKey, options: DeleteOptions) -> CallFuture<()> {
        self.ctx.entity_request(EntityOperation::Delete {
            entity: self.entity.clone(),
            key,
            options,
        })
    }

    pub fn query(&self, request: QueryRequest) -> CallFuture<QueryResult> {
        self.ctx.entity_request(EntityOperation::Query {
            entity: self.entity.clone(),
            request,
        })
    }
}
