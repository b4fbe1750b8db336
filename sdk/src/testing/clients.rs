//! In-memory collaborators that record what the call executor hands them.

use crate::call_executor::{
    CallClients, EventPublisher, ExecutionQueueClient, Schedule, StartExecutionRequest,
    TaskClient, TaskRequest, TimerClient, WorkflowClient,
};
use crate::config::TransactionConfig;
use crate::error::{Result, WeftError};
use crate::orchestrator::ExecutionEvents;
use crate::transaction::{LocalTransactionClient, TransactionRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weft_core::{EmittedEvent, EventKind, HistoryEvent, InMemoryEntityStore};

/// Records task requests
#[derive(Debug, Default)]
pub struct RecordingTaskClient {
    requests: Mutex<Vec<TaskRequest>>,
    failing: AtomicBool,
}

impl RecordingTaskClient {
    pub fn requests(&self) -> Vec<TaskRequest> {
        self.requests.lock().clone()
    }

    pub fn take_requests(&self) -> Vec<TaskRequest> {
        std::mem::take(&mut *self.requests.lock())
    }

    /// Make every following hand-off fail with a store error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskClient for RecordingTaskClient {
    async fn start_task(&self, request: TaskRequest) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WeftError::Store("task queue unavailable".to_string()));
        }
        self.requests.lock().push(request);
        Ok(())
    }
}

/// Records execution start requests
#[derive(Debug, Default)]
pub struct RecordingWorkflowClient {
    requests: Mutex<Vec<StartExecutionRequest>>,
}

impl RecordingWorkflowClient {
    pub fn requests(&self) -> Vec<StartExecutionRequest> {
        self.requests.lock().clone()
    }

    pub fn take_requests(&self) -> Vec<StartExecutionRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

#[async_trait]
impl WorkflowClient for RecordingWorkflowClient {
    async fn start_execution(&self, request: StartExecutionRequest) -> Result<()> {
        self.requests.lock().push(request);
        Ok(())
    }
}

/// An event waiting for its scheduled delivery
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub execution_id: String,
    pub schedule: Schedule,
    pub event: EventKind,
}

impl ScheduledEvent {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.schedule {
            Schedule::Time(at) => at <= now,
        }
    }
}

/// Holds scheduled events until a test delivers them
#[derive(Debug, Default)]
pub struct RecordingTimerClient {
    scheduled: Mutex<Vec<ScheduledEvent>>,
}

impl RecordingTimerClient {
    /// Events not yet delivered
    pub fn scheduled(&self) -> Vec<ScheduledEvent> {
        self.scheduled.lock().clone()
    }

    /// Remove and return every event due at `now`, in scheduling order
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledEvent> {
        let mut scheduled = self.scheduled.lock();
        let (due, waiting) = std::mem::take(&mut *scheduled)
            .into_iter()
            .partition(|event| event.is_due(now));
        *scheduled = waiting;
        due
    }
}

#[async_trait]
impl TimerClient for RecordingTimerClient {
    async fn schedule_event(
        &self,
        execution_id: &str,
        schedule: Schedule,
        event: EventKind,
    ) -> Result<()> {
        self.scheduled.lock().push(ScheduledEvent {
            execution_id: execution_id.to_string(),
            schedule,
            event,
        });
        Ok(())
    }
}

/// Per-execution inbound queues
#[derive(Debug, Default)]
pub struct InMemoryExecutionQueue {
    queues: Mutex<BTreeMap<String, Vec<HistoryEvent>>>,
}

impl InMemoryExecutionQueue {
    pub fn peek(&self, execution_id: &str) -> Vec<HistoryEvent> {
        self.queues
            .lock()
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn drain(&self, execution_id: &str) -> Vec<HistoryEvent> {
        self.queues.lock().remove(execution_id).unwrap_or_default()
    }

    /// Ids with at least one queued event
    pub fn pending_execution_ids(&self) -> Vec<String> {
        self.queues.lock().keys().cloned().collect()
    }

    /// Drain every queue into one orchestration batch
    pub fn drain_all(&self) -> Vec<ExecutionEvents> {
        std::mem::take(&mut *self.queues.lock())
            .into_iter()
            .map(|(execution_id, events)| ExecutionEvents::new(execution_id, events))
            .collect()
    }
}

#[async_trait]
impl ExecutionQueueClient for InMemoryExecutionQueue {
    async fn enqueue(&self, execution_id: &str, event: HistoryEvent) -> Result<()> {
        self.queues
            .lock()
            .entry(execution_id.to_string())
            .or_default()
            .push(event);
        Ok(())
    }
}

/// Records published events
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    emitted: Mutex<Vec<(String, EmittedEvent)>>,
    failing: AtomicBool,
}

impl RecordingEventPublisher {
    /// `(source execution id, event)` pairs in publish order
    pub fn emitted(&self) -> Vec<(String, EmittedEvent)> {
        self.emitted.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn emit(&self, source_execution_id: &str, events: Vec<EmittedEvent>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WeftError::Store("event bus unavailable".to_string()));
        }
        self.emitted.lock().extend(
            events
                .into_iter()
                .map(|event| (source_execution_id.to_string(), event)),
        );
        Ok(())
    }
}

/// A full set of in-memory collaborators with typed handles for assertions
#[derive(Debug, Clone)]
pub struct TestClients {
    pub tasks: Arc<RecordingTaskClient>,
    pub workflows: Arc<RecordingWorkflowClient>,
    pub timers: Arc<RecordingTimerClient>,
    pub queues: Arc<InMemoryExecutionQueue>,
    pub events: Arc<RecordingEventPublisher>,
    pub transaction_registry: Arc<TransactionRegistry>,
    pub transactions: Arc<LocalTransactionClient>,
    pub entities: Arc<InMemoryEntityStore>,
}

impl Default for TestClients {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClients {
    pub fn new() -> Self {
        Self::with_transaction_config(TransactionConfig::DEFAULT)
    }

    pub fn with_transaction_config(config: TransactionConfig) -> Self {
        let entities = Arc::new(InMemoryEntityStore::new());
        let transaction_registry = Arc::new(TransactionRegistry::new());
        let transactions = Arc::new(LocalTransactionClient::new(
            transaction_registry.clone(),
            entities.clone(),
            config,
        ));
        Self {
            tasks: Arc::default(),
            workflows: Arc::default(),
            timers: Arc::default(),
            queues: Arc::default(),
            events: Arc::default(),
            transaction_registry,
            transactions,
            entities,
        }
    }

    /// Type-erased clients for a [`crate::call_executor::WorkflowCallExecutor`]
    pub fn call_clients(&self) -> CallClients {
        CallClients {
            tasks: self.tasks.clone(),
            workflows: self.workflows.clone(),
            timers: self.timers.clone(),
            queues: self.queues.clone(),
            events: self.events.clone(),
            transactions: self.transactions.clone(),
            entities: self.entities.clone(),
        }
    }
}
