//! Single-process engine for driving workflows end to end in tests.

use super::clients::TestClients;
use crate::call_executor::{
    ExecutionQueueClient, StartExecutionRequest, TaskRequest, WorkflowCallExecutor,
};
use crate::config::{EngineConfig, OrchestratorConfig, TransactionConfig};
use crate::error::{Result, WeftError};
use crate::orchestrator::{
    Clock, ExecutionStore, HistoryStore, InMemoryExecutionStore, InMemoryHistoryStore,
    ManualClock, OrchestrationResult, Orchestrator,
};
use crate::transaction::TransactionRegistry;
use crate::worker::registry::WorkflowRegistry;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use weft_core::{
    new_execution_id, ErrorDetails, EventKind, Execution, ExecutionStatus, HistoryEvent, Seq,
    WorkflowResult,
};

/// Service name used when no [`EngineConfig`] is supplied
const TEST_SERVICE_NAME: &str = "weft-test";

/// Rounds `run_until_idle` runs before giving up on a workflow that never settles
const MAX_IDLE_ROUNDS: usize = 1000;

type TaskHandler = Box<dyn Fn(Value) -> std::result::Result<Value, ErrorDetails> + Send + Sync>;

/// In-memory engine: registries, stores, a manual clock and an orchestrator
/// wired to recording clients.
///
/// Time only moves through [`TestEngine::advance`]. Tasks with a registered
/// handler complete on the next round; others wait in
/// [`TestEngine::pending_tasks`] until completed by the test.
///
/// # Example
///
/// ```ignore
/// let engine = TestEngine::new();
/// engine.workflows().register_simple("greet", |ctx, input| async move {
///     ctx.task_raw("hello", input).await
/// })?;
/// engine.on_task("hello", |input| Ok(input));
///
/// let id = engine.start("greet", json!("world")).await?;
/// engine.run_until_idle().await?;
/// assert_eq!(engine.result(&id).await?, Some(WorkflowResult::Succeeded(json!("world"))));
/// ```
pub struct TestEngine {
    clock: Arc<ManualClock>,
    clients: TestClients,
    workflows: Arc<WorkflowRegistry>,
    history: Arc<InMemoryHistoryStore>,
    executions: Arc<InMemoryExecutionStore>,
    orchestrator: Orchestrator,
    task_handlers: RwLock<HashMap<String, TaskHandler>>,
    pending_tasks: Mutex<Vec<TaskRequest>>,
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::DEFAULT)
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        Self::with_clients(TestClients::new(), config)
    }

    pub fn with_clients(clients: TestClients, config: OrchestratorConfig) -> Self {
        let config = EngineConfig {
            service_name: TEST_SERVICE_NAME.to_string(),
            orchestrator: config,
            transaction: TransactionConfig::DEFAULT,
        };
        Self::build(clients, &config)
    }

    /// Engine configured the way a service is, e.g. from [`EngineConfig::from_lookup`]
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::build(
            TestClients::with_transaction_config(config.transaction),
            config,
        )
    }

    fn build(clients: TestClients, config: &EngineConfig) -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let workflows = Arc::new(WorkflowRegistry::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let executions = Arc::new(InMemoryExecutionStore::new());
        let orchestrator = Orchestrator::from_engine_config(
            workflows.clone(),
            history.clone(),
            executions.clone(),
            WorkflowCallExecutor::new(clients.call_clients()),
            clock.clone(),
            config,
        );
        Self {
            clock,
            clients,
            workflows,
            history,
            executions,
            orchestrator,
            task_handlers: RwLock::new(HashMap::new()),
            pending_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    pub fn transactions(&self) -> &TransactionRegistry {
        &self.clients.transaction_registry
    }

    pub fn clients(&self) -> &TestClients {
        &self.clients
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, duration: Duration) -> DateTime<Utc> {
        self.clock.advance(duration)
    }

    /// Complete every future request for task `name` with `handler`
    pub fn on_task<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> std::result::Result<Value, ErrorDetails> + Send + Sync + 'static,
    {
        self.task_handlers
            .write()
            .insert(name.to_string(), Box::new(handler));
    }

    /// Task requests without a handler, oldest first
    pub fn pending_tasks(&self) -> Vec<TaskRequest> {
        self.collect_tasks();
        self.pending_tasks.lock().clone()
    }

    /// Queue a new execution of `workflow_name`; returns its id
    pub async fn start(&self, workflow_name: &str, input: Value) -> Result<String> {
        let workflow = self
            .workflows
            .get(workflow_name)
            .ok_or_else(|| WeftError::WorkflowNotFound(workflow_name.to_string()))?;
        let request = StartExecutionRequest {
            execution_id: new_execution_id(workflow_name),
            workflow_name: workflow_name.to_string(),
            input,
            timeout_seconds: workflow.metadata.timeout_seconds,
            parent: None,
        };
        self.deliver_start(&request).await?;
        Ok(request.execution_id)
    }

    /// Deliver the outcome of a pending task
    pub async fn complete_task(
        &self,
        execution_id: &str,
        seq: Seq,
        outcome: std::result::Result<Value, ErrorDetails>,
    ) -> Result<()> {
        self.pending_tasks
            .lock()
            .retain(|task| !(task.execution_id == execution_id && task.seq == seq));
        self.enqueue(execution_id, task_completion(seq, outcome))
            .await
    }

    pub async fn signal(&self, execution_id: &str, signal_id: &str, payload: Value) -> Result<()> {
        let event = HistoryEvent::signal_received(self.clock.now(), signal_id, payload);
        self.queue(execution_id, event).await
    }

    /// Orchestrate until no execution has queued events.
    ///
    /// Each round delivers child starts, handled tasks and due timers, then
    /// runs one batch over every non-empty queue. Events of an execution that
    /// fails are dropped, not redelivered.
    pub async fn run_until_idle(&self) -> Result<OrchestrationResult> {
        let mut result = OrchestrationResult::default();
        for _ in 0..MAX_IDLE_ROUNDS {
            self.deliver_outstanding().await?;
            let batch = self.clients.queues.drain_all();
            if batch.is_empty() {
                return Ok(result);
            }
            result.merge(self.orchestrator.orchestrate(batch).await);
        }
        Err(WeftError::Other(format!(
            "engine still busy after {} rounds",
            MAX_IDLE_ROUNDS
        )))
    }

    pub async fn history(&self, execution_id: &str) -> Result<Vec<HistoryEvent>> {
        Ok(self.history.get_history(execution_id).await?)
    }

    pub async fn execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        Ok(self.executions.get_execution(execution_id).await?)
    }

    /// Final result read back from the execution record
    pub async fn result(&self, execution_id: &str) -> Result<Option<WorkflowResult>> {
        let Some(execution) = self.execution(execution_id).await? else {
            return Ok(None);
        };
        Ok(match execution.status {
            ExecutionStatus::InProgress => None,
            ExecutionStatus::Succeeded => Some(WorkflowResult::Succeeded(
                execution.result.unwrap_or(Value::Null),
            )),
            ExecutionStatus::Failed => Some(WorkflowResult::Failed(
                execution
                    .error
                    .unwrap_or_else(|| ErrorDetails::new("Error", "")),
            )),
            ExecutionStatus::TimedOut => Some(WorkflowResult::TimedOut),
        })
    }

    async fn deliver_outstanding(&self) -> Result<()> {
        let now = self.clock.now();
        for request in self.clients.workflows.take_requests() {
            self.deliver_start(&request).await?;
        }

        self.collect_tasks();
        let handled: Vec<(TaskRequest, std::result::Result<Value, ErrorDetails>)> = {
            let handlers = self.task_handlers.read();
            let mut pending = self.pending_tasks.lock();
            let (handled, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|task| handlers.contains_key(&task.name));
            *pending = waiting;
            handled
                .into_iter()
                .filter_map(|task| {
                    let handler = handlers.get(&task.name)?;
                    let outcome = handler(task.input.clone());
                    Some((task, outcome))
                })
                .collect()
        };
        for (task, outcome) in handled {
            self.enqueue(&task.execution_id, task_completion(task.seq, outcome))
                .await?;
        }

        for scheduled in self.clients.timers.take_due(now) {
            self.queue(&scheduled.execution_id, HistoryEvent::new(now, scheduled.event))
                .await?;
        }
        Ok(())
    }

    fn collect_tasks(&self) {
        let requests = self.clients.tasks.take_requests();
        self.pending_tasks.lock().extend(requests);
    }

    async fn deliver_start(&self, request: &StartExecutionRequest) -> Result<()> {
        let event = request.started_event(self.clock.now());
        self.queue(&request.execution_id, event).await
    }

    async fn enqueue(&self, execution_id: &str, kind: EventKind) -> Result<()> {
        let event = HistoryEvent::new(self.clock.now(), kind);
        self.queue(execution_id, event).await
    }

    async fn queue(&self, execution_id: &str, event: HistoryEvent) -> Result<()> {
        self.clients.queues.enqueue(execution_id, event).await
    }
}

impl std::fmt::Debug for TestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEngine")
            .field("now", &self.clock.now())
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

fn task_completion(seq: Seq, outcome: std::result::Result<Value, ErrorDetails>) -> EventKind {
    match outcome {
        Ok(result) => EventKind::TaskSucceeded { seq, result },
        Err(details) => EventKind::TaskFailed {
            seq,
            error: details.error,
            message: details.message,
        },
    }
}
