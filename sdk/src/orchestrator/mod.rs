//! Orchestrator - drives executors over batches of inbound events
//!
//! One orchestration pass per execution:
//!
//! 1. Resolve the workflow from the execution id prefix
//! 2. Load history and reuse a cached executor or rebuild one by replay
//! 3. Feed `WorkflowRunStarted` plus the inbound events
//! 4. Dispatch new calls, completing due timers in the same pass
//! 5. Persist the result and notify the parent execution
//! 6. Append everything to history as one conditional write
//!
//! Executions in a batch are independent: each one runs in its own failure
//! domain and a failure is reported without affecting the others.

pub mod cache;
pub mod clock;
pub mod history;

pub use cache::ExecutorCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use history::{ExecutionStore, HistoryStore, InMemoryExecutionStore, InMemoryHistoryStore};

use crate::call_executor::{Schedule, WorkflowCallExecutor};
use crate::config::{EngineConfig, OrchestratorConfig};
use crate::error::{Result, WeftError};
use crate::worker::executor::{WorkflowExecutor, WorkflowRunResult};
use crate::worker::registry::WorkflowRegistry;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use weft_core::{
    workflow_name_from_execution_id, DeterminismViolationError, ErrorDetails, EventKind,
    Execution, HistoryEvent, ParentExecution, StartContext, WorkflowResult,
};

/// Inbound events for one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvents {
    pub execution_id: String,
    pub events: Vec<HistoryEvent>,
}

impl ExecutionEvents {
    pub fn new(execution_id: impl Into<String>, events: Vec<HistoryEvent>) -> Self {
        Self {
            execution_id: execution_id.into(),
            events,
        }
    }
}

/// A determinism violation observed while orchestrating
#[derive(Debug, Clone, PartialEq)]
pub struct DeterminismViolationReport {
    pub execution_id: String,
    pub violation: DeterminismViolationError,
}

/// Outcome of one batch. Executions not listed here succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestrationResult {
    /// Executions to redeliver
    pub failed_execution_ids: Vec<String>,
    /// Executions whose history no longer matches their code; never retried
    pub determinism_violations: Vec<DeterminismViolationReport>,
}

impl OrchestrationResult {
    pub fn is_success(&self) -> bool {
        self.failed_execution_ids.is_empty() && self.determinism_violations.is_empty()
    }

    /// Fold another batch's outcome into this one
    pub fn merge(&mut self, other: OrchestrationResult) {
        self.failed_execution_ids.extend(other.failed_execution_ids);
        self.determinism_violations
            .extend(other.determinism_violations);
    }
}

/// Start event fields the orchestrator needs
struct StartInfo {
    timestamp: DateTime<Utc>,
    workflow_name: String,
    /// Falls back to the registered workflow's timeout when the start event has none
    timeout_time: Option<DateTime<Utc>>,
    parent: Option<ParentExecution>,
}

impl StartInfo {
    fn find<'a>(mut events: impl Iterator<Item = &'a HistoryEvent>) -> Option<Self> {
        events.find_map(|event| match &event.kind {
            EventKind::WorkflowStarted {
                workflow_name,
                timeout_time,
                context: StartContext { parent },
                ..
            } => Some(Self {
                timestamp: event.timestamp,
                workflow_name: workflow_name.clone(),
                timeout_time: *timeout_time,
                parent: parent.clone(),
            }),
            _ => None,
        })
    }
}

/// Batch-level driver of workflow executions
pub struct Orchestrator {
    registry: Arc<WorkflowRegistry>,
    history: Arc<dyn HistoryStore>,
    executions: Arc<dyn ExecutionStore>,
    call_executor: WorkflowCallExecutor,
    clock: Arc<dyn Clock>,
    cache: ExecutorCache,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        history: Arc<dyn HistoryStore>,
        executions: Arc<dyn ExecutionStore>,
        call_executor: WorkflowCallExecutor,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            history,
            executions,
            call_executor,
            clock,
            cache: ExecutorCache::new(config.executor_cache_capacity),
            config,
        }
    }

    /// Build an orchestrator for a service loaded with [`EngineConfig::from_env`]
    pub fn from_engine_config(
        registry: Arc<WorkflowRegistry>,
        history: Arc<dyn HistoryStore>,
        executions: Arc<dyn ExecutionStore>,
        call_executor: WorkflowCallExecutor,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        info!(
            service = %config.service_name,
            executor_cache_capacity = config.orchestrator.executor_cache_capacity,
            max_concurrent_executions = config.orchestrator.max_concurrent_executions,
            workflows = registry.len(),
            "Orchestrator configured"
        );
        Self::new(
            registry,
            history,
            executions,
            call_executor,
            clock,
            config.orchestrator,
        )
    }

    pub fn cache(&self) -> &ExecutorCache {
        &self.cache
    }

    /// Process a batch of inbound events.
    ///
    /// Entries with the same execution id are merged in order. Executions run
    /// concurrently up to `max_concurrent_executions`.
    pub async fn orchestrate(&self, batch: Vec<ExecutionEvents>) -> OrchestrationResult {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<HistoryEvent>> = HashMap::new();
        for entry in batch {
            let events = grouped.entry(entry.execution_id.clone()).or_insert_with(|| {
                order.push(entry.execution_id.clone());
                Vec::new()
            });
            events.extend(entry.events);
        }

        let concurrency = self.config.max_concurrent_executions.max(1);
        let outcomes: Vec<(String, Result<()>)> = stream::iter(order)
            .map(|execution_id| {
                let events = grouped.remove(&execution_id).unwrap_or_default();
                async move {
                    let outcome = self.orchestrate_execution(&execution_id, events).await;
                    (execution_id, outcome)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut result = OrchestrationResult::default();
        for (execution_id, outcome) in outcomes {
            let Err(e) = outcome else { continue };
            self.cache.evict(&execution_id);
            match e {
                WeftError::DeterminismViolation(violation) => {
                    error!(
                        execution_id = %execution_id,
                        error = %violation,
                        "Determinism violation, execution halted"
                    );
                    result.determinism_violations.push(DeterminismViolationReport {
                        execution_id,
                        violation,
                    });
                }
                e => {
                    warn!(execution_id = %execution_id, error = %e, "Orchestration failed");
                    result.failed_execution_ids.push(execution_id);
                }
            }
        }
        result
    }

    async fn orchestrate_execution(
        &self,
        execution_id: &str,
        inbound: Vec<HistoryEvent>,
    ) -> Result<()> {
        let history = self.history.get_history(execution_id).await?;
        let workflow_name = workflow_name_from_execution_id(execution_id);
        let Some(workflow) = self.registry.get(workflow_name) else {
            return self
                .fail_unknown_workflow(execution_id, workflow_name, &history, inbound)
                .await;
        };

        let base_len = history.len();
        let first_run = !history
            .iter()
            .any(|event| matches!(event.kind, EventKind::WorkflowRunStarted));
        let already_terminal = history.iter().any(|event| event.kind.is_terminal());
        let start = StartInfo::find(history.iter().chain(inbound.iter())).map(|mut start| {
            if start.timeout_time.is_none() {
                start.timeout_time = workflow.metadata.timeout_seconds.and_then(|seconds| {
                    start
                        .timestamp
                        .checked_add_signed(chrono::Duration::seconds(i64::from(seconds)))
                });
            }
            start
        });

        let mut executor = match self.cache.take(execution_id, base_len) {
            Some(executor) => executor,
            None => {
                debug!(execution_id = %execution_id, events = base_len, "Rebuilding executor from history");
                WorkflowExecutor::new(execution_id, workflow, history)
            }
        };

        let now = self.clock.now();
        let mut feed = Vec::with_capacity(inbound.len() + 1);
        feed.push(HistoryEvent::run_started(now));
        feed.extend(inbound);
        let mut new_events = feed.clone();

        let mut run = if executor.is_started() {
            executor.continue_with(feed)?
        } else {
            executor.start_with_events(feed)?
        };
        self.dispatch(execution_id, &mut executor, &mut run, now, &mut new_events)
            .await?;

        if first_run {
            if let Some(start) = &start {
                self.record_start(execution_id, start).await?;
            }
        }

        if !already_terminal {
            if let Some(result) = executor.result().cloned() {
                let parent = start.and_then(|start| start.parent);
                self.record_result(execution_id, &result, parent, now).await?;
                new_events.push(HistoryEvent::new(now, terminal_event(&result)));
            }
        }

        new_events.push(HistoryEvent::run_completed(now));
        let history_len = base_len + new_events.len();
        self.history
            .append_events(execution_id, base_len, new_events)
            .await?;
        self.cache.insert(execution_id, executor, history_len);
        Ok(())
    }

    /// Dispatch new calls, then synthesize completions for timers that are
    /// already due, until the executor stops issuing calls
    async fn dispatch(
        &self,
        execution_id: &str,
        executor: &mut WorkflowExecutor,
        run: &mut WorkflowRunResult,
        now: DateTime<Utc>,
        new_events: &mut Vec<HistoryEvent>,
    ) -> Result<()> {
        loop {
            for (seq, call) in std::mem::take(&mut run.calls) {
                let recorded = self
                    .call_executor
                    .execute_call(execution_id, seq, call, now)
                    .await?;
                new_events.push(recorded);
            }

            let due = executor.due_timers(now);
            if due.is_empty() {
                return Ok(());
            }
            debug!(execution_id = %execution_id, timers = ?due, "Completing due timers");
            let fired: Vec<HistoryEvent> = due
                .into_iter()
                .map(|seq| HistoryEvent::timer_completed(now, seq))
                .collect();
            new_events.extend(fired.iter().cloned());
            *run = executor.continue_with(fired)?;
        }
    }

    async fn record_start(&self, execution_id: &str, start: &StartInfo) -> Result<()> {
        info!(execution_id = %execution_id, workflow = %start.workflow_name, "Execution started");
        self.executions
            .create_execution(
                Execution::new(execution_id, start.workflow_name.clone(), start.timestamp)
                    .with_parent(start.parent.clone()),
            )
            .await?;

        if let Some(timeout_time) = start.timeout_time {
            self.call_executor
                .timers()
                .schedule_event(
                    execution_id,
                    Schedule::Time(timeout_time),
                    EventKind::WorkflowTimedOut,
                )
                .await?;
        }
        Ok(())
    }

    async fn record_result(
        &self,
        execution_id: &str,
        result: &WorkflowResult,
        parent: Option<ParentExecution>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        info!(execution_id = %execution_id, status = ?result.status(), "Execution completed");
        self.executions
            .complete_execution(execution_id, result, now)
            .await?;

        if let Some(parent) = parent {
            let kind = match result {
                WorkflowResult::Succeeded(output) => EventKind::ChildWorkflowSucceeded {
                    seq: parent.seq,
                    result: output.clone(),
                },
                WorkflowResult::Failed(details) => EventKind::ChildWorkflowFailed {
                    seq: parent.seq,
                    error: details.error.clone(),
                    message: details.message.clone(),
                },
                WorkflowResult::TimedOut => {
                    let details = timeout_details();
                    EventKind::ChildWorkflowFailed {
                        seq: parent.seq,
                        error: details.error,
                        message: details.message,
                    }
                }
            };
            self.call_executor
                .queues()
                .enqueue(&parent.execution_id, HistoryEvent::new(now, kind))
                .await?;
        }
        Ok(())
    }

    async fn fail_unknown_workflow(
        &self,
        execution_id: &str,
        workflow_name: &str,
        history: &[HistoryEvent],
        inbound: Vec<HistoryEvent>,
    ) -> Result<()> {
        if history.iter().any(|event| event.kind.is_terminal()) {
            debug!(execution_id = %execution_id, "Dropping events for finished execution");
            return Ok(());
        }
        warn!(execution_id = %execution_id, workflow = %workflow_name, "Workflow is not registered");

        let now = self.clock.now();
        let start = StartInfo::find(history.iter().chain(inbound.iter()));
        let parent = start.as_ref().and_then(|start| start.parent.clone());
        if self.executions.get_execution(execution_id).await?.is_none() {
            let start_time = start.as_ref().map(|start| start.timestamp).unwrap_or(now);
            self.executions
                .create_execution(
                    Execution::new(execution_id, workflow_name, start_time)
                        .with_parent(parent.clone()),
                )
                .await?;
        }

        let result = WorkflowResult::Failed(ErrorDetails::new(
            "WorkflowNotFound",
            format!("workflow '{}' is not registered", workflow_name),
        ));
        self.record_result(execution_id, &result, parent, now).await?;

        let mut events = inbound;
        events.push(HistoryEvent::new(now, terminal_event(&result)));
        self.history
            .append_events(execution_id, history.len(), events)
            .await?;
        Ok(())
    }
}

fn timeout_details() -> ErrorDetails {
    ErrorDetails::new("Timeout", "workflow timed out")
}

/// Terminal history event recording `result`
fn terminal_event(result: &WorkflowResult) -> EventKind {
    match result {
        WorkflowResult::Succeeded(output) => EventKind::WorkflowSucceeded {
            output: output.clone(),
        },
        WorkflowResult::Failed(details) => EventKind::WorkflowFailed {
            error: details.error.clone(),
            message: details.message.clone(),
        },
        WorkflowResult::TimedOut => {
            let details = timeout_details();
            EventKind::WorkflowFailed {
                error: details.error,
                message: details.message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_event_for_timeout() {
        assert_eq!(
            terminal_event(&WorkflowResult::TimedOut),
            EventKind::WorkflowFailed {
                error: "Timeout".to_string(),
                message: "workflow timed out".to_string()
            }
        );
        assert_eq!(
            terminal_event(&WorkflowResult::Succeeded(json!(1))),
            EventKind::WorkflowSucceeded { output: json!(1) }
        );
    }

    #[test]
    fn test_merge_results() {
        let mut result = OrchestrationResult::default();
        assert!(result.is_success());
        result.merge(OrchestrationResult {
            failed_execution_ids: vec!["wf/1".to_string()],
            determinism_violations: vec![],
        });
        assert!(!result.is_success());
        assert_eq!(result.failed_execution_ids, vec!["wf/1".to_string()]);
    }
}
