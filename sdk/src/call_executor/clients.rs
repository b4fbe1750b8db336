//! Collaborators the call executor dispatches to.
//!
//! Each trait covers one external system. Implementations only hand work
//! off; outcomes come back later as completion events on the execution's
//! queue (tasks, child workflows, timers) or are returned directly
//! (transactions).

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_core::{EmittedEvent, EventKind, HistoryEvent, ParentExecution, Seq, StartContext};

/// Request to run a task on behalf of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Execution the outcome is delivered to
    pub execution_id: String,
    /// Seq of the call; the completion carries it back
    pub seq: Seq,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
}

/// Request to start a new execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExecutionRequest {
    pub execution_id: String,
    pub workflow_name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentExecution>,
}

impl StartExecutionRequest {
    /// The `WorkflowStarted` event that begins this execution at `timestamp`
    pub fn started_event(&self, timestamp: DateTime<Utc>) -> HistoryEvent {
        let timeout_time = self.timeout_seconds.and_then(|seconds| {
            timestamp.checked_add_signed(chrono::Duration::seconds(i64::from(seconds)))
        });
        HistoryEvent::new(
            timestamp,
            EventKind::WorkflowStarted {
                execution_id: self.execution_id.clone(),
                workflow_name: self.workflow_name.clone(),
                input: self.input.clone(),
                timeout_time,
                context: StartContext {
                    parent: self.parent.clone(),
                },
            },
        )
    }
}

/// When a scheduled event is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// At (or after) an absolute time
    Time(DateTime<Utc>),
}

/// Starts tasks. The outcome arrives as `TaskSucceeded`/`TaskFailed`.
#[async_trait]
pub trait TaskClient: Send + Sync {
    async fn start_task(&self, request: TaskRequest) -> Result<()>;
}

/// Starts executions, for child workflows and external callers
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    async fn start_execution(&self, request: StartExecutionRequest) -> Result<()>;
}

/// Delivers an event to an execution's queue at a later time
#[async_trait]
pub trait TimerClient: Send + Sync {
    async fn schedule_event(
        &self,
        execution_id: &str,
        schedule: Schedule,
        event: EventKind,
    ) -> Result<()>;
}

/// Inbound event queue, one per execution id
#[async_trait]
pub trait ExecutionQueueClient: Send + Sync {
    async fn enqueue(&self, execution_id: &str, event: HistoryEvent) -> Result<()>;
}

/// Publishes workflow-emitted events to an event bus
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn emit(&self, source_execution_id: &str, events: Vec<EmittedEvent>) -> Result<()>;
}

/// Runs named transactions to completion
#[async_trait]
pub trait TransactionClient: Send + Sync {
    async fn execute_transaction(&self, name: &str, input: Value) -> Result<Value>;
}
