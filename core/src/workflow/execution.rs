//! Execution metadata and identifiers.

use super::call::Seq;
use crate::error::ErrorDetails;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Reference to the call in a parent execution that started a child
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentExecution {
    pub execution_id: String,
    pub seq: Seq,
}

/// Context handed to a workflow when it starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentExecution>,
}

impl StartContext {
    pub fn with_parent(execution_id: impl Into<String>, seq: Seq) -> Self {
        Self {
            parent: Some(ParentExecution {
                execution_id: execution_id.into(),
                seq,
            }),
        }
    }
}

/// Final outcome of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value")]
pub enum WorkflowResult {
    Succeeded(Value),
    Failed(ErrorDetails),
    TimedOut,
}

impl WorkflowResult {
    /// Status an execution ends in with this result
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Succeeded(_) => ExecutionStatus::Succeeded,
            Self::Failed(_) => ExecutionStatus::Failed,
            Self::TimedOut => ExecutionStatus::TimedOut,
        }
    }
}

/// One record per execution, read by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentExecution>,
}

impl Execution {
    /// Create an in-progress execution record
    pub fn new(
        id: impl Into<String>,
        workflow_name: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::InProgress,
            start_time,
            end_time: None,
            result: None,
            error: None,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: Option<ParentExecution>) -> Self {
        self.parent = parent;
        self
    }

    /// Apply a final result, moving the record to a terminal status
    pub fn complete(&mut self, result: &WorkflowResult, end_time: DateTime<Utc>) {
        self.status = result.status();
        self.end_time = Some(end_time);
        match result {
            WorkflowResult::Succeeded(value) => self.result = Some(value.clone()),
            WorkflowResult::Failed(details) => self.error = Some(details.clone()),
            WorkflowResult::TimedOut => {
                self.error = Some(ErrorDetails::new("Timeout", "workflow timed out"))
            }
        }
    }
}

/// Workflow name encoded in an execution id (`"{workflow_name}/{unique}"`).
///
/// Ids without a separator are treated as bare workflow names.
pub fn workflow_name_from_execution_id(execution_id: &str) -> &str {
    match execution_id.split_once('/') {
        Some((name, _)) => name,
        None => execution_id,
    }
}

/// Fresh execution id for a top-level execution
pub fn new_execution_id(workflow_name: &str) -> String {
    format!("{}/{}", workflow_name, Uuid::new_v4())
}

/// Deterministic id of the child started by `parent_execution_id` at `seq`
pub fn child_execution_id(child_workflow_name: &str, parent_execution_id: &str, seq: Seq) -> String {
    let name = format!("{}:{}", parent_execution_id, seq);
    let unique = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    format!("{}/{}", child_workflow_name, unique)
}
