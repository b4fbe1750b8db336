//! History events for replay.
//!
//! History is the append-only, ordered log of everything that happened to an
//! execution. Events are serialized as `{timestamp, type, ...fields}`.

use super::call::{Call, Seq};
use super::execution::StartContext;
use crate::error::ErrorDetails;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single entry in an execution's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payloads, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventKind {
    // Execution lifecycle
    WorkflowStarted {
        execution_id: String,
        workflow_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_time: Option<DateTime<Utc>>,
        #[serde(default)]
        context: StartContext,
    },
    WorkflowRunStarted,
    WorkflowRunCompleted,

    // Calls
    CallRecorded {
        seq: Seq,
        call: Call,
    },

    // Completions
    TaskSucceeded {
        seq: Seq,
        result: Value,
    },
    TaskFailed {
        seq: Seq,
        error: String,
        message: String,
    },
    ChildWorkflowSucceeded {
        seq: Seq,
        result: Value,
    },
    ChildWorkflowFailed {
        seq: Seq,
        error: String,
        message: String,
    },
    TimerCompleted {
        seq: Seq,
    },
    EntityRequestSucceeded {
        seq: Seq,
        result: Value,
    },
    EntityRequestFailed {
        seq: Seq,
        error: String,
        message: String,
    },
    TransactionRequestSucceeded {
        seq: Seq,
        result: Value,
    },
    TransactionRequestFailed {
        seq: Seq,
        error: String,
        message: String,
    },
    SignalReceived {
        signal_id: String,
        payload: Value,
    },
    WorkflowTimedOut,

    // Terminal
    WorkflowSucceeded {
        output: Value,
    },
    WorkflowFailed {
        error: String,
        message: String,
    },
}

impl EventKind {
    /// Variant name as it appears in the `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "WorkflowStarted",
            Self::WorkflowRunStarted => "WorkflowRunStarted",
            Self::WorkflowRunCompleted => "WorkflowRunCompleted",
            Self::CallRecorded { .. } => "CallRecorded",
            Self::TaskSucceeded { .. } => "TaskSucceeded",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::ChildWorkflowSucceeded { .. } => "ChildWorkflowSucceeded",
            Self::ChildWorkflowFailed { .. } => "ChildWorkflowFailed",
            Self::TimerCompleted { .. } => "TimerCompleted",
            Self::EntityRequestSucceeded { .. } => "EntityRequestSucceeded",
            Self::EntityRequestFailed { .. } => "EntityRequestFailed",
            Self::TransactionRequestSucceeded { .. } => "TransactionRequestSucceeded",
            Self::TransactionRequestFailed { .. } => "TransactionRequestFailed",
            Self::SignalReceived { .. } => "SignalReceived",
            Self::WorkflowTimedOut => "WorkflowTimedOut",
            Self::WorkflowSucceeded { .. } => "WorkflowSucceeded",
            Self::WorkflowFailed { .. } => "WorkflowFailed",
        }
    }

    /// Seq of the call this event completes, if it is a seq-keyed completion
    pub fn completion_seq(&self) -> Option<Seq> {
        match self {
            Self::TaskSucceeded { seq, .. }
            | Self::TaskFailed { seq, .. }
            | Self::ChildWorkflowSucceeded { seq, .. }
            | Self::ChildWorkflowFailed { seq, .. }
            | Self::TimerCompleted { seq }
            | Self::EntityRequestSucceeded { seq, .. }
            | Self::EntityRequestFailed { seq, .. }
            | Self::TransactionRequestSucceeded { seq, .. }
            | Self::TransactionRequestFailed { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Check if this event is a recorded call
    pub fn is_call(&self) -> bool {
        matches!(self, Self::CallRecorded { .. })
    }

    /// Check if this event reports an outcome the workflow can observe
    pub fn is_completion(&self) -> bool {
        self.completion_seq().is_some()
            || matches!(self, Self::SignalReceived { .. } | Self::WorkflowTimedOut)
    }

    /// Check if this event ends the execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowSucceeded { .. } | Self::WorkflowFailed { .. }
        )
    }

    /// Outcome carried by a seq-keyed completion.
    ///
    /// Timers complete with `null`.
    pub fn completion_outcome(&self) -> Option<Result<Value, ErrorDetails>> {
        match self {
            Self::TaskSucceeded { result, .. }
            | Self::ChildWorkflowSucceeded { result, .. }
            | Self::EntityRequestSucceeded { result, .. }
            | Self::TransactionRequestSucceeded { result, .. } => Some(Ok(result.clone())),
            Self::TaskFailed { error, message, .. }
            | Self::ChildWorkflowFailed { error, message, .. }
            | Self::EntityRequestFailed { error, message, .. }
            | Self::TransactionRequestFailed { error, message, .. } => {
                Some(Err(ErrorDetails::new(error.clone(), message.clone())))
            }
            Self::TimerCompleted { .. } => Some(Ok(Value::Null)),
            _ => None,
        }
    }
}

impl HistoryEvent {
    pub fn new(timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn run_started(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, EventKind::WorkflowRunStarted)
    }

    pub fn run_completed(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, EventKind::WorkflowRunCompleted)
    }

    pub fn call_recorded(timestamp: DateTime<Utc>, seq: Seq, call: Call) -> Self {
        Self::new(timestamp, EventKind::CallRecorded { seq, call })
    }

    pub fn timer_completed(timestamp: DateTime<Utc>, seq: Seq) -> Self {
        Self::new(timestamp, EventKind::TimerCompleted { seq })
    }

    pub fn signal_received(
        timestamp: DateTime<Utc>,
        signal_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(
            timestamp,
            EventKind::SignalReceived {
                signal_id: signal_id.into(),
                payload,
            },
        )
    }
}
