//! Calls emitted by workflow code.
//!
//! A call is the side-effecting request a workflow makes: run a task, start a
//! child workflow, wait for a timer, touch an entity... Every call receives a
//! sequence number and is recorded in history as a `CallRecorded` event. On
//! replay the executor compares the calls regenerated by workflow code with
//! the recorded ones, so `Call` equality is deep value equality.

use crate::entity::EntityOperation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sequence number of a call within one execution.
pub type Seq = u32;

/// Where a `SendSignal` call delivers its signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum SignalTarget {
    /// An arbitrary execution, by id
    Execution { execution_id: String },
    /// A child started by this execution at `seq`
    Child { workflow_name: String, seq: Seq },
}

/// An event published through `EmitEvents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub name: String,
    pub data: Value,
}

/// A side-effecting request emitted by workflow code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Call {
    /// Run a task on an external worker
    Task {
        name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u32>,
    },

    /// Start a child workflow execution
    ChildWorkflow {
        name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u32>,
    },

    /// Wait until an absolute point in time
    AwaitTimer { until: DateTime<Utc> },

    /// Deliver a signal to another execution
    SendSignal {
        target: SignalTarget,
        signal_id: String,
        payload: Value,
    },

    /// Publish events to the event bus
    EmitEvents { events: Vec<EmittedEvent> },

    /// Perform an entity store operation
    Entity { operation: EntityOperation },

    /// Run a named entity transaction
    InvokeTransaction { name: String, input: Value },

    /// Wait for a signal, optionally bounded by the timer at `timeout_seq`
    ExpectSignal {
        signal_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seq: Option<Seq>,
    },

    /// Wait until a predicate over workflow state holds
    Condition {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seq: Option<Seq>,
    },

    /// Install a handler invoked for every matching signal
    RegisterSignalHandler { signal_id: String },
}

impl Call {
    /// Short name of the call kind, used in logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Call::Task { .. } => "Task",
            Call::ChildWorkflow { .. } => "ChildWorkflow",
            Call::AwaitTimer { .. } => "AwaitTimer",
            Call::SendSignal { .. } => "SendSignal",
            Call::EmitEvents { .. } => "EmitEvents",
            Call::Entity { .. } => "Entity",
            Call::InvokeTransaction { .. } => "InvokeTransaction",
            Call::ExpectSignal { .. } => "ExpectSignal",
            Call::Condition { .. } => "Condition",
            Call::RegisterSignalHandler { .. } => "RegisterSignalHandler",
        }
    }

    /// Whether the outcome of this call is known without waiting on a
    /// completion event.
    pub fn is_pre_resolved(&self) -> bool {
        matches!(self, Call::SendSignal { .. } | Call::EmitEvents { .. })
    }

    /// Whether the call only exists inside the executor and is never
    /// dispatched to an external system.
    pub fn is_workflow_local(&self) -> bool {
        matches!(
            self,
            Call::ExpectSignal { .. } | Call::Condition { .. } | Call::RegisterSignalHandler { .. }
        )
    }
}
