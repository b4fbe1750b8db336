//! Workflow module - calls, history events, and execution metadata

pub mod call;
pub mod event;
pub mod execution;

pub use call::{Call, EmittedEvent, Seq, SignalTarget};
pub use event::{EventKind, HistoryEvent};
pub use execution::{
    child_execution_id, new_execution_id, workflow_name_from_execution_id, Execution,
    ExecutionStatus, ParentExecution, StartContext, WorkflowResult,
};
