//! # Weft Core
//!
//! Foundational types for the Weft durable workflow engine.
//!
//! This crate holds the parts of the engine that do not depend on how
//! workflow code is written or run: the history event and call model, the
//! execution metadata record, the error shapes persisted in history, and the
//! versioned entity store.
//!
//! ## What's in Core vs SDK
//!
//! **Core** contains:
//! - History events and the closed set of call kinds
//! - Execution records, statuses and id helpers
//! - Determinism violation and normalized error types
//! - The `EntityStore` trait and an in-memory implementation
//!
//! **SDK** contains:
//! - `WorkflowContext`, call futures and combinators
//! - The replay executor, call executor and orchestrator
//! - Transactions, configuration and logging setup
//!
//! ## Modules
//!
//! - [`workflow`] - Calls, history events and execution metadata
//! - [`entity`] - Versioned keyed storage with optimistic concurrency
//! - [`error`] - Core error types

pub mod entity;
pub mod error;
pub mod workflow;

// Re-export error types
pub use error::{CoreError, CoreResult, DeterminismViolationError, ErrorDetails};

// Re-export entity types
pub use entity::{
    execute_operation, DeleteOptions, EntityError, EntityKey, EntityOperation, EntityResult,
    EntityStore, EntityWithMetadata, InMemoryEntityStore, PutOptions, PutResult, QueryEntry,
    QueryRequest, QueryResult, SortKeyCondition, TransactItem, UnexpectedVersion,
};

// Re-export workflow types
pub use workflow::{
    child_execution_id, new_execution_id, workflow_name_from_execution_id, Call, EmittedEvent,
    EventKind, Execution, ExecutionStatus, HistoryEvent, ParentExecution, Seq, SignalTarget,
    StartContext, WorkflowResult,
};
