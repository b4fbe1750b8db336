//! Weft SDK for Rust
//!
//! This SDK runs durable workflows: workflow code is replayed from an
//! append-only event history, its calls are dispatched to external systems,
//! and an orchestrator drives executions over batches of inbound events.

#![allow(clippy::result_large_err)]

pub mod call_executor;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod telemetry;
pub mod testing;
pub mod transaction;
pub mod worker;
pub mod workflow;

// Re-export commonly used types
pub use error::{DeterminismViolationError, Result, WeftError};

// Re-export config types
pub use config::{ConfigError, EngineConfig, OrchestratorConfig, TransactionConfig};

// Re-export workflow types
pub use workflow::combinators::{join_all, join_all_settled, join_n, select, with_timeout};
pub use workflow::context::{EntityHandle, SignalHandler, WorkflowContext};
pub use workflow::definition::WorkflowDefinition;
pub use workflow::future::CallFuture;

// Re-export worker types
pub use worker::executor::{WorkflowExecutor, WorkflowRunResult};
pub use worker::registry::{RegisteredWorkflow, WorkflowMetadata, WorkflowRegistry};

// Re-export call executor types
pub use call_executor::{CallClients, WorkflowCallExecutor};

// Re-export orchestrator types
pub use orchestrator::{
    Clock, ExecutionEvents, ExecutionStore, HistoryStore, InMemoryExecutionStore,
    InMemoryHistoryStore, ManualClock, OrchestrationResult, Orchestrator, SystemClock,
};

// Re-export transaction types
pub use transaction::{LocalTransactionClient, TransactionContext, TransactionRegistry};

// Re-export core types
pub use weft_core::{
    Call, DeleteOptions, EntityKey, EntityStore, ErrorDetails, EventKind, Execution,
    ExecutionStatus, HistoryEvent, InMemoryEntityStore, PutOptions, QueryRequest, Seq,
    WorkflowResult,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Result, WeftError};
    pub use crate::workflow::combinators::{
        join_all, join_all_settled, join_n, select, with_timeout,
    };
    pub use crate::workflow::context::{EntityHandle, SignalHandler, WorkflowContext};
    pub use crate::workflow::definition::WorkflowDefinition;
    pub use crate::workflow::future::CallFuture;
    pub use crate::worker::registry::WorkflowRegistry;
    pub use crate::transaction::{TransactionContext, TransactionRegistry};
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
    pub use weft_core::{DeleteOptions, EntityKey, ErrorDetails, PutOptions, QueryRequest};
}
