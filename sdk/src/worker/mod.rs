//! Workflow registration and replay execution

pub mod executor;
pub mod registry;

pub use executor::{WorkflowExecutor, WorkflowRunResult};
pub use registry::{RegisteredWorkflow, WorkflowMetadata, WorkflowRegistry};
