//! Workflow authoring API: context, call futures and combinators

pub mod combinators;
pub mod context;
pub mod definition;
pub mod future;
pub(crate) mod state;

pub use context::{EntityHandle, SignalHandler, WorkflowContext};
pub use definition::WorkflowDefinition;
pub use future::CallFuture;
