//! WorkflowDefinition trait

use crate::error::Result;
use crate::workflow::context::WorkflowContext;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Definition of a workflow with typed input and output.
///
/// `execute` is replayed from the beginning whenever an executor is rebuilt
/// from history, so it must be deterministic: every branch may depend only on
/// the input, [`WorkflowContext::now`] and results of calls.
#[async_trait]
pub trait WorkflowDefinition: Send + Sync {
    /// Input type for the workflow
    type Input: Serialize + DeserializeOwned + Send;
    /// Output type for the workflow
    type Output: Serialize + DeserializeOwned + Send;

    /// Unique name; also the prefix of this workflow's execution ids
    fn name(&self) -> &str;

    /// Execute the workflow with the given context and input
    async fn execute(&self, ctx: &WorkflowContext, input: Self::Input) -> Result<Self::Output>;

    /// Optional description of the workflow
    fn description(&self) -> Option<&str> {
        None
    }

    /// Timeout in seconds for the entire execution (None = no timeout)
    fn timeout_seconds(&self) -> Option<u32> {
        None
    }
}
