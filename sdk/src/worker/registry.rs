//! WorkflowRegistry - Registry for workflow definitions

use crate::error::{Result, WeftError};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::WorkflowDefinition;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Workflow metadata extracted from a workflow definition
#[derive(Debug, Clone)]
pub struct WorkflowMetadata {
    /// Unique workflow name
    pub name: String,
    /// Description of the workflow
    pub description: Option<String>,
    /// Timeout in seconds for a whole execution
    pub timeout_seconds: Option<u32>,
}

impl WorkflowMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            timeout_seconds: None,
        }
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u32) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }
}

/// Boxed, `'static` future returned by a workflow function
pub type WorkflowFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Type alias for boxed workflow execution functions
pub type BoxedWorkflowFn = Box<dyn Fn(WorkflowContext, Value) -> WorkflowFuture + Send + Sync>;

/// A registered workflow with its metadata and execution function
pub struct RegisteredWorkflow {
    /// Workflow metadata
    pub metadata: WorkflowMetadata,
    /// Boxed execution function
    execute_fn: BoxedWorkflowFn,
}

impl RegisteredWorkflow {
    /// Create a new registered workflow
    pub fn new(metadata: WorkflowMetadata, execute_fn: BoxedWorkflowFn) -> Self {
        Self {
            metadata,
            execute_fn,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Create the top-level future of one execution
    pub fn instantiate(&self, ctx: WorkflowContext, input: Value) -> WorkflowFuture {
        (self.execute_fn)(ctx, input)
    }
}

impl std::fmt::Debug for RegisteredWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredWorkflow")
            .field("metadata", &self.metadata)
            .field("execute_fn", &"<function>")
            .finish()
    }
}

/// Registry of workflow definitions, keyed by name.
///
/// Injected into the orchestrator at construction time; several registries
/// (and orchestrators) can coexist in one process.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Arc<RegisteredWorkflow>>>,
}

impl WorkflowRegistry {
    /// Create a new empty workflow registry
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Register a workflow with metadata and execution function
    pub fn register_raw(&self, workflow: RegisteredWorkflow) -> Result<()> {
        let name = workflow.metadata.name.clone();
        if name.is_empty() || name.contains('/') {
            return Err(WeftError::InvalidConfiguration(format!(
                "Workflow name '{}' must be non-empty and must not contain '/'",
                name
            )));
        }

        let mut workflows = self.workflows.write();
        if workflows.contains_key(&name) {
            return Err(WeftError::InvalidConfiguration(format!(
                "Workflow '{}' is already registered. Each workflow name must be unique.",
                name
            )));
        }

        workflows.insert(name, Arc::new(workflow));
        Ok(())
    }

    /// Register a workflow definition
    ///
    /// # Example
    ///
    /// ```ignore
    /// registry.register(OrderWorkflow)?;
    /// ```
    pub fn register<W, I, O>(&self, workflow: W) -> Result<()>
    where
        W: WorkflowDefinition<Input = I, Output = O> + 'static,
        I: Serialize + DeserializeOwned + Send + 'static,
        O: Serialize + DeserializeOwned + Send + 'static,
    {
        let metadata = WorkflowMetadata {
            name: workflow.name().to_string(),
            description: workflow.description().map(|s| s.to_string()),
            timeout_seconds: workflow.timeout_seconds(),
        };

        let workflow = Arc::new(workflow);

        let execute_fn: BoxedWorkflowFn = Box::new(move |ctx, input| {
            let workflow = Arc::clone(&workflow);
            Box::pin(async move {
                let typed_input: I = serde_json::from_value(input)?;
                let output = workflow.execute(&ctx, typed_input).await?;
                Ok(serde_json::to_value(output)?)
            })
        });

        self.register_raw(RegisteredWorkflow::new(metadata, execute_fn))
    }

    /// Register a workflow from a plain async function over raw JSON
    pub fn register_simple<F, Fut>(&self, name: &str, execute_fn: F) -> Result<()>
    where
        F: Fn(WorkflowContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let boxed_fn: BoxedWorkflowFn = Box::new(move |ctx, input| {
            let fut = execute_fn(ctx, input);
            Box::pin(fut)
        });

        self.register_raw(RegisteredWorkflow::new(WorkflowMetadata::new(name), boxed_fn))
    }

    /// Get a registered workflow by name
    pub fn get(&self, name: &str) -> Option<Arc<RegisteredWorkflow>> {
        self.workflows.read().get(name).cloned()
    }

    /// Check if a workflow name is registered
    pub fn has(&self, name: &str) -> bool {
        self.workflows.read().contains_key(name)
    }

    /// Get all registered workflow names
    pub fn get_registered_names(&self) -> Vec<String> {
        self.workflows.read().keys().cloned().collect()
    }

    /// Get the number of registered workflows
    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.get_registered_names();
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct GreetInput {
        name: String,
    }

    struct GreetWorkflow;

    #[async_trait]
    impl WorkflowDefinition for GreetWorkflow {
        type Input = GreetInput;
        type Output = String;

        fn name(&self) -> &str {
            "greet"
        }

        async fn execute(&self, _ctx: &WorkflowContext, input: GreetInput) -> Result<String> {
            Ok(format!("hello {}", input.name))
        }

        fn timeout_seconds(&self) -> Option<u32> {
            Some(60)
        }
    }

    #[test]
    fn test_register_definition() {
        let registry = WorkflowRegistry::new();
        registry.register(GreetWorkflow).unwrap();

        assert!(registry.has("greet"));
        assert_eq!(registry.len(), 1);
        let workflow = registry.get("greet").unwrap();
        assert_eq!(workflow.name(), "greet");
        assert_eq!(workflow.metadata.timeout_seconds, Some(60));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = WorkflowRegistry::new();
        registry
            .register_simple("echo", |_ctx, input| async move { Ok(input) })
            .unwrap();
        let err = registry
            .register_simple("echo", |_ctx, input| async move { Ok(input) })
            .unwrap_err();
        assert!(matches!(err, WeftError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_name_with_separator_rejected() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .register_simple("orders/v2", |_ctx, _input| async move { Ok(json!(null)) })
            .unwrap_err();
        assert!(matches!(err, WeftError::InvalidConfiguration(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let registry = WorkflowRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(registry.get_registered_names().is_empty());
    }
}
