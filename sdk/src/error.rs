//! Error types for the Weft SDK

// Re-export core error types
pub use weft_core::{CoreError, DeterminismViolationError, EntityError, ErrorDetails};

/// Main error type for the Weft SDK
#[derive(Debug, thiserror::Error)]
pub enum WeftError {
    /// Determinism violation detected during replay
    #[error("Determinism violation: {0}")]
    DeterminismViolation(DeterminismViolationError),

    /// Failure raised by workflow code itself
    #[error("Workflow failed: {0}")]
    Application(ErrorDetails),

    /// Task execution failed
    #[error("Task failed: {0}")]
    TaskFailed(ErrorDetails),

    /// Child workflow failed
    #[error("Child workflow failed: {0}")]
    ChildWorkflowFailed(ErrorDetails),

    /// Entity request issued from workflow code failed
    #[error("Entity request failed: {0}")]
    EntityRequestFailed(ErrorDetails),

    /// Transaction invoked from workflow code failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(ErrorDetails),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Workflow definition not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Transaction definition not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// `start` called on an executor that already started
    #[error("Workflow already started")]
    WorkflowAlreadyStarted,

    /// `continue_with` called before `start`
    #[error("Workflow not started")]
    WorkflowNotStarted,

    /// A previous run of the executor never finished
    #[error("A workflow run is already in progress")]
    RunInProgress,

    /// The executor stopped after a fatal error
    #[error("Executor halted: {0}")]
    Halted(String),

    /// Fatal system error, halts event processing
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity store error
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// History or execution store error
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Weft SDK operations
pub type Result<T> = std::result::Result<T, WeftError>;

impl WeftError {
    /// Failure raised by workflow code with a name and message
    pub fn application(error: impl Into<String>, message: impl Into<String>) -> Self {
        WeftError::Application(ErrorDetails::new(error, message))
    }

    /// Fatal errors halt the executor instead of becoming a workflow result
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WeftError::DeterminismViolation(_) | WeftError::Halted(_) | WeftError::Fatal(_)
        )
    }

    /// Stable error name used in normalized error details
    pub fn name(&self) -> &'static str {
        match self {
            WeftError::DeterminismViolation(_) => "DeterminismViolation",
            WeftError::Application(_) => "ApplicationError",
            WeftError::TaskFailed(_) => "TaskFailed",
            WeftError::ChildWorkflowFailed(_) => "ChildWorkflowFailed",
            WeftError::EntityRequestFailed(_) => "EntityRequestFailed",
            WeftError::TransactionFailed(_) => "TransactionFailed",
            WeftError::Timeout(_) => "Timeout",
            WeftError::WorkflowNotFound(_) => "WorkflowNotFound",
            WeftError::TransactionNotFound(_) => "TransactionNotFound",
            WeftError::WorkflowAlreadyStarted => "WorkflowAlreadyStarted",
            WeftError::WorkflowNotStarted => "WorkflowNotStarted",
            WeftError::RunInProgress => "RunInProgress",
            WeftError::Halted(_) => "Halted",
            WeftError::Fatal(_) => "Fatal",
            WeftError::Serialization(_) => "SerializationError",
            WeftError::Entity(err) => err.name(),
            WeftError::Store(_) => "StoreError",
            WeftError::InvalidConfiguration(_) => "InvalidConfiguration",
            WeftError::Other(_) => "Error",
        }
    }

    /// Normalize into an `{error, message}` pair.
    ///
    /// Errors that already carry details (dependency failures, application
    /// failures) pass them through unchanged, so a workflow that rethrows a
    /// task failure fails with the task's own error name.
    pub fn to_details(&self) -> ErrorDetails {
        match self {
            WeftError::Application(details)
            | WeftError::TaskFailed(details)
            | WeftError::ChildWorkflowFailed(details)
            | WeftError::EntityRequestFailed(details)
            | WeftError::TransactionFailed(details) => details.clone(),
            WeftError::Timeout(message) => ErrorDetails::new("Timeout", message.clone()),
            WeftError::Entity(err) => err.to_details(),
            other => ErrorDetails::new(other.name(), other.to_string()),
        }
    }
}

impl From<CoreError> for WeftError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Serialization(e) => WeftError::Serialization(e),
            CoreError::Store(msg) => WeftError::Store(msg),
            CoreError::Conflict { execution_id } => {
                WeftError::Store(format!("conflicting write for execution {}", execution_id))
            }
            CoreError::Other(msg) => WeftError::Other(msg),
        }
    }
}

impl From<DeterminismViolationError> for WeftError {
    fn from(err: DeterminismViolationError) -> Self {
        WeftError::DeterminismViolation(err)
    }
}
