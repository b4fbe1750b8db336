//! Core error types for the Weft workflow engine
//!
//! This module contains the error types shared by the executor, the
//! orchestrator and the storage layers. The SDK wraps these in its own
//! `WeftError`.

use crate::workflow::call::{Call, Seq};
use serde::{Deserialize, Serialize};

/// Core error type for serialization and storage failures
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store failure (history, execution metadata)
    #[error("Store error: {0}")]
    Store(String),

    /// A conditional write on the history lost against a concurrent writer
    #[error("Conflicting write for execution {execution_id}")]
    Conflict { execution_id: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Normalized `{error, message}` pair.
///
/// Every dependency failure that reaches workflow code, and every failed
/// workflow result, is expressed in this shape so it survives serialization
/// into history unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error name, e.g. `UnexpectedVersion` or `Timeout`
    pub error: String,
    /// Human readable message
    pub message: String,
}

impl ErrorDetails {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.error)
        } else {
            write!(f, "{}: {}", self.error, self.message)
        }
    }
}

/// Determinism violations detected while replaying a history.
///
/// These errors indicate that the workflow code produced a different
/// sequence of calls than the one recorded in history, usually because a
/// non backward compatible change was deployed. They are never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum DeterminismViolationError {
    /// The call emitted at `sequence` differs from the recorded one
    CallMismatch {
        sequence: Seq,
        expected: Box<Call>,
        actual: Box<Call>,
    },

    /// The recorded call at the head of history carries a different seq
    SequenceMismatch { expected: Seq, actual: Seq },

    /// A completion arrived for a seq that was never assigned
    UnknownCompletion { sequence: Seq, next_sequence: Seq },
}

impl DeterminismViolationError {
    /// Sequence number the violation was detected at
    pub fn sequence(&self) -> Seq {
        match self {
            Self::CallMismatch { sequence, .. } => *sequence,
            Self::SequenceMismatch { actual, .. } => *actual,
            Self::UnknownCompletion { sequence, .. } => *sequence,
        }
    }
}

impl std::fmt::Display for DeterminismViolationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallMismatch {
                sequence,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Call mismatch at sequence {}: expected {}, got {}",
                    sequence,
                    expected.kind(),
                    actual.kind()
                )?;
                if expected.kind() == actual.kind() {
                    write!(f, " with different arguments")?;
                }
                Ok(())
            }
            Self::SequenceMismatch { expected, actual } => {
                write!(
                    f,
                    "Sequence mismatch: history expects call {}, workflow emitted {}",
                    expected, actual
                )
            }
            Self::UnknownCompletion {
                sequence,
                next_sequence,
            } => {
                write!(
                    f,
                    "Completion for sequence {} received but only {} calls were emitted",
                    sequence, next_sequence
                )
            }
        }
    }
}

impl std::error::Error for DeterminismViolationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_determinism_violation_error_display() {
        let err = DeterminismViolationError::CallMismatch {
            sequence: 1,
            expected: Box::new(Call::Task {
                name: "charge".to_string(),
                input: json!({}),
                timeout_seconds: None,
            }),
            actual: Box::new(Call::Task {
                name: "refund".to_string(),
                input: json!({}),
                timeout_seconds: None,
            }),
        };
        assert!(err.to_string().contains("Call mismatch at sequence 1"));
        assert!(err.to_string().contains("with different arguments"));
        assert_eq!(err.sequence(), 1);

        let err = DeterminismViolationError::UnknownCompletion {
            sequence: 7,
            next_sequence: 3,
        };
        assert!(err.to_string().contains("sequence 7"));
        assert_eq!(err.sequence(), 7);

        let err = DeterminismViolationError::SequenceMismatch {
            expected: 2,
            actual: 4,
        };
        assert!(err.to_string().contains("expects call 2"));
    }

    #[test]
    fn test_error_details_display() {
        let details = ErrorDetails::new("UnexpectedVersion", "expected 0, found 1");
        assert_eq!(details.to_string(), "UnexpectedVersion: expected 0, found 1");
        assert_eq!(ErrorDetails::new("Timeout", "").to_string(), "Timeout");
    }

    #[test]
    fn test_core_error_from_serde_json() {
        let result: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("invalid json");
        let err: CoreError = result.unwrap_err().into();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
