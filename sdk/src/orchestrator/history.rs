//! Persistence of history and execution records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use weft_core::{CoreError, CoreResult, Execution, HistoryEvent, WorkflowResult};

/// Append-only event history, one log per execution
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Full history of an execution, empty if unknown
    async fn get_history(&self, execution_id: &str) -> CoreResult<Vec<HistoryEvent>>;

    /// Append `events` if the history still has `expected_len` events.
    ///
    /// Fails with [`CoreError::Conflict`] when another writer appended first.
    async fn append_events(
        &self,
        execution_id: &str,
        expected_len: usize,
        events: Vec<HistoryEvent>,
    ) -> CoreResult<()>;
}

/// Execution metadata records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Create the record; an existing record with the same id is left untouched
    async fn create_execution(&self, execution: Execution) -> CoreResult<()>;

    async fn get_execution(&self, execution_id: &str) -> CoreResult<Option<Execution>>;

    /// Move the record to the terminal status of `result`
    async fn complete_execution(
        &self,
        execution_id: &str,
        result: &WorkflowResult,
        end_time: DateTime<Utc>,
    ) -> CoreResult<()>;
}

/// History store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    histories: RwLock<HashMap<String, Vec<HistoryEvent>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every execution with a non-empty history
    pub fn execution_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.histories.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get_history(&self, execution_id: &str) -> CoreResult<Vec<HistoryEvent>> {
        Ok(self
            .histories
            .read()
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_events(
        &self,
        execution_id: &str,
        expected_len: usize,
        events: Vec<HistoryEvent>,
    ) -> CoreResult<()> {
        let mut histories = self.histories.write();
        let history = histories.entry(execution_id.to_string()).or_default();
        if history.len() != expected_len {
            return Err(CoreError::Conflict {
                execution_id: execution_id.to_string(),
            });
        }
        history.extend(events);
        Ok(())
    }
}

/// Execution store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, execution: Execution) -> CoreResult<()> {
        self.executions
            .write()
            .entry(execution.id.clone())
            .or_insert(execution);
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> CoreResult<Option<Execution>> {
        Ok(self.executions.read().get(execution_id).cloned())
    }

    async fn complete_execution(
        &self,
        execution_id: &str,
        result: &WorkflowResult,
        end_time: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| CoreError::Store(format!("execution {} not found", execution_id)))?;
        execution.complete(result, end_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use weft_core::{ErrorDetails, ExecutionStatus};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_append_is_conditional_on_length() {
        let store = InMemoryHistoryStore::new();
        store
            .append_events("wf/1", 0, vec![HistoryEvent::run_started(t0())])
            .await
            .unwrap();

        let stale = store
            .append_events("wf/1", 0, vec![HistoryEvent::run_completed(t0())])
            .await;
        assert!(matches!(stale, Err(CoreError::Conflict { .. })));

        store
            .append_events("wf/1", 1, vec![HistoryEvent::run_completed(t0())])
            .await
            .unwrap();
        assert_eq!(store.get_history("wf/1").await.unwrap().len(), 2);
        assert!(store.get_history("wf/2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let store = InMemoryExecutionStore::new();
        store
            .create_execution(Execution::new("wf/1", "wf", t0()))
            .await
            .unwrap();
        // Re-creating keeps the original record
        store
            .create_execution(Execution::new("wf/1", "other", t0()))
            .await
            .unwrap();

        let end = t0() + chrono::Duration::seconds(5);
        store
            .complete_execution("wf/1", &WorkflowResult::Succeeded(json!(1)), end)
            .await
            .unwrap();
        let execution = store.get_execution("wf/1").await.unwrap().unwrap();
        assert_eq!(execution.workflow_name, "wf");
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.result, Some(json!(1)));
        assert_eq!(execution.end_time, Some(end));
    }

    #[tokio::test]
    async fn test_complete_unknown_execution_fails() {
        let store = InMemoryExecutionStore::new();
        let result = store
            .complete_execution(
                "wf/404",
                &WorkflowResult::Failed(ErrorDetails::new("Boom", "")),
                t0(),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Store(_))));
    }
}
