//! WorkflowCallExecutor - turns calls issued by workflow code into side effects
//!
//! Every call kind is dispatched by one exhaustive match. Calls whose outcome
//! is produced asynchronously (tasks, child workflows, timers) are handed off
//! and their completions arrive later on the execution's queue. Entity
//! operations and transactions run inline; their outcome is normalized to a
//! completion event and enqueued on the execution's own queue, so the result
//! reaches the workflow through the same path as every other completion.

pub mod clients;

pub use clients::{
    EventPublisher, ExecutionQueueClient, Schedule, StartExecutionRequest, TaskClient,
    TaskRequest, TimerClient, TransactionClient, WorkflowClient,
};

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use weft_core::{
    child_execution_id, execute_operation, Call, EntityStore, EventKind, HistoryEvent,
    ParentExecution, Seq, SignalTarget,
};

/// External systems the call executor dispatches to
#[derive(Clone)]
pub struct CallClients {
    pub tasks: Arc<dyn TaskClient>,
    pub workflows: Arc<dyn WorkflowClient>,
    pub timers: Arc<dyn TimerClient>,
    pub queues: Arc<dyn ExecutionQueueClient>,
    pub events: Arc<dyn EventPublisher>,
    pub transactions: Arc<dyn TransactionClient>,
    pub entities: Arc<dyn EntityStore>,
}

impl std::fmt::Debug for CallClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallClients").finish_non_exhaustive()
    }
}

/// Dispatches calls and records them as `CallRecorded` events
#[derive(Debug, Clone)]
pub struct WorkflowCallExecutor {
    clients: CallClients,
}

impl WorkflowCallExecutor {
    pub fn new(clients: CallClients) -> Self {
        Self { clients }
    }

    /// Queue client used to deliver events to other executions
    pub fn queues(&self) -> &Arc<dyn ExecutionQueueClient> {
        &self.clients.queues
    }

    /// Timer client used for scheduled deliveries
    pub fn timers(&self) -> &Arc<dyn TimerClient> {
        &self.clients.timers
    }

    /// Dispatch `call` issued by `execution_id` at `seq`.
    ///
    /// Returns the `CallRecorded` event (timestamp `base_time`) to append to
    /// history. Outcomes of inline operations never surface as errors here;
    /// an `Err` means a hand-off to an external system failed and nothing
    /// about this call should be persisted.
    pub async fn execute_call(
        &self,
        execution_id: &str,
        seq: Seq,
        call: Call,
        base_time: DateTime<Utc>,
    ) -> Result<HistoryEvent> {
        debug!(execution_id = %execution_id, seq, kind = call.kind(), "Dispatching call");

        match &call {
            Call::Task {
                name,
                input,
                timeout_seconds,
            } => {
                self.clients
                    .tasks
                    .start_task(TaskRequest {
                        execution_id: execution_id.to_string(),
                        seq,
                        name: name.clone(),
                        input: input.clone(),
                        timeout_seconds: *timeout_seconds,
                    })
                    .await?;
            }
            Call::ChildWorkflow {
                name,
                input,
                timeout_seconds,
            } => {
                self.clients
                    .workflows
                    .start_execution(StartExecutionRequest {
                        execution_id: child_execution_id(name, execution_id, seq),
                        workflow_name: name.clone(),
                        input: input.clone(),
                        timeout_seconds: *timeout_seconds,
                        parent: Some(ParentExecution {
                            execution_id: execution_id.to_string(),
                            seq,
                        }),
                    })
                    .await?;
            }
            Call::AwaitTimer { until } => {
                // Already-due timers are completed by the orchestrator in the same pass
                if *until > base_time {
                    self.clients
                        .timers
                        .schedule_event(
                            execution_id,
                            Schedule::Time(*until),
                            EventKind::TimerCompleted { seq },
                        )
                        .await?;
                }
            }
            Call::Entity { operation } => {
                let kind = match execute_operation(self.clients.entities.as_ref(), operation)
                    .await
                {
                    Ok(result) => EventKind::EntityRequestSucceeded { seq, result },
                    Err(e) => {
                        debug!(execution_id = %execution_id, seq, error = %e, "Entity request failed");
                        let details = e.to_details();
                        EventKind::EntityRequestFailed {
                            seq,
                            error: details.error,
                            message: details.message,
                        }
                    }
                };
                self.clients
                    .queues
                    .enqueue(execution_id, HistoryEvent::new(base_time, kind))
                    .await?;
            }
            Call::InvokeTransaction { name, input } => {
                let kind = match self
                    .clients
                    .transactions
                    .execute_transaction(name, input.clone())
                    .await
                {
                    Ok(result) => EventKind::TransactionRequestSucceeded { seq, result },
                    Err(e) => {
                        debug!(execution_id = %execution_id, seq, error = %e, "Transaction failed");
                        let details = e.to_details();
                        EventKind::TransactionRequestFailed {
                            seq,
                            error: details.error,
                            message: details.message,
                        }
                    }
                };
                self.clients
                    .queues
                    .enqueue(execution_id, HistoryEvent::new(base_time, kind))
                    .await?;
            }
            Call::SendSignal {
                target,
                signal_id,
                payload,
            } => {
                let target_id = match target {
                    SignalTarget::Execution { execution_id } => execution_id.clone(),
                    SignalTarget::Child {
                        workflow_name,
                        seq: child_seq,
                    } => child_execution_id(workflow_name, execution_id, *child_seq),
                };
                let event = HistoryEvent::signal_received(base_time, signal_id.clone(), payload.clone());
                if let Err(e) = self.clients.queues.enqueue(&target_id, event).await {
                    warn!(
                        execution_id = %execution_id,
                        seq,
                        target = %target_id,
                        error = %e,
                        "Failed to deliver signal"
                    );
                }
            }
            Call::EmitEvents { events } => {
                if let Err(e) = self.clients.events.emit(execution_id, events.clone()).await {
                    warn!(execution_id = %execution_id, seq, error = %e, "Failed to emit events");
                }
            }
            Call::ExpectSignal { .. } | Call::Condition { .. } | Call::RegisterSignalHandler { .. } => {}
        }

        Ok(HistoryEvent::call_recorded(base_time, seq, call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WeftError;
    use crate::testing::{
        InMemoryExecutionQueue, RecordingEventPublisher, RecordingTaskClient, RecordingTimerClient,
        RecordingWorkflowClient, TestClients,
    };
    use crate::transaction::{LocalTransactionClient, TransactionRegistry};
    use chrono::TimeZone;
    use serde_json::json;
    use weft_core::{EmittedEvent, EntityKey, EntityOperation, InMemoryEntityStore, PutOptions};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn executor(clients: &TestClients) -> WorkflowCallExecutor {
        WorkflowCallExecutor::new(clients.call_clients())
    }

    #[tokio::test]
    async fn test_task_is_started_and_recorded() {
        let clients = TestClients::new();
        let call = Call::Task {
            name: "charge".to_string(),
            input: json!({"amount": 5}),
            timeout_seconds: Some(30),
        };
        let event = executor(&clients)
            .execute_call("order/1", 3, call.clone(), t0())
            .await
            .unwrap();

        assert_eq!(event, HistoryEvent::call_recorded(t0(), 3, call));
        let requests = clients.tasks.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].seq, 3);
        assert_eq!(requests[0].timeout_seconds, Some(30));
    }

    #[tokio::test]
    async fn test_task_hand_off_failure_propagates() {
        let clients = TestClients::new();
        clients.tasks.set_failing(true);
        let result = executor(&clients)
            .execute_call(
                "order/1",
                0,
                Call::Task {
                    name: "charge".to_string(),
                    input: json!(null),
                    timeout_seconds: None,
                },
                t0(),
            )
            .await;
        assert!(matches!(result, Err(WeftError::Store(_))));
    }

    #[tokio::test]
    async fn test_child_workflow_gets_deterministic_id() {
        let clients = TestClients::new();
        let call = Call::ChildWorkflow {
            name: "shipping".to_string(),
            input: json!({}),
            timeout_seconds: None,
        };
        executor(&clients)
            .execute_call("order/1", 2, call, t0())
            .await
            .unwrap();

        let requests = clients.workflows.requests();
        assert_eq!(requests[0].execution_id, child_execution_id("shipping", "order/1", 2));
        assert_eq!(
            requests[0].parent,
            Some(ParentExecution {
                execution_id: "order/1".to_string(),
                seq: 2
            })
        );
    }

    #[tokio::test]
    async fn test_due_timer_is_not_scheduled() {
        let clients = TestClients::new();
        let exec = executor(&clients);
        exec.execute_call("order/1", 0, Call::AwaitTimer { until: t0() }, t0())
            .await
            .unwrap();
        assert!(clients.timers.scheduled().is_empty());

        let later = t0() + chrono::Duration::seconds(10);
        exec.execute_call("order/1", 1, Call::AwaitTimer { until: later }, t0())
            .await
            .unwrap();
        let scheduled = clients.timers.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].schedule, Schedule::Time(later));
        assert_eq!(scheduled[0].event, EventKind::TimerCompleted { seq: 1 });
    }

    #[tokio::test]
    async fn test_entity_outcomes_are_enqueued() {
        let clients = TestClients::new();
        let exec = executor(&clients);
        let put = |seq| {
            (
                seq,
                Call::Entity {
                    operation: EntityOperation::Put {
                        entity: "account".to_string(),
                        key: EntityKey::new("a"),
                        value: json!(1),
                        options: PutOptions::expect_version(0),
                    },
                },
            )
        };

        for (seq, call) in [put(0), put(1)] {
            exec.execute_call("order/1", seq, call, t0()).await.unwrap();
        }

        let events = clients.queues.drain("order/1");
        assert_eq!(
            events[0].kind,
            EventKind::EntityRequestSucceeded {
                seq: 0,
                result: json!({"version": 1})
            }
        );
        assert!(matches!(
            &events[1].kind,
            EventKind::EntityRequestFailed { seq: 1, error, .. } if error == "UnexpectedVersion"
        ));
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_normalized() {
        let clients = TestClients::new();
        executor(&clients)
            .execute_call(
                "order/1",
                4,
                Call::InvokeTransaction {
                    name: "missing".to_string(),
                    input: json!({}),
                },
                t0(),
            )
            .await
            .unwrap();

        let events = clients.queues.drain("order/1");
        assert!(matches!(
            &events[0].kind,
            EventKind::TransactionRequestFailed { seq: 4, error, .. } if error == "TransactionNotFound"
        ));
    }

    #[tokio::test]
    async fn test_signal_to_child_and_events() {
        let clients = TestClients::new();
        let exec = executor(&clients);
        exec.execute_call(
            "order/1",
            5,
            Call::SendSignal {
                target: SignalTarget::Child {
                    workflow_name: "shipping".to_string(),
                    seq: 2,
                },
                signal_id: "cancel".to_string(),
                payload: json!({"reason": "customer"}),
            },
            t0(),
        )
        .await
        .unwrap();
        exec.execute_call(
            "order/1",
            6,
            Call::EmitEvents {
                events: vec![EmittedEvent {
                    name: "OrderPlaced".to_string(),
                    data: json!({}),
                }],
            },
            t0(),
        )
        .await
        .unwrap();

        let child = child_execution_id("shipping", "order/1", 2);
        let delivered = clients.queues.drain(&child);
        assert_eq!(
            delivered,
            vec![HistoryEvent::signal_received(
                t0(),
                "cancel",
                json!({"reason": "customer"})
            )]
        );
        assert_eq!(clients.events.emitted().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_propagated() {
        let events = Arc::new(RecordingEventPublisher::default());
        events.set_failing(true);
        let clients = CallClients {
            tasks: Arc::new(RecordingTaskClient::default()),
            workflows: Arc::new(RecordingWorkflowClient::default()),
            timers: Arc::new(RecordingTimerClient::default()),
            queues: Arc::new(InMemoryExecutionQueue::default()),
            events,
            transactions: Arc::new(LocalTransactionClient::new(
                Arc::new(TransactionRegistry::new()),
                Arc::new(InMemoryEntityStore::new()),
                Default::default(),
            )),
            entities: Arc::new(InMemoryEntityStore::new()),
        };
        let result = WorkflowCallExecutor::new(clients)
            .execute_call(
                "order/1",
                0,
                Call::EmitEvents { events: vec![] },
                t0(),
            )
            .await;
        assert!(result.is_ok());
    }
}
