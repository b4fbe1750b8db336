//! WorkflowExecutor - Executes workflows with deterministic replay
//!
//! The executor owns the top-level future of one execution and drives it by
//! applying history events in order. Workflow code runs only while the
//! executor polls it, which happens after launch and after every applied
//! event; between polls the workflow is parked on its pending operations.
//!
//! Persisted history is split in two cursors: recorded calls, which the
//! regenerated calls must match one by one, and every other event, which is
//! re-applied in order. Once the recorded calls are exhausted, further calls
//! are new and returned to the caller for dispatch.

use crate::error::{Result, WeftError};
use crate::worker::registry::{RegisteredWorkflow, WorkflowFuture};
use crate::workflow::context::WorkflowContext;
use crate::workflow::state::{ExecutorState, SignalListener};
use chrono::{DateTime, Utc};
use futures::task::noop_waker;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};
use weft_core::{
    Call, ErrorDetails, EventKind, HistoryEvent, Seq, StartContext, WorkflowResult,
};

/// Outcome of one `start`/`continue_with` run
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRunResult {
    /// Calls issued for the first time during this run, to be dispatched
    pub calls: Vec<(Seq, Call)>,
    /// The workflow's result, once it has settled
    pub result: Option<WorkflowResult>,
}

/// Replays and advances one workflow execution
pub struct WorkflowExecutor {
    execution_id: String,
    workflow: Arc<RegisteredWorkflow>,
    state: Arc<Mutex<ExecutorState>>,
    events: VecDeque<HistoryEvent>,
    root: Option<WorkflowFuture>,
    started: bool,
    launched: bool,
    running: bool,
    result: Option<WorkflowResult>,
    halted: Option<String>,
}

impl WorkflowExecutor {
    /// Create an executor over persisted `history`
    pub fn new(
        execution_id: impl Into<String>,
        workflow: Arc<RegisteredWorkflow>,
        history: Vec<HistoryEvent>,
    ) -> Self {
        let execution_id = execution_id.into();
        let mut expected_calls = VecDeque::new();
        let mut events = VecDeque::new();
        for event in history {
            match event {
                HistoryEvent {
                    kind: EventKind::CallRecorded { seq, call },
                    ..
                } => expected_calls.push_back((seq, call)),
                other => events.push_back(other),
            }
        }

        Self {
            state: Arc::new(Mutex::new(ExecutorState::new(
                execution_id.clone(),
                expected_calls,
            ))),
            execution_id,
            workflow,
            events,
            root: None,
            started: false,
            launched: false,
            running: false,
            result: None,
            halted: None,
        }
    }

    /// Start the workflow with an explicit input
    pub fn start(&mut self, input: Value, context: StartContext) -> Result<WorkflowRunResult> {
        self.ensure_not_halted()?;
        if self.started {
            return Err(WeftError::WorkflowAlreadyStarted);
        }
        self.started = true;
        self.run(Some((input, context)))
    }

    /// Start the workflow from the `WorkflowStarted` event found in history
    /// or in `events`
    pub fn start_with_events(&mut self, events: Vec<HistoryEvent>) -> Result<WorkflowRunResult> {
        self.ensure_not_halted()?;
        if self.started {
            return Err(WeftError::WorkflowAlreadyStarted);
        }
        let has_start = self
            .events
            .iter()
            .chain(events.iter())
            .any(|event| matches!(event.kind, EventKind::WorkflowStarted { .. }));
        if !has_start {
            return Err(WeftError::Other(format!(
                "execution {} has no WorkflowStarted event",
                self.execution_id
            )));
        }
        self.started = true;
        self.events.extend(events);
        self.run(None)
    }

    /// Feed more events into a started executor
    pub fn continue_with(&mut self, events: Vec<HistoryEvent>) -> Result<WorkflowRunResult> {
        self.ensure_not_halted()?;
        if !self.started {
            return Err(WeftError::WorkflowNotStarted);
        }
        if self.running {
            return Err(WeftError::RunInProgress);
        }
        self.events.extend(events);
        self.run(None)
    }

    // === Accessors ===

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn result(&self) -> Option<&WorkflowResult> {
        self.result.as_ref()
    }

    /// Seq the next call will receive
    pub fn next_seq(&self) -> Seq {
        self.state.lock().next_seq
    }

    /// Number of operations still waiting for a trigger
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Pending timers whose deadline is at or before `now`, ascending by seq
    pub fn due_timers(&self, now: DateTime<Utc>) -> Vec<Seq> {
        self.state.lock().due_timers(now)
    }

    // === Run loop ===

    fn ensure_not_halted(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(WeftError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    fn run(&mut self, launch: Option<(Value, StartContext)>) -> Result<WorkflowRunResult> {
        // Left set if workflow code panics, so the executor is not reused.
        self.running = true;
        let outcome = self.advance(launch);
        self.running = false;

        match outcome {
            Ok(()) => {
                let calls = std::mem::take(&mut self.state.lock().new_calls);
                Ok(WorkflowRunResult {
                    calls,
                    result: self.result.clone(),
                })
            }
            Err(e) => {
                if e.is_fatal() {
                    self.halt(&e);
                }
                Err(e)
            }
        }
    }

    fn advance(&mut self, launch: Option<(Value, StartContext)>) -> Result<()> {
        if let Some((input, context)) = launch {
            self.launch(input, context)?;
        }
        while let Some(event) = self.events.pop_front() {
            self.apply(event)?;
        }
        Ok(())
    }

    fn halt(&mut self, error: &WeftError) {
        warn!(
            execution_id = %self.execution_id,
            error = %error,
            "Halting workflow executor"
        );
        self.halted = Some(error.to_string());
        self.root = None;
        self.events.clear();
        let mut state = self.state.lock();
        state.settle();
        state.pending.clear();
    }

    fn launch(&mut self, input: Value, context: StartContext) -> Result<()> {
        self.launched = true;
        let ctx = WorkflowContext::new(self.state.clone(), context.parent);
        self.root = Some(self.workflow.instantiate(ctx, input));
        self.poll_workflow()
    }

    fn apply(&mut self, event: HistoryEvent) -> Result<()> {
        let timestamp = event.timestamp;
        match event.kind {
            EventKind::WorkflowStarted { input, context, .. } => {
                self.advance_clock(timestamp);
                if self.launched {
                    return Ok(());
                }
                self.launch(input, context)
            }
            EventKind::WorkflowRunStarted => {
                self.advance_clock(timestamp);
                Ok(())
            }
            EventKind::WorkflowRunCompleted
            | EventKind::WorkflowSucceeded { .. }
            | EventKind::WorkflowFailed { .. } => Ok(()),
            EventKind::CallRecorded { seq, .. } => {
                warn!(
                    execution_id = %self.execution_id,
                    seq,
                    "Ignoring recorded call delivered as an inbound event"
                );
                Ok(())
            }
            EventKind::WorkflowTimedOut => {
                if self.result.is_none() {
                    info!(execution_id = %self.execution_id, "Workflow timed out");
                    self.result = Some(WorkflowResult::TimedOut);
                    self.root = None;
                    self.state.lock().settle();
                }
                Ok(())
            }
            EventKind::SignalReceived { signal_id, payload } => {
                self.deliver_signal(&signal_id, payload)
            }
            EventKind::TaskSucceeded { seq, result }
            | EventKind::ChildWorkflowSucceeded { seq, result }
            | EventKind::EntityRequestSucceeded { seq, result }
            | EventKind::TransactionRequestSucceeded { seq, result } => {
                self.complete(seq, Ok(result))
            }
            EventKind::TaskFailed {
                seq,
                error,
                message,
            } => self.complete(
                seq,
                Err(WeftError::TaskFailed(ErrorDetails::new(error, message))),
            ),
            EventKind::ChildWorkflowFailed {
                seq,
                error,
                message,
            } => self.complete(
                seq,
                Err(WeftError::ChildWorkflowFailed(ErrorDetails::new(error, message))),
            ),
            EventKind::EntityRequestFailed {
                seq,
                error,
                message,
            } => self.complete(
                seq,
                Err(WeftError::EntityRequestFailed(ErrorDetails::new(error, message))),
            ),
            EventKind::TransactionRequestFailed {
                seq,
                error,
                message,
            } => self.complete(
                seq,
                Err(WeftError::TransactionFailed(ErrorDetails::new(error, message))),
            ),
            EventKind::TimerCompleted { seq } => self.complete(seq, Ok(Value::Null)),
        }
    }

    fn advance_clock(&self, timestamp: DateTime<Utc>) {
        let mut state = self.state.lock();
        if timestamp > state.now {
            state.now = timestamp;
        }
    }

    fn complete(&mut self, seq: Seq, outcome: Result<Value>) -> Result<()> {
        let resolved = self.state.lock().complete(seq, outcome)?;
        if !resolved {
            debug!(
                execution_id = %self.execution_id,
                seq,
                "Ignoring completion with no pending operation"
            );
            return Ok(());
        }
        self.poll_workflow()
    }

    fn deliver_signal(&mut self, signal_id: &str, payload: Value) -> Result<()> {
        if self.root.is_none() {
            debug!(
                execution_id = %self.execution_id,
                signal_id,
                "Dropping signal, workflow is not running"
            );
            return Ok(());
        }

        let listeners = self.state.lock().take_signal_listeners(signal_id);
        if listeners.is_empty() {
            debug!(
                execution_id = %self.execution_id,
                signal_id,
                "Dropping signal with no listener"
            );
            return Ok(());
        }

        for listener in listeners {
            match listener {
                SignalListener::Waiter(slot) => slot.resolve(Ok(payload.clone())),
                SignalListener::Handler(callback) => callback(payload.clone()),
            }
        }
        self.poll_workflow()
    }

    /// Poll the workflow until it parks, re-checking conditions in between
    fn poll_workflow(&mut self) -> Result<()> {
        loop {
            let Some(root) = self.root.as_mut() else {
                return Ok(());
            };
            let waker = noop_waker();
            let mut cx = Context::from_waker(&waker);
            let poll = root.as_mut().poll(&mut cx);

            if let Some(violation) = self.state.lock().violation.clone() {
                return Err(WeftError::DeterminismViolation(violation));
            }
            if let Poll::Ready(outcome) = poll {
                self.root = None;
                return self.settle(outcome);
            }
            if !self.resolve_conditions() {
                return Ok(());
            }
        }
    }

    fn resolve_conditions(&mut self) -> bool {
        let conditions = self.state.lock().conditions();
        let satisfied: Vec<Seq> = conditions
            .into_iter()
            .filter(|(_, predicate)| predicate())
            .map(|(seq, _)| seq)
            .collect();
        if satisfied.is_empty() {
            return false;
        }

        let mut state = self.state.lock();
        for seq in satisfied {
            if let Some(op) = state.pending.remove(&seq) {
                op.slot.resolve(Ok(Value::Bool(true)));
            }
        }
        true
    }

    fn settle(&mut self, outcome: Result<Value>) -> Result<()> {
        self.state.lock().settle();
        match outcome {
            Ok(output) => {
                debug!(execution_id = %self.execution_id, "Workflow succeeded");
                self.result = Some(WorkflowResult::Succeeded(output));
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(execution_id = %self.execution_id, error = %e, "Workflow failed");
                self.result = Some(WorkflowResult::Failed(e.to_details()));
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("execution_id", &self.execution_id)
            .field("workflow", &self.workflow.name())
            .field("started", &self.started)
            .field("result", &self.result)
            .field("halted", &self.halted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::registry::{BoxedWorkflowFn, WorkflowMetadata};
    use crate::workflow::combinators::join_all;
    use chrono::TimeZone;
    use serde_json::json;
    use std::future::Future;
    use std::time::Duration;
    use weft_core::DeterminismViolationError;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn workflow<F, Fut>(name: &str, f: F) -> Arc<RegisteredWorkflow>
    where
        F: Fn(WorkflowContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let execute_fn: BoxedWorkflowFn = Box::new(move |ctx, input| Box::pin(f(ctx, input)));
        Arc::new(RegisteredWorkflow::new(WorkflowMetadata::new(name), execute_fn))
    }

    fn started(input: Value) -> HistoryEvent {
        HistoryEvent::new(
            t0(),
            EventKind::WorkflowStarted {
                execution_id: "wf/1".to_string(),
                workflow_name: "wf".to_string(),
                input,
                timeout_time: None,
                context: StartContext::default(),
            },
        )
    }

    fn task_succeeded(seq: Seq, result: Value) -> HistoryEvent {
        HistoryEvent::new(t0(), EventKind::TaskSucceeded { seq, result })
    }

    fn task_call(name: &str) -> Call {
        Call::Task {
            name: name.to_string(),
            input: json!({}),
            timeout_seconds: None,
        }
    }

    fn one_task_workflow() -> Arc<RegisteredWorkflow> {
        workflow("wf", |ctx, _input| async move {
            ctx.task_raw("fetch", json!({})).await
        })
    }

    // ========================================================================
    // Start / continue contract
    // ========================================================================

    #[test]
    fn test_echo_workflow_completes_in_one_run() {
        let wf = workflow("wf", |_ctx, input| async move { Ok(input) });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);

        let run = executor.start(json!("X"), StartContext::default()).unwrap();
        assert!(run.calls.is_empty());
        assert_eq!(run.result, Some(WorkflowResult::Succeeded(json!("X"))));
        assert!(executor.is_started());
    }

    #[test]
    fn test_task_result_delivered_on_continue() {
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), vec![]);

        let run = executor.start(json!(null), StartContext::default()).unwrap();
        assert_eq!(run.calls, vec![(0, task_call("fetch"))]);
        assert_eq!(run.result, None);
        assert_eq!(executor.pending_count(), 1);

        let run = executor
            .continue_with(vec![task_succeeded(0, json!("R"))])
            .unwrap();
        assert!(run.calls.is_empty());
        assert_eq!(run.result, Some(WorkflowResult::Succeeded(json!("R"))));
        assert_eq!(executor.pending_count(), 0);
    }

    #[test]
    fn test_start_twice_fails() {
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), vec![]);
        executor.start(json!(null), StartContext::default()).unwrap();
        assert!(matches!(
            executor.start(json!(null), StartContext::default()),
            Err(WeftError::WorkflowAlreadyStarted)
        ));
        assert!(matches!(
            executor.start_with_events(vec![started(json!(null))]),
            Err(WeftError::WorkflowAlreadyStarted)
        ));
    }

    #[test]
    fn test_continue_before_start_fails() {
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), vec![]);
        assert!(matches!(
            executor.continue_with(vec![]),
            Err(WeftError::WorkflowNotStarted)
        ));
    }

    #[test]
    fn test_start_with_events_requires_started_event() {
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), vec![]);
        assert!(executor
            .start_with_events(vec![HistoryEvent::run_started(t0())])
            .is_err());
        assert!(!executor.is_started());
    }

    #[test]
    fn test_all_of_preserves_call_order() {
        let wf = workflow("wf", |ctx, _input| async move {
            let results = join_all(vec![
                ctx.task_raw("first", json!({})),
                ctx.task_raw("second", json!({})),
            ])
            .await?;
            Ok(json!(results))
        });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);

        let run = executor
            .start_with_events(vec![HistoryEvent::run_started(t0()), started(json!(null))])
            .unwrap();
        assert_eq!(run.calls.len(), 2);

        let run = executor
            .continue_with(vec![task_succeeded(1, json!("r1"))])
            .unwrap();
        assert_eq!(run.result, None);

        let run = executor
            .continue_with(vec![task_succeeded(0, json!("r0"))])
            .unwrap();
        assert_eq!(
            run.result,
            Some(WorkflowResult::Succeeded(json!(["r0", "r1"])))
        );
    }

    // ========================================================================
    // Replay
    // ========================================================================

    #[test]
    fn test_replay_issues_no_new_calls() {
        let history = vec![
            HistoryEvent::run_started(t0()),
            started(json!(null)),
            HistoryEvent::call_recorded(t0(), 0, task_call("fetch")),
            HistoryEvent::run_completed(t0()),
        ];
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), history);

        let run = executor.start_with_events(vec![]).unwrap();
        assert!(run.calls.is_empty());
        assert_eq!(executor.next_seq(), 1);

        let run = executor
            .continue_with(vec![task_succeeded(0, json!(7))])
            .unwrap();
        assert_eq!(run.result, Some(WorkflowResult::Succeeded(json!(7))));
    }

    #[test]
    fn test_mismatched_history_halts_executor() {
        let history = vec![
            started(json!(null)),
            HistoryEvent::call_recorded(t0(), 0, task_call("other")),
        ];
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), history);

        let err = executor.start_with_events(vec![]).unwrap_err();
        assert!(matches!(
            err,
            WeftError::DeterminismViolation(DeterminismViolationError::CallMismatch {
                sequence: 0,
                ..
            })
        ));
        assert!(executor.is_halted());
        assert!(matches!(
            executor.continue_with(vec![task_succeeded(0, json!(1))]),
            Err(WeftError::Halted(_))
        ));
    }

    #[test]
    fn test_completion_for_unassigned_seq_is_violation() {
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), vec![]);
        executor.start(json!(null), StartContext::default()).unwrap();

        let err = executor
            .continue_with(vec![task_succeeded(5, json!(1))])
            .unwrap_err();
        assert!(matches!(
            err,
            WeftError::DeterminismViolation(DeterminismViolationError::UnknownCompletion {
                sequence: 5,
                next_sequence: 1
            })
        ));
        assert!(executor.is_halted());
    }

    #[test]
    fn test_duplicate_completion_resolves_once() {
        let wf = workflow("wf", |ctx, _input| async move {
            let first = ctx.task_raw("a", json!({})).await?;
            let second = ctx.task_raw("b", json!({})).await?;
            Ok(json!([first, second]))
        });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);
        executor.start(json!(null), StartContext::default()).unwrap();

        let run = executor
            .continue_with(vec![task_succeeded(0, json!(1)), task_succeeded(0, json!(99))])
            .unwrap();
        assert_eq!(run.calls, vec![(1, task_call("b"))]);

        let run = executor
            .continue_with(vec![task_succeeded(1, json!(2))])
            .unwrap();
        assert_eq!(run.result, Some(WorkflowResult::Succeeded(json!([1, 2]))));
    }

    // ========================================================================
    // Failures
    // ========================================================================

    #[test]
    fn test_task_failure_becomes_failed_result() {
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), vec![]);
        executor.start(json!(null), StartContext::default()).unwrap();

        let run = executor
            .continue_with(vec![HistoryEvent::new(
                t0(),
                EventKind::TaskFailed {
                    seq: 0,
                    error: "CardDeclined".to_string(),
                    message: "insufficient funds".to_string(),
                },
            )])
            .unwrap();
        assert_eq!(
            run.result,
            Some(WorkflowResult::Failed(ErrorDetails::new(
                "CardDeclined",
                "insufficient funds"
            )))
        );
        assert!(!executor.is_halted());

        // Seq validation continues after the workflow settled
        assert!(executor
            .continue_with(vec![task_succeeded(0, json!(1))])
            .is_ok());
        assert!(executor
            .continue_with(vec![task_succeeded(3, json!(1))])
            .is_err());
    }

    #[test]
    fn test_fatal_error_halts() {
        let wf = workflow("wf", |_ctx, _input| async move {
            Err(WeftError::Fatal("corrupted state".to_string()))
        });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);
        let err = executor
            .start(json!(null), StartContext::default())
            .unwrap_err();
        assert!(matches!(err, WeftError::Fatal(_)));
        assert!(executor.is_halted());
        assert_eq!(executor.result(), None);
    }

    #[test]
    fn test_workflow_timed_out_stops_workflow() {
        let mut executor = WorkflowExecutor::new("wf/1", one_task_workflow(), vec![]);
        executor.start(json!(null), StartContext::default()).unwrap();

        let run = executor
            .continue_with(vec![HistoryEvent::new(t0(), EventKind::WorkflowTimedOut)])
            .unwrap();
        assert_eq!(run.result, Some(WorkflowResult::TimedOut));

        let run = executor
            .continue_with(vec![task_succeeded(0, json!(1))])
            .unwrap();
        assert_eq!(run.result, Some(WorkflowResult::TimedOut));
    }

    // ========================================================================
    // Timers, signals and conditions
    // ========================================================================

    #[test]
    fn test_timer_deadline_uses_logical_clock() {
        let wf = workflow("wf", |ctx, _input| async move {
            ctx.sleep(Duration::from_secs(10)).await?;
            Ok(json!(ctx.now()))
        });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);

        let run = executor
            .start_with_events(vec![HistoryEvent::run_started(t0()), started(json!(null))])
            .unwrap();
        let until = t0() + chrono::Duration::seconds(10);
        assert_eq!(run.calls, vec![(0, Call::AwaitTimer { until })]);
        assert!(executor.due_timers(t0()).is_empty());
        assert_eq!(executor.due_timers(until), vec![0]);

        let later = until + chrono::Duration::seconds(1);
        let run = executor
            .continue_with(vec![
                HistoryEvent::run_started(later),
                HistoryEvent::timer_completed(later, 0),
            ])
            .unwrap();
        assert_eq!(run.result, Some(WorkflowResult::Succeeded(json!(later))));
    }

    #[test]
    fn test_expect_signal() {
        let wf = workflow("wf", |ctx, _input| async move {
            let approval: Value = ctx.expect_signal("approve", None).await?;
            Ok(approval)
        });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);
        let run = executor.start(json!(null), StartContext::default()).unwrap();
        assert_eq!(
            run.calls,
            vec![(
                0,
                Call::ExpectSignal {
                    signal_id: "approve".to_string(),
                    timeout_seq: None
                }
            )]
        );

        let run = executor
            .continue_with(vec![
                HistoryEvent::signal_received(t0(), "other", json!(1)),
                HistoryEvent::signal_received(t0(), "approve", json!({"by": "ops"})),
            ])
            .unwrap();
        assert_eq!(
            run.result,
            Some(WorkflowResult::Succeeded(json!({"by": "ops"})))
        );
    }

    #[test]
    fn test_expect_signal_timeout() {
        let wf = workflow("wf", |ctx, _input| async move {
            match ctx
                .expect_signal::<Value>("approve", Some(Duration::from_secs(60)))
                .await
            {
                Ok(_) => Ok(json!("approved")),
                Err(WeftError::Timeout(_)) => Ok(json!("expired")),
                Err(e) => Err(e),
            }
        });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);
        let run = executor
            .start_with_events(vec![HistoryEvent::run_started(t0()), started(json!(null))])
            .unwrap();
        assert_eq!(run.calls.len(), 2);
        assert!(matches!(run.calls[0].1, Call::AwaitTimer { .. }));
        assert_eq!(
            run.calls[1].1,
            Call::ExpectSignal {
                signal_id: "approve".to_string(),
                timeout_seq: Some(0)
            }
        );

        let run = executor
            .continue_with(vec![HistoryEvent::timer_completed(t0(), 0)])
            .unwrap();
        assert_eq!(run.result, Some(WorkflowResult::Succeeded(json!("expired"))));
    }

    #[test]
    fn test_signal_handler_and_condition() {
        let wf = workflow("wf", |ctx, _input| async move {
            let total = Arc::new(Mutex::new(0i64));
            let handler = {
                let total = total.clone();
                ctx.on_signal("add", move |payload| {
                    *total.lock() += payload.as_i64().unwrap_or(0);
                })?
            };
            let reached = {
                let total = total.clone();
                ctx.condition(move || *total.lock() >= 10, None)
            }
            .await?;
            handler.dispose();
            let value = *total.lock();
            Ok(json!({"reached": reached, "total": value}))
        });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);
        let run = executor.start(json!(null), StartContext::default()).unwrap();
        assert_eq!(run.calls.len(), 2);
        assert_eq!(executor.pending_count(), 1);

        let run = executor
            .continue_with(vec![HistoryEvent::signal_received(t0(), "add", json!(4))])
            .unwrap();
        assert_eq!(run.result, None);

        let run = executor
            .continue_with(vec![
                HistoryEvent::signal_received(t0(), "add", json!(7)),
                HistoryEvent::signal_received(t0(), "add", json!(100)),
            ])
            .unwrap();
        assert_eq!(
            run.result,
            Some(WorkflowResult::Succeeded(json!({"reached": true, "total": 11})))
        );
    }

    #[test]
    fn test_condition_timeout_resolves_false() {
        let wf = workflow("wf", |ctx, _input| async move {
            let reached = ctx
                .condition(|| false, Some(Duration::from_secs(5)))
                .await?;
            Ok(json!(reached))
        });
        let mut executor = WorkflowExecutor::new("wf/1", wf, vec![]);
        executor
            .start_with_events(vec![HistoryEvent::run_started(t0()), started(json!(null))])
            .unwrap();
        let run = executor
            .continue_with(vec![HistoryEvent::timer_completed(t0(), 0)])
            .unwrap();
        assert_eq!(run.result, Some(WorkflowResult::Succeeded(json!(false))));
    }
}
