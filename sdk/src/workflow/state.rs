//! Executor state shared between the executor and workflow contexts.

use crate::error::{Result, WeftError};
use crate::workflow::future::CallSlot;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use weft_core::{Call, DeterminismViolationError, Seq};

pub(crate) type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;
pub(crate) type SignalCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// What resolves a pending operation
pub(crate) enum Trigger {
    /// A completion event carrying the operation's own seq
    Completion,
    /// `TimerCompleted` for the operation's own seq
    Timer { until: DateTime<Utc> },
    /// A `SignalReceived` with this id, or the timeout timer firing
    Signal {
        signal_id: String,
        timeout_seq: Option<Seq>,
    },
    /// Re-checked after every applied event, or the timeout timer firing
    Condition {
        predicate: Predicate,
        timeout_seq: Option<Seq>,
    },
}

impl Trigger {
    fn timeout_seq(&self) -> Option<Seq> {
        match self {
            Trigger::Signal { timeout_seq, .. } | Trigger::Condition { timeout_seq, .. } => {
                *timeout_seq
            }
            Trigger::Completion | Trigger::Timer { .. } => None,
        }
    }
}

pub(crate) struct PendingOperation {
    pub slot: Arc<CallSlot>,
    pub trigger: Trigger,
}

pub(crate) struct SignalHandlerRecord {
    pub signal_id: String,
    pub callback: SignalCallback,
}

/// Who gets a delivered signal
pub(crate) enum SignalListener {
    Waiter(Arc<CallSlot>),
    Handler(SignalCallback),
}

pub(crate) struct ExecutorState {
    pub execution_id: String,
    /// Logical clock of the current pass
    pub now: DateTime<Utc>,
    pub next_seq: Seq,
    pub expected_calls: VecDeque<(Seq, Call)>,
    pub new_calls: Vec<(Seq, Call)>,
    /// Keyed by seq, so iteration order is registration order
    pub pending: BTreeMap<Seq, PendingOperation>,
    pub signal_handlers: BTreeMap<Seq, SignalHandlerRecord>,
    pub violation: Option<DeterminismViolationError>,
    pub settled: bool,
}

impl ExecutorState {
    pub fn new(execution_id: String, expected_calls: VecDeque<(Seq, Call)>) -> Self {
        Self {
            execution_id,
            now: DateTime::<Utc>::UNIX_EPOCH,
            next_seq: 0,
            expected_calls,
            new_calls: Vec::new(),
            pending: BTreeMap::new(),
            signal_handlers: BTreeMap::new(),
            violation: None,
            settled: false,
        }
    }

    /// Assign the next seq to `call` and check it against recorded history.
    pub fn record_call(&mut self, call: Call) -> Result<Seq> {
        if let Some(violation) = &self.violation {
            return Err(WeftError::DeterminismViolation(violation.clone()));
        }
        if self.settled {
            return Err(WeftError::Halted(
                "workflow has already settled".to_string(),
            ));
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        match self.expected_calls.pop_front() {
            Some((expected_seq, expected)) => {
                let violation = if expected_seq != seq {
                    Some(DeterminismViolationError::SequenceMismatch {
                        expected: expected_seq,
                        actual: seq,
                    })
                } else if expected != call {
                    Some(DeterminismViolationError::CallMismatch {
                        sequence: seq,
                        expected: Box::new(expected),
                        actual: Box::new(call),
                    })
                } else {
                    None
                };
                if let Some(violation) = violation {
                    self.violation = Some(violation.clone());
                    return Err(WeftError::DeterminismViolation(violation));
                }
            }
            None => self.new_calls.push((seq, call)),
        }
        Ok(seq)
    }

    pub fn register(&mut self, seq: Seq, trigger: Trigger) -> Arc<CallSlot> {
        let slot = Arc::new(CallSlot::default());
        self.pending.insert(
            seq,
            PendingOperation {
                slot: slot.clone(),
                trigger,
            },
        );
        slot
    }

    /// Record a completion for `seq`.
    ///
    /// Resolves the operation registered on `seq`, then every operation that
    /// uses `seq` as its timeout. Completions for seqs that were never
    /// assigned are determinism violations; completions with no pending
    /// operation (duplicates) are ignored. Returns whether anything resolved.
    pub fn complete(&mut self, seq: Seq, outcome: Result<Value>) -> Result<bool> {
        if seq >= self.next_seq {
            let violation = DeterminismViolationError::UnknownCompletion {
                sequence: seq,
                next_sequence: self.next_seq,
            };
            self.violation = Some(violation.clone());
            return Err(WeftError::DeterminismViolation(violation));
        }

        let Some(operation) = self.pending.remove(&seq) else {
            return Ok(false);
        };
        operation.slot.resolve(outcome);

        let dependents: Vec<Seq> = self
            .pending
            .iter()
            .filter(|(_, op)| op.trigger.timeout_seq() == Some(seq))
            .map(|(dependent, _)| *dependent)
            .collect();
        for dependent in dependents {
            if let Some(op) = self.pending.remove(&dependent) {
                match op.trigger {
                    Trigger::Signal { signal_id, .. } => op.slot.resolve(Err(WeftError::Timeout(
                        format!("signal '{}' was not received in time", signal_id),
                    ))),
                    Trigger::Condition { .. } => op.slot.resolve(Ok(Value::Bool(false))),
                    Trigger::Completion | Trigger::Timer { .. } => {}
                }
            }
        }
        Ok(true)
    }

    /// Remove waiters for `signal_id` and collect handlers, in registration order
    pub fn take_signal_listeners(&mut self, signal_id: &str) -> Vec<SignalListener> {
        let waiting: Vec<Seq> = self
            .pending
            .iter()
            .filter(|(_, op)| {
                matches!(&op.trigger, Trigger::Signal { signal_id: id, .. } if id == signal_id)
            })
            .map(|(seq, _)| *seq)
            .collect();

        let mut listeners: BTreeMap<Seq, SignalListener> = BTreeMap::new();
        for seq in waiting {
            if let Some(op) = self.pending.remove(&seq) {
                listeners.insert(seq, SignalListener::Waiter(op.slot));
            }
        }
        for (seq, record) in &self.signal_handlers {
            if record.signal_id == signal_id {
                listeners.insert(*seq, SignalListener::Handler(record.callback.clone()));
            }
        }
        listeners.into_values().collect()
    }

    pub fn conditions(&self) -> Vec<(Seq, Predicate)> {
        self.pending
            .iter()
            .filter_map(|(seq, op)| match &op.trigger {
                Trigger::Condition { predicate, .. } => Some((*seq, predicate.clone())),
                _ => None,
            })
            .collect()
    }

    /// Pending timer seqs whose deadline is at or before `now`, ascending
    pub fn due_timers(&self, now: DateTime<Utc>) -> Vec<Seq> {
        self.pending
            .iter()
            .filter_map(|(seq, op)| match op.trigger {
                Trigger::Timer { until } if until <= now => Some(*seq),
                _ => None,
            })
            .collect()
    }

    /// Stop running workflow code: handlers and conditions are dropped
    pub fn settle(&mut self) {
        self.settled = true;
        self.signal_handlers.clear();
        self.pending
            .retain(|_, op| !matches!(op.trigger, Trigger::Condition { .. }));
    }
}
