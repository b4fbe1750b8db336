//! Workflow future types
//!
//! Every call issued through [`WorkflowContext`](crate::workflow::WorkflowContext)
//! returns a [`CallFuture`]. The future shares a resolution slot with the
//! executor's pending operation table: the executor fills the slot when the
//! matching completion event is applied, and the next poll of the workflow
//! observes it.
//!
//! Call futures never register wakers. The executor re-polls the workflow
//! after every event it applies, so a no-op waker is sufficient.

use crate::error::{Result, WeftError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use weft_core::Seq;

/// Resolution slot shared between a pending operation and its future.
///
/// A slot is resolved at most once; later resolutions are ignored.
#[derive(Debug, Default)]
pub(crate) struct CallSlot {
    resolution: Mutex<Option<Result<Value>>>,
}

impl CallSlot {
    pub fn resolved(resolution: Result<Value>) -> Self {
        Self {
            resolution: Mutex::new(Some(resolution)),
        }
    }

    pub fn resolve(&self, resolution: Result<Value>) {
        let mut slot = self.resolution.lock();
        if slot.is_none() {
            *slot = Some(resolution);
        }
    }

    pub fn take(&self) -> Option<Result<Value>> {
        self.resolution.lock().take()
    }
}

// ============================================================================
// CallFuture
// ============================================================================

/// Future for a call issued by workflow code.
///
/// Resolves with the deserialized result of the call, or with the error
/// delivered by its completion event. Dropping a `CallFuture` does not cancel
/// the underlying call; its eventual completion is simply discarded.
#[must_use = "calls are recorded when issued; await the future to observe the result"]
pub struct CallFuture<T> {
    seq: Option<Seq>,
    slot: Arc<CallSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CallFuture<T> {
    /// Future waiting on a pending operation
    pub(crate) fn pending(seq: Seq, slot: Arc<CallSlot>) -> Self {
        Self {
            seq: Some(seq),
            slot,
            _marker: PhantomData,
        }
    }

    /// Future whose outcome is already known
    pub(crate) fn ready(seq: Seq, resolution: Result<Value>) -> Self {
        Self {
            seq: Some(seq),
            slot: Arc::new(CallSlot::resolved(resolution)),
            _marker: PhantomData,
        }
    }

    /// Future that failed before a seq was assigned (e.g. bad input, halted executor)
    pub(crate) fn failed(error: WeftError) -> Self {
        Self {
            seq: None,
            slot: Arc::new(CallSlot::resolved(Err(error))),
            _marker: PhantomData,
        }
    }

    /// Sequence number assigned to the call, if it was recorded
    pub fn seq(&self) -> Option<Seq> {
        self.seq
    }
}

impl<T> std::fmt::Debug for CallFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFuture").field("seq", &self.seq).finish()
    }
}

impl<T: DeserializeOwned> Future for CallFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.slot.take() {
            Some(Ok(value)) => {
                Poll::Ready(serde_json::from_value(value).map_err(WeftError::Serialization))
            }
            Some(Err(e)) => Poll::Ready(Err(e)),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;
    use serde_json::json;
    use weft_core::ErrorDetails;

    fn poll_once<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn test_pending_until_resolved() {
        let slot = Arc::new(CallSlot::default());
        let mut future: CallFuture<String> = CallFuture::pending(0, slot.clone());
        assert!(poll_once(&mut future).is_pending());

        slot.resolve(Ok(json!("R")));
        match poll_once(&mut future) {
            Poll::Ready(Ok(value)) => assert_eq!(value, "R"),
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_second_resolution_is_ignored() {
        let slot = Arc::new(CallSlot::default());
        slot.resolve(Ok(json!(1)));
        slot.resolve(Ok(json!(2)));
        let mut future: CallFuture<i64> = CallFuture::pending(3, slot);
        assert!(matches!(poll_once(&mut future), Poll::Ready(Ok(1))));
    }

    #[test]
    fn test_error_resolution() {
        let mut future: CallFuture<Value> = CallFuture::ready(
            1,
            Err(WeftError::TaskFailed(ErrorDetails::new("Boom", "it broke"))),
        );
        assert_eq!(future.seq(), Some(1));
        match poll_once(&mut future) {
            Poll::Ready(Err(WeftError::TaskFailed(details))) => assert_eq!(details.error, "Boom"),
            other => panic!("expected task failure, got {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch_is_serialization_error() {
        let mut future: CallFuture<u32> = CallFuture::ready(0, Ok(json!("not a number")));
        assert!(matches!(
            poll_once(&mut future),
            Poll::Ready(Err(WeftError::Serialization(_)))
        ));
    }

    #[test]
    fn test_failed_future_has_no_seq() {
        let mut future: CallFuture<()> = CallFuture::failed(WeftError::Halted("test".to_string()));
        assert_eq!(future.seq(), None);
        assert!(matches!(poll_once(&mut future), Poll::Ready(Err(WeftError::Halted(_)))));
    }

    #[test]
    fn test_unit_from_null() {
        let mut future: CallFuture<()> = CallFuture::ready(0, Ok(Value::Null));
        assert!(matches!(poll_once(&mut future), Poll::Ready(Ok(()))));
    }
}
