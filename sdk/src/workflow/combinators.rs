//! Combinator functions for parallel workflow execution
//!
//! Calls are recorded when they are issued, so creating several futures and
//! combining them runs the calls in parallel. Results are always reported in
//! input order (or with their input index), never in arrival order, which
//! keeps workflow code deterministic under replay.
//!
//! # Example
//!
//! ```ignore
//! use weft_sdk::workflow::combinators::{join_all, select};
//!
//! // Run multiple tasks in parallel and wait for all
//! let results = join_all(vec![
//!     ctx.task_raw("task-a", json!({})),
//!     ctx.task_raw("task-b", json!({})),
//! ]).await?;
//!
//! // Race a task against a timer
//! let outcome = with_timeout(
//!     ctx.task_raw("slow-task", json!({})),
//!     ctx.sleep(Duration::from_secs(30)),
//! ).await;
//! ```

use crate::error::{Result, WeftError};
use crate::workflow::future::CallFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

// ============================================================================
// JoinAll - Wait for all futures to complete
// ============================================================================

/// Future that waits for all inner futures to complete.
///
/// Created by [`join_all`]. Returns `Ok(Vec<T>)` if all futures succeed,
/// or `Err` with the first error observed.
pub struct JoinAll<F, T>
where
    F: Future<Output = Result<T>>,
{
    futures: Vec<Option<F>>,
    results: Vec<Option<T>>,
}

impl<F, T> Unpin for JoinAll<F, T> where F: Future<Output = Result<T>> + Unpin {}

impl<F, T> Future for JoinAll<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Result<Vec<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_done = true;

        for (slot, result) in this.futures.iter_mut().zip(this.results.iter_mut()) {
            let Some(future) = slot else { continue };
            match Pin::new(future).poll(cx) {
                Poll::Ready(Ok(value)) => {
                    *result = Some(value);
                    *slot = None;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => all_done = false,
            }
        }

        if !all_done {
            return Poll::Pending;
        }
        let results: Option<Vec<T>> = this.results.iter_mut().map(Option::take).collect();
        match results {
            Some(results) => Poll::Ready(Ok(results)),
            None => Poll::Ready(Err(WeftError::Other(
                "join_all polled after completion".to_string(),
            ))),
        }
    }
}

/// Wait for all futures to complete, returning their results in input order.
pub fn join_all<F, T>(futures: Vec<F>) -> JoinAll<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    let len = futures.len();
    JoinAll {
        futures: futures.into_iter().map(Some).collect(),
        results: (0..len).map(|_| None).collect(),
    }
}

// ============================================================================
// JoinAllSettled - Wait for every outcome
// ============================================================================

/// Future that waits for every inner future and keeps each outcome.
///
/// Created by [`join_all_settled`].
pub struct JoinAllSettled<F, T>
where
    F: Future<Output = Result<T>>,
{
    futures: Vec<Option<F>>,
    outcomes: Vec<Option<Result<T>>>,
}

impl<F, T> Unpin for JoinAllSettled<F, T> where F: Future<Output = Result<T>> + Unpin {}

impl<F, T> Future for JoinAllSettled<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Vec<Result<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_done = true;

        for (slot, outcome) in this.futures.iter_mut().zip(this.outcomes.iter_mut()) {
            let Some(future) = slot else { continue };
            match Pin::new(future).poll(cx) {
                Poll::Ready(result) => {
                    *outcome = Some(result);
                    *slot = None;
                }
                Poll::Pending => all_done = false,
            }
        }

        if !all_done {
            return Poll::Pending;
        }
        Poll::Ready(
            this.outcomes
                .iter_mut()
                .map(|outcome| {
                    outcome.take().unwrap_or_else(|| {
                        Err(WeftError::Other(
                            "join_all_settled polled after completion".to_string(),
                        ))
                    })
                })
                .collect(),
        )
    }
}

/// Wait for all futures, returning every outcome (success or failure) in
/// input order. Never short-circuits.
pub fn join_all_settled<F, T>(futures: Vec<F>) -> JoinAllSettled<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    let len = futures.len();
    JoinAllSettled {
        futures: futures.into_iter().map(Some).collect(),
        outcomes: (0..len).map(|_| None).collect(),
    }
}

// ============================================================================
// Select - Wait for first future to complete
// ============================================================================

/// Future that waits for the first inner future to complete.
///
/// Created by [`select`]. Losing calls are not cancelled; their completions
/// are discarded when they arrive.
pub struct Select<F, T>
where
    F: Future<Output = Result<T>>,
{
    futures: Vec<Option<F>>,
}

impl<F, T> Unpin for Select<F, T> where F: Future<Output = Result<T>> + Unpin {}

impl<F, T> Future for Select<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Result<(usize, T)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        // Lowest index wins when several are ready in the same poll
        for (i, slot) in this.futures.iter_mut().enumerate() {
            let Some(future) = slot else { continue };
            if let Poll::Ready(result) = Pin::new(future).poll(cx) {
                *slot = None;
                return Poll::Ready(result.map(|value| (i, value)));
            }
        }

        Poll::Pending
    }
}

/// Wait for the first future to complete, returning its index and result.
///
/// Fails with the error of the first future to complete if that one failed.
pub fn select<F, T>(futures: Vec<F>) -> Select<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    Select {
        futures: futures.into_iter().map(Some).collect(),
    }
}

// ============================================================================
// JoinN - Wait for N futures to complete
// ============================================================================

/// Future that waits for N inner futures to complete.
///
/// Created by [`join_n`].
pub struct JoinN<F, T>
where
    F: Future<Output = Result<T>>,
{
    futures: Vec<Option<F>>,
    results: Vec<(usize, T)>,
    n: usize,
}

impl<F, T> Unpin for JoinN<F, T> where F: Future<Output = Result<T>> + Unpin {}

impl<F, T> Future for JoinN<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Result<Vec<(usize, T)>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        for (i, slot) in this.futures.iter_mut().enumerate() {
            if this.results.len() >= this.n {
                break;
            }
            let Some(future) = slot else { continue };
            match Pin::new(future).poll(cx) {
                Poll::Ready(Ok(value)) => {
                    *slot = None;
                    this.results.push((i, value));
                }
                Poll::Ready(Err(e)) => {
                    *slot = None;
                    return Poll::Ready(Err(e));
                }
                Poll::Pending => {}
            }
        }

        if this.results.len() >= this.n {
            Poll::Ready(Ok(std::mem::take(&mut this.results)))
        } else {
            Poll::Pending
        }
    }
}

/// Wait for N futures to complete, returning their indices and results.
///
/// `n` is capped at the number of futures.
pub fn join_n<F, T>(futures: Vec<F>, n: usize) -> JoinN<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    let n = n.min(futures.len());
    JoinN {
        futures: futures.into_iter().map(Some).collect(),
        results: Vec::with_capacity(n),
        n,
    }
}

// ============================================================================
// WithTimeout - Race a future against a durable timer
// ============================================================================

/// Future that races another future against a timer.
///
/// Created by [`with_timeout`].
pub struct WithTimeout<F, T>
where
    F: Future<Output = Result<T>>,
{
    inner: F,
    timer: Option<CallFuture<()>>,
}

impl<F, T> Unpin for WithTimeout<F, T> where F: Future<Output = Result<T>> + Unpin {}

impl<F, T> Future for WithTimeout<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(result) = Pin::new(&mut this.inner).poll(cx) {
            return Poll::Ready(result);
        }

        if let Some(timer) = this.timer.as_mut() {
            match Pin::new(timer).poll(cx) {
                Poll::Ready(Ok(())) => {
                    this.timer = None;
                    return Poll::Ready(Err(WeftError::Timeout(
                        "Operation timed out".to_string(),
                    )));
                }
                Poll::Ready(Err(e)) => {
                    this.timer = None;
                    return Poll::Ready(Err(e));
                }
                Poll::Pending => {}
            }
        }

        Poll::Pending
    }
}

/// Race `future` against `timer` (from [`WorkflowContext::sleep`]).
///
/// Returns the inner result if it completes first, or
/// [`WeftError::Timeout`] if the timer fires first. The inner call is not
/// cancelled; its late completion is discarded.
///
/// [`WorkflowContext::sleep`]: crate::workflow::context::WorkflowContext::sleep
pub fn with_timeout<F, T>(future: F, timer: CallFuture<()>) -> WithTimeout<F, T>
where
    F: Future<Output = Result<T>> + Unpin,
{
    WithTimeout {
        inner: future,
        timer: Some(timer),
    }
}
