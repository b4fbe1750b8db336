//! Warm executors kept between batches.

use crate::worker::executor::WorkflowExecutor;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

struct CachedExecutor {
    executor: WorkflowExecutor,
    history_len: usize,
    last_used: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CachedExecutor>,
    tick: u64,
}

/// Least-recently-used cache of executors keyed by execution id.
///
/// An entry is only valid for the history length it was stored with; any
/// other length means another writer advanced the history, and the executor
/// is rebuilt by replay instead.
pub struct ExecutorCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl ExecutorCache {
    /// A capacity of 0 disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the executor for `execution_id` if it was stored at `history_len`
    pub fn take(&self, execution_id: &str, history_len: usize) -> Option<WorkflowExecutor> {
        let cached = self.inner.lock().entries.remove(execution_id)?;
        if cached.history_len != history_len {
            debug!(
                execution_id = %execution_id,
                cached_len = cached.history_len,
                history_len,
                "Discarding stale cached executor"
            );
            return None;
        }
        Some(cached.executor)
    }

    pub fn insert(&self, execution_id: &str, executor: WorkflowExecutor, history_len: usize) {
        if self.capacity == 0 || executor.is_halted() {
            return;
        }

        let mut inner = self.inner.lock();
        inner.tick += 1;
        let last_used = inner.tick;

        if !inner.entries.contains_key(execution_id) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(
            execution_id.to_string(),
            CachedExecutor {
                executor,
                history_len,
                last_used,
            },
        );
    }

    pub fn evict(&self, execution_id: &str) -> bool {
        self.inner.lock().entries.remove(execution_id).is_some()
    }
}

impl std::fmt::Debug for ExecutorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::registry::{BoxedWorkflowFn, RegisteredWorkflow, WorkflowMetadata};
    use std::sync::Arc;

    fn executor(id: &str) -> WorkflowExecutor {
        let execute_fn: BoxedWorkflowFn = Box::new(|_ctx, input| Box::pin(async move { Ok(input) }));
        let workflow = Arc::new(RegisteredWorkflow::new(WorkflowMetadata::new("wf"), execute_fn));
        WorkflowExecutor::new(id, workflow, vec![])
    }

    #[test]
    fn test_take_requires_matching_length() {
        let cache = ExecutorCache::new(4);
        cache.insert("wf/1", executor("wf/1"), 3);
        assert!(cache.take("wf/1", 5).is_none());
        // A stale entry is dropped on lookup
        assert!(cache.is_empty());

        cache.insert("wf/1", executor("wf/1"), 3);
        let taken = cache.take("wf/1", 3).unwrap();
        assert_eq!(taken.execution_id(), "wf/1");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = ExecutorCache::new(2);
        cache.insert("wf/1", executor("wf/1"), 1);
        cache.insert("wf/2", executor("wf/2"), 1);
        cache.insert("wf/3", executor("wf/3"), 1);

        assert_eq!(cache.len(), 2);
        assert!(cache.take("wf/1", 1).is_none());
        assert!(cache.take("wf/3", 1).is_some());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ExecutorCache::new(0);
        cache.insert("wf/1", executor("wf/1"), 1);
        assert!(cache.is_empty());
        assert!(!cache.evict("wf/1"));
    }
}
