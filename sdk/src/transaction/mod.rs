//! Transactions - named read-modify-write functions over the entity store
//!
//! A transaction function reads and writes entities through a
//! [`TransactionContext`]. Reads record the version they observed and writes
//! are buffered; on return, everything is committed with one
//! `transact_write` in which every touched key is conditioned on its observed
//! version. A conflict at commit re-runs the function from scratch.

use crate::call_executor::TransactionClient;
use crate::config::TransactionConfig;
use crate::error::{Result, WeftError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use weft_core::{DeleteOptions, EntityKey, EntityStore, PutOptions, TransactItem};

/// Boxed transaction function
pub type BoxedTransactionFn =
    Box<dyn Fn(TransactionContext, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Registry of transaction functions, keyed by name
#[derive(Default)]
pub struct TransactionRegistry {
    transactions: RwLock<HashMap<String, Arc<BoxedTransactionFn>>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transaction over raw JSON input and output
    pub fn register<F, Fut>(&self, name: &str, transaction: F) -> Result<()>
    where
        F: Fn(TransactionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut transactions = self.transactions.write();
        if transactions.contains_key(name) {
            return Err(WeftError::InvalidConfiguration(format!(
                "Transaction '{}' is already registered",
                name
            )));
        }
        let boxed: BoxedTransactionFn = Box::new(move |ctx, input| Box::pin(transaction(ctx, input)));
        transactions.insert(name.to_string(), Arc::new(boxed));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoxedTransactionFn>> {
        self.transactions.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.transactions.read().contains_key(name)
    }
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.transactions.read().keys().cloned().collect();
        f.debug_struct("TransactionRegistry")
            .field("transactions", &names)
            .finish()
    }
}

// ============================================================================
// TransactionContext
// ============================================================================

type TouchedKey = (String, EntityKey);

enum BufferedWrite {
    Put(Value),
    Delete,
}

#[derive(Default)]
struct TransactionState {
    /// Version seen when each key was first touched (0 = absent)
    observed: BTreeMap<TouchedKey, u64>,
    writes: BTreeMap<TouchedKey, BufferedWrite>,
}

/// Entity access inside one attempt of a transaction
#[derive(Clone)]
pub struct TransactionContext {
    store: Arc<dyn EntityStore>,
    state: Arc<Mutex<TransactionState>>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionContext")
            .field("touched", &state.observed.len())
            .field("writes", &state.writes.len())
            .finish()
    }
}

impl TransactionContext {
    fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(TransactionState::default())),
        }
    }

    /// Read a value, seeing this transaction's own buffered writes
    pub async fn get<T: DeserializeOwned>(&self, entity: &str, key: &EntityKey) -> Result<Option<T>> {
        let touched = (entity.to_string(), key.clone());
        {
            let state = self.state.lock();
            match state.writes.get(&touched) {
                Some(BufferedWrite::Put(value)) => return Ok(Some(serde_json::from_value(value.clone())?)),
                Some(BufferedWrite::Delete) => return Ok(None),
                None => {}
            }
        }

        let record = self.store.get_with_metadata(entity, key).await?;
        let version = record.as_ref().map(|r| r.version).unwrap_or(0);
        self.state.lock().observed.entry(touched).or_insert(version);
        match record {
            Some(record) => Ok(Some(serde_json::from_value(record.value)?)),
            None => Ok(None),
        }
    }

    /// Buffer a write, committed when the transaction function returns
    pub async fn put<T: Serialize + ?Sized>(&self, entity: &str, key: &EntityKey, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.observe(entity, key).await?;
        self.state
            .lock()
            .writes
            .insert((entity.to_string(), key.clone()), BufferedWrite::Put(value));
        Ok(())
    }

    /// Buffer a delete
    pub async fn delete(&self, entity: &str, key: &EntityKey) -> Result<()> {
        self.observe(entity, key).await?;
        self.state
            .lock()
            .writes
            .insert((entity.to_string(), key.clone()), BufferedWrite::Delete);
        Ok(())
    }

    async fn observe(&self, entity: &str, key: &EntityKey) -> Result<()> {
        let touched = (entity.to_string(), key.clone());
        if self.state.lock().observed.contains_key(&touched) {
            return Ok(());
        }
        let version = self
            .store
            .get_with_metadata(entity, key)
            .await?
            .map(|record| record.version)
            .unwrap_or(0);
        self.state.lock().observed.entry(touched).or_insert(version);
        Ok(())
    }

    /// One item per touched key, each conditioned on its observed version
    fn commit_items(&self) -> Vec<TransactItem> {
        let mut state = self.state.lock();
        let mut writes = std::mem::take(&mut state.writes);
        state
            .observed
            .iter()
            .map(|((entity, key), version)| {
                let entity = entity.clone();
                let key = key.clone();
                match writes.remove(&(entity.clone(), key.clone())) {
                    Some(BufferedWrite::Put(value)) => TransactItem::Put {
                        entity,
                        key,
                        value,
                        options: PutOptions::expect_version(*version),
                    },
                    Some(BufferedWrite::Delete) => TransactItem::Delete {
                        entity,
                        key,
                        options: DeleteOptions {
                            expected_version: Some(*version),
                        },
                    },
                    None => TransactItem::Condition {
                        entity,
                        key,
                        expected_version: *version,
                    },
                }
            })
            .collect()
    }

    fn has_writes(&self) -> bool {
        !self.state.lock().writes.is_empty()
    }
}

// ============================================================================
// LocalTransactionClient
// ============================================================================

/// Runs registered transactions in-process against an entity store
pub struct LocalTransactionClient {
    registry: Arc<TransactionRegistry>,
    store: Arc<dyn EntityStore>,
    config: TransactionConfig,
}

impl LocalTransactionClient {
    pub fn new(
        registry: Arc<TransactionRegistry>,
        store: Arc<dyn EntityStore>,
        config: TransactionConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }
}

impl std::fmt::Debug for LocalTransactionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransactionClient")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl TransactionClient for LocalTransactionClient {
    async fn execute_transaction(&self, name: &str, input: Value) -> Result<Value> {
        let transaction = self
            .registry
            .get(name)
            .ok_or_else(|| WeftError::TransactionNotFound(name.to_string()))?;

        let mut attempt = 0;
        loop {
            let ctx = TransactionContext::new(self.store.clone());
            let output = (**transaction)(ctx.clone(), input.clone()).await?;
            if !ctx.has_writes() {
                return Ok(output);
            }

            match self.store.transact_write(ctx.commit_items()).await {
                Ok(()) => return Ok(output),
                Err(e) if e.is_conflict() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(transaction = name, attempt, "Transaction conflicted, retrying");
                }
                Err(e) => {
                    warn!(transaction = name, attempt, error = %e, "Transaction failed");
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use weft_core::InMemoryEntityStore;

    fn transfer_registry() -> Arc<TransactionRegistry> {
        let registry = TransactionRegistry::new();
        registry
            .register("transfer", |ctx, input| async move {
                let amount = input["amount"].as_i64().unwrap_or(0);
                let from = EntityKey::new("alice");
                let to = EntityKey::new("bob");
                let from_balance: i64 = ctx.get("account", &from).await?.unwrap_or(0);
                if from_balance < amount {
                    return Err(WeftError::application("InsufficientFunds", "balance too low"));
                }
                let to_balance: i64 = ctx.get("account", &to).await?.unwrap_or(0);
                ctx.put("account", &from, &(from_balance - amount)).await?;
                ctx.put("account", &to, &(to_balance + amount)).await?;
                Ok(json!({"from": from_balance - amount}))
            })
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_transfer_commits_atomically() {
        let store = Arc::new(InMemoryEntityStore::new());
        store
            .put("account", &EntityKey::new("alice"), json!(100), PutOptions::default())
            .await
            .unwrap();
        let client = LocalTransactionClient::new(transfer_registry(), store.clone(), TransactionConfig::DEFAULT);

        let output = client
            .execute_transaction("transfer", json!({"amount": 30}))
            .await
            .unwrap();
        assert_eq!(output, json!({"from": 70}));

        let alice = store.get("account", &EntityKey::new("alice")).await.unwrap();
        let bob = store.get_with_metadata("account", &EntityKey::new("bob")).await.unwrap().unwrap();
        assert_eq!(alice, Some(json!(70)));
        assert_eq!(bob.value, json!(30));
        assert_eq!(bob.version, 1);
    }

    #[tokio::test]
    async fn test_application_error_writes_nothing() {
        let store = Arc::new(InMemoryEntityStore::new());
        let client = LocalTransactionClient::new(transfer_registry(), store.clone(), TransactionConfig::DEFAULT);

        let err = client
            .execute_transaction("transfer", json!({"amount": 30}))
            .await
            .unwrap_err();
        assert_eq!(err.to_details().error, "InsufficientFunds");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let client = LocalTransactionClient::new(
            Arc::new(TransactionRegistry::new()),
            Arc::new(InMemoryEntityStore::new()),
            TransactionConfig::DEFAULT,
        );
        assert!(matches!(
            client.execute_transaction("missing", json!({})).await,
            Err(WeftError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let store: Arc<InMemoryEntityStore> = Arc::new(InMemoryEntityStore::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let registry = TransactionRegistry::new();
        {
            let store = store.clone();
            let attempts = attempts.clone();
            registry
                .register("increment", move |ctx, _input| {
                    let store = store.clone();
                    let attempts = attempts.clone();
                    async move {
                        let key = EntityKey::new("counter");
                        let current: i64 = ctx.get("counter", &key).await?.unwrap_or(0);
                        // A concurrent writer sneaks in during the first attempt
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            store
                                .put("counter", &key, json!(10), PutOptions::default())
                                .await?;
                        }
                        ctx.put("counter", &key, &(current + 1)).await?;
                        Ok(json!(current + 1))
                    }
                })
                .unwrap();
        }
        let client = LocalTransactionClient::new(Arc::new(registry), store.clone(), TransactionConfig::DEFAULT);

        let output = client.execute_transaction("increment", json!({})).await.unwrap();
        assert_eq!(output, json!(11));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_conflict_without_retries_fails() {
        let store: Arc<InMemoryEntityStore> = Arc::new(InMemoryEntityStore::new());
        let registry = TransactionRegistry::new();
        {
            let store = store.clone();
            registry
                .register("clobbered", move |ctx, _input| {
                    let store = store.clone();
                    async move {
                        let key = EntityKey::new("k");
                        let _: Option<Value> = ctx.get("doc", &key).await?;
                        store.put("doc", &key, json!("other"), PutOptions::default()).await?;
                        ctx.put("doc", &key, &json!("mine")).await?;
                        Ok(Value::Null)
                    }
                })
                .unwrap();
        }
        let client = LocalTransactionClient::new(Arc::new(registry), store.clone(), TransactionConfig::NO_RETRY);

        let err = client.execute_transaction("clobbered", json!({})).await.unwrap_err();
        assert_eq!(err.to_details().error, "TransactionCancelled");
        assert_eq!(
            store.get("doc", &EntityKey::new("k")).await.unwrap(),
            Some(json!("other"))
        );
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = TransactionRegistry::new();
        registry.register("t", |_ctx, input| async move { Ok(input) }).unwrap();
        assert!(registry.register("t", |_ctx, input| async move { Ok(input) }).is_err());
        assert!(registry.has("t"));
    }
}
