//! Versioned, keyed entity storage with optimistic concurrency.
//!
//! Every record is addressed by an entity name plus an [`EntityKey`] and
//! carries a `version` counter. An absent record has version 0. Writers pass
//! the version they last observed as `expected_version`; a mismatch fails the
//! write with [`UnexpectedVersion`] and leaves the store untouched.
//!
//! Cross-key atomicity is only available through
//! [`EntityStore::transact_write`]: all conditions are evaluated against one
//! snapshot and either every item is applied or none is.
//!
//! Backends must provide an atomic compare-and-write primitive; this module
//! does not build atomicity on top of a non-atomic store.

mod memory;

pub use memory::InMemoryEntityStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ErrorDetails;

/// Result type for entity store operations
pub type EntityResult<T> = std::result::Result<T, EntityError>;

/// Partition key plus optional sort key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub partition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

impl EntityKey {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    pub fn with_sort(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: Some(sort.into()),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sort {
            Some(sort) => write!(f, "{}#{}", self.partition, sort),
            None => write!(f, "{}", self.partition),
        }
    }
}

/// A stored value and its version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityWithMetadata {
    pub value: Value,
    pub version: u64,
}

fn default_increment_version() -> bool {
    true
}

/// Options for [`EntityStore::put`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
    #[serde(default = "default_increment_version")]
    pub increment_version: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            expected_version: None,
            increment_version: true,
        }
    }
}

impl PutOptions {
    pub fn expect_version(version: u64) -> Self {
        Self {
            expected_version: Some(version),
            ..Self::default()
        }
    }
}

/// Options for [`EntityStore::delete`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

/// Outcome of a successful put
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    pub version: u64,
}

/// One item of a [`EntityStore::transact_write`] batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all_fields = "camelCase")]
pub enum TransactItem {
    Put {
        entity: String,
        key: EntityKey,
        value: Value,
        #[serde(default)]
        options: PutOptions,
    },
    Delete {
        entity: String,
        key: EntityKey,
        #[serde(default)]
        options: DeleteOptions,
    },
    /// Version check without a write
    Condition {
        entity: String,
        key: EntityKey,
        expected_version: u64,
    },
}

impl TransactItem {
    pub fn entity(&self) -> &str {
        match self {
            Self::Put { entity, .. } | Self::Delete { entity, .. } | Self::Condition { entity, .. } => {
                entity
            }
        }
    }

    pub fn key(&self) -> &EntityKey {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } | Self::Condition { key, .. } => key,
        }
    }

    pub fn expected_version(&self) -> Option<u64> {
        match self {
            Self::Put { options, .. } => options.expected_version,
            Self::Delete { options, .. } => options.expected_version,
            Self::Condition {
                expected_version, ..
            } => Some(*expected_version),
        }
    }
}

/// Condition on the sort key of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all_fields = "camelCase")]
pub enum SortKeyCondition {
    Equals { value: String },
    BeginsWith { prefix: String },
    Between { low: String, high: String },
    GreaterThan { value: String },
    GreaterThanOrEqual { value: String },
    LessThan { value: String },
    LessThanOrEqual { value: String },
}

impl SortKeyCondition {
    /// Records without a sort key never match a condition
    pub fn matches(&self, sort: Option<&str>) -> bool {
        let Some(sort) = sort else {
            return false;
        };
        match self {
            Self::Equals { value } => sort == value,
            Self::BeginsWith { prefix } => sort.starts_with(prefix.as_str()),
            Self::Between { low, high } => sort >= low.as_str() && sort <= high.as_str(),
            Self::GreaterThan { value } => sort > value.as_str(),
            Self::GreaterThanOrEqual { value } => sort >= value.as_str(),
            Self::LessThan { value } => sort < value.as_str(),
            Self::LessThanOrEqual { value } => sort <= value.as_str(),
        }
    }
}

/// Query over one partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub partition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<SortKeyCondition>,
    /// Page size; `None` or 0 returns every match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Opaque continuation token from a previous page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl QueryRequest {
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            ..Self::default()
        }
    }

    pub fn with_sort_key(mut self, condition: SortKeyCondition) -> Self {
        self.sort_key = Some(condition);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_next_token(mut self, token: Option<String>) -> Self {
        self.next_token = token;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEntry {
    pub key: EntityKey,
    pub value: Value,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub entries: Vec<QueryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// An entity store request issued from workflow code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all_fields = "camelCase")]
pub enum EntityOperation {
    Get {
        entity: String,
        key: EntityKey,
    },
    GetWithMetadata {
        entity: String,
        key: EntityKey,
    },
    Put {
        entity: String,
        key: EntityKey,
        value: Value,
        #[serde(default)]
        options: PutOptions,
    },
    Delete {
        entity: String,
        key: EntityKey,
        #[serde(default)]
        options: DeleteOptions,
    },
    TransactWrite {
        items: Vec<TransactItem>,
    },
    Query {
        entity: String,
        request: QueryRequest,
    },
}

/// Expected/actual pair of a failed version check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnexpectedVersion {
    pub expected: u64,
    pub actual: u64,
}

impl std::fmt::Display for UnexpectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected version {}, found {}", self.expected, self.actual)
    }
}

/// Errors returned by entity stores
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// The record's version did not match `expected_version`
    #[error("Unexpected version: {0}")]
    UnexpectedVersion(UnexpectedVersion),

    /// At least one condition of a transaction failed; nothing was applied.
    /// `reasons` has one slot per item.
    #[error("Transaction cancelled: {} of {} conditions failed", failed_conditions(.reasons), .reasons.len())]
    TransactionCancelled { reasons: Vec<Option<UnexpectedVersion>> },

    /// The same key appears more than once in one transaction
    #[error("Duplicate item in transaction: {entity} {key}")]
    DuplicateItem { entity: String, key: EntityKey },

    /// The continuation token could not be decoded
    #[error("Invalid continuation token: {0}")]
    InvalidToken(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure of the backing store
    #[error("Entity store backend error: {0}")]
    Backend(String),
}

fn failed_conditions(reasons: &[Option<UnexpectedVersion>]) -> usize {
    reasons.iter().filter(|reason| reason.is_some()).count()
}

impl EntityError {
    /// Stable error name used in normalized error details
    pub fn name(&self) -> &'static str {
        match self {
            Self::UnexpectedVersion(_) => "UnexpectedVersion",
            Self::TransactionCancelled { .. } => "TransactionCancelled",
            Self::DuplicateItem { .. } => "DuplicateItem",
            Self::InvalidToken(_) => "InvalidToken",
            Self::Serialization(_) => "SerializationError",
            Self::Backend(_) => "EntityStoreError",
        }
    }

    /// Whether a fresh read-modify-write may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedVersion(_) | Self::TransactionCancelled { .. }
        )
    }

    pub fn to_details(&self) -> ErrorDetails {
        ErrorDetails::new(self.name(), self.to_string())
    }
}

/// Versioned keyed store.
///
/// Implementations must be linearizable per key, and `transact_write` must be
/// atomic across every item it names.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Current value, if present
    async fn get(&self, entity: &str, key: &EntityKey) -> EntityResult<Option<Value>> {
        Ok(self
            .get_with_metadata(entity, key)
            .await?
            .map(|record| record.value))
    }

    /// Current value and version, if present
    async fn get_with_metadata(
        &self,
        entity: &str,
        key: &EntityKey,
    ) -> EntityResult<Option<EntityWithMetadata>>;

    /// Write a value, guarded by `options.expected_version`
    async fn put(
        &self,
        entity: &str,
        key: &EntityKey,
        value: Value,
        options: PutOptions,
    ) -> EntityResult<PutResult>;

    /// Delete a value, guarded by `options.expected_version`
    async fn delete(&self, entity: &str, key: &EntityKey, options: DeleteOptions)
        -> EntityResult<()>;

    /// Apply every item or none of them
    async fn transact_write(&self, items: Vec<TransactItem>) -> EntityResult<()>;

    /// Records of one partition ordered by sort key
    async fn query(&self, entity: &str, request: QueryRequest) -> EntityResult<QueryResult>;
}

/// Run an [`EntityOperation`] against a store and encode its outcome as JSON.
///
/// Reads of absent records yield `null`; puts yield `{"version": n}`.
pub async fn execute_operation(
    store: &dyn EntityStore,
    operation: &EntityOperation,
) -> EntityResult<Value> {
    match operation {
        EntityOperation::Get { entity, key } => {
            Ok(store.get(entity, key).await?.unwrap_or(Value::Null))
        }
        EntityOperation::GetWithMetadata { entity, key } => {
            match store.get_with_metadata(entity, key).await? {
                Some(record) => Ok(serde_json::to_value(record)?),
                None => Ok(Value::Null),
            }
        }
        EntityOperation::Put {
            entity,
            key,
            value,
            options,
        } => {
            let result = store.put(entity, key, value.clone(), options.clone()).await?;
            Ok(json!({ "version": result.version }))
        }
        EntityOperation::Delete {
            entity,
            key,
            options,
        } => {
            store.delete(entity, key, options.clone()).await?;
            Ok(Value::Null)
        }
        EntityOperation::TransactWrite { items } => {
            store.transact_write(items.clone()).await?;
            Ok(Value::Null)
        }
        EntityOperation::Query { entity, request } => {
            let result = store.query(entity, request.clone()).await?;
            Ok(serde_json::to_value(result)?)
        }
    }
}
