//! In-memory entity store.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{
    DeleteOptions, EntityError, EntityKey, EntityResult, EntityStore, EntityWithMetadata,
    PutOptions, PutResult, QueryEntry, QueryRequest, QueryResult, TransactItem, UnexpectedVersion,
};

type RecordKey = (String, EntityKey);

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Value,
    version: u64,
}

/// Entity store backed by a `BTreeMap` behind one mutex.
///
/// Holding the lock across check and write makes every operation, including
/// multi-item transactions, a single atomic step.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    records: Mutex<BTreeMap<RecordKey, StoredRecord>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all entities
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

fn record_key(entity: &str, key: &EntityKey) -> RecordKey {
    (entity.to_string(), key.clone())
}

fn current_version(records: &BTreeMap<RecordKey, StoredRecord>, key: &RecordKey) -> u64 {
    records.get(key).map(|record| record.version).unwrap_or(0)
}

fn check_version(expected: Option<u64>, actual: u64) -> Option<UnexpectedVersion> {
    match expected {
        Some(expected) if expected != actual => Some(UnexpectedVersion { expected, actual }),
        _ => None,
    }
}

fn write_record(
    records: &mut BTreeMap<RecordKey, StoredRecord>,
    key: RecordKey,
    value: Value,
    increment_version: bool,
) -> u64 {
    let current = current_version(records, &key);
    let version = if increment_version {
        current + 1
    } else {
        current
    };
    records.insert(key, StoredRecord { value, version });
    version
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_with_metadata(
        &self,
        entity: &str,
        key: &EntityKey,
    ) -> EntityResult<Option<EntityWithMetadata>> {
        let records = self.records.lock();
        Ok(records
            .get(&record_key(entity, key))
            .map(|record| EntityWithMetadata {
                value: record.value.clone(),
                version: record.version,
            }))
    }

    async fn put(
        &self,
        entity: &str,
        key: &EntityKey,
        value: Value,
        options: PutOptions,
    ) -> EntityResult<PutResult> {
        let mut records = self.records.lock();
        let key = record_key(entity, key);
        let actual = current_version(&records, &key);
        if let Some(mismatch) = check_version(options.expected_version, actual) {
            debug!(entity = %key.0, expected = mismatch.expected, actual, "Put rejected");
            return Err(EntityError::UnexpectedVersion(mismatch));
        }
        let version = write_record(&mut records, key, value, options.increment_version);
        Ok(PutResult { version })
    }

    async fn delete(
        &self,
        entity: &str,
        key: &EntityKey,
        options: DeleteOptions,
    ) -> EntityResult<()> {
        let mut records = self.records.lock();
        let key = record_key(entity, key);
        let actual = current_version(&records, &key);
        if let Some(mismatch) = check_version(options.expected_version, actual) {
            return Err(EntityError::UnexpectedVersion(mismatch));
        }
        records.remove(&key);
        Ok(())
    }

    async fn transact_write(&self, items: Vec<TransactItem>) -> EntityResult<()> {
        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(record_key(item.entity(), item.key())) {
                return Err(EntityError::DuplicateItem {
                    entity: item.entity().to_string(),
                    key: item.key().clone(),
                });
            }
        }

        let mut records = self.records.lock();
        let reasons: Vec<Option<UnexpectedVersion>> = items
            .iter()
            .map(|item| {
                let actual = current_version(&records, &record_key(item.entity(), item.key()));
                check_version(item.expected_version(), actual)
            })
            .collect();
        if reasons.iter().any(Option::is_some) {
            debug!(items = reasons.len(), "Transaction cancelled on stale condition");
            return Err(EntityError::TransactionCancelled { reasons });
        }

        for item in items {
            match item {
                TransactItem::Put {
                    entity,
                    key,
                    value,
                    options,
                } => {
                    write_record(
                        &mut records,
                        (entity, key),
                        value,
                        options.increment_version,
                    );
                }
                TransactItem::Delete { entity, key, .. } => {
                    records.remove(&(entity, key));
                }
                TransactItem::Condition { .. } => {}
            }
        }
        Ok(())
    }

    async fn query(&self, entity: &str, request: QueryRequest) -> EntityResult<QueryResult> {
        let start_after: Option<Option<String>> = match &request.next_token {
            Some(token) => Some(
                serde_json::from_str(token)
                    .map_err(|_| EntityError::InvalidToken(token.clone()))?,
            ),
            None => None,
        };

        let records = self.records.lock();
        let mut entries: Vec<QueryEntry> = records
            .iter()
            .filter(|((name, key), _)| name == entity && key.partition == request.partition)
            .filter(|((_, key), _)| match &request.sort_key {
                Some(condition) => condition.matches(key.sort.as_deref()),
                None => true,
            })
            .filter(|((_, key), _)| match &start_after {
                Some(after) => key.sort > *after,
                None => true,
            })
            .map(|((_, key), record)| QueryEntry {
                key: key.clone(),
                value: record.value.clone(),
                version: record.version,
            })
            .collect();

        // A zero limit means unbounded
        let limit = request.limit.filter(|limit| *limit > 0);
        let has_more = limit.is_some_and(|limit| entries.len() > limit);
        if let Some(limit) = limit {
            entries.truncate(limit);
        }

        let next_token = match entries.last() {
            Some(last) if has_more => Some(serde_json::to_string(&last.key.sort)?),
            _ => None,
        };
        Ok(QueryResult {
            entries,
            next_token,
        })
    }
}
