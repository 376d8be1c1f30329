//! In-memory storage backend for tests and embedding.
//!
//! [`InMemoryStore`] keeps every record in a `BTreeMap` keyed by the rendered
//! path, so nested records sit right after their parent and a subtree is a
//! contiguous range. Every call is appended to an operation log, which tests
//! use to assert exactly which backend calls an engine operation produced.

use std::collections::BTreeMap;

use lifeline_path::{PathBuilder, PathKind};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::record::StoredRecord;
use crate::traits::{child_key, Storage};

/// One backend call recorded by [`InMemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Has(String),
    HasCollection(String),
    Save(String),
    Read(String),
    ReadChildren(String),
    Delete(String),
    DeleteAll(String),
    UpdateOrder(String, usize),
    UpdateId { from: String, to: String },
}

impl StoreOp {
    /// Returns `true` for calls that change stored data.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Save(_)
                | Self::Delete(_)
                | Self::DeleteAll(_)
                | Self::UpdateOrder(..)
                | Self::UpdateId { .. }
        )
    }
}

/// In-memory, `BTreeMap`-based implementation of [`Storage`].
///
/// Data is lost when the store is dropped.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, StoredRecord>>,
    ops: Mutex<Vec<StoreOp>>,
    fail_next_write: Mutex<Option<StoreError>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Record stored at the exact key, if any.
    pub fn get(&self, key: &str) -> Option<StoredRecord> {
        self.records.read().get(key).cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    /// Every call made so far, oldest first.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    /// Only the calls that changed stored data.
    pub fn writes(&self) -> Vec<StoreOp> {
        self.ops.lock().iter().filter(|op| op.is_write()).cloned().collect()
    }

    /// Drain and return the operation log.
    pub fn take_ops(&self) -> Vec<StoreOp> {
        std::mem::take(&mut *self.ops.lock())
    }

    /// Make the next data-changing call fail with `err`.
    pub fn fail_next_write(&self, err: StoreError) {
        *self.fail_next_write.lock() = Some(err);
    }

    fn log(&self, op: StoreOp) {
        self.ops.lock().push(op);
    }

    fn log_write(&self, op: StoreOp) -> StoreResult<()> {
        self.log(op);
        match self.fail_next_write.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Keys equal to `key` or nested below it.
    fn subtree(map: &BTreeMap<String, StoredRecord>, key: &str) -> Vec<String> {
        map.range(key.to_owned()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(key))
            .filter(|k| is_within(k, key))
            .cloned()
            .collect()
    }
}

/// `candidate` is `key` itself or a path nested below it.
fn is_within(candidate: &str, key: &str) -> bool {
    match candidate.strip_prefix(key) {
        Some("") => true,
        Some(rest) => rest.starts_with(['.', '/']),
        None => false,
    }
}

/// `candidate` is a direct `/` child of `key`; returns the child id.
fn direct_child<'a>(candidate: &'a str, key: &str) -> Option<&'a str> {
    let id = candidate.strip_prefix(key)?.strip_prefix('/')?;
    if id.is_empty() || id.contains(['.', '/']) {
        None
    } else {
        Some(id)
    }
}

impl Storage for InMemoryStore {
    fn has(&self, path: &PathBuilder) -> StoreResult<bool> {
        self.log(StoreOp::Has(path.to_string()));
        Ok(self.records.read().contains_key(path.as_str()))
    }

    fn has_collection(&self, path: &PathBuilder) -> StoreResult<bool> {
        self.log(StoreOp::HasCollection(path.to_string()));
        let key = path.as_str();
        let map = self.records.read();
        let found = map
            .range(key.to_owned()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(key))
            .any(|k| direct_child(k, key).is_some());
        Ok(found)
    }

    fn save(&self, path: &PathBuilder, record: &StoredRecord) -> StoreResult<()> {
        self.log_write(StoreOp::Save(path.to_string()))?;
        self.records
            .write()
            .insert(path.to_string(), record.clone());
        debug!(path = %path, "record saved");
        Ok(())
    }

    fn read(&self, path: &PathBuilder) -> StoreResult<Option<StoredRecord>> {
        self.log(StoreOp::Read(path.to_string()));
        Ok(self.records.read().get(path.as_str()).cloned())
    }

    fn delete(&self, path: &PathBuilder) -> StoreResult<()> {
        self.log_write(StoreOp::Delete(path.to_string()))?;
        let mut map = self.records.write();
        for key in Self::subtree(&map, path.as_str()) {
            map.remove(&key);
        }
        Ok(())
    }

    fn delete_all(&self, path: &PathBuilder) -> StoreResult<()> {
        self.log_write(StoreOp::DeleteAll(path.to_string()))?;
        let mut map = self.records.write();
        let removed = Self::subtree(&map, path.as_str());
        for key in &removed {
            map.remove(key);
        }
        debug!(path = %path, count = removed.len(), "collection cleared");
        Ok(())
    }

    fn read_children(&self, path: &PathBuilder) -> StoreResult<Vec<(String, StoredRecord)>> {
        self.log(StoreOp::ReadChildren(path.to_string()));
        let key = path.as_str();
        let map = self.records.read();
        let mut children: Vec<(String, StoredRecord)> = map
            .range(key.to_owned()..)
            .take_while(|(k, _)| k.starts_with(key))
            .filter_map(|(k, record)| {
                direct_child(k, key).map(|id| (id.to_owned(), record.clone()))
            })
            .collect();
        children.sort_by(|(a_id, a), (b_id, b)| {
            let a_order = a.order.unwrap_or(usize::MAX);
            let b_order = b.order.unwrap_or(usize::MAX);
            a_order.cmp(&b_order).then_with(|| compare_ids(a_id, b_id))
        });
        Ok(children)
    }

    fn update_order(&self, path: &PathBuilder, order: usize) -> StoreResult<()> {
        self.log_write(StoreOp::UpdateOrder(path.to_string(), order))?;
        let mut map = self.records.write();
        match map.get_mut(path.as_str()) {
            Some(record) => {
                record.order = Some(order);
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "no record at {path} to reorder"
            ))),
        }
    }

    fn update_id(
        &self,
        parent_path: &PathBuilder,
        kind: PathKind,
        old_id: &str,
        new_id: &str,
    ) -> StoreResult<()> {
        let from = child_key(parent_path.as_str(), kind, old_id);
        let to = child_key(parent_path.as_str(), kind, new_id);
        self.log_write(StoreOp::UpdateId {
            from: from.clone(),
            to: to.clone(),
        })?;
        let mut map = self.records.write();
        for key in Self::subtree(&map, &from) {
            if let Some(record) = map.remove(&key) {
                let moved = format!("{to}{}", &key[from.len()..]);
                map.insert(moved, record);
            }
        }
        Ok(())
    }

    fn export(&self) -> StoreResult<Vec<(String, StoredRecord)>> {
        Ok(self
            .records
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn import(&self, records: Vec<(String, StoredRecord)>) -> StoreResult<()> {
        let mut map = self.records.write();
        map.clear();
        map.extend(records);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("record_count", &self.len())
            .field("op_count", &self.ops.lock().len())
            .finish()
    }
}

/// Numeric ids compare as numbers and sort before every other id.
fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
