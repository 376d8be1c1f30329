use lifeline_path::{PathBuilder, PathKind};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::record::StoredRecord;

/// Key-addressed storage collaborator.
///
/// Every call is keyed by the rendered text of a [`PathBuilder`]. The path is
/// passed whole so that backends can inspect individual segments when they
/// lay records out (one file per root, one table per collection, ...).
///
/// All implementations must satisfy these invariants:
/// - `save` overwrites whatever lived at the path.
/// - `delete` removes the record at the path and every record nested below it.
/// - `read_children` returns only direct `/` children of the path, sorted by
///   their order marker (records without one last), then by id (numeric
///   ids first, compared as numbers).
/// - Backend failures are returned, never swallowed.
pub trait Storage: Send + Sync {
    /// Returns `true` if a record exists at `path`.
    fn has(&self, path: &PathBuilder) -> StoreResult<bool>;

    /// Returns `true` if any element record exists below `path`.
    fn has_collection(&self, path: &PathBuilder) -> StoreResult<bool>;

    /// Write a record at `path`.
    fn save(&self, path: &PathBuilder, record: &StoredRecord) -> StoreResult<()>;

    /// Read the record at `path`. Returns `Ok(None)` if nothing is stored.
    fn read(&self, path: &PathBuilder) -> StoreResult<Option<StoredRecord>>;

    /// Delete the record at `path` together with its nested records.
    fn delete(&self, path: &PathBuilder) -> StoreResult<()>;

    /// Delete every element of the collection at `path`, and its blob.
    fn delete_all(&self, path: &PathBuilder) -> StoreResult<()>;

    /// Read every element saved separately below `path`, as `(id, record)`.
    fn read_children(&self, path: &PathBuilder) -> StoreResult<Vec<(String, StoredRecord)>>;

    /// Rewrite only the order marker of the record at `path`.
    fn update_order(&self, path: &PathBuilder, order: usize) -> StoreResult<()>;

    /// Move the record reached from `parent_path` by `kind` and `old_id` (and
    /// everything nested below it) to `new_id`.
    fn update_id(
        &self,
        parent_path: &PathBuilder,
        kind: PathKind,
        old_id: &str,
        new_id: &str,
    ) -> StoreResult<()>;

    /// Write a growable list as one blob.
    ///
    /// Default implementation stores a JSON array through `save()`.
    fn save_list(&self, path: &PathBuilder, items: &[Value]) -> StoreResult<()> {
        self.save(path, &StoredRecord::new(Value::Array(items.to_vec())))
    }

    /// Write a fixed array as one blob.
    fn save_array(&self, path: &PathBuilder, items: &[Value]) -> StoreResult<()> {
        self.save_list(path, items)
    }

    /// Write a keyed map as one blob.
    ///
    /// Default implementation stores a JSON object through `save()`.
    fn save_map(&self, path: &PathBuilder, entries: &[(String, Value)]) -> StoreResult<()> {
        let object: Map<String, Value> = entries.iter().cloned().collect();
        self.save(path, &StoredRecord::new(Value::Object(object)))
    }

    /// Read a list blob. Returns `Ok(None)` if nothing is stored.
    fn read_list(&self, path: &PathBuilder) -> StoreResult<Option<Vec<Value>>> {
        match self.read(path)? {
            None => Ok(None),
            Some(StoredRecord {
                value: Value::Array(items),
                ..
            }) => Ok(Some(items)),
            Some(_) => Err(StoreError::CorruptRecord {
                path: path.to_string(),
                reason: "expected an array blob".into(),
            }),
        }
    }

    /// Read an array blob.
    fn read_array(&self, path: &PathBuilder) -> StoreResult<Option<Vec<Value>>> {
        self.read_list(path)
    }

    /// Read a map blob as `(key, value)` pairs.
    fn read_map(&self, path: &PathBuilder) -> StoreResult<Option<Vec<(String, Value)>>> {
        match self.read(path)? {
            None => Ok(None),
            Some(StoredRecord {
                value: Value::Object(object),
                ..
            }) => Ok(Some(object.into_iter().collect())),
            Some(_) => Err(StoreError::CorruptRecord {
                path: path.to_string(),
                reason: "expected an object blob".into(),
            }),
        }
    }

    /// Dump every record as `(path, record)`, for backups.
    fn export(&self) -> StoreResult<Vec<(String, StoredRecord)>> {
        Err(StoreError::Unsupported("export"))
    }

    /// Replace the whole content with the given records.
    fn import(&self, _records: Vec<(String, StoredRecord)>) -> StoreResult<()> {
        Err(StoreError::Unsupported("import"))
    }
}

/// Render the key of `id` reached from `parent` by `kind`.
///
/// An empty parent means `id` is a root key.
pub fn child_key(parent: &str, kind: PathKind, id: &str) -> String {
    if parent.is_empty() {
        id.to_owned()
    } else {
        let mut key = String::with_capacity(parent.len() + 1 + id.len());
        key.push_str(parent);
        key.push(kind.separator());
        key.push_str(id);
        key
    }
}
