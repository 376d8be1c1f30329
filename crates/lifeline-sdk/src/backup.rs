//! Point-in-time backups of a store.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifeline_store::{Storage, StoredRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SdkError, SdkResult};

/// Metadata for one backup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: u64,
    pub taken_at: DateTime<Utc>,
    pub records: usize,
}

/// Something that can copy a store's current content aside.
pub trait BackupService: Send + Sync {
    /// Take a backup of `store`.
    fn backup(&self, store: &dyn Storage) -> SdkResult<BackupInfo>;
}

struct Snapshot {
    info: BackupInfo,
    records: Vec<(String, StoredRecord)>,
}

/// Keeps the latest `keep` exports of a store in memory.
///
/// The store must support [`Storage::export`]; restoring needs
/// [`Storage::import`].
pub struct SnapshotBackup {
    snapshots: Mutex<VecDeque<Snapshot>>,
    next_id: Mutex<u64>,
    keep: usize,
}

impl SnapshotBackup {
    pub fn new(keep: usize) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(VecDeque::new()),
            next_id: Mutex::new(1),
            keep: keep.max(1),
        })
    }

    /// Retained backups, oldest first.
    pub fn list(&self) -> Vec<BackupInfo> {
        self.snapshots.lock().iter().map(|s| s.info.clone()).collect()
    }

    pub fn latest(&self) -> Option<BackupInfo> {
        self.snapshots.lock().back().map(|s| s.info.clone())
    }

    /// Replace the content of `store` with backup `id`.
    pub fn restore(&self, id: u64, store: &dyn Storage) -> SdkResult<()> {
        let records = {
            let snapshots = self.snapshots.lock();
            let snapshot = snapshots
                .iter()
                .find(|s| s.info.id == id)
                .ok_or(SdkError::BackupNotFound(id))?;
            snapshot.records.clone()
        };
        store.import(records)?;
        info!(backup = id, "store restored from backup");
        Ok(())
    }

    /// Restore the most recent backup.
    pub fn restore_latest(&self, store: &dyn Storage) -> SdkResult<BackupInfo> {
        let info = self
            .latest()
            .ok_or_else(|| SdkError::InvalidOperation("no backup taken yet".into()))?;
        self.restore(info.id, store)?;
        Ok(info)
    }
}

impl BackupService for SnapshotBackup {
    fn backup(&self, store: &dyn Storage) -> SdkResult<BackupInfo> {
        let records = store.export()?;
        let info = {
            let mut next = self.next_id.lock();
            let info = BackupInfo {
                id: *next,
                taken_at: Utc::now(),
                records: records.len(),
            };
            *next += 1;
            info
        };

        let mut snapshots = self.snapshots.lock();
        snapshots.push_back(Snapshot {
            info: info.clone(),
            records,
        });
        while snapshots.len() > self.keep {
            if let Some(dropped) = snapshots.pop_front() {
                debug!(backup = dropped.info.id, "oldest backup discarded");
            }
        }
        info!(backup = info.id, records = info.records, "backup taken");
        Ok(info)
    }
}

impl std::fmt::Debug for SnapshotBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotBackup")
            .field("retained", &self.snapshots.lock().len())
            .field("keep", &self.keep)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_path::PathBuilder;
    use lifeline_store::InMemoryStore;
    use serde_json::json;

    fn put(store: &InMemoryStore, key: &str, value: serde_json::Value) {
        let path = PathBuilder::parse(key).unwrap();
        store.save(&path, &StoredRecord::new(value)).unwrap();
    }

    #[test]
    fn backup_and_restore() {
        let store = InMemoryStore::new();
        put(&store, "p1", json!({ "gold": 1 }));
        let backups = SnapshotBackup::new(4);
        let first = backups.backup(&store).unwrap();
        assert_eq!(first.records, 1);

        put(&store, "p1", json!({ "gold": 2 }));
        put(&store, "p2", json!({ "gold": 3 }));
        backups.restore(first.id, &store).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("p1").unwrap().value["gold"], 1);
    }

    #[test]
    fn keeps_only_the_newest() {
        let store = InMemoryStore::new();
        let backups = SnapshotBackup::new(2);
        for gold in 0..3 {
            put(&store, "p1", json!({ "gold": gold }));
            backups.backup(&store).unwrap();
        }
        let ids: Vec<_> = backups.list().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(matches!(
            backups.restore(1, &store),
            Err(SdkError::BackupNotFound(1))
        ));

        put(&store, "p1", json!({ "gold": 9 }));
        let restored = backups.restore_latest(&store).unwrap();
        assert_eq!(restored.id, 3);
        assert_eq!(store.get("p1").unwrap().value["gold"], 2);
    }

    #[test]
    fn restore_latest_without_backups() {
        let store = InMemoryStore::new();
        let backups = SnapshotBackup::new(1);
        assert!(matches!(
            backups.restore_latest(&store),
            Err(SdkError::InvalidOperation(_))
        ));
    }

    #[test]
    fn info_serializes_with_timestamp() {
        let store = InMemoryStore::new();
        let info = SnapshotBackup::new(1).backup(&store).unwrap();
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["id"], 1);
        assert!(value["taken_at"].is_string());
    }
}
