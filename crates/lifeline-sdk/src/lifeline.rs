//! Root facade: one stored root object and the serializer that persists it.

use std::future::IntoFuture;
use std::sync::Arc;

use lifeline_core::{AsNode, JobHandle, Restore, SaveError, Savable, Serializer};
use lifeline_store::Storage;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backup::{BackupInfo, BackupService};
use crate::config::LifelineConfig;
use crate::driver::Driver;
use crate::error::{SdkError, SdkResult};

/// Owns the root data node stored under a fixed id.
///
/// Synchronous operations run on the calling thread. The `*_async` ones
/// queue a job and resolve once a [`Driver`] (or a manual
/// [`JobQueue::force_complete`](lifeline_core::JobQueue::force_complete))
/// has run it.
pub struct Lifeline<T: Restore> {
    id: String,
    serializer: Arc<Serializer>,
    data: RwLock<Option<Arc<T>>>,
    backup: Option<Arc<dyn BackupService>>,
}

impl<T: Restore> Lifeline<T> {
    pub fn new(id: impl Into<String>, serializer: Arc<Serializer>) -> SdkResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(SdkError::InvalidOperation("lifeline id must not be empty".into()));
        }
        Ok(Self {
            id,
            serializer,
            data: RwLock::new(None),
            backup: None,
        })
    }

    /// Build a serializer over `store` from `config`.
    pub fn open(
        id: impl Into<String>,
        store: Arc<dyn Storage>,
        config: &LifelineConfig,
    ) -> SdkResult<Self> {
        let serializer = Serializer::builder(store)
            .config(config.serializer.clone())
            .build();
        Self::new(id, serializer)
    }

    pub fn with_backup(mut self, service: Arc<dyn BackupService>) -> Self {
        self.backup = Some(service);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn serializer(&self) -> &Arc<Serializer> {
        &self.serializer
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.data.read().clone()
    }

    /// Make `data` the root. It takes this lifeline's id and is saved in
    /// full on the next save.
    pub fn set_data(&self, data: Arc<T>) {
        data.header().set_id(self.id.clone());
        data.header().mark_dirty();
        self.install(data);
    }

    /// Detach and return the current root.
    pub fn take_data(&self) -> Option<Arc<T>> {
        let old = self.data.write().take();
        if let Some(old) = &old {
            old.header().unmark_root();
        }
        old
    }

    /// Give a freshly built node a generated id.
    pub fn create_data<N: Savable>(&self, node: Arc<N>) -> Arc<N> {
        self.serializer.create_data(node)
    }

    /// Spawn a driver for this lifeline's job queue.
    pub fn spawn_driver(&self, config: &LifelineConfig) -> Driver {
        Driver::spawn(Arc::clone(self.serializer.jobs()), &config.driver)
    }

    fn install(&self, data: Arc<T>) {
        data.header().mark_root(Arc::clone(&self.serializer));
        let old = self.data.write().replace(Arc::clone(&data));
        if let Some(old) = old.filter(|old| !Arc::ptr_eq(old, &data)) {
            old.header().unmark_root();
        }
    }

    // ---- load ----

    /// Read the stored root. Leaves the current data untouched when nothing
    /// is stored.
    pub fn load(&self) -> SdkResult<Option<Arc<T>>> {
        let loaded = self.serializer.fresh_read_sync::<T>(&self.id)?;
        self.loaded(loaded)
    }

    pub async fn load_async(&self, cancel: &CancellationToken) -> SdkResult<Option<Arc<T>>> {
        let handle = self.serializer.fresh_read_async::<T>(&self.id)?;
        let loaded = await_job(handle, cancel).await?;
        self.loaded(loaded)
    }

    fn loaded(&self, loaded: Option<Arc<T>>) -> SdkResult<Option<Arc<T>>> {
        match &loaded {
            Some(data) => {
                self.install(Arc::clone(data));
                info!(lifeline = %self.id, "root loaded");
            }
            None => info!(lifeline = %self.id, "no stored root"),
        }
        Ok(loaded)
    }

    // ---- save ----

    /// Write the root if it has unsaved changes. A no-op without data.
    pub fn save(&self) -> SdkResult<()> {
        if let Some(data) = self.data() {
            self.serializer.fresh_save_sync(&data.as_node())?;
        }
        Ok(())
    }

    pub async fn save_async(&self, cancel: &CancellationToken) -> SdkResult<()> {
        let Some(data) = self.data() else {
            return Ok(());
        };
        let handle = self.serializer.fresh_save_async(&data.as_node())?;
        await_job(handle, cancel).await
    }

    // ---- backup ----

    /// Back up the store once every queued write has landed. `None` when
    /// no backup service is configured.
    pub fn backup(&self) -> SdkResult<Option<BackupInfo>> {
        let Some(service) = &self.backup else {
            return Ok(None);
        };
        self.serializer.jobs().force_complete();
        service.backup(self.serializer.store().as_ref()).map(Some)
    }

    pub async fn backup_async(&self) -> SdkResult<Option<BackupInfo>> {
        let Some(service) = self.backup.clone() else {
            return Ok(None);
        };
        let serializer = Arc::clone(&self.serializer);
        tokio::task::spawn_blocking(move || {
            serializer.jobs().force_complete();
            service.backup(serializer.store().as_ref())
        })
        .await
        .map_err(|err| SdkError::Internal(format!("backup task failed: {err}")))?
        .map(Some)
    }
}

/// Await a job, giving up with [`SaveError::Cancelled`] when `cancel` fires.
async fn await_job<R: Send + 'static>(
    handle: JobHandle<R>,
    cancel: &CancellationToken,
) -> SdkResult<R> {
    let job = handle.cancellation_token();
    tokio::select! {
        outcome = handle.into_future() => Ok(outcome?),
        _ = cancel.cancelled() => {
            job.cancel();
            Err(SaveError::Cancelled.into())
        }
    }
}

impl<T: Restore> std::fmt::Debug for Lifeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifeline")
            .field("id", &self.id)
            .field("loaded", &self.data.read().is_some())
            .field("backup", &self.backup.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::SnapshotBackup;
    use crate::testing::{harness, Profile};
    use lifeline_store::InMemoryStore;

    #[test]
    fn empty_id_is_rejected() {
        let (_store, serializer) = harness();
        assert!(matches!(
            Lifeline::<Profile>::new("", serializer),
            Err(SdkError::InvalidOperation(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let (store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", Arc::clone(&serializer)).unwrap();
        lifeline.set_data(Profile::new("ann", 3));
        lifeline.save().unwrap();
        assert_eq!(store.get("hero").unwrap().value["level"], 3);

        let reloaded = Lifeline::<Profile>::new("hero", serializer).unwrap();
        let data = reloaded.load().unwrap().unwrap();
        assert_eq!(data.name(), "ann");
        assert_eq!(data.header().id().as_deref(), Some("hero"));
        assert!(data.header().is_root());
        assert!(!data.header().is_dirty());
        assert!(Arc::ptr_eq(&reloaded.data().unwrap(), &data));
    }

    #[test]
    fn loading_nothing_keeps_data() {
        let (_store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", serializer).unwrap();
        assert!(lifeline.load().unwrap().is_none());
        assert!(lifeline.data().is_none());
    }

    #[test]
    fn save_without_data_or_changes_writes_nothing() {
        let (store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", serializer).unwrap();
        lifeline.save().unwrap();
        assert!(store.is_empty());

        lifeline.set_data(Profile::new("ann", 3));
        lifeline.save().unwrap();
        store.take_ops();
        lifeline.save().unwrap();
        assert!(store.writes().is_empty());
    }

    #[test]
    fn root_changes_save_immediately() {
        let (store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", serializer).unwrap();
        let profile = Profile::new("ann", 3);
        lifeline.set_data(Arc::clone(&profile));
        profile.set_level(7).unwrap();
        assert_eq!(store.get("hero").unwrap().value["level"], 7);
        assert!(!profile.header().is_dirty());
    }

    #[test]
    fn replacing_data_releases_old_root() {
        let (_store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", serializer).unwrap();
        let first = Profile::new("ann", 1);
        lifeline.set_data(Arc::clone(&first));
        lifeline.set_data(Profile::new("bo", 2));
        assert!(!first.header().is_root());

        let taken = lifeline.take_data().unwrap();
        assert_eq!(taken.name(), "bo");
        assert!(!taken.header().is_root());
        assert!(lifeline.data().is_none());
    }

    #[test]
    fn create_data_assigns_fresh_ids() {
        let (_store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", serializer).unwrap();
        let a = lifeline.create_data(Profile::new("a", 0));
        let b = lifeline.create_data(Profile::new("b", 0));
        assert!(a.header().has_id());
        assert_ne!(a.header().id(), b.header().id());
    }

    #[test]
    fn backup_is_optional() {
        let (store, serializer) = harness();
        let plain = Lifeline::<Profile>::new("hero", Arc::clone(&serializer)).unwrap();
        assert_eq!(plain.backup().unwrap(), None);

        let backups = SnapshotBackup::new(3);
        let lifeline = Lifeline::<Profile>::new("hero", serializer)
            .unwrap()
            .with_backup(backups.clone());
        lifeline.set_data(Profile::new("ann", 3));
        lifeline.save().unwrap();
        let info = lifeline.backup().unwrap().unwrap();
        assert_eq!(info.records, 1);

        lifeline.data().unwrap().set_level(9).unwrap();
        backups.restore(info.id, store.as_ref()).unwrap();
        assert_eq!(store.get("hero").unwrap().value["level"], 3);
    }

    #[test]
    fn open_uses_config() {
        let store: Arc<dyn Storage> = Arc::new(InMemoryStore::new());
        let config = LifelineConfig::from_toml_str("[serializer]\ndefault_policy = \"async\"").unwrap();
        let lifeline = Lifeline::<Profile>::open("hero", store, &config).unwrap();
        assert_eq!(
            lifeline.serializer().policy(),
            lifeline_core::SavePolicy::Async
        );
    }

    #[tokio::test]
    async fn async_round_trip_with_driver() {
        let (store, serializer) = harness();
        let config = LifelineConfig::default();
        let lifeline = Lifeline::<Profile>::new("hero", Arc::clone(&serializer)).unwrap();
        let driver = lifeline.spawn_driver(&config);
        let cancel = CancellationToken::new();

        lifeline.set_data(Profile::new("ann", 3));
        lifeline.save_async(&cancel).await.unwrap();
        assert!(store.get("hero").is_some());

        let reloaded = Lifeline::<Profile>::new("hero", serializer).unwrap();
        let data = reloaded.load_async(&cancel).await.unwrap().unwrap();
        assert_eq!(data.level(), 3);
        assert!(data.header().is_root());

        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_save_never_writes() {
        let (store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", Arc::clone(&serializer)).unwrap();
        lifeline.set_data(Profile::new("ann", 3));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = lifeline.save_async(&cancel).await;
        assert!(matches!(outcome, Err(SdkError::Save(SaveError::Cancelled))));

        serializer.jobs().force_complete();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn missing_data_or_backup_service_is_not_an_error() {
        let (store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", serializer).unwrap();
        lifeline.save_async(&CancellationToken::new()).await.unwrap();
        assert_eq!(lifeline.backup_async().await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn async_backup_sees_queued_writes() {
        let (_store, serializer) = harness();
        let lifeline = Lifeline::<Profile>::new("hero", Arc::clone(&serializer))
            .unwrap()
            .with_backup(SnapshotBackup::new(1));
        let profile = Profile::new("ann", 3);
        lifeline.set_data(Arc::clone(&profile));
        serializer.fresh_save_async(&profile.as_node()).unwrap().detach();

        let info = lifeline.backup_async().await.unwrap().unwrap();
        assert_eq!(info.records, 1);
    }
}
