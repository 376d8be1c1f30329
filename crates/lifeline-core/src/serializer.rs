//! The serializer engine.
//!
//! A [`Serializer`] coordinates the node graph with a [`Storage`] backend.
//!
//! "Fresh" operations address a node by resolving its full path from the
//! root. The synchronous variants first force-complete every queued job so
//! they observe earlier asynchronous writes, then use the single scratch path
//! guarded by a fail-fast lock. The asynchronous variants resolve into a
//! pooled path and queue a job keyed by it. The `*_by_policy` variants pick
//! one of the two from the configured [`SavePolicy`].
//!
//! Relative operations (`save`, `delete`, `read_list`, ...) take a path that
//! already points at the parent and push/pop the target segment around the
//! storage call. Hooks and containers use them while a fresh operation is in
//! progress.
//!
//! Every save and order/id update is gated on the node's dirty flag: a clean
//! node produces no storage call.

use std::sync::{Arc, Weak};

use lifeline_path::{PathBuilder, PathKind};
use lifeline_store::{Storage, StoredRecord};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{SavePolicy, SerializerConfig};
use crate::convert::{IdConverter, IdConverters};
use crate::element::Element;
use crate::error::{SaveError, SaveResult};
use crate::graph;
use crate::id::{IdGenerator, SequenceIdGenerator};
use crate::job::JobHandle;
use crate::node::{Restore, Savable};
use crate::pool::{ObjectPool, Pooled};
use crate::queue::JobQueue;

/// Builder for a [`Serializer`].
pub struct SerializerBuilder {
    store: Arc<dyn Storage>,
    config: SerializerConfig,
    converters: Option<Arc<IdConverters>>,
    ids: Option<Arc<dyn IdGenerator>>,
    jobs: Option<Arc<JobQueue>>,
}

impl SerializerBuilder {
    pub fn config(mut self, config: SerializerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn converters(mut self, converters: Arc<IdConverters>) -> Self {
        self.converters = Some(converters);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Share a job queue, e.g. with a driver created beforehand.
    pub fn job_queue(mut self, jobs: Arc<JobQueue>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn build(self) -> Arc<Serializer> {
        let max_len = self.config.max_path_len;
        let paths = ObjectPool::new(self.config.effective_pool_capacity(), move || {
            PathBuilder::with_capacity(max_len)
        })
        .with_reset(PathBuilder::clear);
        Arc::new_cyclic(|this| Serializer {
            this: this.clone(),
            store: self.store,
            scratch: Mutex::new(PathBuilder::with_capacity(max_len)),
            policy: RwLock::new(self.config.default_policy),
            paths: Arc::new(paths),
            jobs: self.jobs.unwrap_or_default(),
            converters: self
                .converters
                .unwrap_or_else(|| Arc::new(IdConverters::with_defaults())),
            ids: self
                .ids
                .unwrap_or_else(|| Arc::new(SequenceIdGenerator::new())),
            config: self.config,
        })
    }
}

/// Orchestrates save, read, delete and existence checks against storage.
pub struct Serializer {
    this: Weak<Serializer>,
    store: Arc<dyn Storage>,
    scratch: Mutex<PathBuilder>,
    policy: RwLock<SavePolicy>,
    paths: Arc<ObjectPool<PathBuilder>>,
    jobs: Arc<JobQueue>,
    converters: Arc<IdConverters>,
    ids: Arc<dyn IdGenerator>,
    config: SerializerConfig,
}

fn check_id(node: &dyn Savable) -> SaveResult<()> {
    if node.header().has_id() {
        Ok(())
    } else {
        Err(SaveError::EmptyId)
    }
}

fn require_id(node: &dyn Savable) -> SaveResult<String> {
    node.header().id().ok_or(SaveError::EmptyId)
}

fn require_segment(text: &str) -> SaveResult<()> {
    if text.is_empty() {
        Err(SaveError::EmptyId)
    } else {
        Ok(())
    }
}

impl Serializer {
    /// A serializer with default configuration.
    pub fn new(store: Arc<dyn Storage>) -> Arc<Self> {
        Self::builder(store).build()
    }

    pub fn builder(store: Arc<dyn Storage>) -> SerializerBuilder {
        SerializerBuilder {
            store,
            config: SerializerConfig::default(),
            converters: None,
            ids: None,
            jobs: None,
        }
    }

    // ---- accessors ----

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }

    pub fn converters(&self) -> &Arc<IdConverters> {
        &self.converters
    }

    pub fn id_generator(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    pub fn policy(&self) -> SavePolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: SavePolicy) {
        *self.policy.write() = policy;
    }

    /// Give a freshly built node a new id.
    pub fn create_data<N: Savable>(&self, node: Arc<N>) -> Arc<N> {
        node.header().set_id(self.ids.next_id());
        node
    }

    /// Take the scratch path for a synchronous top-level operation.
    ///
    /// Fails immediately with [`SaveError::PathBuilderBusy`] if another
    /// fresh operation holds it.
    pub fn begin_fresh_action(&self) -> SaveResult<MutexGuard<'_, PathBuilder>> {
        let mut path = self.scratch.try_lock().ok_or(SaveError::PathBuilderBusy)?;
        path.clear();
        Ok(path)
    }

    /// Borrow a path buffer from the pool.
    pub fn acquire_path(&self) -> Pooled<PathBuilder> {
        self.paths.acquire()
    }

    fn resolve_into(&self, node: &Arc<dyn Savable>, path: &mut PathBuilder) -> SaveResult<()> {
        graph::resolve_path(node, path)?;
        if path.is_empty() {
            return Err(SaveError::EmptyPath);
        }
        Ok(())
    }

    /// Drain pending jobs, then take the scratch path set to `node`'s path.
    fn fresh_path(&self, node: &Arc<dyn Savable>) -> SaveResult<MutexGuard<'_, PathBuilder>> {
        self.jobs.force_complete();
        let mut path = self.begin_fresh_action()?;
        self.resolve_into(node, &mut path)?;
        Ok(path)
    }

    /// A pooled path set to `node`'s path.
    fn pooled_path(&self, node: &Arc<dyn Savable>) -> SaveResult<Pooled<PathBuilder>> {
        let mut path = self.acquire_path();
        self.resolve_into(node, &mut path)?;
        Ok(path)
    }

    fn enqueue<T, F>(&self, path: Pooled<PathBuilder>, action: F) -> SaveResult<JobHandle<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&Serializer, &mut PathBuilder) -> SaveResult<T> + Send + 'static,
    {
        let this = self.this.clone();
        self.jobs.enqueue(path, move |path: &mut PathBuilder| {
            let this = this.upgrade().ok_or(SaveError::SerializerDropped)?;
            action(&this, path)
        })
    }

    fn by_policy<T>(
        &self,
        policy: SavePolicy,
        sync: impl FnOnce() -> SaveResult<T>,
        queued: impl FnOnce() -> SaveResult<JobHandle<T>>,
    ) -> SaveResult<()>
    where
        T: Send + 'static,
    {
        match policy {
            SavePolicy::Sync => sync().map(|_| ()),
            SavePolicy::Async => queued().map(JobHandle::detach),
        }
    }

    // ---- fresh save ----

    pub fn fresh_save_sync(&self, node: &Arc<dyn Savable>) -> SaveResult<()> {
        check_id(node.as_ref())?;
        if !node.header().is_dirty() {
            return Ok(());
        }
        let mut path = self.fresh_path(node)?;
        self.write_node(node.as_ref(), &mut path)
    }

    pub fn fresh_save_async(&self, node: &Arc<dyn Savable>) -> SaveResult<JobHandle<()>> {
        check_id(node.as_ref())?;
        if !node.header().is_dirty() {
            return Ok(JobHandle::ready(Ok(())));
        }
        let path = self.pooled_path(node)?;
        let node = Arc::clone(node);
        self.enqueue(path, move |this, path| this.write_node(node.as_ref(), path))
    }

    pub fn fresh_save(&self, node: &Arc<dyn Savable>, policy: SavePolicy) -> SaveResult<()> {
        self.by_policy(
            policy,
            || self.fresh_save_sync(node),
            || self.fresh_save_async(node),
        )
    }

    pub fn fresh_save_by_policy(&self, node: &Arc<dyn Savable>) -> SaveResult<()> {
        self.fresh_save(node, self.policy())
    }

    // ---- fresh save of a single property ----

    /// Save `value` as the record `owner.prop`.
    pub fn fresh_save_value_sync(
        &self,
        owner: &Arc<dyn Savable>,
        prop: &str,
        value: &Value,
    ) -> SaveResult<()> {
        check_id(owner.as_ref())?;
        require_segment(prop)?;
        let mut path = self.fresh_path(owner)?;
        self.save_value(&mut path, prop, PathKind::Property, value)
    }

    pub fn fresh_save_value_async(
        &self,
        owner: &Arc<dyn Savable>,
        prop: &str,
        value: Value,
    ) -> SaveResult<JobHandle<()>> {
        check_id(owner.as_ref())?;
        require_segment(prop)?;
        let mut path = self.pooled_path(owner)?;
        path.push(prop, PathKind::Property)?;
        self.enqueue(path, move |this, path| {
            this.store.save(path, &StoredRecord::new(value))?;
            Ok(())
        })
    }

    pub fn fresh_save_value_by_policy(
        &self,
        owner: &Arc<dyn Savable>,
        prop: &str,
        value: Value,
    ) -> SaveResult<()> {
        match self.policy() {
            SavePolicy::Sync => self.fresh_save_value_sync(owner, prop, &value),
            SavePolicy::Async => self
                .fresh_save_value_async(owner, prop, value)
                .map(JobHandle::detach),
        }
    }

    // ---- fresh read ----

    /// Read the root node stored under `id`.
    pub fn fresh_read_sync<T: Restore>(&self, id: &str) -> SaveResult<Option<Arc<T>>> {
        require_segment(id)?;
        self.jobs.force_complete();
        let mut path = self.begin_fresh_action()?;
        path.push(id, PathKind::Property)?;
        self.read_node::<T>(&mut path)
    }

    pub fn fresh_read_async<T: Restore>(&self, id: &str) -> SaveResult<JobHandle<Option<Arc<T>>>> {
        require_segment(id)?;
        let mut path = self.acquire_path();
        path.push(id, PathKind::Property)?;
        self.enqueue(path, |this, path| this.read_node::<T>(path))
    }

    // ---- fresh delete ----

    /// Delete the record of `node` and everything nested below it.
    ///
    /// The node is left dirty so a later save writes it again.
    pub fn fresh_delete_sync(&self, node: &Arc<dyn Savable>) -> SaveResult<()> {
        check_id(node.as_ref())?;
        let path = self.fresh_path(node)?;
        self.store.delete(&path)?;
        node.header().mark_dirty();
        debug!(path = %*path, "record deleted");
        Ok(())
    }

    pub fn fresh_delete_async(&self, node: &Arc<dyn Savable>) -> SaveResult<JobHandle<()>> {
        check_id(node.as_ref())?;
        let path = self.pooled_path(node)?;
        let node = Arc::clone(node);
        self.enqueue(path, move |this, path| {
            this.store.delete(path)?;
            node.header().mark_dirty();
            Ok(())
        })
    }

    pub fn fresh_delete(&self, node: &Arc<dyn Savable>, policy: SavePolicy) -> SaveResult<()> {
        self.by_policy(
            policy,
            || self.fresh_delete_sync(node),
            || self.fresh_delete_async(node),
        )
    }

    pub fn fresh_delete_by_policy(&self, node: &Arc<dyn Savable>) -> SaveResult<()> {
        self.fresh_delete(node, self.policy())
    }

    // ---- fresh has ----

    pub fn fresh_has_sync(&self, node: &Arc<dyn Savable>) -> SaveResult<bool> {
        check_id(node.as_ref())?;
        let path = self.fresh_path(node)?;
        Ok(self.store.has(&path)?)
    }

    pub fn fresh_has_async(&self, node: &Arc<dyn Savable>) -> SaveResult<JobHandle<bool>> {
        check_id(node.as_ref())?;
        let path = self.pooled_path(node)?;
        self.enqueue(path, |this, path| Ok(this.store.has(path)?))
    }

    // ---- fresh id update ----

    /// Move the record of `node` from `old_id` to its current id.
    pub fn fresh_update_id_sync(&self, node: &Arc<dyn Savable>, old_id: &str) -> SaveResult<()> {
        check_id(node.as_ref())?;
        require_segment(old_id)?;
        if !node.header().is_dirty() {
            return Ok(());
        }
        let mut path = self.fresh_path(node)?;
        let (new_id, kind) = path.pop_with(|text, kind| (text.to_owned(), kind))?;
        self.store.update_id(&path, kind, old_id, &new_id)?;
        debug!(parent = %*path, from = old_id, to = %new_id, "record renamed");
        Ok(())
    }

    /// Queued id update, keyed by the record's old path.
    pub fn fresh_update_id_async(
        &self,
        node: &Arc<dyn Savable>,
        old_id: &str,
    ) -> SaveResult<JobHandle<()>> {
        check_id(node.as_ref())?;
        require_segment(old_id)?;
        if !node.header().is_dirty() {
            return Ok(JobHandle::ready(Ok(())));
        }
        let mut path = self.pooled_path(node)?;
        let (new_id, kind) = path.pop_with(|text, kind| (text.to_owned(), kind))?;
        path.push(old_id, kind)?;
        self.enqueue(path, move |this, path| {
            let (old_id, kind) = path.pop_with(|text, kind| (text.to_owned(), kind))?;
            let outcome = this.store.update_id(path, kind, &old_id, &new_id);
            path.push(&old_id, kind)?;
            Ok(outcome?)
        })
    }

    pub fn fresh_update_id_by_policy(&self, node: &Arc<dyn Savable>, old_id: &str) -> SaveResult<()> {
        self.by_policy(
            self.policy(),
            || self.fresh_update_id_sync(node, old_id),
            || self.fresh_update_id_async(node, old_id),
        )
    }

    // ---- fresh order update ----

    /// Rewrite only the order marker of `node`.
    pub fn fresh_update_order_sync(&self, node: &Arc<dyn Savable>) -> SaveResult<()> {
        check_id(node.as_ref())?;
        let Some(order) = node.header().order() else {
            return Ok(());
        };
        if !node.header().is_dirty() {
            return Ok(());
        }
        let path = self.fresh_path(node)?;
        self.store.update_order(&path, order)?;
        Ok(())
    }

    pub fn fresh_update_order_async(&self, node: &Arc<dyn Savable>) -> SaveResult<JobHandle<()>> {
        check_id(node.as_ref())?;
        if node.header().order().is_none() || !node.header().is_dirty() {
            return Ok(JobHandle::ready(Ok(())));
        }
        let path = self.pooled_path(node)?;
        let node = Arc::clone(node);
        self.enqueue(path, move |this, path| {
            match node.header().order() {
                Some(order) if node.header().is_dirty() => this.store.update_order(path, order)?,
                _ => {}
            }
            Ok(())
        })
    }

    pub fn fresh_update_order_by_policy(&self, node: &Arc<dyn Savable>) -> SaveResult<()> {
        self.by_policy(
            self.policy(),
            || self.fresh_update_order_sync(node),
            || self.fresh_update_order_async(node),
        )
    }

    // ---- relative writes ----

    /// Save `node` below `path`, reached by `kind`.
    pub fn save(&self, node: &dyn Savable, path: &mut PathBuilder, kind: PathKind) -> SaveResult<()> {
        let id = require_id(node)?;
        if !node.header().is_dirty() {
            return Ok(());
        }
        path.push(&id, kind)?;
        let outcome = self.write_node(node, path);
        path.pop()?;
        outcome
    }

    /// Save a plain value as the record `path` + `prop`.
    pub fn save_value(
        &self,
        path: &mut PathBuilder,
        prop: &str,
        kind: PathKind,
        value: &Value,
    ) -> SaveResult<()> {
        require_segment(prop)?;
        path.push(prop, kind)?;
        let outcome = self.store.save(path, &StoredRecord::new(value.clone()));
        path.pop()?;
        Ok(outcome?)
    }

    /// Delete `node` below `path`.
    pub fn delete(&self, node: &dyn Savable, path: &mut PathBuilder, kind: PathKind) -> SaveResult<()> {
        let id = require_id(node)?;
        self.delete_object(path, &id, kind)
    }

    /// Delete the record `path` + `prop` and everything nested below it.
    pub fn delete_object(&self, path: &mut PathBuilder, prop: &str, kind: PathKind) -> SaveResult<()> {
        require_segment(prop)?;
        path.push(prop, kind)?;
        let outcome = self.store.delete(path);
        path.pop()?;
        Ok(outcome?)
    }

    /// Delete every element of the collection at `path`.
    pub fn delete_all(&self, path: &PathBuilder) -> SaveResult<()> {
        if path.is_empty() {
            return Err(SaveError::EmptyPath);
        }
        Ok(self.store.delete_all(path)?)
    }

    /// Rewrite the order marker of `node` below `path`.
    pub fn update_order(&self, node: &dyn Savable, path: &mut PathBuilder, kind: PathKind) -> SaveResult<()> {
        let id = require_id(node)?;
        let Some(order) = node.header().order() else {
            return Ok(());
        };
        if !node.header().is_dirty() {
            return Ok(());
        }
        path.push(&id, kind)?;
        let outcome = self.store.update_order(path, order);
        path.pop()?;
        Ok(outcome?)
    }

    /// Write a growable list blob at `path`.
    pub fn save_list<E: Element>(&self, path: &PathBuilder, items: &[E]) -> SaveResult<()> {
        let values = items.iter().map(E::to_value).collect::<SaveResult<Vec<_>>>()?;
        Ok(self.store.save_list(path, &values)?)
    }

    /// Write a fixed array blob at `path`.
    pub fn save_array<E: Element>(&self, path: &PathBuilder, items: &[E]) -> SaveResult<()> {
        let values = items.iter().map(E::to_value).collect::<SaveResult<Vec<_>>>()?;
        Ok(self.store.save_array(path, &values)?)
    }

    /// Write a map blob at `path`; entries are `(id, element)`.
    pub fn save_map<E: Element>(&self, path: &PathBuilder, entries: &[(String, E)]) -> SaveResult<()> {
        let values = entries
            .iter()
            .map(|(id, item)| Ok((id.clone(), item.to_value()?)))
            .collect::<SaveResult<Vec<_>>>()?;
        Ok(self.store.save_map(path, &values)?)
    }

    // ---- relative reads ----

    pub fn has(&self, node: &dyn Savable, path: &mut PathBuilder, kind: PathKind) -> SaveResult<bool> {
        let id = require_id(node)?;
        path.push(&id, kind)?;
        let outcome = self.store.has(path);
        path.pop()?;
        Ok(outcome?)
    }

    /// Whether any element is stored below the collection `path` + `prop`.
    pub fn has_collection(&self, path: &mut PathBuilder, prop: &str) -> SaveResult<bool> {
        require_segment(prop)?;
        path.push(prop, PathKind::Collection)?;
        let outcome = self.store.has_collection(path);
        path.pop()?;
        Ok(outcome?)
    }

    /// Read the node stored at `path` + `id`.
    pub fn read_object<T: Restore>(
        &self,
        path: &mut PathBuilder,
        id: &str,
        kind: PathKind,
    ) -> SaveResult<Option<Arc<T>>> {
        require_segment(id)?;
        path.push(id, kind)?;
        let outcome = self.read_node::<T>(path);
        path.pop()?;
        outcome
    }

    /// Read the plain value stored at `path` + `prop`.
    pub fn read_value(&self, path: &mut PathBuilder, prop: &str, kind: PathKind) -> SaveResult<Option<Value>> {
        require_segment(prop)?;
        path.push(prop, kind)?;
        let outcome = self.store.read(path);
        path.pop()?;
        Ok(outcome?.map(|record| record.value))
    }

    /// Read the list `path` + `prop`, either element by element or as one blob.
    pub fn read_list<E: Element>(
        &self,
        path: &mut PathBuilder,
        prop: &str,
        save_separately: bool,
    ) -> SaveResult<Option<Vec<E>>> {
        require_segment(prop)?;
        path.push(prop, PathKind::Collection)?;
        let outcome: SaveResult<Option<Vec<E>>> = if save_separately && E::SAVABLE {
            self.read_elements::<E>(path)
                .map(|items| items.map(|items| items.into_iter().map(|(_, item)| item).collect()))
        } else {
            self.read_values(path, |store, path| store.read_list(path))
        };
        path.pop()?;
        outcome
    }

    /// Read the fixed array `path` + `prop`.
    pub fn read_array<E: Element>(
        &self,
        path: &mut PathBuilder,
        prop: &str,
        save_separately: bool,
    ) -> SaveResult<Option<Vec<E>>> {
        require_segment(prop)?;
        path.push(prop, PathKind::Collection)?;
        let outcome: SaveResult<Option<Vec<E>>> = if save_separately && E::SAVABLE {
            self.read_elements::<E>(path)
                .map(|items| items.map(|items| items.into_iter().map(|(_, item)| item).collect()))
        } else {
            self.read_values(path, |store, path| store.read_array(path))
        };
        path.pop()?;
        outcome
    }

    /// Read the map `path` + `prop`, converting stored ids back into keys.
    pub fn read_map<K, E: Element>(
        &self,
        path: &mut PathBuilder,
        prop: &str,
        save_separately: bool,
        converter: &dyn IdConverter<K>,
    ) -> SaveResult<Option<Vec<(K, E)>>> {
        require_segment(prop)?;
        path.push(prop, PathKind::Collection)?;
        let outcome = self.read_map_at::<K, E>(path, save_separately, converter);
        path.pop()?;
        outcome
    }

    fn read_map_at<K, E: Element>(
        &self,
        path: &mut PathBuilder,
        save_separately: bool,
        converter: &dyn IdConverter<K>,
    ) -> SaveResult<Option<Vec<(K, E)>>> {
        let entries = if save_separately && E::SAVABLE {
            self.read_elements::<E>(path)?
        } else {
            match self.store.read_map(path)? {
                None => None,
                Some(entries) => Some(
                    entries
                        .into_iter()
                        .map(|(id, value)| Ok((id, E::from_value(value)?)))
                        .collect::<SaveResult<Vec<_>>>()?,
                ),
            }
        };
        entries
            .map(|entries| {
                entries
                    .into_iter()
                    .map(|(id, item)| Ok((converter.from_id(&id)?, item)))
                    .collect::<SaveResult<Vec<_>>>()
            })
            .transpose()
    }

    fn read_values<E: Element>(
        &self,
        path: &PathBuilder,
        read: impl FnOnce(&dyn Storage, &PathBuilder) -> lifeline_store::StoreResult<Option<Vec<Value>>>,
    ) -> SaveResult<Option<Vec<E>>> {
        match read(self.store.as_ref(), path)? {
            None => Ok(None),
            Some(values) => values
                .into_iter()
                .map(E::from_value)
                .collect::<SaveResult<Vec<_>>>()
                .map(Some),
        }
    }

    /// Every element stored separately below the collection at `path`, in
    /// stored order, as `(id, element)`.
    fn read_elements<E: Element>(&self, path: &mut PathBuilder) -> SaveResult<Option<Vec<(String, E)>>> {
        let children = self.store.read_children(path)?;
        if children.is_empty() {
            return Ok(None);
        }
        let mut items = Vec::with_capacity(children.len());
        for (id, record) in children {
            let item = E::from_value(record.value)?;
            if let Some(node) = item.savable() {
                path.push(&id, PathKind::Collection)?;
                let outcome = self.finish_read(node.as_ref(), E::ORDERED, record.order, path);
                path.pop()?;
                outcome?;
            }
            items.push((id, item));
        }
        Ok(Some(items))
    }

    // ---- core ----

    /// Dirty-gated write of `node` at exactly `path`.
    fn write_node(&self, node: &dyn Savable, path: &mut PathBuilder) -> SaveResult<()> {
        let header = node.header();
        if !header.take_dirty() {
            debug!(path = %path, "node clean, save skipped");
            return Ok(());
        }
        let outcome = self.write_record(node, path);
        if outcome.is_err() {
            header.mark_dirty();
        }
        outcome
    }

    fn write_record(&self, node: &dyn Savable, path: &mut PathBuilder) -> SaveResult<()> {
        node.before_serialize(self);
        let record = StoredRecord::with_order(node.save_record()?, node.header().order());
        self.store.save(path, &record)?;
        if node.header().is_root() {
            info!(path = %path, "root saved");
        } else {
            debug!(path = %path, "node saved");
        }
        node.after_serialize(self, path)
    }

    /// Read and rebuild the node stored at exactly `path`.
    fn read_node<T: Restore>(&self, path: &mut PathBuilder) -> SaveResult<Option<Arc<T>>> {
        let Some(record) = self.store.read(path)? else {
            debug!(path = %path, "nothing stored");
            return Ok(None);
        };
        let node = T::restore(record.value)?;
        self.finish_read(node.as_ref(), T::ORDERED, record.order, path)?;
        debug!(path = %path, "node read");
        Ok(Some(node))
    }

    fn finish_read(
        &self,
        node: &dyn Savable,
        ordered: bool,
        order: Option<usize>,
        path: &mut PathBuilder,
    ) -> SaveResult<()> {
        let header = node.header();
        if let Some(id) = path.last_segment() {
            header.set_id_if_unset(id);
        }
        if ordered {
            if let Some(order) = order {
                header.load_order(order);
            }
        }
        node.after_deserialize(self, path)?;
        header.set_dirty(false);
        Ok(())
    }
}

impl std::fmt::Debug for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializer")
            .field("policy", &self.policy())
            .field("jobs", &self.jobs)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{harness, harness_with, Item, Player};
    use crate::node::AsNode;
    use lifeline_store::{InMemoryStore, StoreError, StoreOp};
    use serde_json::json;

    fn root(serializer: &Arc<Serializer>, id: &str) -> Arc<Player> {
        let player = Player::new(id, false);
        player.header().mark_root(Arc::clone(serializer));
        player
    }

    // ---- dirty gate ----

    #[test]
    fn save_clears_dirty_and_repeat_is_noop() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        let node = player.as_node();

        serializer.fresh_save_sync(&node).unwrap();
        assert!(!player.header().is_dirty());
        assert_eq!(store.writes(), vec![StoreOp::Save("p1".into())]);

        store.take_ops();
        serializer.fresh_save_sync(&node).unwrap();
        serializer.save(node.as_ref(), &mut PathBuilder::new(), PathKind::Property).unwrap();
        assert!(store.ops().is_empty());
    }

    #[test]
    fn failed_write_leaves_node_dirty() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        store.fail_next_write(StoreError::Backend("disk full".into()));

        let err = serializer.fresh_save_sync(&player.as_node()).unwrap_err();
        assert_eq!(err, SaveError::Store(StoreError::Backend("disk full".into())));
        assert!(player.header().is_dirty());
    }

    #[test]
    fn fresh_ops_require_an_id() {
        let (_store, serializer) = harness();
        let item = Item::new("nameless", 0).as_node();
        assert_eq!(serializer.fresh_save_sync(&item), Err(SaveError::EmptyId));
        assert_eq!(serializer.fresh_has_sync(&item), Err(SaveError::EmptyId));
        assert!(matches!(serializer.fresh_delete_async(&item), Err(SaveError::EmptyId)));
        assert!(matches!(serializer.fresh_read_sync::<Player>(""), Err(SaveError::EmptyId)));
    }

    #[test]
    fn scratch_path_is_fail_fast() {
        let (_store, serializer) = harness();
        let player = root(&serializer, "p1");
        let _held = serializer.begin_fresh_action().unwrap();
        assert_eq!(
            serializer.fresh_save_sync(&player.as_node()),
            Err(SaveError::PathBuilderBusy)
        );
    }

    // ---- read / has / delete ----

    #[test]
    fn read_restores_id_and_clears_dirty() {
        let (_store, serializer) = harness();
        let player = root(&serializer, "p1");
        player.set_gold(25);

        let loaded = serializer.fresh_read_sync::<Player>("p1").unwrap().unwrap();
        assert_eq!(loaded.header().id().as_deref(), Some("p1"));
        assert_eq!(loaded.gold(), 25);
        assert!(!loaded.header().is_dirty());
        assert!(serializer.fresh_read_sync::<Player>("missing").unwrap().is_none());
    }

    #[test]
    fn has_and_delete() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        let node = player.as_node();
        assert!(!serializer.fresh_has_sync(&node).unwrap());
        serializer.fresh_save_sync(&node).unwrap();
        assert!(serializer.fresh_has_sync(&node).unwrap());

        serializer.fresh_delete_sync(&node).unwrap();
        assert!(store.is_empty());
        assert!(player.header().is_dirty());
    }

    #[test]
    fn property_values_save_under_owner() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        serializer
            .fresh_save_value_sync(&player.as_node(), "motto", &json!("onward"))
            .unwrap();
        assert_eq!(store.get("p1.motto").unwrap().value, json!("onward"));

        let mut path = PathBuilder::parse("p1").unwrap();
        assert_eq!(
            serializer.read_value(&mut path, "motto", PathKind::Property).unwrap(),
            Some(json!("onward"))
        );
        assert_eq!(path.as_str(), "p1");
    }

    // ---- async ----

    #[tokio::test]
    async fn async_saves_to_one_path_coalesce() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        let node = player.as_node();

        let first = serializer.fresh_save_async(&node).unwrap();
        let second = serializer.fresh_save_async(&node).unwrap();
        assert_eq!(serializer.jobs().pending_len(), 1);

        serializer.jobs().force_complete();
        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert_eq!(store.writes(), vec![StoreOp::Save("p1".into())]);
    }

    #[test]
    fn sync_read_observes_queued_writes() {
        let (_store, serializer) = harness_with(SerializerConfig::asynchronous());
        let player = root(&serializer, "p1");
        for gold in 1..=5 {
            player.set_gold(gold);
        }
        assert!(serializer.jobs().has_pending());

        let loaded = serializer.fresh_read_sync::<Player>("p1").unwrap().unwrap();
        assert_eq!(loaded.gold(), 5);
        assert!(!serializer.jobs().has_pending());
    }

    #[tokio::test]
    async fn cancelled_save_writes_nothing() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        let handle = serializer.fresh_save_async(&player.as_node()).unwrap();
        handle.cancel();
        serializer.jobs().force_complete();
        assert_eq!(handle.await, Err(SaveError::Cancelled));
        assert!(store.writes().is_empty());
        assert!(player.header().is_dirty());
    }

    #[tokio::test]
    async fn cancelling_a_coalesced_save_keeps_the_earlier_one() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        let first = serializer.fresh_save_async(&player.as_node()).unwrap();
        let second = serializer.fresh_save_async(&player.as_node()).unwrap();
        assert_eq!(serializer.jobs().pending_len(), 1);

        second.cancel();
        serializer.jobs().force_complete();
        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Err(SaveError::Cancelled));
        assert_eq!(store.writes(), vec![StoreOp::Save("p1".into())]);
        assert!(!player.header().is_dirty());
    }

    #[tokio::test]
    async fn async_read_and_has() {
        let (_store, serializer) = harness();
        let player = root(&serializer, "p1");
        player.set_gold(3);

        let read = serializer.fresh_read_async::<Player>("p1").unwrap();
        // A different result type on the same path cannot join the read.
        assert!(matches!(
            serializer.fresh_has_async(&player.as_node()),
            Err(SaveError::JobKindMismatch(_))
        ));
        serializer.jobs().force_complete();
        assert_eq!(read.await.unwrap().unwrap().gold(), 3);

        let has = serializer.fresh_has_async(&player.as_node()).unwrap();
        serializer.jobs().force_complete();
        assert!(has.await.unwrap());
    }

    #[test]
    fn job_outlives_serializer() {
        let store = Arc::new(InMemoryStore::new());
        let jobs = Arc::new(JobQueue::new());
        let serializer = Serializer::builder(store.clone())
            .job_queue(Arc::clone(&jobs))
            .build();
        let player = Player::new("p1", false);
        let handle = serializer.fresh_save_async(&player.as_node()).unwrap();
        drop(serializer);
        jobs.force_complete();
        assert_eq!(handle.wait(), Err(SaveError::SerializerDropped));
        assert!(store.is_empty());
    }

    // ---- id / order updates ----

    #[test]
    fn update_id_is_dirty_gated() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        let node = player.as_node();
        serializer.fresh_save_sync(&node).unwrap();

        player.header().set_id("p9");
        serializer.fresh_update_id_sync(&node, "p1").unwrap();
        assert_eq!(store.keys(), vec!["p1".to_string()]);

        player.header().mark_dirty();
        serializer.fresh_update_id_sync(&node, "p1").unwrap();
        assert_eq!(store.keys(), vec!["p9".to_string()]);
    }

    #[test]
    fn queued_rename_is_keyed_by_old_path() {
        let (store, serializer) = harness();
        let player = root(&serializer, "p1");
        let node = player.as_node();
        serializer.fresh_save_sync(&node).unwrap();

        player.header().set_id("p2");
        player.header().mark_dirty();
        serializer.fresh_update_id_async(&node, "p1").unwrap().detach();
        serializer.fresh_save_async(&node).unwrap().detach();
        assert_eq!(serializer.jobs().pending_len(), 2);
        serializer.jobs().force_complete();
        assert_eq!(store.keys(), vec!["p2".to_string()]);
    }

    #[test]
    fn update_order_touches_only_the_marker() {
        let (store, serializer) = harness();
        let player = Player::new("p1", true);
        player.header().mark_root(Arc::clone(&serializer));
        let sword = Item::new("sword", 1);
        player.items.push(sword.clone()).unwrap();
        store.take_ops();

        sword.header().set_order(4);
        serializer.fresh_update_order_sync(&sword.as_node()).unwrap();
        assert_eq!(store.writes(), vec![StoreOp::UpdateOrder("p1/items/0".into(), 4)]);
        assert_eq!(store.get("p1/items/0").unwrap().order, Some(4));
    }

    #[test]
    fn create_data_assigns_fresh_ids() {
        let (_store, serializer) = harness();
        let a = serializer.create_data(Item::new("a", 0));
        let b = serializer.create_data(Item::new("b", 0));
        assert!(a.header().has_id());
        assert_ne!(a.header().id(), b.header().id());
    }
}
