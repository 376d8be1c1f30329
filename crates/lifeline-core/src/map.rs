//! Keyed observable map.
//!
//! Each entry is stored under the id its key converts to. The converter is
//! looked up once, at construction, so a key type without a registered
//! converter fails there rather than on first write.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use lifeline_path::PathBuilder;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::change::{Change, Items};
use crate::container::{self, Backing, Container, ContainerCore, ListenerId};
use crate::convert::{IdConverter, IdConverters};
use crate::element::Element;
use crate::error::{SaveError, SaveResult};
use crate::node::{NodeHeader, Propagation, Savable};
use crate::serializer::Serializer;

/// A change-tracked map from `K` to `E`, iterated in id order.
pub struct ObservableMap<K, E: Element> {
    core: ContainerCore<E>,
    entries: RwLock<BTreeMap<String, (K, E)>>,
    converter: Arc<dyn IdConverter<K>>,
    this: Weak<Self>,
}

impl<K, E> ObservableMap<K, E>
where
    K: Clone + Send + Sync + 'static,
    E: Element,
{
    /// An empty map reached from its owner by `id`.
    pub fn new(id: impl Into<String>, save_separately: bool, converters: &IdConverters) -> SaveResult<Arc<Self>> {
        let converter = converters.get::<K>()?;
        let id = id.into();
        Ok(Arc::new_cyclic(|this| Self {
            core: ContainerCore::new(id, save_separately),
            entries: RwLock::new(BTreeMap::new()),
            converter,
            this: this.clone(),
        }))
    }

    /// Like [`Self::new`] with the built-in converters.
    pub fn with_default_converters(id: impl Into<String>, save_separately: bool) -> SaveResult<Arc<Self>> {
        Self::new(id, save_separately, &IdConverters::with_defaults())
    }

    fn owner(&self) -> Weak<dyn Savable> {
        self.this.clone()
    }

    fn key_id(&self, key: &K) -> SaveResult<String> {
        let id = self.converter.to_id(key);
        if id.is_empty() {
            return Err(SaveError::InvalidKey {
                key: id,
                reason: "key converts to an empty id".into(),
            });
        }
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get(&self, key: &K) -> Option<E> {
        let id = self.converter.to_id(key);
        self.entries.read().get(&id).map(|(_, item)| item.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let id = self.converter.to_id(key);
        self.entries.read().contains_key(&id)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.read().values().map(|(key, _)| key.clone()).collect()
    }

    pub fn values(&self) -> Vec<E> {
        self.entries.read().values().map(|(_, item)| item.clone()).collect()
    }

    pub fn entries(&self) -> Vec<(K, E)> {
        self.entries.read().values().cloned().collect()
    }

    pub fn subscribe(&self, listener: impl Fn(&Change<E>) + Send + Sync + 'static) -> ListenerId {
        self.core.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.core.unsubscribe(id)
    }

    /// Insert or replace the entry for `key`, returning the previous element.
    pub fn insert(&self, key: K, item: E) -> SaveResult<Option<E>> {
        let id = self.key_id(&key)?;
        container::attach(&self.owner(), &item, &id);
        if let Some(node) = item.savable() {
            node.header().mark_dirty();
        }
        let previous = self.entries.write().insert(id, (key, item.clone()));
        match previous {
            Some((_, old)) => {
                if !old.same(&item) {
                    container::detach(&old);
                }
                container::emit(
                    self,
                    Change::Replace {
                        old: Items::One(old.clone()),
                        new: Items::One(item),
                        index: None,
                    },
                )?;
                Ok(Some(old))
            }
            None => {
                container::emit(
                    self,
                    Change::Add {
                        items: Items::One(item),
                        index: None,
                    },
                )?;
                Ok(None)
            }
        }
    }

    /// Remove the entry for `key`, returning its element.
    pub fn remove(&self, key: &K) -> SaveResult<Option<E>> {
        let id = self.converter.to_id(key);
        let Some((_, item)) = self.entries.write().remove(&id) else {
            return Ok(None);
        };
        container::detach(&item);
        container::emit(
            self,
            Change::Remove {
                items: Items::One(item.clone()),
                index: None,
            },
        )?;
        Ok(Some(item))
    }

    /// Remove every entry.
    pub fn clear(&self) -> SaveResult<()> {
        self.adopt(Vec::new(), false)?;
        container::emit(self, Change::Reset { items: Vec::new() })
    }

    /// Replace the whole content.
    pub fn swap_source(&self, entries: Vec<(K, E)>) -> SaveResult<()> {
        let items: Vec<E> = entries.iter().map(|(_, item)| item.clone()).collect();
        self.adopt(entries, false)?;
        for node in items.iter().filter_map(E::savable) {
            node.header().mark_dirty();
        }
        container::emit(self, Change::Reset { items })
    }

    /// Replace the content with stored data, without emitting a change.
    pub fn load_source(&self, entries: Vec<(K, E)>) -> SaveResult<()> {
        self.adopt(entries, true)?;
        self.core.header().set_dirty(false);
        Ok(())
    }

    fn adopt(&self, entries: Vec<(K, E)>, loaded: bool) -> SaveResult<()> {
        let owner = self.owner();
        let mut fresh = BTreeMap::new();
        for (key, item) in entries {
            let id = self.key_id(&key)?;
            container::attach(&owner, &item, &id);
            if loaded {
                if let Some(node) = item.savable() {
                    node.header().set_dirty(false);
                }
            }
            fresh.insert(id, (key, item));
        }
        let mut slot = self.entries.write();
        let old = std::mem::replace(&mut *slot, fresh);
        for (_, item) in old.values() {
            if !slot.values().any(|(_, held)| held.same(item)) {
                container::detach(item);
            }
        }
        Ok(())
    }

    fn by_id(&self) -> Vec<(String, E)> {
        self.entries
            .read()
            .iter()
            .map(|(id, (_, item))| (id.clone(), item.clone()))
            .collect()
    }
}

impl<K, E> Backing<E> for ObservableMap<K, E>
where
    K: Clone + Send + Sync + 'static,
    E: Element,
{
    fn core(&self) -> &ContainerCore<E> {
        &self.core
    }

    fn node(&self) -> Option<Arc<dyn Savable>> {
        let node: Arc<dyn Savable> = self.this.upgrade()?;
        Some(node)
    }

    fn elements(&self) -> Vec<E> {
        self.values()
    }

    fn tracks_order(&self) -> bool {
        false
    }

    fn write_blob(&self, serializer: &Serializer, path: &PathBuilder) -> SaveResult<()> {
        serializer.save_map(path, &self.by_id())
    }
}

impl<K, E> Savable for ObservableMap<K, E>
where
    K: Clone + Send + Sync + 'static,
    E: Element,
{
    fn header(&self) -> &NodeHeader {
        self.core.header()
    }

    fn save_record(&self) -> SaveResult<Value> {
        let mut object = Map::new();
        for (id, item) in self.by_id() {
            object.insert(id, item.to_value()?);
        }
        Ok(Value::Object(object))
    }

    fn for_each_child(&self, visit: &mut dyn FnMut(&Arc<dyn Savable>)) {
        for node in self.values().iter().filter_map(E::savable) {
            visit(&node);
        }
    }

    fn child_changed(&self, child: &Arc<dyn Savable>) -> SaveResult<Propagation> {
        let values = self.values();
        let found = container::position_of(&values, child).map(|index| (values[index].clone(), None));
        container::child_replaced(self, found)
    }

    fn invalidated(&self, _recursive: bool) -> SaveResult<Propagation> {
        container::invalidated(self)
    }
}

impl<K, E> Container for ObservableMap<K, E>
where
    K: Clone + Send + Sync + 'static,
    E: Element,
{
    fn save_separately(&self) -> bool {
        self.core.save_separately()
    }

    fn flush(&self, serializer: &Serializer, owner_path: &mut PathBuilder) -> SaveResult<()> {
        container::flush(self, serializer, owner_path)
    }

    fn load(&self, serializer: &Serializer, owner_path: &mut PathBuilder) -> SaveResult<()> {
        if !self.core.save_separately() {
            return Ok(());
        }
        let id = self.core.header().id().ok_or(SaveError::EmptyId)?;
        let entries = serializer.read_map::<K, E>(owner_path, &id, true, self.converter.as_ref())?;
        self.load_source(entries.unwrap_or_default())
    }

    fn inline_value(&self) -> SaveResult<Option<Value>> {
        if self.core.save_separately() {
            return Ok(None);
        }
        self.save_record().map(Some)
    }

    fn load_inline(&self, value: Value) -> SaveResult<()> {
        let object = match value {
            Value::Object(object) => object,
            Value::Null => Map::new(),
            other => {
                return Err(SaveError::Serialization(format!(
                    "expected an object of entries, found {other}"
                )))
            }
        };
        let entries = object
            .into_iter()
            .map(|(id, value)| Ok((self.converter.from_id(&id)?, E::from_value(value)?)))
            .collect::<SaveResult<Vec<_>>>()?;
        self.load_source(entries)
    }
}

impl<K, E: Element> std::fmt::Debug for ObservableMap<K, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableMap")
            .field("core", &self.core)
            .field("len", &self.entries.read().len())
            .finish()
    }
}
