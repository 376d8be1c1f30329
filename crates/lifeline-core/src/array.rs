//! Fixed-size observable array.
//!
//! Savable elements are always reached by their index. The length is set at
//! construction; inserting, removing and resizing are unsupported.

use std::sync::{Arc, Weak};

use lifeline_path::PathBuilder;
use parking_lot::RwLock;
use serde_json::Value;

use crate::change::{Change, Items};
use crate::container::{self, Backing, Container, ContainerCore, ListenerId};
use crate::element::Element;
use crate::error::{SaveError, SaveResult};
use crate::node::{NodeHeader, Propagation, Savable};
use crate::serializer::Serializer;

/// A change-tracked fixed-length array.
pub struct ObservableArray<E: Element> {
    core: ContainerCore<E>,
    items: RwLock<Vec<E>>,
    this: Weak<Self>,
}

impl<E: Element> ObservableArray<E> {
    /// An array of `items.len()` slots reached from its owner by `id`.
    pub fn new(id: impl Into<String>, save_separately: bool, items: Vec<E>) -> Arc<Self> {
        let id = id.into();
        let array = Arc::new_cyclic(|this| Self {
            core: ContainerCore::new(id, save_separately),
            items: RwLock::new(Vec::new()),
            this: this.clone(),
        });
        array.adopt(items, false);
        array
    }

    fn owner(&self) -> Weak<dyn Savable> {
        self.this.clone()
    }

    fn place(owner: &Weak<dyn Savable>, item: &E, index: usize, loaded: bool) {
        container::attach(owner, item, &index.to_string());
        if let Some(node) = item.savable().filter(|_| E::ORDERED) {
            if loaded {
                node.header().load_order(index);
            } else {
                node.header().set_order(index);
            }
        }
    }

    fn adopt(&self, items: Vec<E>, loaded: bool) {
        let owner = self.owner();
        for (index, item) in items.iter().enumerate() {
            Self::place(&owner, item, index, loaded);
        }
        if loaded {
            container::settle(&items);
        }
        let mut slot = self.items.write();
        let old = std::mem::replace(&mut *slot, items);
        for item in &old {
            if !slot.iter().any(|held| held.same(item)) {
                container::detach(item);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<E> {
        self.items.read().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<E> {
        self.items.read().clone()
    }

    pub fn index_of(&self, item: &E) -> Option<usize> {
        self.items.read().iter().position(|held| held.same(item))
    }

    pub fn subscribe(&self, listener: impl Fn(&Change<E>) + Send + Sync + 'static) -> ListenerId {
        self.core.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.core.unsubscribe(id)
    }

    /// Replace the element at `index`, returning the old one.
    pub fn set(&self, index: usize, item: E) -> SaveResult<E> {
        let old = {
            let mut items = self.items.write();
            let len = items.len();
            let Some(slot) = items.get_mut(index) else {
                return Err(SaveError::IndexOutOfBounds { index, len });
            };
            let old = std::mem::replace(slot, item.clone());
            container::detach(&old);
            Self::place(&self.owner(), &item, index, false);
            if let Some(node) = item.savable() {
                node.header().mark_dirty();
            }
            old
        };
        container::emit(
            self,
            Change::Replace {
                old: Items::One(old.clone()),
                new: Items::One(item),
                index: Some(index),
            },
        )?;
        Ok(old)
    }

    /// Replace every slot. `items` must have the current length.
    pub fn swap_source(&self, items: Vec<E>) -> SaveResult<()> {
        if items.len() != self.len() {
            return Err(SaveError::Unsupported("resizing a fixed array"));
        }
        for node in items.iter().filter_map(E::savable) {
            node.header().mark_dirty();
        }
        self.adopt(items.clone(), false);
        container::emit(self, Change::Reset { items })
    }

    pub fn insert(&self, _index: usize, _item: E) -> SaveResult<()> {
        Err(SaveError::Unsupported("insert into a fixed array"))
    }

    pub fn remove_at(&self, _index: usize) -> SaveResult<E> {
        Err(SaveError::Unsupported("remove from a fixed array"))
    }

    pub fn clear(&self) -> SaveResult<()> {
        Err(SaveError::Unsupported("clear a fixed array"))
    }

    /// Replace the content with stored data, without emitting a change.
    pub fn load_source(&self, items: Vec<E>) {
        self.adopt(items, true);
        self.core.header().set_dirty(false);
    }
}

impl<E: Element> Backing<E> for ObservableArray<E> {
    fn core(&self) -> &ContainerCore<E> {
        &self.core
    }

    fn node(&self) -> Option<Arc<dyn Savable>> {
        let node: Arc<dyn Savable> = self.this.upgrade()?;
        Some(node)
    }

    fn elements(&self) -> Vec<E> {
        self.to_vec()
    }

    fn tracks_order(&self) -> bool {
        E::ORDERED
    }

    fn write_blob(&self, serializer: &Serializer, path: &PathBuilder) -> SaveResult<()> {
        serializer.save_array(path, &self.to_vec())
    }
}

impl<E: Element> Savable for ObservableArray<E> {
    fn header(&self) -> &NodeHeader {
        self.core.header()
    }

    fn save_record(&self) -> SaveResult<Value> {
        container::array_value(&self.to_vec())
    }

    fn for_each_child(&self, visit: &mut dyn FnMut(&Arc<dyn Savable>)) {
        for node in self.to_vec().iter().filter_map(E::savable) {
            visit(&node);
        }
    }

    fn child_changed(&self, child: &Arc<dyn Savable>) -> SaveResult<Propagation> {
        let found = {
            let items = self.items.read();
            container::position_of(&items, child).map(|index| (items[index].clone(), Some(index)))
        };
        container::child_replaced(self, found)
    }

    fn invalidated(&self, _recursive: bool) -> SaveResult<Propagation> {
        container::invalidated(self)
    }
}

impl<E: Element> Container for ObservableArray<E> {
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
        if let Some(items) = serializer.read_array::<E>(owner_path, &id, true)? {
            self.load_source(items);
        }
        self.core.header().set_dirty(false);
        Ok(())
    }

    fn inline_value(&self) -> SaveResult<Option<Value>> {
        if self.core.save_separately() {
            return Ok(None);
        }
        container::array_value(&self.to_vec()).map(Some)
    }

    fn load_inline(&self, value: Value) -> SaveResult<()> {
        let items = container::from_array_value(value)?;
        self.load_source(items);
        Ok(())
    }
}

impl<E: Element> std::fmt::Debug for ObservableArray<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableArray")
            .field("core", &self.core)
            .field("len", &self.len())
            .finish()
    }
}
