//! Growable observable list.
//!
//! Savable elements are reached by an integer id. An element arriving
//! without an id (or with one already taken in this list) gets the smallest
//! free integer not below its position, so ids stay unique after inserts and
//! removals while positions live in the order marker of order-sensitive
//! elements.

use std::collections::HashSet;
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

/// A change-tracked `Vec`.
pub struct ObservableList<E: Element> {
    core: ContainerCore<E>,
    items: RwLock<Vec<E>>,
    this: Weak<Self>,
}

fn taken_ids<E: Element>(items: &[E]) -> HashSet<String> {
    items
        .iter()
        .filter_map(E::savable)
        .filter_map(|node| node.header().id())
        .collect()
}

/// Keep the id of `item` if it is free, otherwise pick the smallest free
/// integer id from `start` on. Returns the id to use.
fn claim_id<E: Element>(item: &E, taken: &mut HashSet<String>, start: usize) -> Option<String> {
    let node = item.savable()?;
    let id = match node.header().id() {
        Some(id) if !taken.contains(&id) => id,
        _ => (start..)
            .map(|candidate| candidate.to_string())
            .find(|candidate| !taken.contains(candidate))?,
    };
    taken.insert(id.clone());
    Some(id)
}

impl<E: Element> ObservableList<E> {
    /// An empty list reached from its owner by `id`.
    pub fn new(id: impl Into<String>, save_separately: bool) -> Arc<Self> {
        let id = id.into();
        Arc::new_cyclic(|this| Self {
            core: ContainerCore::new(id, save_separately),
            items: RwLock::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// A list holding `items`, attached without emitting a change.
    pub fn with_items(id: impl Into<String>, save_separately: bool, items: Vec<E>) -> Arc<Self> {
        let list = Self::new(id, save_separately);
        list.adopt(items, false);
        list
    }

    fn owner(&self) -> Weak<dyn Savable> {
        self.this.clone()
    }

    /// Attach `items` in place of the current content; returns what was
    /// there. `loaded` keeps stored orders and leaves elements clean.
    fn adopt(&self, items: Vec<E>, loaded: bool) -> Vec<E> {
        let owner = self.owner();
        let mut slot = self.items.write();
        let mut taken = HashSet::new();
        for (index, item) in items.iter().enumerate() {
            if let Some(id) = claim_id(item, &mut taken, index) {
                container::attach(&owner, item, &id);
            }
            if let Some(node) = item.savable() {
                if !E::ORDERED {
                    continue;
                }
                if loaded {
                    node.header().load_order(index);
                } else {
                    node.header().set_order(index);
                }
            }
        }
        if loaded {
            container::settle(&items);
        }
        let old = std::mem::replace(&mut *slot, items);
        for item in &old {
            if !slot.iter().any(|held| held.same(item)) {
                container::detach(item);
            }
        }
        old
    }

    // ---- reads ----

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

    /// Position of `item`, by node identity for savable elements.
    pub fn index_of(&self, item: &E) -> Option<usize> {
        self.items.read().iter().position(|held| held.same(item))
    }

    pub fn contains(&self, item: &E) -> bool {
        self.index_of(item).is_some()
    }

    pub fn subscribe(&self, listener: impl Fn(&Change<E>) + Send + Sync + 'static) -> ListenerId {
        self.core.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.core.unsubscribe(id)
    }

    // ---- mutations ----

    pub fn push(&self, item: E) -> SaveResult<()> {
        let index = self.len();
        self.insert(index, item)
    }

    pub fn extend(&self, items: Vec<E>) -> SaveResult<()> {
        let index = self.len();
        self.insert_many(index, items)
    }

    pub fn insert(&self, index: usize, item: E) -> SaveResult<()> {
        self.splice_in(index, vec![item.clone()])?;
        container::emit(
            self,
            Change::Add {
                items: Items::One(item),
                index: Some(index),
            },
        )
    }

    pub fn insert_many(&self, index: usize, items: Vec<E>) -> SaveResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let added = items.clone();
        self.splice_in(index, items)?;
        container::emit(
            self,
            Change::Add {
                items: Items::Many(added),
                index: Some(index),
            },
        )
    }

    fn splice_in(&self, index: usize, incoming: Vec<E>) -> SaveResult<()> {
        let owner = self.owner();
        let mut items = self.items.write();
        if index > items.len() {
            return Err(SaveError::IndexOutOfBounds {
                index,
                len: items.len(),
            });
        }
        let mut taken = taken_ids(&items);
        for (offset, item) in incoming.iter().enumerate() {
            if let Some(id) = claim_id(item, &mut taken, index + offset) {
                container::attach(&owner, item, &id);
            }
            if let Some(node) = item.savable() {
                node.header().mark_dirty();
            }
        }
        items.splice(index..index, incoming);
        Self::resync(&items, index);
        Ok(())
    }

    /// Move every order-sensitive element from `from` on to its position.
    fn resync(items: &[E], from: usize) {
        if !E::ORDERED {
            return;
        }
        for (index, item) in items.iter().enumerate().skip(from) {
            if let Some(node) = item.savable() {
                node.header().set_order(index);
            }
        }
    }

    /// Replace the element at `index`, returning the old one.
    ///
    /// An incoming element without a usable id takes over the id of the one
    /// it replaces.
    pub fn set(&self, index: usize, item: E) -> SaveResult<E> {
        let old = {
            let owner = self.owner();
            let mut items = self.items.write();
            let len = items.len();
            if index >= len {
                return Err(SaveError::IndexOutOfBounds { index, len });
            }
            let mut taken: HashSet<String> = items
                .iter()
                .enumerate()
                .filter(|(held, _)| *held != index)
                .filter_map(|(_, held)| held.savable())
                .filter_map(|node| node.header().id())
                .collect();
            let old = std::mem::replace(&mut items[index], item.clone());
            container::detach(&old);
            if let (Some(node), Some(old_node)) = (item.savable(), old.savable()) {
                let usable = node.header().id().is_some_and(|id| !taken.contains(&id));
                if !usable {
                    if let Some(old_id) = old_node.header().id() {
                        node.header().set_id(old_id);
                    }
                }
            }
            if let Some(id) = claim_id(&item, &mut taken, index) {
                container::attach(&owner, &item, &id);
            }
            if let Some(node) = item.savable() {
                node.header().mark_dirty();
            }
            Self::resync(&items, index);
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

    /// Remove the first occurrence of `item`. Returns `false` if absent.
    pub fn remove(&self, item: &E) -> SaveResult<bool> {
        match self.index_of(item) {
            Some(index) => self.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn remove_at(&self, index: usize) -> SaveResult<E> {
        let removed = self.take_range(index, 1)?;
        let item = removed
            .into_iter()
            .next()
            .ok_or(SaveError::IndexOutOfBounds { index, len: self.len() })?;
        container::emit(
            self,
            Change::Remove {
                items: Items::One(item.clone()),
                index: Some(index),
            },
        )?;
        Ok(item)
    }

    /// Remove `count` elements starting at `index`.
    pub fn remove_range(&self, index: usize, count: usize) -> SaveResult<Vec<E>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let removed = self.take_range(index, count)?;
        container::emit(
            self,
            Change::Remove {
                items: Items::Many(removed.clone()),
                index: Some(index),
            },
        )?;
        Ok(removed)
    }

    fn take_range(&self, index: usize, count: usize) -> SaveResult<Vec<E>> {
        let mut items = self.items.write();
        let len = items.len();
        let end = index.checked_add(count).filter(|end| *end <= len);
        let Some(end) = end else {
            return Err(SaveError::IndexOutOfBounds { index, len });
        };
        let removed: Vec<E> = items.drain(index..end).collect();
        for item in &removed {
            container::detach(item);
        }
        Self::resync(&items, index);
        Ok(removed)
    }

    /// Move the element at `from` to `to`, shifting the ones in between.
    pub fn move_item(&self, from: usize, to: usize) -> SaveResult<()> {
        if from == to {
            return Ok(());
        }
        let (old, new, start) = {
            let mut items = self.items.write();
            let len = items.len();
            if from >= len || to >= len {
                return Err(SaveError::IndexOutOfBounds {
                    index: from.max(to),
                    len,
                });
            }
            let (start, end) = (from.min(to), from.max(to));
            let old: Vec<E> = items[start..=end].to_vec();
            let item = items.remove(from);
            items.insert(to, item);
            Self::resync(&items, start);
            (old, items[start..=end].to_vec(), start)
        };
        container::emit(
            self,
            Change::Replace {
                old: Items::Many(old),
                new: Items::Many(new),
                index: Some(start),
            },
        )
    }

    /// Remove every element.
    pub fn clear(&self) -> SaveResult<()> {
        self.adopt(Vec::new(), false);
        container::emit(self, Change::Reset { items: Vec::new() })
    }

    /// Replace the whole content.
    pub fn swap_source(&self, items: Vec<E>) -> SaveResult<()> {
        for node in items.iter().filter_map(E::savable) {
            node.header().mark_dirty();
        }
        self.adopt(items.clone(), false);
        container::emit(self, Change::Reset { items })
    }

    /// Replace the content with stored data, without emitting a change.
    pub fn load_source(&self, items: Vec<E>) {
        self.adopt(items, true);
        self.core.header().set_dirty(false);
    }
}

impl<E: Element> Backing<E> for ObservableList<E> {
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
        serializer.save_list(path, &self.to_vec())
    }
}

impl<E: Element> Savable for ObservableList<E> {
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

impl<E: Element> Container for ObservableList<E> {
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
        let items = serializer.read_list::<E>(owner_path, &id, true)?;
        self.load_source(items.unwrap_or_default());
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

impl<E: Element> std::fmt::Debug for ObservableList<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableList")
            .field("core", &self.core)
            .field("len", &self.len())
            .finish()
    }
}
