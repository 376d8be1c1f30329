//! Shared machinery of the observable containers.
//!
//! A container is itself a savable node: its owner reaches it by a
//! collection segment equal to the container id, and every savable element
//! is a child reached one `/` below. Each mutation produces exactly one
//! [`Change`], which is routed here:
//!
//! - saved separately, with a serializer in reach: written at once as
//!   per-element saves, deletes and order updates (or as one blob for plain
//!   values), after draining the job queue;
//! - otherwise: the container and its owner are marked dirty and the change
//!   bubbles up like any node change, so the owner's next save carries it.
//!
//! Listeners registered with `subscribe` see every change after routing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lifeline_path::{PathBuilder, PathKind};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::change::{Change, Items};
use crate::element::Element;
use crate::error::{SaveError, SaveResult};
use crate::graph;
use crate::node::{NodeHeader, Propagation, Savable};
use crate::serializer::Serializer;

/// Handle returned by `subscribe`.
pub type ListenerId = u64;

type Listener<E> = Arc<dyn Fn(&Change<E>) + Send + Sync>;

/// Header, routing flag and listeners shared by every container kind.
pub struct ContainerCore<E> {
    header: NodeHeader,
    save_separately: bool,
    listeners: RwLock<Vec<(ListenerId, Listener<E>)>>,
    next_listener: AtomicU64,
}

impl<E> ContainerCore<E> {
    pub fn new(id: impl Into<String>, save_separately: bool) -> Self {
        Self {
            header: NodeHeader::with_id(id),
            save_separately,
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn header(&self) -> &NodeHeader {
        &self.header
    }

    pub fn save_separately(&self) -> bool {
        self.save_separately
    }

    /// Call `listener` with every change from now on.
    pub fn subscribe(&self, listener: impl Fn(&Change<E>) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Returns `true` if the listener was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify(&self, change: &Change<E>) {
        let listeners: Vec<Listener<E>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}

impl<E> std::fmt::Debug for ContainerCore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerCore")
            .field("header", &self.header)
            .field("save_separately", &self.save_separately)
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// Public surface common to lists, arrays and maps.
pub trait Container: Savable {
    /// Whether elements persist as individually addressed records.
    fn save_separately(&self) -> bool;

    /// Write whatever is pending; `owner_path` points at the owner.
    ///
    /// Owners call this from `after_serialize`. A separately saved container
    /// that was mutated while detached writes every dirty element here; an
    /// inline container only becomes clean, since the owner record carried it.
    fn flush(&self, serializer: &Serializer, owner_path: &mut PathBuilder) -> SaveResult<()>;

    /// Reload separately saved content; `owner_path` points at the owner.
    ///
    /// Owners call this from `after_deserialize`. Inline containers are
    /// restored from the owner record with [`Container::load_inline`] instead.
    fn load(&self, serializer: &Serializer, owner_path: &mut PathBuilder) -> SaveResult<()>;

    /// The content to embed in the owner record, or `None` when saved
    /// separately.
    fn inline_value(&self) -> SaveResult<Option<Value>>;

    /// Silently replace the content with the value produced by
    /// [`Container::inline_value`].
    fn load_inline(&self, value: Value) -> SaveResult<()>;
}

/// What the routing functions need from a concrete container.
pub(crate) trait Backing<E: Element>: Savable {
    fn core(&self) -> &ContainerCore<E>;

    /// The container as a shared node, while it is alive.
    fn node(&self) -> Option<Arc<dyn Savable>>;

    /// Every element, in container order.
    fn elements(&self) -> Vec<E>;

    /// Whether element orders mirror positions.
    fn tracks_order(&self) -> bool;

    /// Write the whole content as one blob at `path`.
    fn write_blob(&self, serializer: &Serializer, path: &PathBuilder) -> SaveResult<()>;
}

/// Point `item` at `owner` under `id`.
pub(crate) fn attach<E: Element>(owner: &Weak<dyn Savable>, item: &E, id: &str) {
    if let Some(node) = item.savable() {
        node.header().set_id(id);
        node.header().set_parent(owner.clone(), PathKind::Collection);
    }
}

/// Clear the back-reference of `item`. Its stored record is left alone.
pub(crate) fn detach<E: Element>(item: &E) {
    if let Some(node) = item.savable() {
        node.header().clear_parent();
    }
}

/// Route `change`, tell listeners, then pass it up the graph if unhandled.
pub(crate) fn emit<E: Element, B: Backing<E>>(container: &B, change: Change<E>) -> SaveResult<()> {
    let routed = dispatch(container, &change);
    container.core().notify(&change);
    match routed? {
        Propagation::Handled => Ok(()),
        Propagation::Bubble => match container.node() {
            Some(node) => graph::propagate(&node),
            None => Ok(()),
        },
    }
}

/// Like [`emit`], for a change reported by a child; the graph walk that
/// delivered it carries on from the returned propagation.
pub(crate) fn relay<E: Element, B: Backing<E>>(container: &B, change: Change<E>) -> SaveResult<Propagation> {
    let routed = dispatch(container, &change);
    container.core().notify(&change);
    routed
}

fn dispatch<E: Element, B: Backing<E>>(container: &B, change: &Change<E>) -> SaveResult<Propagation> {
    let core = container.core();
    core.header().mark_dirty();
    if !core.save_separately() {
        return Ok(Propagation::Bubble);
    }
    let Some(node) = container.node() else {
        return Ok(Propagation::Bubble);
    };
    let Some(serializer) = graph::resolve_serializer(&node)? else {
        return Ok(Propagation::Bubble);
    };
    serializer.jobs().force_complete();
    let mut path = serializer.begin_fresh_action()?;
    graph::resolve_path(&node, &mut path)?;
    write_change(container, &serializer, &mut path, change)?;
    core.header().set_dirty(false);
    Ok(Propagation::Handled)
}

/// Translate `change` into storage calls below the container at `path`.
///
/// Afterwards every element is clean, including ones changed while the
/// container was out of reach of a serializer.
fn write_change<E: Element, B: Backing<E>>(
    container: &B,
    serializer: &Serializer,
    path: &mut PathBuilder,
    change: &Change<E>,
) -> SaveResult<()> {
    if !E::SAVABLE {
        return container.write_blob(serializer, path);
    }
    debug!(path = %path, kind = ?change.kind(), "writing container change");
    match change {
        Change::Add { items, .. } => save_elements(serializer, path, items.as_slice())?,
        Change::Remove { items, .. } => delete_elements(serializer, path, items.as_slice())?,
        Change::Replace { old, new, .. } => {
            // A record whose key is reused by the new content is overwritten, not deleted.
            let kept: HashSet<String> = new
                .iter()
                .filter_map(E::savable)
                .filter_map(|node| node.header().id())
                .collect();
            let gone: Vec<E> = old
                .iter()
                .filter(|item| {
                    item.savable()
                        .and_then(|node| node.header().id())
                        .map_or(true, |id| !kept.contains(&id))
                })
                .cloned()
                .collect();
            delete_elements(serializer, path, &gone)?;
            save_elements(serializer, path, new.as_slice())?;
        }
        Change::Reset { items } => {
            serializer.delete_all(path)?;
            for item in items {
                if let Some(node) = item.savable() {
                    node.header().mark_dirty();
                }
            }
            save_elements(serializer, path, items)?;
        }
    }
    let elements = container.elements();
    save_elements(serializer, path, &elements)?;
    sync_orders(container, serializer, path, &elements)
}

/// Full saves for every element whose content is unsaved.
fn save_elements<E: Element>(serializer: &Serializer, path: &mut PathBuilder, items: &[E]) -> SaveResult<()> {
    for node in items.iter().filter_map(E::savable) {
        if node.header().is_content_dirty() {
            serializer.save(node.as_ref(), path, PathKind::Collection)?;
        }
    }
    Ok(())
}

fn delete_elements<E: Element>(serializer: &Serializer, path: &mut PathBuilder, items: &[E]) -> SaveResult<()> {
    for node in items.iter().filter_map(E::savable) {
        serializer.delete(node.as_ref(), path, PathKind::Collection)?;
    }
    Ok(())
}

/// Write the order marker of every element that moved but is otherwise saved.
fn sync_orders<E: Element, B: Backing<E>>(
    container: &B,
    serializer: &Serializer,
    path: &mut PathBuilder,
    elements: &[E],
) -> SaveResult<()> {
    if !container.tracks_order() {
        return Ok(());
    }
    for (index, item) in elements.iter().enumerate() {
        let Some(node) = item.savable() else { continue };
        let header = node.header();
        if cfg!(debug_assertions) && header.order() != Some(index) {
            return Err(SaveError::OrderMismatch {
                index,
                order: header.order(),
            });
        }
        if header.is_order_dirty() && !header.is_content_dirty() {
            serializer.update_order(node.as_ref(), path, PathKind::Collection)?;
            header.clear_order_dirty();
        }
    }
    Ok(())
}

/// Save-all flush of a container below `owner_path`.
pub(crate) fn flush<E: Element, B: Backing<E>>(
    container: &B,
    serializer: &Serializer,
    owner_path: &mut PathBuilder,
) -> SaveResult<()> {
    let header = container.core().header();
    if !container.core().save_separately() {
        settle(&container.elements());
        header.set_dirty(false);
        return Ok(());
    }
    if !header.is_dirty() {
        return Ok(());
    }
    let id = header.id().ok_or(SaveError::EmptyId)?;
    owner_path.push(&id, PathKind::Collection)?;
    let change = Change::save_all(container.elements(), Some(0));
    let outcome = write_change(container, serializer, owner_path, &change);
    owner_path.pop()?;
    outcome?;
    header.set_dirty(false);
    Ok(())
}

/// Index of the element that is `child`, if it is still held.
pub(crate) fn position_of<E: Element>(items: &[E], child: &Arc<dyn Savable>) -> Option<usize> {
    items.iter().position(|item| {
        item.savable()
            .is_some_and(|node| crate::element::same_node(&node, child))
    })
}

/// Handle a change reported by a child at `index` with a `Replace` of the
/// element by itself.
pub(crate) fn child_replaced<E: Element, B: Backing<E>>(
    container: &B,
    found: Option<(E, Option<usize>)>,
) -> SaveResult<Propagation> {
    match found {
        Some((item, index)) => relay(
            container,
            Change::Replace {
                old: Items::One(item.clone()),
                new: Items::One(item),
                index,
            },
        ),
        None => {
            debug!("change from a child no longer held, ignored");
            Ok(Propagation::Handled)
        }
    }
}

/// Save-all routing for `invalidate`.
pub(crate) fn invalidated<E: Element, B: Backing<E>>(container: &B) -> SaveResult<Propagation> {
    relay(container, Change::save_all(container.elements(), Some(0)))
}

/// The elements as a JSON array.
pub(crate) fn array_value<E: Element>(items: &[E]) -> SaveResult<Value> {
    items
        .iter()
        .map(E::to_value)
        .collect::<SaveResult<Vec<_>>>()
        .map(Value::Array)
}

/// Decode a JSON array produced by [`array_value`].
pub(crate) fn from_array_value<E: Element>(value: Value) -> SaveResult<Vec<E>> {
    match value {
        Value::Array(values) => values.into_iter().map(E::from_value).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(SaveError::Serialization(format!(
            "expected an array of elements, found {other}"
        ))),
    }
}

/// Mark every element clean, after a load or once the owner record carried them.
pub(crate) fn settle<E: Element>(items: &[E]) {
    for node in items.iter().filter_map(E::savable) {
        node.header().set_dirty(false);
    }
}
