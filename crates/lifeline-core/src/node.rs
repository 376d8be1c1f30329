//! The savable node contract.
//!
//! Every persistable type embeds a [`NodeHeader`] and implements [`Savable`].
//! The header carries identity, the non-owning parent link, the dirty flag,
//! the optional order marker and, on roots, the serializer. All fields use
//! interior mutability so nodes can be shared as `Arc<dyn Savable>` between
//! their container, the application and queued jobs.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use lifeline_path::{PathBuilder, PathKind};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::SaveResult;
use crate::serializer::Serializer;

/// What a hook wants done after it handled a change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Keep walking up to the parent.
    Bubble,
    /// The change was fully handled here.
    Handled,
}

/// Non-owning reference from a node to the node that holds it.
#[derive(Clone)]
pub struct ParentLink {
    pub node: Weak<dyn Savable>,
    /// How the parent reaches this node.
    pub kind: PathKind,
}

const NO_ORDER: i64 = -1;

/// Identity and bookkeeping shared by every savable node.
pub struct NodeHeader {
    id: RwLock<Option<String>>,
    parent: RwLock<Option<ParentLink>>,
    dirty: AtomicBool,
    order_dirty: AtomicBool,
    order: AtomicI64,
    serializer: RwLock<Option<Arc<Serializer>>>,
}

impl NodeHeader {
    /// A detached header with no id. New nodes start dirty.
    pub fn new() -> Self {
        Self {
            id: RwLock::new(None),
            parent: RwLock::new(None),
            dirty: AtomicBool::new(true),
            order_dirty: AtomicBool::new(false),
            order: AtomicI64::new(NO_ORDER),
            serializer: RwLock::new(None),
        }
    }

    /// A detached header with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let header = Self::new();
        header.set_id(id);
        header
    }

    // ---- identity ----

    /// Owned copy of the id.
    pub fn id(&self) -> Option<String> {
        self.id.read().clone()
    }

    /// Borrow the id for the duration of `f`.
    pub fn read_id<R>(&self, f: impl FnOnce(Option<&str>) -> R) -> R {
        f(self.id.read().as_deref())
    }

    pub fn has_id(&self) -> bool {
        self.id.read().is_some()
    }

    /// Assign the id. An empty string clears it.
    pub fn set_id(&self, id: impl Into<String>) {
        let id = id.into();
        *self.id.write() = if id.is_empty() { None } else { Some(id) };
    }

    /// Assign the id only when the node has none yet.
    pub fn set_id_if_unset(&self, id: &str) {
        let mut slot = self.id.write();
        if slot.is_none() && !id.is_empty() {
            *slot = Some(id.to_owned());
        }
    }

    // ---- parent link ----

    /// The live parent and how it reaches this node, if attached.
    pub fn parent(&self) -> Option<(Arc<dyn Savable>, PathKind)> {
        let link = self.parent.read();
        let link = link.as_ref()?;
        link.node.upgrade().map(|node| (node, link.kind))
    }

    /// How the parent reaches this node, even if the parent is gone.
    pub fn parent_kind(&self) -> Option<PathKind> {
        self.parent.read().as_ref().map(|link| link.kind)
    }

    pub fn is_attached(&self) -> bool {
        self.parent().is_some()
    }

    /// Reassign the back-reference.
    pub fn set_parent(&self, parent: Weak<dyn Savable>, kind: PathKind) {
        *self.parent.write() = Some(ParentLink { node: parent, kind });
    }

    pub fn clear_parent(&self) {
        *self.parent.write() = None;
    }

    // ---- dirty flags ----

    /// Whether anything about the node is unsaved, content or order.
    pub fn is_dirty(&self) -> bool {
        self.is_content_dirty() || self.is_order_dirty()
    }

    /// Whether the record itself needs a full write.
    pub fn is_content_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Whether only the order marker is stale.
    pub fn is_order_dirty(&self) -> bool {
        self.order_dirty.load(Ordering::Acquire)
    }

    /// Set or clear both flags.
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
        if !dirty {
            self.order_dirty.store(false, Ordering::Release);
        }
    }

    pub fn mark_dirty(&self) {
        self.set_dirty(true);
    }

    /// Clear both flags, returning whether either was set.
    pub fn take_dirty(&self) -> bool {
        let order = self.order_dirty.swap(false, Ordering::AcqRel);
        self.dirty.swap(false, Ordering::AcqRel) || order
    }

    /// Called once the order marker alone has been written.
    pub fn clear_order_dirty(&self) {
        self.order_dirty.store(false, Ordering::Release);
    }

    // ---- order marker ----

    /// Position in an order-sensitive container, if any.
    pub fn order(&self) -> Option<usize> {
        usize::try_from(self.order.load(Ordering::Acquire)).ok()
    }

    /// Move the node to `order`. Flags the marker as stale and returns `true`
    /// when the order actually changed.
    pub fn set_order(&self, order: usize) -> bool {
        let order = i64::try_from(order).unwrap_or(i64::MAX);
        let changed = self.order.swap(order, Ordering::AcqRel) != order;
        if changed {
            self.order_dirty.store(true, Ordering::Release);
        }
        changed
    }

    /// Record an order read back from storage; does not touch the dirty flag.
    pub fn load_order(&self, order: usize) {
        let order = i64::try_from(order).unwrap_or(i64::MAX);
        self.order.store(order, Ordering::Release);
    }

    pub fn clear_order(&self) {
        self.order.store(NO_ORDER, Ordering::Release);
    }

    // ---- root ----

    /// Make this node a persistence root owned by `serializer`.
    pub fn mark_root(&self, serializer: Arc<Serializer>) {
        *self.serializer.write() = Some(serializer);
    }

    pub fn unmark_root(&self) {
        *self.serializer.write() = None;
    }

    pub fn is_root(&self) -> bool {
        self.serializer.read().is_some()
    }

    /// The serializer of a root node.
    pub fn serializer(&self) -> Option<Arc<Serializer>> {
        self.serializer.read().clone()
    }
}

impl Default for NodeHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHeader")
            .field("id", &*self.id.read())
            .field("parent_kind", &self.parent_kind())
            .field("dirty", &self.is_content_dirty())
            .field("order_dirty", &self.is_order_dirty())
            .field("order", &self.order())
            .field("root", &self.is_root())
            .finish()
    }
}

/// A node of the persistence graph.
///
/// The trait is object safe: the graph, the containers and queued jobs all
/// hold nodes as `Arc<dyn Savable>`. Construction from stored data lives on
/// [`Restore`], which needs `Sized`.
pub trait Savable: Send + Sync + 'static {
    fn header(&self) -> &NodeHeader;

    /// The node's own fields as a storable value.
    ///
    /// Containers saved separately are left out; they persist themselves.
    fn save_record(&self) -> SaveResult<Value>;

    /// Called right before the record is taken.
    fn before_serialize(&self, _serializer: &Serializer) {}

    /// Called after the record was written; `path` points at this node.
    /// Separately saved containers flush themselves from here.
    fn after_serialize(&self, _serializer: &Serializer, _path: &mut PathBuilder) -> SaveResult<()> {
        Ok(())
    }

    /// Called after the node was rebuilt from storage; `path` points at this
    /// node. Separately saved containers load themselves from here.
    fn after_deserialize(
        &self,
        _serializer: &Serializer,
        _path: &mut PathBuilder,
    ) -> SaveResult<()> {
        Ok(())
    }

    /// Visit every direct savable child.
    fn for_each_child(&self, _visit: &mut dyn FnMut(&Arc<dyn Savable>)) {}

    /// A direct child reported a change.
    ///
    /// Returning [`Propagation::Bubble`] marks this node dirty and passes
    /// the change on to its own parent.
    fn child_changed(&self, _child: &Arc<dyn Savable>) -> SaveResult<Propagation> {
        Ok(Propagation::Bubble)
    }

    /// This node was invalidated; `recursive` when children were marked too.
    fn invalidated(&self, _recursive: bool) -> SaveResult<Propagation> {
        Ok(Propagation::Bubble)
    }
}

/// Savable types that can be rebuilt from a stored value.
pub trait Restore: Savable + Sized {
    /// Whether the node tracks its position in an ordered container.
    const ORDERED: bool = false;

    /// Build a node from the value produced by [`Savable::save_record`].
    ///
    /// The returned node is detached; identity, order and the dirty flag are
    /// set by the serializer afterwards.
    fn restore(value: Value) -> SaveResult<Arc<Self>>;
}

/// Upcast helper for shared nodes.
pub trait AsNode {
    fn as_node(&self) -> Arc<dyn Savable>;
}

impl<N: Savable> AsNode for Arc<N> {
    fn as_node(&self) -> Arc<dyn Savable> {
        self.clone()
    }
}

/// Render a node's id for logs.
pub(crate) fn display_id(node: &dyn Savable) -> String {
    node.header()
        .read_id(|id| id.unwrap_or("<none>").to_owned())
}
