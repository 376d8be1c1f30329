//! Operations that walk the parent chain of a node.

use std::sync::Arc;

use lifeline_path::{PathBuilder, PathKind};
use serde_json::Value;
use tracing::debug;

use crate::error::{SaveError, SaveResult};
use crate::node::{display_id, Propagation, Savable};
use crate::serializer::Serializer;

/// Upper bound on parent hops; a longer chain is treated as a cycle.
pub const MAX_PARENT_HOPS: usize = 100;

/// Append the root-to-leaf path of `node` to `path`.
///
/// Each segment is tagged by how the node's parent reaches it; the root's
/// own segment is a property. Fails if any node on the chain has no id.
pub fn resolve_path(node: &Arc<dyn Savable>, path: &mut PathBuilder) -> SaveResult<()> {
    let mut chain: Vec<(Arc<dyn Savable>, PathKind)> = Vec::new();
    let mut current = Arc::clone(node);
    loop {
        if chain.len() == MAX_PARENT_HOPS {
            return Err(SaveError::ParentChainTooDeep(MAX_PARENT_HOPS));
        }
        let parent = if current.header().is_root() {
            None
        } else {
            current.header().parent()
        };
        match parent {
            Some((parent, kind)) => {
                chain.push((current, kind));
                current = parent;
            }
            None => {
                chain.push((current, PathKind::Property));
                break;
            }
        }
    }
    for (node, kind) in chain.iter().rev() {
        node.header().read_id(|id| match id {
            Some(id) => path.push(id, *kind).map(|_| ()).map_err(SaveError::from),
            None => Err(SaveError::EmptyId),
        })?;
    }
    Ok(())
}

/// The serializer of the root this node is attached under, if any.
pub fn resolve_serializer(node: &Arc<dyn Savable>) -> SaveResult<Option<Arc<Serializer>>> {
    let mut current = Arc::clone(node);
    for _ in 0..MAX_PARENT_HOPS {
        if let Some(serializer) = current.header().serializer() {
            return Ok(Some(serializer));
        }
        match current.header().parent() {
            Some((parent, _)) => current = parent,
            None => return Ok(None),
        }
    }
    Err(SaveError::ParentChainTooDeep(MAX_PARENT_HOPS))
}

/// Mark `node` dirty and let the change travel up the graph.
///
/// A root saves itself by its serializer's policy. Any other node notifies
/// its parent, which either handles the change (a separately saved
/// container writes the element) or marks itself dirty and passes it on.
pub fn invalidate(node: &Arc<dyn Savable>, recursive: bool) -> SaveResult<()> {
    mark_dirty(node, recursive);
    if node.invalidated(recursive)? == Propagation::Handled {
        return Ok(());
    }
    propagate(node)
}

/// Walk up from an already dirty node until someone handles the change.
pub(crate) fn propagate(node: &Arc<dyn Savable>) -> SaveResult<()> {
    let mut current = Arc::clone(node);
    for _ in 0..MAX_PARENT_HOPS {
        if let Some(serializer) = current.header().serializer() {
            return serializer.fresh_save_by_policy(&current);
        }
        let Some((parent, _)) = current.header().parent() else {
            debug!(node = %display_id(current.as_ref()), "change stopped at detached node");
            return Ok(());
        };
        if parent.child_changed(&current)? == Propagation::Handled {
            return Ok(());
        }
        parent.header().mark_dirty();
        current = parent;
    }
    Err(SaveError::ParentChainTooDeep(MAX_PARENT_HOPS))
}

fn mark_dirty(node: &Arc<dyn Savable>, recursive: bool) {
    node.header().mark_dirty();
    if recursive {
        node.for_each_child(&mut |child| mark_dirty(child, true));
    }
}

/// Attach `child` below `owner`, reached by `kind`.
pub fn set_child(owner: &Arc<dyn Savable>, child: &Arc<dyn Savable>, kind: PathKind) -> SaveResult<()> {
    if !child.header().has_id() {
        return Err(SaveError::EmptyId);
    }
    child.header().set_parent(Arc::downgrade(owner), kind);
    Ok(())
}

/// Clear the back-reference of `child`. Stored data is left alone.
pub fn detach(child: &Arc<dyn Savable>) {
    child.header().clear_parent();
}

/// Give `node` a new id and move its stored record along.
///
/// Without a serializer only the in-memory id changes.
pub fn rename(node: &Arc<dyn Savable>, new_id: &str) -> SaveResult<()> {
    if new_id.is_empty() {
        return Err(SaveError::EmptyId);
    }
    let old_id = node.header().id();
    if old_id.as_deref() == Some(new_id) {
        return Ok(());
    }
    node.header().set_id(new_id);
    node.header().mark_dirty();
    match (old_id, resolve_serializer(node)?) {
        (Some(old_id), Some(serializer)) => serializer.fresh_update_id_by_policy(node, &old_id),
        _ => Ok(()),
    }
}

/// Move `node` to `order` and rewrite only its order marker.
pub fn reorder(node: &Arc<dyn Savable>, order: usize) -> SaveResult<()> {
    if !node.header().set_order(order) {
        return Ok(());
    }
    match resolve_serializer(node)? {
        Some(serializer) => serializer.fresh_update_order_by_policy(node),
        None => Ok(()),
    }
}

/// Persist one property of `owner` as its own record under `owner.prop`.
///
/// A detached owner is marked dirty instead so the value goes out with its
/// next full save.
pub fn save_property(owner: &Arc<dyn Savable>, prop: &str, value: Value) -> SaveResult<()> {
    match resolve_serializer(owner)? {
        Some(serializer) => serializer.fresh_save_value_by_policy(owner, prop, value),
        None => {
            owner.header().mark_dirty();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{harness, Item, Player};
    use crate::node::AsNode;
    use lifeline_store::StoreOp;

    #[test]
    fn resolves_root_to_leaf_path() {
        let player = Player::new("p1", true);
        let item = Item::new("sword", 3);
        player.items.push(item.clone()).unwrap();

        let mut path = PathBuilder::new();
        resolve_path(&item.as_node(), &mut path).unwrap();
        assert_eq!(path.as_str(), "p1/items/0");
        assert_eq!(path.segment_kind(0).unwrap(), PathKind::Property);
        assert_eq!(path.segment_kind(2).unwrap(), PathKind::Collection);
    }

    #[test]
    fn missing_id_fails_resolution() {
        let owner = Item::new("bag", 1).as_node();
        owner.header().set_id("bag");
        let child = Item::new("gem", 2).as_node();
        child.header().set_parent(Arc::downgrade(&owner), PathKind::Property);

        let mut path = PathBuilder::new();
        assert_eq!(resolve_path(&child, &mut path), Err(SaveError::EmptyId));
        assert!(matches!(set_child(&owner, &child, PathKind::Property), Err(SaveError::EmptyId)));
    }

    #[test]
    fn parent_cycle_is_bounded() {
        let a = Item::new("a", 0).as_node();
        let b = Item::new("b", 0).as_node();
        a.header().set_id("a");
        b.header().set_id("b");
        set_child(&a, &b, PathKind::Property).unwrap();
        set_child(&b, &a, PathKind::Property).unwrap();

        let mut path = PathBuilder::new();
        assert_eq!(
            resolve_path(&a, &mut path),
            Err(SaveError::ParentChainTooDeep(MAX_PARENT_HOPS))
        );
        assert!(resolve_serializer(&a).is_err());
    }

    #[test]
    fn unattached_node_has_no_serializer() {
        let item = Item::new("loose", 0).as_node();
        assert!(resolve_serializer(&item).unwrap().is_none());
        invalidate(&item, false).unwrap();
        assert!(item.header().is_dirty());
    }

    #[test]
    fn invalidating_a_root_saves_it() {
        let (store, serializer) = harness();
        let player = Player::new("p1", false);
        player.header().mark_root(serializer);
        player.header().set_dirty(false);

        player.set_gold(10);
        assert_eq!(store.writes(), vec![StoreOp::Save("p1".into())]);
        assert!(!player.header().is_dirty());
    }

    #[test]
    fn rename_moves_stored_record() {
        let (store, serializer) = harness();
        let player = Player::new("p1", false);
        player.header().mark_root(Arc::clone(&serializer));
        serializer.fresh_save_sync(&player.as_node()).unwrap();

        rename(&player.as_node(), "p2").unwrap();
        assert_eq!(store.keys(), vec!["p2".to_string()]);
        assert!(player.header().is_dirty());
    }
}
