//! Element capabilities of observable containers.
//!
//! Whether elements are savable nodes, and whether they track their order,
//! is fixed by the element type through associated constants, so containers
//! decide once at compile time instead of probing every element.

use std::sync::Arc;

use serde_json::Value;

use crate::error::SaveResult;
use crate::node::{Restore, Savable};

/// A value a container can hold.
pub trait Element: Clone + Send + Sync + 'static {
    /// Elements are graph nodes with their own records.
    const SAVABLE: bool;
    /// Elements track their container position.
    const ORDERED: bool;

    /// The element as a graph node, for savable elements.
    fn savable(&self) -> Option<Arc<dyn Savable>>;

    fn to_value(&self) -> SaveResult<Value>;

    fn from_value(value: Value) -> SaveResult<Self>;

    /// Identity comparison: pointer equality for nodes, value equality
    /// otherwise.
    fn same(&self, other: &Self) -> bool;
}

impl<N: Restore> Element for Arc<N> {
    const SAVABLE: bool = true;
    const ORDERED: bool = N::ORDERED;

    fn savable(&self) -> Option<Arc<dyn Savable>> {
        let node: Arc<dyn Savable> = self.clone();
        Some(node)
    }

    fn to_value(&self) -> SaveResult<Value> {
        self.save_record()
    }

    fn from_value(value: Value) -> SaveResult<Self> {
        N::restore(value)
    }

    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

macro_rules! plain_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Element for $ty {
                const SAVABLE: bool = false;
                const ORDERED: bool = false;

                fn savable(&self) -> Option<Arc<dyn Savable>> {
                    None
                }

                fn to_value(&self) -> SaveResult<Value> {
                    Ok(serde_json::to_value(self)?)
                }

                fn from_value(value: Value) -> SaveResult<Self> {
                    Ok(serde_json::from_value(value)?)
                }

                fn same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

plain_element!(
    bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, String, Value,
);

/// Same node, compared by data pointer.
pub(crate) fn same_node(a: &Arc<dyn Savable>, b: &Arc<dyn Savable>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Item;
    use serde_json::json;

    #[test]
    fn capabilities_follow_element_type() {
        assert!(<Arc<Item> as Element>::SAVABLE);
        assert!(<Arc<Item> as Element>::ORDERED);
        assert!(!<String as Element>::SAVABLE);
        assert!(!<i64 as Element>::ORDERED);
    }

    #[test]
    fn plain_values_round_trip_through_json() {
        assert_eq!(7i64.to_value().unwrap(), json!(7));
        assert_eq!(String::from_value(json!("x")).unwrap(), "x");
        assert!(u8::from_value(json!("x")).is_err());
        assert!(1.5f64.same(&1.5));
        assert!(1i32.savable().is_none());
    }

    #[test]
    fn nodes_compare_by_identity() {
        let a = Item::new("a", 1);
        let b = Item::new("a", 1);
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        let node = a.savable().unwrap();
        assert!(same_node(&node, &a.savable().unwrap()));
    }
}
