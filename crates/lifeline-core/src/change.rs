//! Change descriptors emitted by observable containers.

use std::slice;

/// One element or a batch of elements.
#[derive(Clone, Debug, PartialEq)]
pub enum Items<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Items<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::One(item) => slice::from_ref(item),
            Self::Many(items) => items.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Self::One(_))
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

impl<T> From<Vec<T>> for Items<T> {
    fn from(items: Vec<T>) -> Self {
        Self::Many(items)
    }
}

/// What a single container mutation did.
///
/// `index` is the position of the first affected element, or `None` where
/// positions carry no meaning (maps).
#[derive(Clone, Debug, PartialEq)]
pub enum Change<T> {
    /// Elements were added at `index`.
    Add { items: Items<T>, index: Option<usize> },
    /// Elements starting at `index` were swapped for `new`.
    Replace {
        old: Items<T>,
        new: Items<T>,
        index: Option<usize>,
    },
    /// Elements starting at `index` were removed.
    Remove { items: Items<T>, index: Option<usize> },
    /// The whole content was replaced by `items`.
    Reset { items: Vec<T> },
}

/// Discriminant of a [`Change`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Replace,
    Remove,
    Reset,
}

impl<T> Change<T> {
    /// The synthetic "save everything" descriptor: every element, added.
    pub fn save_all(items: Vec<T>, index: Option<usize>) -> Self {
        Self::Add {
            items: Items::Many(items),
            index,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Replace { .. } => ChangeKind::Replace,
            Self::Remove { .. } => ChangeKind::Remove,
            Self::Reset { .. } => ChangeKind::Reset,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Add { index, .. } | Self::Replace { index, .. } | Self::Remove { index, .. } => {
                *index
            }
            Self::Reset { .. } => None,
        }
    }

    /// Elements now in the container because of this change.
    pub fn incoming(&self) -> &[T] {
        match self {
            Self::Add { items, .. } => items.as_slice(),
            Self::Replace { new, .. } => new.as_slice(),
            Self::Remove { .. } => &[],
            Self::Reset { items } => items.as_slice(),
        }
    }

    /// Elements that left the container because of this change.
    ///
    /// A reset does not list what it cleared.
    pub fn outgoing(&self) -> &[T] {
        match self {
            Self::Replace { old, .. } => old.as_slice(),
            Self::Remove { items, .. } => items.as_slice(),
            Self::Add { .. } | Self::Reset { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_views() {
        let one = Items::One(3);
        assert_eq!(one.as_slice(), &[3]);
        assert!(one.is_single());
        let many: Items<i32> = vec![1, 2].into();
        assert_eq!(many.len(), 2);
        assert_eq!(many.into_vec(), vec![1, 2]);
    }

    #[test]
    fn change_accessors() {
        let add = Change::Add { items: Items::One("a"), index: Some(2) };
        assert_eq!(add.kind(), ChangeKind::Add);
        assert_eq!(add.index(), Some(2));
        assert_eq!(add.incoming(), &["a"]);
        assert!(add.outgoing().is_empty());

        let replace = Change::Replace {
            old: Items::One("a"),
            new: Items::One("b"),
            index: None,
        };
        assert_eq!(replace.outgoing(), &["a"]);
        assert_eq!(replace.incoming(), &["b"]);

        let reset = Change::Reset { items: vec!["x", "y"] };
        assert_eq!(reset.index(), None);
        assert_eq!(reset.incoming().len(), 2);

        let all = Change::save_all(vec![1, 2, 3], Some(0));
        assert_eq!(all.kind(), ChangeKind::Add);
    }
}
