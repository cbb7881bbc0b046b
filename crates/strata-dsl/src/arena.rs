//! Index-keyed storage for tree and graph nodes.
//!
//! Nodes refer to each other by key instead of by reference, so a
//! [`Program`](crate::Program) can hand out ids while it is still being
//! built and the compiler can rewrite blocks in place.

use std::{
    fmt,
    hash::Hash,
    iter::{Enumerate, Map},
    marker::PhantomData,
    ops::{Index, IndexMut},
    slice,
};

/// A typed position in an [`Arena`].
pub trait Key: Copy + fmt::Debug + Eq + Hash + 'static {
    /// The position this key names.
    fn as_index(self) -> usize;
    /// The key naming position `index`.
    fn from_index(index: usize) -> Self;
}

/// An append-only vector addressed by `K`.
///
/// Keys are handed out in insertion order and never invalidated.
#[derive(Clone, Eq, PartialEq)]
pub struct Arena<K, V> {
    items: Vec<V>,
    _key: PhantomData<fn() -> K>,
}

/// Iterator over `(key, item)` pairs of an [`Arena`].
pub type Iter<'a, K, V> = Map<Enumerate<slice::Iter<'a, V>>, fn((usize, &'a V)) -> (K, &'a V)>;

impl<K, V> Arena<K, V> {
    /// Creates an empty arena.
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            _key: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K: Key, V> Arena<K, V> {
    /// The key the next [`insert`](Self::insert) will return.
    pub fn next_key(&self) -> K {
        K::from_index(self.items.len())
    }

    /// Appends `item` and returns its key.
    pub fn insert(&mut self, item: V) -> K {
        let key = self.next_key();
        self.items.push(item);
        key
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.items.get(key.as_index())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.items.get_mut(key.as_index())
    }

    /// Iterates over `(key, item)` pairs in insertion order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        fn pair<K: Key, V>((i, v): (usize, &V)) -> (K, &V) {
            (K::from_index(i), v)
        }
        self.items.iter().enumerate().map(pair::<K, V> as fn(_) -> _)
    }

    /// Iterates over the keys in insertion order.
    pub fn keys(&self) -> impl ExactSizeIterator<Item = K> + use<K, V> {
        (0..self.items.len()).map(K::from_index)
    }
}

impl<K: Key, V> Index<K> for Arena<K, V> {
    type Output = V;

    fn index(&self, key: K) -> &V {
        &self.items[key.as_index()]
    }
}

impl<K: Key, V> IndexMut<K> for Arena<K, V> {
    fn index_mut(&mut self, key: K) -> &mut V {
        &mut self.items[key.as_index()]
    }
}

impl<K, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, V: fmt::Debug> fmt::Debug for Arena<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K: Key, V> IntoIterator for &'a Arena<K, V> {
    type Item = (K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Declares a `u32` newtype usable as an [`Arena`] key.
#[macro_export]
macro_rules! new_key_type {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        $vis struct $name(pub u32);

        impl $crate::arena::Key for $name {
            #[inline]
            fn as_index(self) -> usize {
                // Lossless on every target with at least 32-bit pointers.
                self.0 as usize
            }

            #[inline]
            fn from_index(index: usize) -> Self {
                // Saturates; no arena grows past `u32::MAX` nodes.
                Self(u32::try_from(index).unwrap_or(u32::MAX))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::new_key_type! {
        struct TestId;
    }

    #[test]
    fn test_keys_follow_insertion_order() {
        let mut arena = Arena::<TestId, &str>::new();
        assert_eq!(arena.next_key(), TestId(0));
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!((a, b), (TestId(0), TestId(1)));
        assert_eq!(arena[b], "b");
        assert_eq!(arena.get(TestId(2)), None);
        arena[a] = "c";
        let pairs: Vec<_> = arena.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(pairs, vec![(a, "c"), (b, "b")]);
        assert_eq!(arena.keys().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(format!("{arena:?}"), r#"{TestId(0): "c", TestId(1): "b"}"#);
    }
}
