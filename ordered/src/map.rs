use core::fmt;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::mem;
use std::ops::Index;

use crate::red_black_tree::{Compare, NaturalOrder, RawIter, RedBlackTree, SelectFirst};

/// Ordered map with unique keys, a thin façade over [`RedBlackTree`] with
/// the first pair component as the key.
pub struct TreeMap<K, V, C = NaturalOrder> {
    tree: RedBlackTree<SelectFirst<K, V>, C>,
}

impl<K, V> TreeMap<K, V> {
    pub fn new() -> Self {
        Self {
            tree: RedBlackTree::new(),
        }
    }
}

impl<K, V, C> TreeMap<K, V, C> {
    pub fn with_comparator(comp: C) -> Self {
        Self {
            tree: RedBlackTree::with_comparator(comp),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&mut self) {
        self.tree.clear();
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            raw: self.tree.raw_iter(),
            marker: PhantomData,
        }
    }

    /// Values are mutable through this iterator, keys are not: a key edit
    /// could change how the element orders relative to its neighbors.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            raw: self.tree.raw_iter(),
            marker: PhantomData,
        }
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Entry with the smallest key, in O(1) off the minimum cache.
    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        self.tree.first().map(|(key, value)| (key, value))
    }

    /// Entry with the largest key, in O(1) off the maximum cache.
    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        self.tree.last().map(|(key, value)| (key, value))
    }

    pub fn pop_first(&mut self) -> Option<(K, V)> {
        self.tree.pop_first()
    }

    pub fn pop_last(&mut self) -> Option<(K, V)> {
        self.tree.pop_last()
    }
}

impl<K, V, C: Compare<K>> TreeMap<K, V, C> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.tree.find(key).map(|(_, value)| value)
    }

    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        self.tree.find(key).map(|(key, value)| (key, value))
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let mut node = self.tree.find_node(key)?;
        Some(unsafe { &mut node.data_mut().1 })
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.tree.find_node(key).is_some()
    }

    /// Inserts `value` under `key`, returning the previous value if the key
    /// was already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let (mut node, rejected) = self.tree.insert_unique_node(None, (key, value));
        rejected.map(|(_, value)| {
            let slot = unsafe { &mut node.data_mut().1 };
            mem::replace(slot, value)
        })
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.tree.remove(key).map(|(_, value)| value)
    }

    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        self.tree.remove(key)
    }

    /// Iterates from the first entry whose key is not ordered before `key`.
    pub fn lower_bound(&self, key: &K) -> Iter<'_, K, V> {
        Iter {
            raw: self.tree.lower_bound(key).raw,
            marker: PhantomData,
        }
    }

    /// Iterates from the first entry whose key is ordered after `key`.
    pub fn upper_bound(&self, key: &K) -> Iter<'_, K, V> {
        Iter {
            raw: self.tree.upper_bound(key).raw,
            marker: PhantomData,
        }
    }
}

impl<K, V> Default for TreeMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> Clone for TreeMap<K, V, C>
where
    K: Clone,
    V: Clone,
    C: Clone,
{
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
        }
    }
}

impl<K, V, C> fmt::Debug for TreeMap<K, V, C>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, C: Compare<K>> Index<&K> for TreeMap<K, V, C> {
    type Output = V;

    fn index(&self, key: &K) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<K, V, C> PartialEq for TreeMap<K, V, C>
where
    K: PartialEq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.tree == other.tree
    }
}

impl<K, V, C> Eq for TreeMap<K, V, C>
where
    K: Eq,
    V: Eq,
{
}

impl<K, V, C> PartialOrd for TreeMap<K, V, C>
where
    K: PartialOrd,
    V: PartialOrd,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.tree.partial_cmp(&other.tree)
    }
}

impl<K, V, C> Ord for TreeMap<K, V, C>
where
    K: Ord,
    V: Ord,
{
    fn cmp(&self, other: &Self) -> Ordering {
        self.tree.cmp(&other.tree)
    }
}

impl<K, V, C: Compare<K>> Extend<(K, V)> for TreeMap<K, V, C> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            // The end position is a valid hint as long as the input keeps
            // ascending, so sorted bulk loads skip the root descent.
            let end = self.tree.end_node();
            let (mut node, rejected) = self.tree.insert_unique_node(Some(end), (key, value));
            if let Some((_, value)) = rejected {
                let slot = unsafe { &mut node.data_mut().1 };
                *slot = value;
            }
        }
    }
}

impl<K, V, C: Compare<K> + Default> FromIterator<(K, V)> for TreeMap<K, V, C> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_comparator(C::default());
        map.extend(iter);
        map
    }
}

pub struct Iter<'a, K, V> {
    raw: RawIter<(K, V)>,
    marker: PhantomData<&'a (K, V)>,
}

impl<'a, K, V> Clone for Iter<'a, K, V> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw,
            marker: PhantomData,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        unsafe {
            self.raw.next_node().map(|node| {
                let (key, value) = node.data();
                (key, value)
            })
        }
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        unsafe {
            self.raw.next_back_node().map(|node| {
                let (key, value) = node.data();
                (key, value)
            })
        }
    }
}

pub struct IterMut<'a, K, V> {
    raw: RawIter<(K, V)>,
    marker: PhantomData<(&'a K, &'a mut V)>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        unsafe {
            self.raw.next_node().map(|mut node| {
                let pair = node.data_mut();
                (&pair.0, &mut pair.1)
            })
        }
    }
}

impl<'a, K, V> DoubleEndedIterator for IterMut<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        unsafe {
            self.raw.next_back_node().map(|mut node| {
                let pair = node.data_mut();
                (&pair.0, &mut pair.1)
            })
        }
    }
}

pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Clone for Keys<'a, K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }
}

impl<'a, K, V> DoubleEndedIterator for Keys<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(key, _)| key)
    }
}

pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Clone for Values<'a, K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }
}

impl<'a, K, V> DoubleEndedIterator for Values<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, value)| value)
    }
}

pub struct ValuesMut<'a, K, V> {
    inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }
}

impl<'a, K, V> DoubleEndedIterator for ValuesMut<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, value)| value)
    }
}

/// Owning iterator draining entries in key order.
pub struct IntoIter<K, V, C = NaturalOrder> {
    tree: RedBlackTree<SelectFirst<K, V>, C>,
}

impl<K, V, C> Iterator for IntoIter<K, V, C> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.tree.pop_first()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.tree.len(), Some(self.tree.len()))
    }
}

impl<K, V, C> DoubleEndedIterator for IntoIter<K, V, C> {
    fn next_back(&mut self) -> Option<(K, V)> {
        self.tree.pop_last()
    }
}

impl<K, V, C> ExactSizeIterator for IntoIter<K, V, C> {}

impl<K, V, C> IntoIterator for TreeMap<K, V, C> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, C>;

    fn into_iter(self) -> IntoIter<K, V, C> {
        IntoIter { tree: self.tree }
    }
}

impl<'a, K, V, C> IntoIterator for &'a TreeMap<K, V, C> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<'a, K, V, C> IntoIterator for &'a mut TreeMap<K, V, C> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> IterMut<'a, K, V> {
        self.iter_mut()
    }
}
