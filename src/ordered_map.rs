//! Insertion-ordered map (component C2), used wherever the original source relies on
//! a linked hash table to preserve client-visible ordering: the per-session monitored
//! item table, and the per-request batch of node aliases that duplicate-checks must
//! report in the order submitted.

use indexmap::IndexMap;

/// A thin wrapper over [`indexmap::IndexMap`] that forbids silently overwriting an
/// existing key through `insert` — every caller in this crate needs to know whether
/// a key was already present (spec §4.2's duplicate-alias check, §4.4's duplicate
/// monitored-item check), so the ordinary `HashMap::insert`-returns-old-value
/// API is easy to misuse by accident.
#[derive(Debug, Clone, Default)]
pub struct OrderedMap<K, V> {
    inner: IndexMap<K, V>,
}

impl<K, V> OrderedMap<K, V>
where
    K: std::hash::Hash + Eq,
{
    pub fn new() -> Self {
        Self {
            inner: IndexMap::new(),
        }
    }

    /// Inserts `key`/`value`, returning `false` without modifying the map if `key`
    /// was already present.
    pub fn insert_new(&mut self, key: K, value: V) -> bool {
        if self.inner.contains_key(&key) {
            return false;
        }
        self.inner.insert(key, value);
        true
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Removes `key`, preserving the relative order of the remaining entries.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_new_rejects_duplicate_key() {
        let mut map = OrderedMap::new();
        assert!(map.insert_new("a", 1));
        assert!(!map.insert_new("a", 2));
        assert_eq!(map.get(&"a"), Some(&1));
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut map = OrderedMap::new();
        map.insert_new("c", 3);
        map.insert_new("a", 1);
        map.insert_new("b", 2);
        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn remove_preserves_order_of_remaining_entries() {
        let mut map = OrderedMap::new();
        map.insert_new("a", 1);
        map.insert_new("b", 2);
        map.insert_new("c", 3);
        map.remove(&"b");
        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }
}
