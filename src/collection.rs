//! Dual-indexed storage: O(1) access by unique string key and by dense
//! position.
//!
//! Entries live in a `Vec`; a `HashMap` maps each key to its position.
//! Removal swaps the last entry into the vacated slot, so positions stay
//! dense but are not stable across removals.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::error::{SimError, SimResult};

/// Values stored in an [`IndexedList`] expose their own key.
pub trait Keyed {
    fn key(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct IndexedList<V> {
    items: Vec<V>,
    index: HashMap<String, usize>,
}

impl<V: Keyed> IndexedList<V> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a value, returning its position.
    pub fn add(&mut self, value: V) -> SimResult<usize> {
        let key = value.key();
        if key.is_empty() {
            return Err(SimError::validation("key", "keys must not be empty"));
        }
        if self.index.contains_key(key) {
            return Err(SimError::DuplicateKey(key.to_string()));
        }
        let position = self.items.len();
        self.index.insert(key.to_string(), position);
        self.items.push(value);
        Ok(position)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.position(key).map(|position| &self.items[position])
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        match self.position(key) {
            Some(position) => Some(&mut self.items[position]),
            None => None,
        }
    }

    pub fn try_get(&self, key: &str) -> SimResult<&V> {
        self.get(key)
            .ok_or_else(|| SimError::MissingKey(key.to_string()))
    }

    pub fn try_get_mut(&mut self, key: &str) -> SimResult<&mut V> {
        self.get_mut(key)
            .ok_or_else(|| SimError::MissingKey(key.to_string()))
    }

    pub fn get_index(&self, position: usize) -> Option<&V> {
        self.items.get(position)
    }

    pub fn get_index_mut(&mut self, position: usize) -> Option<&mut V> {
        self.items.get_mut(position)
    }

    pub fn try_get_index(&self, position: usize) -> SimResult<&V> {
        let len = self.items.len();
        self.items
            .get(position)
            .ok_or(SimError::IndexOutOfRange {
                index: position,
                len,
            })
    }

    pub fn remove(&mut self, key: &str) -> SimResult<V> {
        let position = self
            .position(key)
            .ok_or_else(|| SimError::MissingKey(key.to_string()))?;
        self.remove_at(position)
    }

    pub fn remove_at(&mut self, position: usize) -> SimResult<V> {
        let len = self.items.len();
        if position >= len {
            return Err(SimError::IndexOutOfRange {
                index: position,
                len,
            });
        }
        let removed = self.items.swap_remove(position);
        self.index.remove(removed.key());
        if let Some(moved) = self.items.get(position) {
            self.index.insert(moved.key().to_string(), position);
        }
        Ok(removed)
    }

    /// Remove every entry matching `predicate`, returning them in the order
    /// they were removed (highest position first).
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&V) -> bool) -> Vec<V> {
        let mut removed = Vec::new();
        let mut position = self.items.len();
        while position > 0 {
            position -= 1;
            if predicate(&self.items[position]) {
                if let Ok(value) = self.remove_at(position) {
                    removed.push(value);
                }
            }
        }
        removed
    }

    /// Randomly permute positions. Key lookups are unaffected.
    pub fn scramble_order<R: RngCore>(&mut self, rng: &mut R) {
        self.items.shuffle(rng);
        for (position, item) in self.items.iter().enumerate() {
            if let Some(slot) = self.index.get_mut(item.key()) {
                *slot = position;
            }
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, V> {
        self.items.iter()
    }

    /// Mutable iteration. Callers must not change the value's key.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, V> {
        self.items.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.iter().map(|item| item.key())
    }

    pub fn as_slice(&self) -> &[V] {
        &self.items
    }

    /// Check that every key maps to the position that holds it.
    pub fn is_consistent(&self) -> bool {
        self.index.len() == self.items.len()
            && self
                .items
                .iter()
                .enumerate()
                .all(|(position, item)| self.index.get(item.key()) == Some(&position))
    }
}

impl<V: Keyed + Clone> IndexedList<V> {
    /// A compacted copy with identical contents and order.
    pub fn rebuild(&self) -> Self {
        let mut fresh = Self::with_capacity(self.items.len());
        for item in &self.items {
            fresh.index.insert(item.key().to_string(), fresh.items.len());
            fresh.items.push(item.clone());
        }
        fresh
    }
}

impl<V: Keyed> Default for IndexedList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, V: Keyed> IntoIterator for &'a IndexedList<V> {
    type Item = &'a V;
    type IntoIter = std::slice::Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SimRng;

    #[derive(Debug, Clone, PartialEq)]
    struct Fox {
        id: String,
        weight: u32,
    }

    impl Keyed for Fox {
        fn key(&self) -> &str {
            &self.id
        }
    }

    fn fox(id: &str, weight: u32) -> Fox {
        Fox {
            id: id.to_string(),
            weight,
        }
    }

    fn assert_dual(list: &IndexedList<Fox>) {
        assert!(list.is_consistent());
        for position in 0..list.len() {
            let by_index = list.get_index(position).unwrap();
            let by_key = list.get(&by_index.id).unwrap();
            assert_eq!(by_index, by_key);
            assert_eq!(list.position(&by_index.id), Some(position));
        }
    }

    #[test]
    fn test_add_and_lookup() {
        let mut list = IndexedList::new();
        assert_eq!(list.add(fox("a", 1)).unwrap(), 0);
        assert_eq!(list.add(fox("b", 2)).unwrap(), 1);

        assert_eq!(list.len(), 2);
        assert_eq!(list.get("b").unwrap().weight, 2);
        assert_eq!(list.get_index(0).unwrap().id, "a");
        assert!(list.contains_key("a"));
        assert!(!list.contains_key("c"));
    }

    #[test]
    fn test_duplicate_and_empty_keys_rejected() {
        let mut list = IndexedList::new();
        list.add(fox("a", 1)).unwrap();
        assert!(matches!(
            list.add(fox("a", 5)),
            Err(SimError::DuplicateKey(_))
        ));
        assert!(matches!(
            list.add(fox("", 5)),
            Err(SimError::Validation { .. })
        ));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_missing_lookups_are_errors() {
        let list: IndexedList<Fox> = IndexedList::new();
        assert!(matches!(list.try_get("x"), Err(SimError::MissingKey(_))));
        assert!(matches!(
            list.try_get_index(0),
            Err(SimError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_remove_keeps_positions_dense() {
        let mut list = IndexedList::new();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            list.add(fox(id, i as u32)).unwrap();
        }

        let removed = list.remove("b").unwrap();
        assert_eq!(removed.id, "b");
        assert_eq!(list.len(), 3);
        assert_dual(&list);

        let removed = list.remove_at(0).unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(list.len(), 2);
        assert_dual(&list);

        assert!(list.remove("zz").is_err());
        assert!(list.remove_at(2).is_err());
    }

    #[test]
    fn test_mixed_operations_keep_duality() {
        let mut list = IndexedList::new();
        let mut rng = SimRng::seed_from_u64(11);
        let mut live = 0usize;
        for round in 0..500u32 {
            let id = format!("fox{round}");
            list.add(fox(&id, round)).unwrap();
            live += 1;
            match round % 7 {
                0 => {
                    list.scramble_order(&mut rng);
                }
                3 if !list.is_empty() => {
                    let position = rng.below(list.len());
                    list.remove_at(position).unwrap();
                    live -= 1;
                }
                5 => {
                    let key = list.get_index(0).unwrap().id.clone();
                    list.remove(&key).unwrap();
                    live -= 1;
                }
                _ => {}
            }
            assert_eq!(list.len(), live);
        }
        assert_dual(&list);
    }

    #[test]
    fn test_scramble_preserves_contents() {
        let mut list = IndexedList::new();
        for i in 0..50 {
            list.add(fox(&format!("f{i}"), i)).unwrap();
        }
        let mut rng = SimRng::seed_from_u64(99);
        list.scramble_order(&mut rng);

        assert_eq!(list.len(), 50);
        for i in 0..50 {
            assert_eq!(list.get(&format!("f{i}")).unwrap().weight, i);
        }
        let moved = (0..50).any(|i| list.get_index(i).unwrap().weight != i as u32);
        assert!(moved, "a shuffle of 50 entries should move something");
        assert_dual(&list);
    }

    #[test]
    fn test_scramble_is_seeded() {
        let build = || {
            let mut list = IndexedList::new();
            for i in 0..20 {
                list.add(fox(&format!("f{i}"), i)).unwrap();
            }
            list
        };
        let mut a = build();
        let mut b = build();
        a.scramble_order(&mut SimRng::seed_from_u64(5));
        b.scramble_order(&mut SimRng::seed_from_u64(5));
        let order_a: Vec<_> = a.keys().collect();
        let order_b: Vec<_> = b.keys().collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn test_rebuild_is_logically_identical() {
        let mut list = IndexedList::new();
        for i in 0..10 {
            list.add(fox(&format!("f{i}"), i)).unwrap();
        }
        list.remove("f3").unwrap();
        list.remove("f7").unwrap();

        let rebuilt = list.rebuild();
        assert_eq!(rebuilt.len(), list.len());
        let before: Vec<_> = list.keys().collect();
        let after: Vec<_> = rebuilt.keys().collect();
        assert_eq!(before, after);
        assert_dual(&rebuilt);
    }

    #[test]
    fn test_remove_where() {
        let mut list = IndexedList::new();
        for i in 0..10 {
            list.add(fox(&format!("f{i}"), i)).unwrap();
        }
        let removed = list.remove_where(|f| f.weight % 2 == 0);
        assert_eq!(removed.len(), 5);
        assert_eq!(list.len(), 5);
        assert!(list.iter().all(|f| f.weight % 2 == 1));
        assert_dual(&list);
    }
}
