//! Insertion-ordered set that hands out stable indices

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct IndexedSet<T: Eq + Hash + Clone> {
    index: HashMap<T, usize>,
    items: Vec<T>,
}

impl<T: Eq + Hash + Clone> IndexedSet<T> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            items: Vec::new(),
        }
    }

    /// Index of `item`, inserting it at the end on first sight
    pub fn index(&mut self, item: T) -> usize {
        if let Some(&i) = self.index.get(&item) {
            return i;
        }
        let i = self.items.len();
        self.index.insert(item.clone(), i);
        self.items.push(item);
        i
    }

    pub fn get(&self, item: &T) -> Option<usize> {
        self.index.get(item).copied()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains_key(item)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.items.clear();
    }
}

impl<T: Eq + Hash + Clone> Default for IndexedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Eq + Hash + Clone> IntoIterator for &'a IndexedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
