//! Lookup results

use std::sync::Arc;

use crate::types::Key;

/// Point-in-time result of an index lookup
///
/// Captured under the structure lock, so later mutations do not change it.
/// Cheap to clone; `iter()` restarts from the beginning every time.
#[derive(Debug, Clone)]
pub struct IndexLookup {
    keys: Arc<[Key]>,
    ordered: bool,
}

impl IndexLookup {
    pub(crate) fn new(keys: Vec<Key>, ordered: bool) -> Self {
        Self {
            keys: keys.into(),
            ordered,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), false)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Key> {
        self.keys.iter()
    }

    /// Sorted by indexed value (range indexes)
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.keys.contains(key)
    }

    pub fn to_vec(&self) -> Vec<Key> {
        self.keys.to_vec()
    }
}

impl<'a> IntoIterator for &'a IndexLookup {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restartable() {
        let lookup = IndexLookup::new(vec![Key::Int(1), Key::Int(2)], true);
        let first: Vec<_> = lookup.iter().cloned().collect();
        let second: Vec<_> = lookup.iter().cloned().collect();
        assert_eq!(first, second);
        assert!(lookup.is_ordered());
        assert!(lookup.contains(&Key::Int(2)));
        assert!(IndexLookup::empty().is_empty());
    }
}
