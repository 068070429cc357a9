//! Entry-key multiset stored under one indexed value

use ahash::AHashMap;

use crate::types::Key;

/// Entry keys with multiplicities
///
/// A multi-valued projection can map one entry to the same indexed value
/// more than once; each occurrence counts as one indexed value.
#[derive(Debug, Default, Clone)]
pub struct Bucket {
    entries: AHashMap<Key, u32>,
    values: usize,
}

impl Bucket {
    pub fn add(&mut self, key: &Key) {
        *self.entries.entry(key.clone()).or_insert(0) += 1;
        self.values += 1;
    }

    /// Remove one occurrence; false when `key` was not present
    pub fn remove(&mut self, key: &Key) -> bool {
        match self.entries.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
            }
            Some(_) => {
                self.entries.remove(key);
            }
            None => return false,
        }
        self.values -= 1;
        true
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Sum of multiplicities
    pub fn values(&self) -> usize {
        self.values
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.values = 0;
    }
}
