//! Primary Key Index
//!
//! Hash map from indexed value to the single entry key that owns it:
//! - Unique constraint enforcement (one owner per value)
//! - Fast point lookup
//! - Violations rejected without touching the region

use std::ops::Bound;

use ahash::AHashMap;
use parking_lot::RwLock;

use super::bucket::Bucket;
use super::lookup::IndexLookup;
use super::operator::Operator;
use super::structure::{IndexStore, KeyCollector, Slot};
use super::IndexKind;
use crate::types::Key;
use crate::{Result, StorageError};

/// Owning entry of an indexed value; `count` > 1 when one entry projects the
/// same value several times
#[derive(Debug, Clone)]
struct Owner {
    key: Key,
    count: u32,
}

#[derive(Default)]
struct PkInner {
    owners: AHashMap<Key, Owner>,
    undefined: Bucket,
    total_values: usize,
}

impl PkInner {
    fn add(&mut self, index: &str, key: &Key, slot: &Slot) -> Result<()> {
        match slot {
            Slot::Defined(v) => match self.owners.get_mut(v) {
                Some(owner) if owner.key != *key => {
                    return Err(StorageError::PrimaryKeyViolation {
                        index: index.to_string(),
                        value: v.to_string(),
                        owner: owner.key.to_string(),
                        key: key.to_string(),
                    })
                }
                Some(owner) => owner.count += 1,
                None => {
                    self.owners.insert(
                        v.clone(),
                        Owner {
                            key: key.clone(),
                            count: 1,
                        },
                    );
                }
            },
            Slot::Undefined => self.undefined.add(key),
        }
        self.total_values += 1;
        Ok(())
    }

    fn remove(&mut self, key: &Key, slot: &Slot) {
        let removed = match slot {
            Slot::Defined(v) => match self.owners.get_mut(v) {
                Some(owner) if owner.key == *key => {
                    owner.count -= 1;
                    if owner.count == 0 {
                        self.owners.remove(v);
                    }
                    true
                }
                _ => false,
            },
            Slot::Undefined => self.undefined.remove(key),
        };
        if removed {
            self.total_values -= 1;
        }
    }
}

/// Primary key index structure
pub struct PrimaryKeyStructure {
    name: String,
    inner: RwLock<PkInner>,
}

impl PrimaryKeyStructure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(PkInner::default()),
        }
    }
}

impl IndexStore for PrimaryKeyStructure {
    fn kind(&self) -> IndexKind {
        IndexKind::PrimaryKey
    }

    fn update_mapping(&self, key: &Key, old: &[Slot], new: &[Slot]) -> Result<()> {
        let mut inner = self.inner.write();
        for slot in old {
            inner.remove(key, slot);
        }
        for (applied, slot) in new.iter().enumerate() {
            if let Err(e) = inner.add(&self.name, key, slot) {
                for done in &new[..applied] {
                    inner.remove(key, done);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn lookup(&self, op: Operator, probe: Option<&Key>) -> IndexLookup {
        let inner = self.inner.read();
        let mut out = KeyCollector::default();
        match op {
            Operator::Equal => {
                if let Some(owner) = probe.and_then(|p| inner.owners.get(p)) {
                    out.extend(std::iter::once(&owner.key));
                }
            }
            Operator::NotEqual => out.extend(
                inner
                    .owners
                    .iter()
                    .filter(|(v, _)| op.matches(Some(*v), probe))
                    .map(|(_, o)| &o.key),
            ),
            Operator::IsUndefined => out.extend(inner.undefined.keys()),
            _ => {}
        }
        out.finish(false)
    }

    fn lookup_range(&self, _lower: Bound<&Key>, _upper: Bound<&Key>) -> Option<IndexLookup> {
        None
    }

    fn contains(&self, slot: &Slot, key: &Key) -> bool {
        let inner = self.inner.read();
        match slot {
            Slot::Defined(v) => inner.owners.get(v).map_or(false, |o| o.key == *key),
            Slot::Undefined => inner.undefined.contains(key),
        }
    }

    fn counts(&self) -> (usize, usize) {
        let inner = self.inner.read();
        let keys = inner.owners.len() + usize::from(!inner.undefined.is_empty());
        (keys, inner.total_values)
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        inner.owners.clear();
        inner.undefined.clear();
        inner.total_values = 0;
    }
}
