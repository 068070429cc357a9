//! Capability shared by all index structures
//!
//! The kinds form a closed set, so the manager stores an [`IndexStructure`]
//! enum and dispatches by `match`; each variant implements [`IndexStore`].

use std::ops::Bound;

use ahash::AHashSet;

use super::hash::HashStructure;
use super::lookup::IndexLookup;
use super::operator::Operator;
use super::primary_key::PrimaryKeyStructure;
use super::range::RangeStructure;
use super::IndexKind;
use crate::types::Key;
use crate::Result;

/// One projected value of an entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Defined(Key),
    /// Null or undefined projection
    Undefined,
}

impl Slot {
    pub fn from_key(key: Option<Key>) -> Self {
        match key {
            Some(k) => Slot::Defined(k),
            None => Slot::Undefined,
        }
    }

    pub fn key(&self) -> Option<&Key> {
        match self {
            Slot::Defined(k) => Some(k),
            Slot::Undefined => None,
        }
    }
}

pub trait IndexStore: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// Replace the `old` mappings of `key` with `new`
    ///
    /// Removal and insertion happen under one structure guard, so a lookup
    /// sees either the old or the new mappings. On error the `old` mappings
    /// are gone and none of `new` is present.
    fn update_mapping(&self, key: &Key, old: &[Slot], new: &[Slot]) -> Result<()>;

    fn add_mapping(&self, key: &Key, slots: &[Slot]) -> Result<()> {
        self.update_mapping(key, &[], slots)
    }

    fn remove_mapping(&self, key: &Key, slots: &[Slot]) -> Result<()> {
        self.update_mapping(key, slots, &[])
    }

    /// Entry keys with a slot satisfying `slot <op> probe`
    ///
    /// Callers check operator support first; unsupported operators return
    /// an empty result.
    fn lookup(&self, op: Operator, probe: Option<&Key>) -> IndexLookup;

    /// Two-bound range lookup; `None` when the structure is unordered
    fn lookup_range(&self, lower: Bound<&Key>, upper: Bound<&Key>) -> Option<IndexLookup>;

    fn contains(&self, slot: &Slot, key: &Key) -> bool;

    /// `(distinct keys, total values)`
    fn counts(&self) -> (usize, usize);

    fn clear(&self);
}

pub enum IndexStructure {
    Range(RangeStructure),
    Hash(HashStructure),
    PrimaryKey(PrimaryKeyStructure),
}

impl IndexStructure {
    pub fn new(kind: IndexKind, name: &str, hash_stripes: usize) -> Self {
        match kind {
            IndexKind::Range => IndexStructure::Range(RangeStructure::new()),
            IndexKind::Hash => IndexStructure::Hash(HashStructure::new(hash_stripes)),
            IndexKind::PrimaryKey => IndexStructure::PrimaryKey(PrimaryKeyStructure::new(name)),
        }
    }

    fn store(&self) -> &dyn IndexStore {
        match self {
            IndexStructure::Range(s) => s,
            IndexStructure::Hash(s) => s,
            IndexStructure::PrimaryKey(s) => s,
        }
    }
}

impl IndexStore for IndexStructure {
    fn kind(&self) -> IndexKind {
        self.store().kind()
    }

    fn update_mapping(&self, key: &Key, old: &[Slot], new: &[Slot]) -> Result<()> {
        self.store().update_mapping(key, old, new)
    }

    fn lookup(&self, op: Operator, probe: Option<&Key>) -> IndexLookup {
        self.store().lookup(op, probe)
    }

    fn lookup_range(&self, lower: Bound<&Key>, upper: Bound<&Key>) -> Option<IndexLookup> {
        self.store().lookup_range(lower, upper)
    }

    fn contains(&self, slot: &Slot, key: &Key) -> bool {
        self.store().contains(slot, key)
    }

    fn counts(&self) -> (usize, usize) {
        self.store().counts()
    }

    fn clear(&self) {
        self.store().clear()
    }
}

/// Deduplicating, order-preserving accumulator for lookup results
#[derive(Default)]
pub(crate) struct KeyCollector {
    seen: AHashSet<Key>,
    keys: Vec<Key>,
}

impl KeyCollector {
    pub fn extend<'a>(&mut self, keys: impl Iterator<Item = &'a Key>) {
        for key in keys {
            if self.seen.insert(key.clone()) {
                self.keys.push(key.clone());
            }
        }
    }

    pub fn finish(self, ordered: bool) -> IndexLookup {
        IndexLookup::new(self.keys, ordered)
    }
}
