//! Region layer consumed by the index engine
//!
//! The engine sees a region only through [`RegionView`] (initial population,
//! entry locks, value reads) and the [`EntryEvent`]s a region hands to its
//! index manager while the entry lock is held. [`LocalRegion`] is the
//! in-process implementation used by the cache.

mod disk_store;
mod local;

pub use disk_store::{DiskStore, DiskStoreStats};
pub use local::{LocalRegion, RegionStats};

use std::sync::Arc;

use crate::types::{Key, Value};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Destroy,
    /// Value moved to secondary storage; the entry still exists
    Evict,
}

/// Value side of an entry event
#[derive(Debug, Clone)]
pub enum EntryValue {
    Absent,
    Resident(Arc<Value>),
    /// Present only on secondary storage; not dereferenced by maintenance
    Evicted,
}

impl EntryValue {
    pub fn resident(&self) -> Option<&Arc<Value>> {
        match self {
            EntryValue::Resident(v) => Some(v),
            _ => None,
        }
    }
}

/// Mutation notification, delivered with the entry lock held
#[derive(Debug, Clone)]
pub struct EntryEvent {
    pub key: Key,
    pub operation: Operation,
    pub old: EntryValue,
    pub new: EntryValue,
}

impl EntryEvent {
    pub fn create(key: Key, value: Arc<Value>) -> Self {
        Self {
            key,
            operation: Operation::Create,
            old: EntryValue::Absent,
            new: EntryValue::Resident(value),
        }
    }

    pub fn update(key: Key, old: EntryValue, value: Arc<Value>) -> Self {
        Self {
            key,
            operation: Operation::Update,
            old,
            new: EntryValue::Resident(value),
        }
    }

    pub fn destroy(key: Key, old: EntryValue) -> Self {
        Self {
            key,
            operation: Operation::Destroy,
            old,
            new: EntryValue::Absent,
        }
    }

    pub fn evict(key: Key, old: Arc<Value>) -> Self {
        Self {
            key,
            operation: Operation::Evict,
            old: EntryValue::Resident(old),
            new: EntryValue::Evicted,
        }
    }
}

/// Entry read under its lock during index creation
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    /// `None` when the entry no longer exists
    pub value: Option<Arc<Value>>,
    /// Value was faulted in from secondary storage
    pub from_disk: bool,
}

pub trait RegionView: Send + Sync {
    /// Region path with a leading `/`
    fn full_path(&self) -> &str;

    /// Point-in-time copy of the live entry keys
    fn entry_keys(&self) -> Vec<Key>;

    /// Run `f` while holding the entry's mutation lock
    ///
    /// Evicted values are read from secondary storage without making the
    /// entry resident again.
    fn with_entry_lock(&self, key: &Key, f: &mut dyn FnMut(EntrySnapshot)) -> Result<()>;

    /// Current value without taking the entry lock
    fn get_value(&self, key: &Key) -> Result<Option<Arc<Value>>>;
}
