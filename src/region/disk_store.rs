//! Secondary storage for evicted and persisted entry values
//!
//! Values are bincode-encoded into an in-memory map that outlives the
//! regions using it, so a region can be recovered from a store after it is
//! closed.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::{Key, Value};
use crate::Result;

#[derive(Debug, Default)]
pub struct DiskStore {
    entries: DashMap<Key, Vec<u8>>,
    writes: AtomicU64,
    reads: AtomicU64,
    removes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStoreStats {
    pub entries: usize,
    pub bytes: usize,
    pub writes: u64,
    pub reads: u64,
    pub removes: u64,
}

impl DiskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, key: &Key, value: &Value) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.entries.insert(key.clone(), bytes);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn read(&self, key: &Key) -> Result<Option<Value>> {
        let bytes = match self.entries.get(key) {
            Some(b) => b.value().clone(),
            None => return Ok(None),
        };
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(Some(bincode::deserialize(&bytes)?))
    }

    pub fn remove(&self, key: &Key) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.removes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<Key> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> DiskStoreStats {
        DiskStoreStats {
            entries: self.entries.len(),
            bytes: self.entries.iter().map(|e| e.value().len()).sum(),
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }
}
