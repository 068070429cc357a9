//! In-process region with per-entry locks, partitioning, overflow and
//! write-through persistence

use std::hash::BuildHasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::{DiskStore, EntryEvent, EntrySnapshot, EntryValue, RegionView};
use crate::config::RegionConfig;
use crate::expr::FromClause;
use crate::index::{Index, IndexDefinition, IndexManager};
use crate::types::{Key, Value};
use crate::{Result, StorageError};

enum EntryState {
    /// Never written, or destroyed
    Removed,
    Resident { value: Arc<Value>, version: u64 },
    Evicted { version: u64 },
}

impl EntryState {
    fn version(&self) -> u64 {
        match self {
            EntryState::Removed => 0,
            EntryState::Resident { version, .. } | EntryState::Evicted { version } => *version,
        }
    }
}

/// One key's entry
///
/// `lock` serializes mutations of the key and is held across index
/// maintenance. `state` is only held for the instant a value is read or
/// swapped, so readers never wait behind a paused mutation.
struct RegionEntry {
    lock: Mutex<()>,
    state: RwLock<EntryState>,
}

impl RegionEntry {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            state: RwLock::new(EntryState::Removed),
        }
    }
}

#[derive(Debug, Default)]
struct RegionCounters {
    creates: AtomicU64,
    updates: AtomicU64,
    destroys: AtomicU64,
    evictions: AtomicU64,
    disk_reads: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStats {
    pub creates: u64,
    pub updates: u64,
    pub destroys: u64,
    pub evictions: u64,
    /// Evicted values read back from secondary storage
    pub disk_reads: u64,
    pub entries_in_memory: usize,
    pub entries_on_disk_only: usize,
}

pub struct LocalRegion {
    path: String,
    config: RegionConfig,
    buckets: Vec<DashMap<Key, Arc<RegionEntry>>>,
    hasher: RandomState,
    disk: Option<Arc<DiskStore>>,
    /// Resident keys, least recently used first
    residency: Option<Mutex<LruCache<Key, ()>>>,
    indexes: IndexManager,
    counters: RegionCounters,
    destroyed: AtomicBool,
}

impl LocalRegion {
    pub fn new(path: &str, config: RegionConfig) -> Result<Self> {
        let disk = config.uses_disk().then(|| Arc::new(DiskStore::new()));
        Self::build(path, config, disk)
    }

    /// Region writing evicted/persisted values to a shared store
    pub fn with_disk_store(path: &str, config: RegionConfig, disk: Arc<DiskStore>) -> Result<Self> {
        Self::build(path, config, Some(disk))
    }

    /// Reopen a persistent region from its store
    ///
    /// Values are loaded resident up to the overflow limit; the rest stay on
    /// disk. Indexes are not persisted and must be created again.
    pub fn recover(path: &str, config: RegionConfig, disk: Arc<DiskStore>) -> Result<Self> {
        if !config.persistent {
            return Err(StorageError::InvalidArgument(format!(
                "region {} is not persistent and cannot be recovered",
                path
            )));
        }
        let region = Self::build(path, config, Some(Arc::clone(&disk)))?;
        let limit = region.config.eviction.map(|e| e.max_resident_entries);
        let mut recovered = 0usize;
        for key in disk.keys() {
            let resident = limit.map_or(true, |max| recovered < max);
            let state = if resident {
                match disk.read(&key)? {
                    Some(value) => EntryState::Resident {
                        value: Arc::new(value),
                        version: 1,
                    },
                    None => continue,
                }
            } else {
                EntryState::Evicted { version: 1 }
            };
            if resident {
                if let Some(lru) = &region.residency {
                    lru.lock().put(key.clone(), ());
                }
            }
            let entry = RegionEntry::new();
            *entry.state.write() = state;
            region.bucket(&key).insert(key, Arc::new(entry));
            recovered += 1;
        }
        info!(region = %region.path, entries = recovered, "region recovered from disk store");
        Ok(region)
    }

    fn build(path: &str, config: RegionConfig, disk: Option<Arc<DiskStore>>) -> Result<Self> {
        config.validate()?;
        let path = FromClause::region(path)?.region_path().to_string();
        let indexes = IndexManager::new(path.clone(), &config)?;
        let buckets = (0..config.bucket_count()).map(|_| DashMap::new()).collect();
        let residency = config
            .eviction
            .map(|_| Mutex::new(LruCache::unbounded()));
        debug!(region = %path, shape = %config.describe(), "region created");
        Ok(Self {
            path,
            config,
            buckets,
            hasher: RandomState::new(),
            disk,
            residency,
            indexes,
            counters: RegionCounters::default(),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn disk_store(&self) -> Option<&Arc<DiskStore>> {
        self.disk.as_ref()
    }

    fn bucket(&self, key: &Key) -> &DashMap<Key, Arc<RegionEntry>> {
        let i = (self.hasher.hash_one(key) % self.buckets.len() as u64) as usize;
        &self.buckets[i]
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(StorageError::RegionDestroyed(self.path.clone()));
        }
        Ok(())
    }

    pub fn put(&self, key: Key, value: Value) -> Result<()> {
        self.ensure_live()?;
        let value = Arc::new(value);
        loop {
            let entry = Arc::clone(
                self.bucket(&key)
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(RegionEntry::new()))
                    .value(),
            );
            let _guard = entry.lock.lock();
            if !self.is_mapped(&key, &entry) {
                // destroyed between lookup and lock
                continue;
            }

            if self.config.persistent {
                if let Some(disk) = &self.disk {
                    disk.write(&key, &value)?;
                }
            }

            let old = {
                let mut state = entry.state.write();
                let version = state.version() + 1;
                std::mem::replace(
                    &mut *state,
                    EntryState::Resident {
                        value: Arc::clone(&value),
                        version,
                    },
                )
            };

            let event = match old {
                EntryState::Removed => {
                    self.counters.creates.fetch_add(1, Ordering::Relaxed);
                    EntryEvent::create(key.clone(), Arc::clone(&value))
                }
                EntryState::Resident { value: previous, .. } => {
                    self.counters.updates.fetch_add(1, Ordering::Relaxed);
                    EntryEvent::update(key.clone(), EntryValue::Resident(previous), Arc::clone(&value))
                }
                EntryState::Evicted { .. } => {
                    self.counters.updates.fetch_add(1, Ordering::Relaxed);
                    if !self.config.persistent {
                        if let Some(disk) = &self.disk {
                            disk.remove(&key);
                        }
                    }
                    EntryEvent::update(key.clone(), EntryValue::Evicted, Arc::clone(&value))
                }
            };

            self.indexes.on_entry_event(&event);
            if let Some(lru) = &self.residency {
                lru.lock().put(key.clone(), ());
            }
            break;
        }
        self.evict_if_needed();
        Ok(())
    }

    fn is_mapped(&self, key: &Key, entry: &Arc<RegionEntry>) -> bool {
        self.bucket(key)
            .get(key)
            .map_or(false, |e| Arc::ptr_eq(e.value(), entry))
    }

    /// Destroy an entry, returning its last value when resident
    pub fn destroy(&self, key: &Key) -> Result<Option<Arc<Value>>> {
        self.ensure_live()?;
        let not_found = || StorageError::EntryNotFound(format!("{} in {}", key, self.path));
        let entry = match self.bucket(key).get(key) {
            Some(e) => Arc::clone(e.value()),
            None => return Err(not_found()),
        };
        let _guard = entry.lock.lock();
        if !self.is_mapped(key, &entry) {
            return Err(not_found());
        }
        let old = std::mem::replace(&mut *entry.state.write(), EntryState::Removed);
        let old = match old {
            // created by a put that has not written yet
            EntryState::Removed => return Err(not_found()),
            EntryState::Resident { value, .. } => EntryValue::Resident(value),
            EntryState::Evicted { .. } => EntryValue::Evicted,
        };
        self.bucket(key).remove(key);
        if let Some(disk) = &self.disk {
            disk.remove(key);
        }
        if let Some(lru) = &self.residency {
            lru.lock().pop(key);
        }
        self.counters.destroys.fetch_add(1, Ordering::Relaxed);

        let returned = old.resident().cloned();
        self.indexes.on_entry_event(&EntryEvent::destroy(key.clone(), old));
        Ok(returned)
    }

    /// Current value; evicted values are read from disk without becoming
    /// resident again
    pub fn get(&self, key: &Key) -> Result<Option<Arc<Value>>> {
        self.ensure_live()?;
        let value = self.read_value(key)?;
        if let (Some(_), Some(lru)) = (&value, &self.residency) {
            lru.lock().promote(key);
        }
        Ok(value)
    }

    fn read_value(&self, key: &Key) -> Result<Option<Arc<Value>>> {
        let entry = match self.bucket(key).get(key) {
            Some(e) => Arc::clone(e.value()),
            None => return Ok(None),
        };
        let state = entry.state.read();
        match &*state {
            EntryState::Removed => Ok(None),
            EntryState::Resident { value, .. } => Ok(Some(Arc::clone(value))),
            EntryState::Evicted { .. } => self.fault_in(key).map(Some),
        }
    }

    fn fault_in(&self, key: &Key) -> Result<Arc<Value>> {
        let disk = self
            .disk
            .as_ref()
            .ok_or_else(|| StorageError::EntryNotFound(format!("{} evicted without a disk store", key)))?;
        let value = disk
            .read(key)?
            .ok_or_else(|| StorageError::EntryNotFound(format!("{} missing from disk store", key)))?;
        self.counters.disk_reads.fetch_add(1, Ordering::Relaxed);
        trace!(region = %self.path, key = %key, "value read from disk");
        Ok(Arc::new(value))
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.bucket(key)
            .get(key)
            .map_or(false, |e| !matches!(*e.value().state.read(), EntryState::Removed))
    }

    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .flat_map(|b| b.iter())
            .filter(|e| !matches!(*e.value().state.read(), EntryState::Removed))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<Key> {
        self.buckets
            .iter()
            .flat_map(|b| b.iter())
            .filter(|e| !matches!(*e.value().state.read(), EntryState::Removed))
            .map(|e| e.key().clone())
            .collect()
    }

    fn evict_if_needed(&self) {
        let (Some(eviction), Some(lru)) = (self.config.eviction, &self.residency) else {
            return;
        };
        loop {
            let victim = {
                let mut lru = lru.lock();
                if lru.len() <= eviction.max_resident_entries {
                    return;
                }
                lru.pop_lru().map(|(k, _)| k)
            };
            let Some(key) = victim else {
                return;
            };
            if !self.evict_entry(&key) {
                // busy: another thread holds it, try again on a later put
                lru.lock().put(key, ());
                return;
            }
        }
    }

    /// Move one value to disk; false when its entry lock is busy
    fn evict_entry(&self, key: &Key) -> bool {
        let entry = match self.bucket(key).get(key) {
            Some(e) => Arc::clone(e.value()),
            None => return true,
        };
        let Some(_guard) = entry.lock.try_lock() else {
            return false;
        };
        let mut state = entry.state.write();
        let (value, version) = match &*state {
            EntryState::Resident { value, version } => (Arc::clone(value), *version),
            _ => return true,
        };
        if !self.config.persistent {
            if let Some(disk) = &self.disk {
                if let Err(e) = disk.write(key, &value) {
                    warn!(region = %self.path, key = %key, error = %e, "eviction failed, value stays resident");
                    return true;
                }
            }
        }
        *state = EntryState::Evicted { version };
        drop(state);
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        trace!(region = %self.path, key = %key, "value evicted");
        self.indexes.on_entry_event(&EntryEvent::evict(key.clone(), value));
        true
    }

    /// Build an index over this region
    pub fn create_index(&self, definition: IndexDefinition) -> Result<Arc<Index>> {
        self.ensure_live()?;
        self.indexes.create_index(self, definition)
    }

    /// Block until asynchronous index maintenance has caught up
    pub fn wait_for_index_maintenance(&self) {
        self.indexes.wait_for_pending();
    }

    pub fn stats(&self) -> RegionStats {
        let mut in_memory = 0;
        let mut on_disk = 0;
        for entry in self.buckets.iter().flat_map(|b| b.iter()) {
            match *entry.value().state.read() {
                EntryState::Resident { .. } => in_memory += 1,
                EntryState::Evicted { .. } => on_disk += 1,
                EntryState::Removed => {}
            }
        }
        RegionStats {
            creates: self.counters.creates.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            destroys: self.counters.destroys.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            disk_reads: self.counters.disk_reads.load(Ordering::Relaxed),
            entries_in_memory: in_memory,
            entries_on_disk_only: on_disk,
        }
    }

    /// Value held in memory rather than only on the disk store
    pub fn is_resident(&self, key: &Key) -> bool {
        self.bucket(key)
            .get(key)
            .map_or(false, |e| matches!(*e.value().state.read(), EntryState::Resident { .. }))
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Stop index maintenance and release memory; the disk store keeps its
    /// contents for `recover`
    pub fn close(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.indexes.clear();
        self.indexes.shutdown();
        for bucket in &self.buckets {
            bucket.clear();
        }
        info!(region = %self.path, "region closed");
    }

    /// Close the region and drop its disk contents
    pub fn destroy_region(&self) {
        self.close();
        if let Some(disk) = &self.disk {
            disk.clear();
        }
        info!(region = %self.path, "region destroyed");
    }
}

impl RegionView for LocalRegion {
    fn full_path(&self) -> &str {
        &self.path
    }

    fn entry_keys(&self) -> Vec<Key> {
        self.buckets
            .iter()
            .flat_map(|b| b.iter().map(|e| e.key().clone()))
            .collect()
    }

    fn with_entry_lock(&self, key: &Key, f: &mut dyn FnMut(EntrySnapshot)) -> Result<()> {
        self.ensure_live()?;
        let entry = match self.bucket(key).get(key) {
            Some(e) => Arc::clone(e.value()),
            None => {
                f(EntrySnapshot {
                    value: None,
                    from_disk: false,
                });
                return Ok(());
            }
        };
        let _guard = entry.lock.lock();
        let snapshot = {
            let state = entry.state.read();
            match &*state {
                EntryState::Removed => EntrySnapshot {
                    value: None,
                    from_disk: false,
                },
                EntryState::Resident { value, .. } => EntrySnapshot {
                    value: Some(Arc::clone(value)),
                    from_disk: false,
                },
                EntryState::Evicted { .. } => EntrySnapshot {
                    value: Some(self.fault_in(key)?),
                    from_disk: true,
                },
            }
        };
        f(snapshot);
        Ok(())
    }

    fn get_value(&self, key: &Key) -> Result<Option<Arc<Value>>> {
        self.read_value(key)
    }
}

impl Drop for LocalRegion {
    fn drop(&mut self) {
        self.indexes.shutdown();
    }
}

impl std::fmt::Debug for LocalRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegion")
            .field("path", &self.path)
            .field("shape", &self.config.describe())
            .finish()
    }
}
