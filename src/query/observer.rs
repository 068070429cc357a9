//! Query observer callbacks
//!
//! One observer is installed process-wide. The executor reads it once per
//! query and reports index lookups to it, which lets tests assert that a
//! query actually went through an index.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::Query;
use crate::index::{Index, IndexLookup, Operator};
use crate::types::Key;

pub trait QueryObserver: Send + Sync {
    fn start_query(&self, _query: &Query) {}

    fn before_index_lookup(&self, _index: &Index, _operator: Operator, _probe: Option<&Key>) {}

    fn after_index_lookup(&self, _index: &Index, _results: &IndexLookup) {}

    fn end_query(&self, _query: &Query, _rows: usize) {}
}

struct NoopObserver;

impl QueryObserver for NoopObserver {}

static OBSERVER: RwLock<Option<Arc<dyn QueryObserver>>> = parking_lot::const_rwlock(None);

pub(crate) fn current() -> Arc<dyn QueryObserver> {
    match &*OBSERVER.read() {
        Some(observer) => Arc::clone(observer),
        None => Arc::new(NoopObserver),
    }
}

/// Replace the installed observer, returning the previous one
pub fn set_observer(observer: Option<Arc<dyn QueryObserver>>) -> Option<Arc<dyn QueryObserver>> {
    std::mem::replace(&mut *OBSERVER.write(), observer)
}

/// Install `observer` until the guard is dropped
pub fn install(observer: Arc<dyn QueryObserver>) -> ObserverGuard {
    ObserverGuard {
        previous: set_observer(Some(observer)),
    }
}

#[must_use = "the observer is uninstalled when the guard is dropped"]
pub struct ObserverGuard {
    previous: Option<Arc<dyn QueryObserver>>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        set_observer(self.previous.take());
    }
}

/// One index lookup as seen by [`RecordingObserver`]
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRecord {
    pub region: String,
    pub index: String,
    pub operator: Operator,
    pub results: usize,
}

/// Collects index lookups, optionally only for one region
#[derive(Debug, Default)]
pub struct RecordingObserver {
    region: Option<String>,
    lookups: Mutex<Vec<LookupRecord>>,
    pending: Mutex<Vec<(String, Operator)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore lookups against indexes of other regions
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> Vec<LookupRecord> {
        self.lookups.lock().clone()
    }

    /// Names of the indexes used, in lookup order
    pub fn indexes_used(&self) -> Vec<String> {
        self.lookups.lock().iter().map(|l| l.index.clone()).collect()
    }

    pub fn clear(&self) {
        self.lookups.lock().clear();
    }

    fn wants(&self, index: &Index) -> bool {
        self.region.as_deref().map_or(true, |r| r == index.region_path())
    }
}

impl QueryObserver for RecordingObserver {
    fn before_index_lookup(&self, index: &Index, operator: Operator, _probe: Option<&Key>) {
        if self.wants(index) {
            self.pending.lock().push((index.name().to_string(), operator));
        }
    }

    fn after_index_lookup(&self, index: &Index, results: &IndexLookup) {
        if !self.wants(index) {
            return;
        }
        let operator = {
            let mut pending = self.pending.lock();
            let at = pending.iter().rposition(|(name, _)| name == index.name());
            at.map(|i| pending.remove(i).1)
        };
        let Some(operator) = operator else { return };
        self.lookups.lock().push(LookupRecord {
            region: index.region_path().to_string(),
            index: index.name().to_string(),
            operator,
            results: results.len(),
        });
    }
}
