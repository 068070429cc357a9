//! Mutation-driven index maintenance
//!
//! Lock order: entry lock (held by the region) -> index reverse-map shard ->
//! index structure lock. Queries take only structure locks, so a mutation
//! paused anywhere in this path never blocks a reader.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::hook::{self, HookContext, HookHandle, HookSpot};
use super::{Index, IndexState};
use crate::types::{Key, Value};
use crate::{Result, StorageError};

/// Indexes registered for maintenance on one region
///
/// Holds non-owning references; the manager owns the indexes.
#[derive(Default)]
pub(crate) struct MaintenanceTargets {
    targets: RwLock<Vec<Weak<Index>>>,
}

impl MaintenanceTargets {
    pub fn register(&self, index: &Arc<Index>) {
        self.targets.write().push(Arc::downgrade(index));
    }

    pub fn unregister(&self, index: &Arc<Index>) {
        let target = Arc::downgrade(index);
        self.targets
            .write()
            .retain(|w| !w.ptr_eq(&target) && w.strong_count() > 0);
    }

    /// Live, non-removed indexes at this instant
    pub fn snapshot(&self) -> Vec<Arc<Index>> {
        self.targets
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|i| i.state() != IndexState::Removed)
            .collect()
    }

    pub fn clear(&self) {
        self.targets.write().clear();
    }
}

/// Apply one entry's new value to one index, recording failures
///
/// Returns false when the index rejected or could not evaluate the entry.
/// Failures never propagate to the mutation.
pub(crate) fn maintain(index: &Index, key: &Key, value: Option<&Value>) -> bool {
    match index.apply(key, value) {
        Ok(()) => true,
        Err(e @ StorageError::PrimaryKeyViolation { .. }) => {
            index.stats.record_violation();
            warn!(index = index.name(), key = %key, error = %e, "primary key violation, key marked degraded");
            false
        }
        Err(e) => {
            index.stats.record_exception();
            warn!(index = index.name(), key = %key, error = %e, "entry excluded from index");
            false
        }
    }
}

/// Update every target index for one entry
pub(crate) fn apply_to_indexes(
    region: &str,
    key: &Key,
    value: Option<&Value>,
    targets: &[Arc<Index>],
    hook: &HookHandle,
) {
    for index in targets {
        let ctx = HookContext {
            region,
            index: Some(index.name()),
            key: Some(key),
        };
        hook.fire(HookSpot::AfterEntryLockBeforeIndexUpdate, &ctx);
        maintain(index, key, value);
        hook.fire(HookSpot::AfterIndexUpdate, &ctx);
    }
}

enum Task {
    Apply { key: Key, value: Option<Arc<Value>> },
    Barrier(Sender<()>),
    Shutdown,
}

/// Background worker for asynchronous maintenance
///
/// Tasks are enqueued while the mutation still holds the entry lock, so the
/// queue preserves per-key order.
pub(crate) struct AsyncMaintenance {
    sender: Sender<Task>,
    pending: Arc<AtomicUsize>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AsyncMaintenance {
    pub fn start(region: String, targets: Arc<MaintenanceTargets>) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);
        let handle = thread::Builder::new()
            .name(format!("index-maintenance{}", region.replace('/', "-")))
            .spawn(move || run_worker(region, targets, receiver, worker_pending))?;
        Ok(Self {
            sender,
            pending,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn enqueue(&self, key: Key, value: Option<Arc<Value>>) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Task::Apply { key, value }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            debug!("maintenance worker stopped, update dropped");
        }
    }

    /// Block until every task enqueued before this call has been applied
    pub fn wait_for_pending(&self) {
        let (tx, rx) = channel::bounded(1);
        if self.sender.send(Task::Barrier(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = self.sender.send(Task::Shutdown);
            if handle.join().is_err() {
                warn!("index maintenance worker panicked");
            }
        }
    }
}

impl Drop for AsyncMaintenance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    region: String,
    targets: Arc<MaintenanceTargets>,
    receiver: Receiver<Task>,
    pending: Arc<AtomicUsize>,
) {
    debug!(region = %region, "index maintenance worker started");
    for task in receiver.iter() {
        match task {
            Task::Apply { key, value } => {
                let hook = hook::current();
                hook.fire(
                    HookSpot::AsyncBeforeApply,
                    &HookContext {
                        region: &region,
                        index: None,
                        key: Some(&key),
                    },
                );
                let indexes = targets.snapshot();
                trace!(region = %region, key = %key, indexes = indexes.len(), "applying queued update");
                apply_to_indexes(&region, &key, value.as_deref(), &indexes, &hook);
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            Task::Barrier(done) => {
                let _ = done.send(());
            }
            Task::Shutdown => break,
        }
    }
    debug!(region = %region, "index maintenance worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexDefinition, Operator};

    fn ready_index(name: &str) -> Arc<Index> {
        let index = Index::new(IndexDefinition::range(name, "v", "/maint").compile().unwrap(), 4);
        index.set_state(IndexState::Ready);
        Arc::new(index)
    }

    fn value(v: i64) -> Arc<Value> {
        Arc::new(Value::object([("v", Value::Integer(v))]))
    }

    #[test]
    fn test_targets_hold_weak_references() {
        let targets = MaintenanceTargets::default();
        let a = ready_index("a");
        let b = ready_index("b");
        targets.register(&a);
        targets.register(&b);
        assert_eq!(targets.snapshot().len(), 2);

        targets.unregister(&a);
        assert_eq!(targets.snapshot().len(), 1);

        drop(b);
        assert!(targets.snapshot().is_empty());
    }

    #[test]
    fn test_async_worker_applies_in_order() {
        let targets = Arc::new(MaintenanceTargets::default());
        let index = ready_index("async");
        targets.register(&index);

        let worker = AsyncMaintenance::start("/maint".to_string(), Arc::clone(&targets)).unwrap();
        for i in 0..100 {
            worker.enqueue(Key::Int(i % 10), Some(value(i)));
        }
        worker.enqueue(Key::Int(0), None);
        worker.wait_for_pending();
        assert_eq!(worker.pending(), 0);

        // last write per key wins: keys 1..9 hold 91..99
        let hits = index.lookup(Operator::GreaterThan, Some(&Key::Int(90))).unwrap();
        assert_eq!(hits.len(), 9);
        assert_eq!(index.statistics().number_of_values, 9);
        worker.shutdown();
    }
}
