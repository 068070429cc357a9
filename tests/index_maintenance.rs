//! Concurrent maintenance: forced interleavings through hook spots,
//! randomized mutation storms and index/scan agreement for every operator

mod common;

use std::thread;
use std::time::Duration;

use crossbeam::channel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::*;
use regidx::index::hook;
use regidx::{HookContext, HookSpot, IndexDefinition, Operator};

const TIMEOUT: Duration = Duration::from_secs(10);

fn numbered(v: i64) -> Value {
    Value::object([("value", Value::Integer(v))])
}

/// A mutation paused after taking its entry lock must not block queries,
/// and index creation must complete once it resumes
#[test]
fn test_paused_mutation_does_not_deadlock() {
    let _serial = GLOBAL_HOOKS.lock();
    for (n, config) in RegionConfig::all_shapes(40).into_iter().enumerate() {
        for config in [config.clone(), config.with_async_index_maintenance()] {
            let path = format!("/deadlock_{}_{}", n, config.index_maintenance.is_synchronous());
            run_paused_mutation(&path, config);
        }
    }
}

fn run_paused_mutation(path: &str, config: RegionConfig) {
    let shape = config.describe();
    let region = Arc::new(LocalRegion::new(path, config).unwrap());
    for i in 1..100 {
        region.put(Key::Int(i), numbered(i)).unwrap();
    }
    region
        .create_index(IndexDefinition::range("first", "value", path))
        .unwrap();

    let (paused_tx, paused_rx) = channel::bounded::<()>(1);
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let region_path = path.to_string();
    let paused_once = std::sync::atomic::AtomicBool::new(false);
    let _guard = hook::install(Arc::new(move |spot: HookSpot, ctx: &HookContext<'_>| {
        if spot == HookSpot::AfterEntryLockBeforeIndexUpdate
            && ctx.region == region_path
            && ctx.key == Some(&Key::Int(0))
            && !paused_once.swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            let _ = paused_tx.send(());
            let _ = release_rx.recv_timeout(TIMEOUT);
        }
    }));

    let writer = {
        let region = Arc::clone(&region);
        thread::spawn(move || region.put(Key::Int(0), numbered(0)))
    };
    paused_rx
        .recv_timeout(TIMEOUT)
        .unwrap_or_else(|_| panic!("{}: mutation never reached the hook", shape));

    // readers only take structure locks
    let query = format!("SELECT * FROM {} WHERE value > 50", path);
    let (indexed, _) = indexed_and_scanned(&region, &query);
    assert_eq!(indexed.len(), 49, "{}", shape);

    let (created_tx, created_rx) = channel::bounded(1);
    let creator = {
        let region = Arc::clone(&region);
        let path = path.to_string();
        thread::spawn(move || {
            let result = region.create_index(IndexDefinition::hash("second", "value", path.as_str()));
            let _ = created_tx.send(result.map(|i| i.name().to_string()));
        })
    };

    release_tx.send(()).unwrap();
    let created = created_rx
        .recv_timeout(TIMEOUT)
        .unwrap_or_else(|_| panic!("{}: index creation deadlocked", shape));
    assert_eq!(created.unwrap(), "second");
    writer.join().unwrap().unwrap();
    creator.join().unwrap();
    region.wait_for_index_maintenance();

    let (indexed, scanned) = indexed_and_scanned(&region, &query);
    assert_eq!(indexed.len(), 49, "{}", shape);
    assert_eq!(sorted_keys(&indexed), sorted_keys(&scanned), "{}", shape);
    let (indexed, scanned) = indexed_and_scanned(&region, &format!("SELECT * FROM {} WHERE value = 0", path));
    assert_eq!(indexed.plan().index().unwrap().name(), "second", "{}", shape);
    assert_eq!(sorted_keys(&indexed), sorted_keys(&scanned), "{}", shape);
    for index in region.indexes().get_indexes() {
        assert!(index.verify().is_empty(), "{}: {:?}", shape, index.verify());
        assert_eq!(index.statistics().number_of_values, 100, "{}", shape);
    }
}

/// Index creation racing random puts and destroys never loses an update
#[test]
fn test_no_lost_updates_during_creation() {
    for (n, config) in RegionConfig::all_shapes(25).into_iter().enumerate() {
        let path = format!("/storm_{}", n);
        let shape = config.describe();
        let region = Arc::new(LocalRegion::new(&path, config).unwrap());
        for i in 0..50 {
            region.put(Key::Int(i), numbered(i)).unwrap();
        }

        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let region = Arc::clone(&region);
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t);
                    for _ in 0..500 {
                        let key = Key::Int(rng.gen_range(0..60));
                        if rng.gen_bool(0.2) {
                            let _ = region.destroy(&key);
                        } else {
                            region.put(key, numbered(rng.gen_range(0..30))).unwrap();
                        }
                    }
                })
            })
            .collect();

        let range = region
            .create_index(IndexDefinition::range("range", "value", path.as_str()))
            .unwrap();
        let hash = region
            .create_index(IndexDefinition::hash("hash", "value", path.as_str()))
            .unwrap();
        for w in writers {
            w.join().unwrap();
        }
        region.wait_for_index_maintenance();

        let live: Vec<i64> = region
            .keys()
            .iter()
            .filter_map(|k| region.get(k).unwrap())
            .filter_map(|v| match v.field("value") {
                Some(Value::Integer(i)) => Some(*i),
                _ => None,
            })
            .collect();
        let distinct: std::collections::BTreeSet<_> = live.iter().collect();
        for index in [&range, &hash] {
            let stats = index.statistics();
            assert_eq!(stats.number_of_values, live.len(), "{} {}", shape, index.name());
            assert_eq!(stats.number_of_keys, distinct.len(), "{} {}", shape, index.name());
            assert!(index.verify().is_empty(), "{}: {:?}", shape, index.verify());
        }
        for probe in [0, 7, 15, 29] {
            let (indexed, scanned) =
                indexed_and_scanned(&region, &format!("SELECT * FROM {} WHERE value = {}", path, probe));
            assert!(indexed.plan().uses_index());
            assert_eq!(sorted_keys(&indexed), sorted_keys(&scanned), "{}", shape);
        }
    }
}

/// After a write returns, index answers equal scan answers for every
/// operator, including entries whose indexed value is undefined or of
/// another type
#[test]
fn test_read_after_write_matches_scan() {
    let region = LocalRegion::new("/raw", RegionConfig::partition(5)).unwrap();
    region.create_index(IndexDefinition::range("r", "value", "/raw")).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    for round in 0..200 {
        let key = Key::Int(rng.gen_range(0..40));
        let value = match rng.gen_range(0..10) {
            0 => Value::object([("other", Value::Integer(1))]),
            1 => Value::object([("value", Value::Null)]),
            2 => Value::object([("value", Value::text(format!("t{}", round % 4)))]),
            3 => Value::object([("value", Value::Float(round as f64 / 10.0))]),
            _ => numbered(rng.gen_range(0..20)),
        };
        region.put(key, value).unwrap();
        if round % 7 == 0 {
            let _ = region.destroy(&Key::Int(rng.gen_range(0..40)));
        }
    }

    let predicates = [
        "value = 5",
        "value != 5",
        "value < 10",
        "value <= 10",
        "value > 3",
        "value >= 3.5",
        "value = 't1'",
        "value > 't0'",
        "value != NULL",
        "value IS UNDEFINED",
    ];
    for predicate in predicates {
        let (indexed, scanned) = indexed_and_scanned(&region, &format!("SELECT * FROM /raw WHERE {}", predicate));
        assert!(indexed.plan().uses_index(), "{}", predicate);
        assert_eq!(sorted_keys(&indexed), sorted_keys(&scanned), "{}", predicate);
    }
    let index = region.indexes().get_index("r").unwrap();
    assert!(index.verify().is_empty());
    assert_eq!(index.statistics().number_of_exceptions, 0);
}

#[test]
fn test_async_maintenance_catches_up() {
    let region = LocalRegion::new("/async", RegionConfig::replicate().with_async_index_maintenance()).unwrap();
    assert!(!region.indexes().is_synchronous());
    let index = region
        .create_index(IndexDefinition::hash("v", "value", "/async"))
        .unwrap();
    for i in 0..1000 {
        region.put(Key::Int(i % 100), numbered(i)).unwrap();
    }
    region.wait_for_index_maintenance();
    assert_eq!(region.indexes().pending_updates(), 0);

    let stats = index.statistics();
    assert_eq!(stats.number_of_values, 100);
    assert_eq!(stats.number_of_keys, 100);
    assert_eq!(
        index.lookup(Operator::Equal, Some(&Key::Int(999))).unwrap().to_vec(),
        vec![Key::Int(99)]
    );
    assert!(index.lookup(Operator::Equal, Some(&Key::Int(5))).unwrap().is_empty());
}

#[test]
fn test_removal_during_maintenance() {
    let _serial = GLOBAL_HOOKS.lock();
    let region = Arc::new(LocalRegion::new("/remove_race", RegionConfig::replicate()).unwrap());
    let index = region
        .create_index(IndexDefinition::range("doomed", "value", "/remove_race"))
        .unwrap();

    let (unregistered_tx, unregistered_rx) = channel::bounded::<()>(1);
    let (go_tx, go_rx) = channel::bounded::<()>(1);
    let _guard = hook::install(Arc::new(move |spot: HookSpot, ctx: &HookContext<'_>| {
        if spot == HookSpot::AfterUnregister && ctx.region == "/remove_race" {
            let _ = unregistered_tx.send(());
            let _ = go_rx.recv_timeout(TIMEOUT);
        }
    }));

    let remover = {
        let region = Arc::clone(&region);
        thread::spawn(move || region.indexes().remove_index("doomed"))
    };
    unregistered_rx.recv_timeout(TIMEOUT).unwrap();
    // unregistered, not yet discarded: mutations skip the index
    region.put(Key::Int(1), numbered(1)).unwrap();
    assert_eq!(index.entry_count(), 0);
    go_tx.send(()).unwrap();
    remover.join().unwrap().unwrap();

    assert!(region.indexes().get_index("doomed").is_none());
    let (_, scanned) = indexed_and_scanned(&region, "SELECT * FROM /remove_race WHERE value = 1");
    assert_eq!(scanned.keys(), vec![Key::Int(1)]);
}

/// Destroys one entry from another thread while the query is between its
/// index lookup and the re-check of candidates
struct DestroyMidQuery {
    region: parking_lot::Mutex<Option<Arc<LocalRegion>>>,
    lookups: std::sync::atomic::AtomicUsize,
}

impl regidx::QueryObserver for DestroyMidQuery {
    fn after_index_lookup(&self, index: &regidx::Index, results: &regidx::IndexLookup) {
        if index.region_path() != "/scenario" {
            return;
        }
        self.lookups.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(results.len(), 49);
        if let Some(region) = self.region.lock().take() {
            thread::spawn(move || region.destroy(&Key::Int(1)).map(|_| ()))
                .join()
                .unwrap()
                .unwrap();
        }
    }
}

#[test]
fn test_destroy_during_query() {
    let _serial = GLOBAL_HOOKS.lock();
    let cache = Cache::new();
    let region = cache.create_region("/scenario", RegionConfig::replicate()).unwrap();
    for i in 0..100 {
        region.put(Key::Int(i), numbered(i)).unwrap();
    }
    let qs = cache.query_service();
    qs.create_index("valueIndex", "value", "/scenario").unwrap();

    let observer = Arc::new(DestroyMidQuery {
        region: parking_lot::Mutex::new(Some(Arc::clone(&region))),
        lookups: std::sync::atomic::AtomicUsize::new(0),
    });
    let _guard = regidx::query::observer::install(observer.clone());

    let before = qs.query("SELECT * FROM /scenario WHERE value > 50").unwrap();
    assert_eq!(before.len(), 49);
    assert!(!region.contains_key(&Key::Int(1)));
    let after = qs.query("SELECT * FROM /scenario WHERE value > 50").unwrap();
    assert_eq!(after.len(), 49);
    assert_eq!(observer.lookups.load(std::sync::atomic::Ordering::SeqCst), 2);
}
