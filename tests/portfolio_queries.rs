//! Index statistics, index selection and query results over the Portfolio
//! fixture, plus removal, primary-key and overflow behavior

mod common;

use common::*;
use regidx::query::observer;
use regidx::query::RecordingObserver;
use regidx::{IndexKind, Operator};

const ACTIVE: &str = "SELECT * FROM /portfolios p WHERE p.status = 'active'";

fn portfolio_cache(config: RegionConfig) -> (Cache, Arc<LocalRegion>) {
    let cache = Cache::new();
    let region = cache.create_region("/portfolios", config).unwrap();
    load_portfolios(&region, 10);
    (cache, region)
}

#[test]
fn test_index_statistics() {
    let (cache, _region) = portfolio_cache(RegionConfig::replicate());
    let qs = cache.query_service();
    let status = qs.create_index("statusIndex", "p.status", "/portfolios p").unwrap();
    let id = qs.create_index("idIndex", "p.ID", "/portfolios p").unwrap();
    let sec = qs
        .create_index("secIdIndex", "pos.secId", "/portfolios p, p.positions.values pos")
        .unwrap();

    let stats = status.statistics();
    assert_eq!((stats.number_of_keys, stats.number_of_values), (2, 10));
    let stats = id.statistics();
    assert_eq!((stats.number_of_keys, stats.number_of_values), (10, 10));
    let stats = sec.statistics();
    assert_eq!((stats.number_of_keys, stats.number_of_values), (12, 20));

    assert_eq!(qs.query(ACTIVE).unwrap().len(), 5);
    assert_eq!(qs.query("SELECT * FROM /portfolios p WHERE p.ID > 4").unwrap().len(), 5);
    let positions = qs
        .query("SELECT * FROM /portfolios p, p.positions.values pos WHERE pos.secId != NULL")
        .unwrap();
    assert_eq!(positions.len(), 20);
    assert_eq!(positions.plan().index().unwrap().name(), "secIdIndex");

    assert_eq!(status.statistics().number_of_lookups, 1);
    for index in [&status, &id, &sec] {
        assert!(index.verify().is_empty());
        assert_eq!(index.build_stats().entries_scanned, 10);
    }
}

#[test]
fn test_statistics_follow_updates() {
    let (cache, region) = portfolio_cache(RegionConfig::partition(7));
    let qs = cache.query_service();
    let status = qs.create_hash_index("statusIndex", "p.status", "/portfolios p").unwrap();

    // all active, then drop two
    for id in 0..10 {
        let mut value = portfolio(id);
        if let Value::Map(fields) = &mut value {
            fields.insert("status".to_string(), Value::text("active"));
        }
        region.put(Key::Int(id), value).unwrap();
    }
    region.destroy(&Key::Int(0)).unwrap();
    region.destroy(&Key::Int(1)).unwrap();

    let stats = status.statistics();
    assert_eq!((stats.number_of_keys, stats.number_of_values), (1, 8));
    assert_eq!(stats.number_of_updates, 10 + 10 + 2);
    assert_eq!(qs.query(ACTIVE).unwrap().len(), 8);
}

#[test]
fn test_index_selection_ranking() {
    let _serial = GLOBAL_HOOKS.lock();
    let cache = Cache::new();
    let region = cache.create_region("/ranked", RegionConfig::replicate()).unwrap();
    load_portfolios(&region, 10);
    let qs = cache.query_service();
    qs.create_index("idRange", "p.ID", "/ranked p").unwrap();
    qs.create_hash_index("idHash", "ID", "/ranked").unwrap();

    let recorder = Arc::new(RecordingObserver::for_region("/ranked"));
    let _guard = observer::install(recorder.clone());

    // equality prefers hash over range; inequality and ordering need range
    assert_eq!(qs.query("SELECT * FROM /ranked p WHERE p.ID = 3").unwrap().len(), 1);
    assert_eq!(qs.query("SELECT * FROM /ranked p WHERE p.ID >= 3").unwrap().len(), 7);
    let ordered = qs.query("SELECT * FROM /ranked p WHERE p.ID != 3 ORDER BY p.ID").unwrap();
    assert_eq!(ordered.keys().first(), Some(&Key::Int(0)));
    assert_eq!(ordered.len(), 9);

    // a primary-key index wins equality
    qs.create_key_index("idKey", "r.ID", "/ranked r").unwrap();
    qs.query("SELECT * FROM /ranked p WHERE p.ID = 3").unwrap();

    assert_eq!(
        recorder.indexes_used(),
        vec![
            "idHash".to_string(),
            "idRange".to_string(),
            "idRange".to_string(),
            "idKey".to_string()
        ]
    );
    assert_eq!(recorder.lookups()[1].operator, Operator::GreaterThanOrEqual);
    assert_eq!(recorder.lookups()[3].results, 1);
}

#[test]
fn test_equivalent_definitions_conflict() {
    let (cache, _region) = portfolio_cache(RegionConfig::replicate());
    let qs = cache.query_service();
    qs.create_index("a", "p.ID", "/portfolios p").unwrap();

    // same expression through a different alias and the implicit root
    assert!(matches!(
        qs.create_index("b", "q.ID", "/portfolios q"),
        Err(StorageError::IndexExists { .. })
    ));
    assert!(matches!(
        qs.create_index("c", "ID", "/portfolios"),
        Err(StorageError::IndexExists { .. })
    ));
    assert!(matches!(
        qs.create_hash_index("a", "p.status", "/portfolios p"),
        Err(StorageError::IndexNameConflict { .. })
    ));
    assert_eq!(qs.get_indexes("/portfolios").len(), 1);
}

#[test]
fn test_nested_scope_index_does_not_serve_region_query() {
    let cache = Cache::new();
    let region = cache.create_region("/pf", RegionConfig::replicate()).unwrap();
    let no_positions = Value::object([
        ("ID", Value::Integer(1)),
        ("positions", Value::object(Vec::<(String, Value)>::new())),
    ]);
    region.put(Key::Int(1), no_positions).unwrap();
    region.put(Key::Int(2), portfolio(2)).unwrap();

    let qs = cache.query_service();
    qs.create_index("nestedId", "p.ID", "/pf p, p.positions.values pos").unwrap();

    // the index never saw entry 1: it has no position tuples
    let (indexed, scanned) = indexed_and_scanned(&region, "SELECT * FROM /pf p WHERE p.ID = 1");
    assert!(!indexed.plan().uses_index());
    assert_eq!(sorted_keys(&indexed), vec![Key::Int(1)]);
    assert_eq!(sorted_keys(&indexed), sorted_keys(&scanned));

    let nested = qs
        .query("SELECT * FROM /pf p, p.positions.values pos WHERE p.ID = 2")
        .unwrap();
    assert!(nested.plan().uses_index());
    assert_eq!(nested.len(), 2);
}

#[test]
fn test_remove_index_falls_back_to_scan() {
    let (cache, _region) = portfolio_cache(RegionConfig::replicate());
    let qs = cache.query_service();
    let index = qs.create_index("statusIndex", "p.status", "/portfolios p").unwrap();

    let before = qs.query(ACTIVE).unwrap();
    assert!(before.plan().uses_index());

    qs.remove_index("/portfolios", "statusIndex").unwrap();
    assert!(matches!(
        qs.remove_index("/portfolios", "statusIndex"),
        Err(StorageError::IndexNotFound(_))
    ));
    assert!(matches!(
        index.lookup(Operator::Equal, Some(&Key::text("active"))),
        Err(StorageError::IndexRemoved(_))
    ));

    let after = qs.query(ACTIVE).unwrap();
    assert!(!after.plan().uses_index());
    assert_eq!(sorted_keys(&before), sorted_keys(&after));

    // the name is free again
    qs.create_hash_index("statusIndex", "p.status", "/portfolios p").unwrap();
    assert_eq!(qs.query(ACTIVE).unwrap().len(), 5);
}

#[test]
fn test_primary_key_violation_keeps_results_correct() {
    let (cache, region) = portfolio_cache(RegionConfig::replicate());
    let qs = cache.query_service();
    let pk = qs.create_key_index("pk", "p.pkid", "/portfolios p").unwrap();
    assert_eq!(pk.kind(), IndexKind::PrimaryKey);

    // key 42 claims pkid "3", which key 3 already owns
    let mut dup = portfolio(42);
    if let Value::Map(fields) = &mut dup {
        fields.insert("pkid".to_string(), Value::text("3"));
    }
    region.put(Key::Int(42), dup).unwrap();

    let stats = pk.statistics();
    assert_eq!(stats.number_of_violations, 1);
    assert_eq!(stats.number_of_values, 10);
    assert_eq!(pk.degraded_keys(), vec![Key::Int(42)]);

    let (indexed, scanned) = indexed_and_scanned(&region, "SELECT * FROM /portfolios p WHERE p.pkid = '3'");
    assert!(indexed.plan().uses_index());
    assert_eq!(sorted_keys(&indexed), vec![Key::Int(3), Key::Int(42)]);
    assert_eq!(sorted_keys(&indexed), sorted_keys(&scanned));

    // freeing the value lets the degraded key in on its next update
    region.destroy(&Key::Int(3)).unwrap();
    let current = region.get(&Key::Int(42)).unwrap().unwrap();
    region.put(Key::Int(42), (*current).clone()).unwrap();
    assert!(pk.degraded_keys().is_empty());
    assert_eq!(pk.lookup(Operator::Equal, Some(&Key::text("3"))).unwrap().to_vec(), vec![Key::Int(42)]);
    assert!(pk.verify().is_empty());
}

#[test]
fn test_unsupported_operator_is_rejected() {
    let (cache, _region) = portfolio_cache(RegionConfig::replicate());
    let qs = cache.query_service();
    let hash = qs.create_hash_index("statusHash", "p.status", "/portfolios p").unwrap();
    assert!(matches!(
        hash.lookup(Operator::LessThan, Some(&Key::text("b"))),
        Err(StorageError::UnsupportedOperator { .. })
    ));

    // the planner never hands an unsupported operator to a hash index
    let results = qs.query("SELECT * FROM /portfolios p WHERE p.status < 'b'").unwrap();
    assert!(!results.plan().uses_index());
    assert_eq!(results.len(), 5);

    let hinted = Query::parse("SELECT * FROM /portfolios p WHERE p.status < 'b'")
        .unwrap()
        .use_index("statusHash");
    assert!(matches!(qs.execute(&hinted), Err(StorageError::UnsupportedOperator { .. })));
}

#[test]
fn test_overflow_and_recovery() {
    let disk = Arc::new(regidx::DiskStore::new());
    let config = RegionConfig::replicate().persistent().with_overflow(3);
    {
        let cache = Cache::new();
        let region = cache
            .create_region_with_disk_store("/portfolios", config.clone(), Arc::clone(&disk))
            .unwrap();
        load_portfolios(&region, 10);
        assert_eq!(region.stats().entries_in_memory, 3);

        let qs = cache.query_service();
        let id = qs.create_index("idIndex", "p.ID", "/portfolios p").unwrap();
        assert_eq!(id.build_stats().entries_from_disk, 7);
        assert_eq!(qs.query("SELECT * FROM /portfolios p WHERE p.ID > 4").unwrap().len(), 5);
        cache.close();
    }

    let cache = Cache::new();
    let region = cache.recover_region("/portfolios", config, disk).unwrap();
    assert_eq!(region.len(), 10);
    let qs = cache.query_service();
    assert!(qs.get_indexes("/portfolios").is_empty());
    qs.create_index("idIndex", "p.ID", "/portfolios p").unwrap();
    let (indexed, scanned) = indexed_and_scanned(&region, "SELECT * FROM /portfolios p WHERE p.ID <= 2");
    assert_eq!(sorted_keys(&indexed), vec![Key::Int(0), Key::Int(1), Key::Int(2)]);
    assert_eq!(sorted_keys(&indexed), sorted_keys(&scanned));
}
