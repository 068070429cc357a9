#![allow(dead_code)]

use parking_lot::Mutex;

pub use std::sync::Arc;

pub use regidx::query::{QueryExecutor, QueryPlanner};
pub use regidx::{Cache, Key, LocalRegion, Query, QueryResults, RegionConfig, StorageError, Value};

/// Serializes tests that install a process-wide hook or observer
pub static GLOBAL_HOOKS: Mutex<()> = parking_lot::const_mutex(());

pub const SEC_IDS: [&str; 12] = [
    "SUN", "IBM", "YHOO", "GOOG", "MSFT", "AOL", "APPL", "ORCL", "SAP", "DELL", "RHAT", "NOVL",
];

pub fn position(sec_id: &str, shares: i64) -> Value {
    Value::object([
        ("secId", Value::text(sec_id)),
        ("sharesOutstanding", Value::Integer(shares)),
    ])
}

/// Portfolio `id`: even ids are active, each holds two positions
pub fn portfolio(id: i64) -> Value {
    let first = SEC_IDS[(2 * id as usize) % SEC_IDS.len()];
    let second = SEC_IDS[(2 * id as usize + 1) % SEC_IDS.len()];
    Value::object([
        ("ID", Value::Integer(id)),
        ("status", Value::text(if id % 2 == 0 { "active" } else { "inactive" })),
        ("pkid", Value::text(id.to_string())),
        (
            "positions",
            Value::object([
                (first, position(first, 1000 * (id + 1))),
                (second, position(second, 1000 * (id + 2))),
            ]),
        ),
    ])
}

pub fn load_portfolios(region: &LocalRegion, count: i64) {
    for id in 0..count {
        region.put(Key::Int(id), portfolio(id)).unwrap();
    }
}

/// Run `text` through the planner and again as a plain scan
pub fn indexed_and_scanned(region: &LocalRegion, text: &str) -> (QueryResults, QueryResults) {
    let query = Query::parse(text).unwrap();
    let executor = QueryExecutor::new();
    let indexed = executor
        .execute(&query, QueryPlanner::new().plan(&query, region.indexes(), region.len()).unwrap(), region)
        .unwrap();
    let scanned = executor
        .execute(
            &query,
            QueryPlanner::without_optimization()
                .plan(&query, region.indexes(), region.len())
                .unwrap(),
            region,
        )
        .unwrap();
    (indexed, scanned)
}

pub fn sorted_keys(results: &QueryResults) -> Vec<Key> {
    let mut keys = results.keys();
    keys.sort();
    keys
}
