//! Query execution engine
//!
//! Index candidates are only a superset hint. Every candidate is fetched
//! from the region and re-checked tuple by tuple, so a result never depends
//! on index timing.

use std::sync::Arc;

use ahash::AHashSet;
use tracing::trace;

use super::observer;
use super::planner::{ExecutionPlan, PlanOperator};
use super::{Predicate, Query};
use crate::expr::ResolvedPath;
use crate::index::Index;
use crate::region::RegionView;
use crate::types::{Key, Value};
use crate::{Result, StorageError};

/// One matching scope tuple
#[derive(Debug, Clone)]
pub struct ResultRow {
    /// Region entry the tuple came from
    pub key: Key,
    /// Region value of that entry
    pub value: Arc<Value>,
    /// Ordering value; `None` when undefined or not ordered
    pub sort_key: Option<Key>,
}

#[derive(Debug, Clone)]
pub struct QueryResults {
    rows: Vec<ResultRow>,
    plan: ExecutionPlan,
}

impl QueryResults {
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultRow> {
        self.rows.iter()
    }

    /// Entry keys, one per row
    pub fn keys(&self) -> Vec<Key> {
        self.rows.iter().map(|r| r.key.clone()).collect()
    }

    /// Distinct entry keys in row order
    pub fn distinct_keys(&self) -> Vec<Key> {
        let mut seen = AHashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.key.clone()))
            .map(|r| r.key.clone())
            .collect()
    }

    pub fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }
}

impl<'a> IntoIterator for &'a QueryResults {
    type Item = &'a ResultRow;
    type IntoIter = std::slice::Iter<'a, ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Compiled per-query state
struct Filter<'q> {
    predicate: Option<(&'q Predicate, ResolvedPath, Option<Key>)>,
    order: Option<ResolvedPath>,
}

#[derive(Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `plan` for `query` against `region`
    ///
    /// The observer sees `start_query` and `end_query` as a pair once the
    /// query is known to target `region`, even when a lookup or read fails.
    pub fn execute(&self, query: &Query, plan: ExecutionPlan, region: &dyn RegionView) -> Result<QueryResults> {
        let from = query.from_clause();
        if from.region_path() != region.full_path() {
            return Err(StorageError::InvalidArgument(format!(
                "query on {} executed against {}",
                from.region_path(),
                region.full_path()
            )));
        }
        let filter = Filter {
            predicate: match query.predicate() {
                Some(p) => Some((p, from.resolve(&p.path), p.probe()?)),
                None => None,
            },
            order: query.order_by_path().map(|o| from.resolve(o)),
        };

        let observer = observer::current();
        observer.start_query(query);
        let collected = self.collect(query, &plan, &filter, region, &*observer);
        observer.end_query(query, collected.as_ref().map_or(0, Vec::len));
        let mut rows = collected?;

        if plan.sort {
            rows.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
        }
        trace!(query = %query, plan = %plan, rows = rows.len(), "query executed");
        Ok(QueryResults { rows, plan })
    }

    fn collect(
        &self,
        query: &Query,
        plan: &ExecutionPlan,
        filter: &Filter<'_>,
        region: &dyn RegionView,
        observer: &dyn observer::QueryObserver,
    ) -> Result<Vec<ResultRow>> {
        let mut rows = Vec::new();
        match &plan.operator {
            PlanOperator::Scan { .. } => {
                for key in region.entry_keys() {
                    if let Some(value) = region.get_value(&key)? {
                        self.emit(query, filter, key, value, &mut rows);
                    }
                }
            }
            PlanOperator::IndexScan { index, operator, .. } => {
                let probe = filter.predicate.as_ref().and_then(|(_, _, probe)| probe.as_ref());
                for key in self.candidates(index, *operator, probe, observer)? {
                    if let Some(value) = region.get_value(&key)? {
                        self.emit(query, filter, key, value, &mut rows);
                    }
                }
            }
        }
        Ok(rows)
    }

    /// Lookup results plus keys the index could not place
    fn candidates(
        &self,
        index: &Index,
        operator: crate::index::Operator,
        probe: Option<&Key>,
        observer: &dyn observer::QueryObserver,
    ) -> Result<Vec<Key>> {
        observer.before_index_lookup(index, operator, probe);
        let lookup = index.lookup(operator, probe)?;
        observer.after_index_lookup(index, &lookup);

        let mut seen: AHashSet<Key> = lookup.iter().cloned().collect();
        let mut keys = lookup.to_vec();
        for key in index.degraded_keys() {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Push a row per matching tuple of one region value
    ///
    /// A value whose scope cannot be evaluated matches nothing.
    fn emit(&self, query: &Query, filter: &Filter<'_>, key: Key, value: Arc<Value>, rows: &mut Vec<ResultRow>) {
        let mut matched = Vec::new();
        let outcome = query.from_clause().for_each_tuple(&value, &mut |tuple| {
            let hit = match &filter.predicate {
                Some((p, resolved, probe)) => p.matches(resolved, probe.as_ref(), tuple),
                None => true,
            };
            if hit {
                let sort_key = match &filter.order {
                    Some(order) => order.eval(tuple).and_then(|v| Key::try_from_value(&v)).ok().flatten(),
                    None => None,
                };
                matched.push(sort_key);
            }
            Ok(())
        });
        if let Err(e) = outcome {
            trace!(key = %key, error = %e, "entry skipped");
            return;
        }
        rows.extend(matched.into_iter().map(|sort_key| ResultRow {
            key: key.clone(),
            value: Arc::clone(&value),
            sort_key,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionConfig;
    use crate::index::IndexDefinition;
    use crate::query::QueryPlanner;
    use crate::region::LocalRegion;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn run(region: &LocalRegion, text: &str) -> QueryResults {
        let query = Query::parse(text).unwrap();
        let plan = QueryPlanner::new().plan(&query, region.indexes(), region.len()).unwrap();
        QueryExecutor::new().execute(&query, plan, region).unwrap()
    }

    #[test]
    fn test_index_and_scan_agree() {
        let region = LocalRegion::new("/exec_agree", RegionConfig::replicate()).unwrap();
        for i in 0..20 {
            region
                .put(Key::Int(i), Value::object([("ID", Value::Integer(i)), ("name", Value::text(format!("n{}", i % 3)))]))
                .unwrap();
        }
        region.put(Key::Int(100), Value::text("not an object")).unwrap();

        let scanned = run(&region, "SELECT * FROM /exec_agree p WHERE p.ID >= 15");
        assert!(!scanned.plan().uses_index());
        region
            .create_index(IndexDefinition::range("id", "p.ID", "/exec_agree p"))
            .unwrap();
        let indexed = run(&region, "SELECT * FROM /exec_agree p WHERE p.ID >= 15");
        assert!(indexed.plan().uses_index());

        let mut a = scanned.keys();
        let mut b = indexed.keys();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(b.len(), 5);
    }

    #[test]
    fn test_ordered_results() {
        let region = LocalRegion::new("/exec_order", RegionConfig::replicate()).unwrap();
        for i in [5, 3, 9, 1, 7] {
            region.put(Key::Int(i), Value::object([("v", Value::Integer(i * 10))])).unwrap();
        }
        let results = run(&region, "SELECT * FROM /exec_order WHERE v > 20 ORDER BY v");
        assert!(results.plan().sort);
        assert_eq!(results.keys(), vec![Key::Int(3), Key::Int(5), Key::Int(7), Key::Int(9)]);
    }

    #[test]
    fn test_multi_iterator_rows() {
        let region = LocalRegion::new("/exec_nested", RegionConfig::replicate()).unwrap();
        let positions = |ids: &[&str]| {
            Value::object([(
                "positions",
                Value::object(ids.iter().map(|id| (*id, Value::object([("secId", Value::text(*id))])))),
            )])
        };
        region.put(Key::Int(1), positions(&["IBM", "SUN"])).unwrap();
        region.put(Key::Int(2), positions(&["IBM"])).unwrap();

        let results = run(&region, "SELECT * FROM /exec_nested p, p.positions.values pos WHERE pos.secId = 'IBM'");
        assert_eq!(results.len(), 2);
        let all = run(&region, "SELECT * FROM /exec_nested p, p.positions.values pos");
        assert_eq!(all.len(), 3);
        assert_eq!(all.distinct_keys().len(), 2);
    }

    #[derive(Default)]
    struct Pairing {
        started: AtomicUsize,
        ended: AtomicUsize,
    }

    impl observer::QueryObserver for Pairing {
        fn start_query(&self, query: &Query) {
            if query.from_clause().region_path().starts_with("/exec_pairs") {
                self.started.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn end_query(&self, query: &Query, _rows: usize) {
            if query.from_clause().region_path().starts_with("/exec_pairs") {
                self.ended.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_observer_sees_paired_calls() {
        let region = LocalRegion::new("/exec_pairs", RegionConfig::replicate()).unwrap();
        region.put(Key::Int(1), Value::object([("v", Value::Integer(1))])).unwrap();
        let pairing = Arc::new(Pairing::default());
        let _guard = observer::install(pairing.clone());

        assert_eq!(run(&region, "SELECT * FROM /exec_pairs WHERE v = 1").len(), 1);

        // wrong region: rejected before the observer hears about it
        let misrouted = Query::parse("SELECT * FROM /exec_pairs_other WHERE v = 1").unwrap();
        let plan = ExecutionPlan::scan("/exec_pairs_other", 0.0);
        assert!(matches!(
            QueryExecutor::new().execute(&misrouted, plan, &region),
            Err(StorageError::InvalidArgument(_))
        ));

        assert_eq!(pairing.started.load(Ordering::SeqCst), 1);
        assert_eq!(pairing.ended.load(Ordering::SeqCst), 1);
    }
}
