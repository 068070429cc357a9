//! Query planner: index selection for a single-predicate query

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::Query;
use crate::expr::ScopeMatch;
use crate::index::{Index, IndexManager, IndexRequirement, Operator};
use crate::{Result, StorageError};

/// Root operator of a plan
#[derive(Debug, Clone)]
pub enum PlanOperator {
    /// Evaluate the predicate against every region entry
    Scan { region: String },
    /// Fetch candidates from an index, then re-check them
    IndexScan {
        index: Arc<Index>,
        operator: Operator,
        scope: ScopeMatch,
    },
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub operator: PlanOperator,
    /// Predicate re-checked per tuple
    pub filter: Option<String>,
    /// Rows are sorted after collection
    pub sort: bool,
    /// Estimated entries visited
    pub cost: f64,
}

impl ExecutionPlan {
    pub fn scan(region: impl Into<String>, cost: f64) -> Self {
        Self {
            operator: PlanOperator::Scan { region: region.into() },
            filter: None,
            sort: false,
            cost,
        }
    }

    pub fn index_scan(index: Arc<Index>, operator: Operator, scope: ScopeMatch) -> Self {
        let cost = estimate_index_cost(&index, operator);
        Self {
            operator: PlanOperator::IndexScan { index, operator, scope },
            filter: None,
            sort: false,
            cost,
        }
    }

    pub fn with_filter(mut self, predicate: String) -> Self {
        self.filter = Some(predicate);
        self.cost += 1.0;
        self
    }

    pub fn with_sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    /// Index used by this plan, if any
    pub fn index(&self) -> Option<&Arc<Index>> {
        match &self.operator {
            PlanOperator::IndexScan { index, .. } => Some(index),
            PlanOperator::Scan { .. } => None,
        }
    }

    pub fn uses_index(&self) -> bool {
        self.index().is_some()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operator {
            PlanOperator::Scan { region } => write!(f, "Scan({})", region)?,
            PlanOperator::IndexScan { index, operator, scope } => {
                write!(f, "IndexScan({} {} {:?})", index.name(), operator, scope)?
            }
        }
        if let Some(filter) = &self.filter {
            write!(f, " Filter({})", filter)?;
        }
        if self.sort {
            write!(f, " Sort")?;
        }
        write!(f, " cost={:.1}", self.cost)
    }
}

/// Average bucket size for equality, half the index otherwise
fn estimate_index_cost(index: &Index, operator: Operator) -> f64 {
    let stats = index.statistics();
    let values = stats.number_of_values as f64;
    match operator {
        Operator::Equal | Operator::IsUndefined => values / stats.number_of_keys.max(1) as f64,
        _ => values / 2.0,
    }
}

pub struct QueryPlanner {
    enable_optimization: bool,
}

impl QueryPlanner {
    pub fn new() -> Self {
        Self {
            enable_optimization: true,
        }
    }

    /// Always scan unless the query names an index
    pub fn without_optimization() -> Self {
        Self {
            enable_optimization: false,
        }
    }

    /// Plan `query` against the indexes of its region
    ///
    /// `region_size` is the scan cost estimate.
    pub fn plan(&self, query: &Query, indexes: &IndexManager, region_size: usize) -> Result<ExecutionPlan> {
        let scan = || ExecutionPlan::scan(indexes.region_path(), region_size as f64);
        let Some(predicate) = query.predicate() else {
            return Ok(scan().with_sort(query.order_by_path().is_some()));
        };
        let sort = query.order_by_path().is_some();

        if let Some(name) = query.hint() {
            let index = indexes
                .get_index(name)
                .ok_or_else(|| StorageError::IndexNotFound(name.to_string()))?;
            let scope = index.covers(query.from_clause())?;
            if !index.indexes_path(query.from_clause(), &predicate.path) {
                return Err(StorageError::InvalidArgument(format!(
                    "index '{}' is on {}, not {}",
                    name,
                    index.expression(),
                    predicate.path
                )));
            }
            if !index.kind().supports(predicate.operator) {
                return Err(StorageError::UnsupportedOperator {
                    index: name.to_string(),
                    kind: index.kind().name(),
                    operator: predicate.operator.symbol(),
                });
            }
            let plan = ExecutionPlan::index_scan(index, predicate.operator, scope)
                .with_filter(predicate.to_string())
                .with_sort(sort);
            debug!(query = %query, plan = %plan, "planned with index hint");
            return Ok(plan);
        }

        if !self.enable_optimization {
            return Ok(scan().with_filter(predicate.to_string()).with_sort(sort));
        }

        let requirement = IndexRequirement::new(predicate.operator);
        let ordered = query.orders_by_predicate();
        let chosen = ordered
            .then(|| indexes.choose_index(query.from_clause(), &predicate.path, requirement.ordered()))
            .flatten()
            .or_else(|| indexes.choose_index(query.from_clause(), &predicate.path, requirement));

        let plan = match chosen {
            Some((index, scope)) => ExecutionPlan::index_scan(index, predicate.operator, scope),
            None => scan(),
        }
        .with_filter(predicate.to_string())
        .with_sort(sort);
        debug!(query = %query, plan = %plan, "planned");
        Ok(plan)
    }
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}
