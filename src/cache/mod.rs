//! Region registry and query service
//!
//! [`Cache`] owns the regions of one process. [`QueryService`] is the
//! index and query surface over them: index definitions are routed to a
//! region by the region path in their from-clause.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::RegionConfig;
use crate::error::MultiIndexCreationError;
use crate::expr::FromClause;
use crate::index::{Index, IndexDefinition};
use crate::query::{ExecutionPlan, Query, QueryExecutor, QueryPlanner, QueryResults};
use crate::region::{DiskStore, LocalRegion};
use crate::{Result, StorageError};

#[derive(Default)]
pub struct Cache {
    regions: DashMap<String, Arc<LocalRegion>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_region(&self, path: &str, config: RegionConfig) -> Result<Arc<LocalRegion>> {
        self.insert_region(path, |p| LocalRegion::new(p, config))
    }

    /// Create a region over an existing disk store
    pub fn create_region_with_disk_store(
        &self,
        path: &str,
        config: RegionConfig,
        disk: Arc<DiskStore>,
    ) -> Result<Arc<LocalRegion>> {
        self.insert_region(path, |p| LocalRegion::with_disk_store(p, config, disk))
    }

    /// Reopen a persistent region from its disk store
    pub fn recover_region(&self, path: &str, config: RegionConfig, disk: Arc<DiskStore>) -> Result<Arc<LocalRegion>> {
        self.insert_region(path, |p| LocalRegion::recover(p, config, disk))
    }

    fn insert_region(&self, path: &str, build: impl FnOnce(&str) -> Result<LocalRegion>) -> Result<Arc<LocalRegion>> {
        let path = normalize(path)?;
        match self.regions.entry(path.clone()) {
            Entry::Occupied(_) => Err(StorageError::RegionExists(path)),
            Entry::Vacant(slot) => {
                let region = Arc::new(build(&path)?);
                slot.insert(Arc::clone(&region));
                info!(region = %path, shape = %region.config().describe(), "region added to cache");
                Ok(region)
            }
        }
    }

    pub fn get_region(&self, path: &str) -> Result<Arc<LocalRegion>> {
        let path = normalize(path)?;
        self.regions
            .get(&path)
            .map(|r| Arc::clone(r.value()))
            .ok_or(StorageError::RegionNotFound(path))
    }

    /// Regions sorted by path
    pub fn regions(&self) -> Vec<Arc<LocalRegion>> {
        let mut regions: Vec<_> = self.regions.iter().map(|r| Arc::clone(r.value())).collect();
        regions.sort_by(|a, b| a.indexes().region_path().cmp(b.indexes().region_path()));
        regions
    }

    /// Destroy a region with its indexes and disk contents
    pub fn destroy_region(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let (_, region) = self
            .regions
            .remove(&path)
            .ok_or_else(|| StorageError::RegionNotFound(path.clone()))?;
        region.destroy_region();
        Ok(())
    }

    /// Close every region; disk stores keep their contents
    pub fn close(&self) {
        let paths: Vec<String> = self.regions.iter().map(|r| r.key().clone()).collect();
        for path in paths {
            if let Some((_, region)) = self.regions.remove(&path) {
                region.close();
            }
        }
    }

    pub fn query_service(&self) -> QueryService<'_> {
        QueryService {
            cache: self,
            planner: QueryPlanner::new(),
            executor: QueryExecutor::new(),
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("regions", &self.regions.len()).finish()
    }
}

fn normalize(path: &str) -> Result<String> {
    Ok(FromClause::region(path)?.region_path().to_string())
}

pub struct QueryService<'a> {
    cache: &'a Cache,
    planner: QueryPlanner,
    executor: QueryExecutor,
}

impl<'a> QueryService<'a> {
    fn target_region(&self, definition: &IndexDefinition) -> Result<Arc<LocalRegion>> {
        let compiled = definition.compile()?;
        self.cache.get_region(compiled.region_path())
    }

    pub fn create_index(&self, name: &str, expression: &str, from_clause: &str) -> Result<Arc<Index>> {
        self.create(IndexDefinition::range(name, expression, from_clause))
    }

    pub fn create_hash_index(&self, name: &str, expression: &str, from_clause: &str) -> Result<Arc<Index>> {
        self.create(IndexDefinition::hash(name, expression, from_clause))
    }

    pub fn create_key_index(&self, name: &str, expression: &str, from_clause: &str) -> Result<Arc<Index>> {
        self.create(IndexDefinition::key(name, expression, from_clause))
    }

    pub fn create(&self, definition: IndexDefinition) -> Result<Arc<Index>> {
        self.target_region(&definition)?.create_index(definition)
    }

    pub fn define_index(&self, name: &str, expression: &str, from_clause: &str) -> Result<()> {
        self.define(IndexDefinition::range(name, expression, from_clause))
    }

    pub fn define_hash_index(&self, name: &str, expression: &str, from_clause: &str) -> Result<()> {
        self.define(IndexDefinition::hash(name, expression, from_clause))
    }

    pub fn define_key_index(&self, name: &str, expression: &str, from_clause: &str) -> Result<()> {
        self.define(IndexDefinition::key(name, expression, from_clause))
    }

    /// Record a definition for the next `create_defined_indexes`
    pub fn define(&self, definition: IndexDefinition) -> Result<()> {
        self.target_region(&definition)?.indexes().define(definition)
    }

    /// Build every defined index
    ///
    /// Regions are built in parallel, definitions of one region in order.
    /// Indexes that built stay usable even when others fail; the error
    /// carries both.
    pub fn create_defined_indexes(&self) -> std::result::Result<Vec<Arc<Index>>, MultiIndexCreationError> {
        let regions: Vec<_> = self
            .cache
            .regions()
            .into_iter()
            .filter(|r| !r.indexes().pending_definitions().is_empty())
            .collect();

        let outcomes: Vec<_> = regions
            .par_iter()
            .map(|region| region.indexes().create_defined(&**region))
            .collect();

        let mut created = Vec::new();
        let mut failures = Vec::new();
        for (built, failed) in outcomes {
            created.extend(built);
            failures.extend(failed);
        }
        if failures.is_empty() {
            Ok(created)
        } else {
            warn!(
                created = created.len(),
                failed = failures.len(),
                "some defined indexes could not be created"
            );
            Err(MultiIndexCreationError { created, failures })
        }
    }

    pub fn get_index(&self, region: &str, name: &str) -> Option<Arc<Index>> {
        self.cache.get_region(region).ok()?.indexes().get_index(name)
    }

    pub fn get_indexes(&self, region: &str) -> Vec<Arc<Index>> {
        self.cache
            .get_region(region)
            .map(|r| r.indexes().get_indexes())
            .unwrap_or_default()
    }

    /// Every index of every region
    pub fn get_all_indexes(&self) -> Vec<Arc<Index>> {
        self.cache
            .regions()
            .iter()
            .flat_map(|r| r.indexes().get_indexes())
            .collect()
    }

    pub fn remove_index(&self, region: &str, name: &str) -> Result<()> {
        self.cache.get_region(region)?.indexes().remove_index(name)
    }

    /// Remove every index of a region
    pub fn remove_indexes(&self, region: &str) -> Result<()> {
        let region = self.cache.get_region(region)?;
        for index in region.indexes().get_indexes() {
            region.indexes().remove_index(index.name())?;
        }
        Ok(())
    }

    /// Plan without executing
    pub fn explain(&self, query: &Query) -> Result<ExecutionPlan> {
        let region = self.cache.get_region(query.from_clause().region_path())?;
        self.planner.plan(query, region.indexes(), region.len())
    }

    pub fn execute(&self, query: &Query) -> Result<QueryResults> {
        let region = self.cache.get_region(query.from_clause().region_path())?;
        let plan = self.planner.plan(query, region.indexes(), region.len())?;
        self.executor.execute(query, plan, &*region)
    }

    /// Parse and execute
    pub fn query(&self, text: &str) -> Result<QueryResults> {
        self.execute(&Query::parse(text)?)
    }
}
