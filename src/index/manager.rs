//! Index manager: per-region registry of indexes and pending definitions

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::builder;
use super::hook::{self, HookContext, HookSpot};
use super::maintenance::{self, AsyncMaintenance, MaintenanceTargets};
use super::{Index, IndexDefinition, IndexKind, IndexState, Operator};
use crate::config::RegionConfig;
use crate::expr::{FromClause, PathExpr, ScopeMatch};
use crate::region::{EntryEvent, Operation, RegionView};
use crate::error::IndexCreationFailure;
use crate::{Result, StorageError};

/// What a query needs from an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRequirement {
    pub operator: Operator,
    /// Results must come back sorted by the indexed value
    pub ordered: bool,
}

impl IndexRequirement {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            ordered: false,
        }
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    fn is_pure_equality(&self) -> bool {
        !self.ordered && matches!(self.operator, Operator::Equal | Operator::IsUndefined)
    }
}

/// Registry state guarded by the admin lock
#[derive(Default)]
struct Registry {
    /// Published indexes in creation order
    published: Vec<Arc<Index>>,
    /// Registered for maintenance, initial scan still running
    building: Vec<Arc<Index>>,
    pending: Vec<IndexDefinition>,
}

impl Registry {
    fn check_conflicts(&self, region: &str, index: &Index) -> Result<()> {
        let name = index.name();
        let taken = self
            .published
            .iter()
            .chain(&self.building)
            .any(|i| i.name() == name)
            || self.pending.iter().any(|d| d.name == name);
        if taken {
            return Err(StorageError::IndexNameConflict {
                name: name.to_string(),
                region: region.to_string(),
            });
        }
        if let Some(existing) = self
            .published
            .iter()
            .chain(&self.building)
            .find(|i| i.signature() == index.signature())
        {
            return Err(StorageError::IndexExists {
                name: name.to_string(),
                existing: existing.name().to_string(),
            });
        }
        Ok(())
    }
}

/// Owns every index of one region and routes mutations into them
///
/// The admin lock is held only for registry updates, never across a region
/// scan or an index update.
pub struct IndexManager {
    region_path: String,
    hash_stripes: usize,
    admin: Mutex<Registry>,
    targets: Arc<MaintenanceTargets>,
    worker: Option<AsyncMaintenance>,
}

impl IndexManager {
    pub fn new(region_path: impl Into<String>, config: &RegionConfig) -> Result<Self> {
        let region_path = region_path.into();
        let targets = Arc::new(MaintenanceTargets::default());
        let worker = if config.index_maintenance.is_synchronous() {
            None
        } else {
            Some(AsyncMaintenance::start(region_path.clone(), Arc::clone(&targets))?)
        };
        debug!(
            region = %region_path,
            mode = config.index_maintenance.description(),
            "index manager created"
        );
        Ok(Self {
            region_path,
            hash_stripes: config.index.hash_stripes,
            admin: Mutex::new(Registry::default()),
            targets,
            worker,
        })
    }

    pub fn region_path(&self) -> &str {
        &self.region_path
    }

    pub fn is_synchronous(&self) -> bool {
        self.worker.is_none()
    }

    /// Maintenance entry point; the region calls this with the entry lock held
    pub fn on_entry_event(&self, event: &EntryEvent) {
        if event.operation == Operation::Evict {
            trace!(region = %self.region_path, key = %event.key, "eviction, indexes unchanged");
            return;
        }
        let hook = hook::current();
        hook.fire(
            HookSpot::MaintenanceStart,
            &HookContext {
                region: &self.region_path,
                index: None,
                key: Some(&event.key),
            },
        );

        // read after the entry lock: an index registered later scans this
        // key under the same lock and sees the new value
        let targets = self.targets.snapshot();
        if targets.is_empty() {
            return;
        }
        let value = event.new.resident();
        match &self.worker {
            Some(worker) => worker.enqueue(event.key.clone(), value.cloned()),
            None => maintenance::apply_to_indexes(
                &self.region_path,
                &event.key,
                value.map(|v| &**v),
                &targets,
                &hook,
            ),
        }
    }

    /// Build an index over the region's current entries and publish it
    ///
    /// The index is registered for maintenance before the scan starts, so a
    /// mutation landing during or after the scan is applied to it; the scan
    /// reads every entry under its entry lock, so both orders converge.
    pub fn create_index(&self, region: &dyn RegionView, definition: IndexDefinition) -> Result<Arc<Index>> {
        let compiled = definition.compile()?;
        if compiled.region_path() != self.region_path {
            return Err(StorageError::InvalidArgument(format!(
                "index '{}' is defined over {} but was created on region {}",
                compiled.name(),
                compiled.region_path(),
                self.region_path
            )));
        }
        let index = Arc::new(Index::new(compiled, self.hash_stripes));
        {
            let mut registry = self.admin.lock();
            registry.check_conflicts(&self.region_path, &index)?;
            registry.building.push(Arc::clone(&index));
            self.targets.register(&index);
        }

        let hook = hook::current();
        let ctx = HookContext {
            region: &self.region_path,
            index: Some(index.name()),
            key: None,
        };
        hook.fire(HookSpot::BeforeInitialScan, &ctx);
        let built = builder::populate(&index, region);
        hook.fire(HookSpot::AfterInitialScan, &ctx);

        {
            let mut registry = self.admin.lock();
            registry.building.retain(|i| !Arc::ptr_eq(i, &index));
            match built {
                Ok(stats) => {
                    index.set_build_stats(stats);
                    index.set_state(IndexState::Ready);
                    registry.published.push(Arc::clone(&index));
                }
                Err(e) => {
                    self.targets.unregister(&index);
                    index.discard();
                    return Err(e);
                }
            }
        }
        hook.fire(HookSpot::AfterPublish, &ctx);

        let stats = index.statistics();
        info!(
            region = %self.region_path,
            index = index.name(),
            kind = %index.kind(),
            keys = stats.number_of_keys,
            values = stats.number_of_values,
            "index created"
        );
        Ok(index)
    }

    /// Record a definition; nothing is built until `create_defined`
    pub fn define(&self, definition: IndexDefinition) -> Result<()> {
        let compiled = definition.compile()?;
        if compiled.region_path() != self.region_path {
            return Err(StorageError::InvalidArgument(format!(
                "definition '{}' targets {}, not {}",
                compiled.name(),
                compiled.region_path(),
                self.region_path
            )));
        }
        debug!(region = %self.region_path, index = %definition.name, "index defined");
        self.admin.lock().pending.push(definition);
        Ok(())
    }

    pub fn pending_definitions(&self) -> Vec<IndexDefinition> {
        self.admin.lock().pending.clone()
    }

    /// Build every pending definition, in definition order
    ///
    /// The pending list is cleared up front regardless of the outcome. Each
    /// definition is attempted independently; every failure is reported.
    pub fn create_defined(
        &self,
        region: &dyn RegionView,
    ) -> (Vec<Arc<Index>>, Vec<IndexCreationFailure>) {
        let definitions = std::mem::take(&mut self.admin.lock().pending);
        let mut created = Vec::new();
        let mut failures = Vec::new();
        for definition in definitions {
            let name = definition.name.clone();
            match self.create_index(region, definition) {
                Ok(index) => created.push(index),
                Err(e) => {
                    debug!(region = %self.region_path, index = %name, error = %e, "defined index failed");
                    failures.push(IndexCreationFailure {
                        region: self.region_path.clone(),
                        name,
                        error: e,
                    });
                }
            }
        }
        (created, failures)
    }

    pub fn get_index(&self, name: &str) -> Option<Arc<Index>> {
        self.admin
            .lock()
            .published
            .iter()
            .find(|i| i.name() == name)
            .cloned()
    }

    /// Published indexes in creation order
    pub fn get_indexes(&self) -> Vec<Arc<Index>> {
        self.admin.lock().published.clone()
    }

    /// Unregister from maintenance, then discard the structure
    pub fn remove_index(&self, name: &str) -> Result<()> {
        let index = {
            let mut registry = self.admin.lock();
            let pos = registry
                .published
                .iter()
                .position(|i| i.name() == name)
                .ok_or_else(|| StorageError::IndexNotFound(format!("{} on {}", name, self.region_path)))?;
            let index = registry.published.remove(pos);
            self.targets.unregister(&index);
            index
        };
        hook::current().fire(
            HookSpot::AfterUnregister,
            &HookContext {
                region: &self.region_path,
                index: Some(name),
                key: None,
            },
        );
        index.discard();
        info!(region = %self.region_path, index = name, "index removed");
        Ok(())
    }

    /// Remove every index and pending definition (region destroy)
    pub fn clear(&self) {
        let removed = {
            let mut registry = self.admin.lock();
            registry.pending.clear();
            self.targets.clear();
            let mut all = std::mem::take(&mut registry.published);
            all.append(&mut registry.building);
            all
        };
        for index in &removed {
            index.discard();
        }
        if !removed.is_empty() {
            info!(region = %self.region_path, count = removed.len(), "indexes removed with region");
        }
    }

    /// Best published index for a predicate on `path` over `scope`
    ///
    /// Ranking: exact scope before compatible scope; for pure equality a
    /// primary-key index before a hash index before a range index. Ordered
    /// results and inequalities need a range index.
    pub fn choose_index(
        &self,
        scope: &FromClause,
        path: &PathExpr,
        requirement: IndexRequirement,
    ) -> Option<(Arc<Index>, ScopeMatch)> {
        let registry = self.admin.lock();
        registry
            .published
            .iter()
            .filter(|i| i.kind().supports(requirement.operator))
            .filter(|i| !requirement.ordered || i.kind().is_ordered())
            .filter(|i| i.indexes_path(scope, path))
            .filter_map(|i| i.covers(scope).ok().map(|m| (Arc::clone(i), m)))
            .min_by_key(|(i, m)| {
                let kind_rank = if requirement.is_pure_equality() {
                    match i.kind() {
                        IndexKind::PrimaryKey => 0,
                        IndexKind::Hash => 1,
                        IndexKind::Range => 2,
                    }
                } else {
                    0
                };
                (*m, kind_rank)
            })
    }

    /// Block until queued asynchronous updates are applied
    pub fn wait_for_pending(&self) {
        if let Some(worker) = &self.worker {
            worker.wait_for_pending();
        }
    }

    pub fn pending_updates(&self) -> usize {
        self.worker.as_ref().map_or(0, |w| w.pending())
    }

    /// Stop the asynchronous worker, if any
    pub fn shutdown(&self) {
        if let Some(worker) = &self.worker {
            worker.shutdown();
        }
    }
}
