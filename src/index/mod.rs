//! Index layer implementation
//!
//! Secondary indexes over a region's entries:
//! - range (ordered), hash (equality) and primary-key (injective) structures
//! - maintenance driven by region mutations under the entry lock
//! - the per-region [`IndexManager`] registry and batch creation support

mod bucket;
pub mod builder;
pub mod definition;
mod hash;
pub mod hook;
mod lookup;
pub(crate) mod maintenance;
mod manager;
mod operator;
mod primary_key;
mod range;
mod stats;
mod structure;

pub use builder::BuildStats;
pub use definition::{IndexDefinition, IndexSignature};
pub use hook::{HookContext, HookGuard, HookSpot, MaintenanceHook};
pub use lookup::IndexLookup;
pub use manager::{IndexManager, IndexRequirement};
pub use operator::Operator;
pub use stats::{IndexStatistics, IndexStatsSnapshot};
pub use structure::{IndexStore, IndexStructure, Slot};

use std::fmt;
use std::ops::Bound;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::expr::{FromClause, PathExpr, ResolvedPath, ScopeMatch};
use crate::types::{Key, Value};
use crate::{Result, StorageError};
use definition::CompiledDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Ordered; every operator, range lookups, sorted results
    Range,
    /// Equality only, O(1) expected lookup
    Hash,
    /// One entry per indexed value
    PrimaryKey,
}

impl IndexKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Range => "range",
            IndexKind::Hash => "hash",
            IndexKind::PrimaryKey => "primary-key",
        }
    }

    pub fn supports(&self, op: Operator) -> bool {
        match self {
            IndexKind::Range => true,
            IndexKind::Hash | IndexKind::PrimaryKey => !op.is_inequality(),
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, IndexKind::Range)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Registered for maintenance, initial scan in progress
    Building,
    Ready,
    Removed,
}

/// A secondary index on one region
pub struct Index {
    definition: CompiledDefinition,
    structure: IndexStructure,
    /// Entry key -> slots currently stored in `structure`
    reverse: DashMap<Key, Vec<Slot>>,
    /// Keys whose mappings were rejected (primary-key violations)
    degraded: DashSet<Key>,
    pub(crate) stats: IndexStatistics,
    state: RwLock<IndexState>,
    build: RwLock<BuildStats>,
}

impl Index {
    pub(crate) fn new(definition: CompiledDefinition, hash_stripes: usize) -> Self {
        let structure = IndexStructure::new(definition.definition.kind, definition.name(), hash_stripes);
        Self {
            definition,
            structure,
            reverse: DashMap::new(),
            degraded: DashSet::new(),
            stats: IndexStatistics::new(),
            state: RwLock::new(IndexState::Building),
            build: RwLock::new(BuildStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn kind(&self) -> IndexKind {
        self.definition.definition.kind
    }

    pub fn region_path(&self) -> &str {
        self.definition.region_path()
    }

    pub fn expression(&self) -> &PathExpr {
        &self.definition.expression
    }

    pub fn from_clause(&self) -> &FromClause {
        &self.definition.from
    }

    pub fn canonical_expression(&self) -> &ResolvedPath {
        &self.definition.resolved
    }

    pub fn signature(&self) -> &IndexSignature {
        &self.definition.signature
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition.definition
    }

    pub fn state(&self) -> IndexState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: IndexState) {
        *self.state.write() = state;
    }

    pub fn build_stats(&self) -> BuildStats {
        *self.build.read()
    }

    pub(crate) fn set_build_stats(&self, stats: BuildStats) {
        *self.build.write() = stats;
    }

    pub fn statistics(&self) -> IndexStatsSnapshot {
        let (keys, values) = self.structure.counts();
        self.stats.snapshot(keys, values)
    }

    /// Entries currently mapped by the index
    pub fn entry_count(&self) -> usize {
        self.reverse.len()
    }

    /// Keys that must be re-checked by any index-assisted query
    pub fn degraded_keys(&self) -> Vec<Key> {
        self.degraded.iter().map(|k| k.key().clone()).collect()
    }

    /// Projected slots of one region value
    pub fn project(&self, value: &Value) -> Result<Vec<Slot>> {
        let resolved = &self.definition.resolved;
        let mut slots = Vec::new();
        self.definition.from.for_each_tuple(value, &mut |tuple| {
            let projected = resolved.eval(tuple)?;
            slots.push(Slot::from_key(Key::try_from_value(&projected)?));
            Ok(())
        })?;
        Ok(slots)
    }

    /// Set the mappings of `key` to the projection of `value`
    ///
    /// `None` removes the key. Idempotent: applying the same value twice
    /// leaves the index unchanged. On error the key has no mappings.
    pub(crate) fn apply(&self, key: &Key, value: Option<&Value>) -> Result<()> {
        let projected = match value {
            Some(v) => self.project(v),
            None => Ok(Vec::new()),
        };
        let started = Instant::now();

        let outcome = match self.reverse.entry(key.clone()) {
            Entry::Occupied(mut current) => match projected {
                Ok(new) if new == *current.get() => Ok(()),
                Ok(new) => match self.structure.update_mapping(key, current.get(), &new) {
                    Ok(()) => {
                        if new.is_empty() {
                            current.remove();
                        } else {
                            current.insert(new);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        current.remove();
                        Err(e)
                    }
                },
                Err(e) => {
                    let old = current.remove();
                    self.structure.remove_mapping(key, &old).and(Err(e))
                }
            },
            Entry::Vacant(vacant) => match projected {
                Ok(new) if new.is_empty() => Ok(()),
                Ok(new) => self.structure.add_mapping(key, &new).map(|()| {
                    vacant.insert(new);
                }),
                Err(e) => Err(e),
            },
        };

        match &outcome {
            Err(StorageError::PrimaryKeyViolation { .. }) => {
                self.degraded.insert(key.clone());
            }
            _ => {
                self.degraded.remove(key);
            }
        }
        self.stats.record_update(started.elapsed());
        outcome
    }

    fn ensure_live(&self) -> Result<()> {
        match self.state() {
            IndexState::Removed => Err(StorageError::IndexRemoved(self.name().to_string())),
            _ => Ok(()),
        }
    }

    /// Entry keys whose indexed value satisfies `value <op> probe`
    ///
    /// Fails fast for operators the index kind cannot answer.
    pub fn lookup(&self, op: Operator, probe: Option<&Key>) -> Result<IndexLookup> {
        self.ensure_live()?;
        if !self.kind().supports(op) {
            return Err(StorageError::UnsupportedOperator {
                index: self.name().to_string(),
                kind: self.kind().name(),
                operator: op.symbol(),
            });
        }
        self.stats.record_lookup();
        Ok(self.structure.lookup(op, probe))
    }

    /// Entry keys with an indexed value between two bounds (range indexes)
    pub fn lookup_range(&self, lower: Bound<&Key>, upper: Bound<&Key>) -> Result<IndexLookup> {
        self.ensure_live()?;
        let result = self
            .structure
            .lookup_range(lower, upper)
            .ok_or_else(|| StorageError::UnsupportedOperator {
                index: self.name().to_string(),
                kind: self.kind().name(),
                operator: "BETWEEN",
            })?;
        self.stats.record_lookup();
        Ok(result)
    }

    /// How this index's scope relates to a query scope
    pub fn covers(&self, query: &FromClause) -> Result<ScopeMatch> {
        self.definition
            .from
            .match_scope(query)
            .ok_or_else(|| StorageError::ScopeMismatch {
                index: self.name().to_string(),
                index_scope: self.definition.from.canonical().to_string(),
                query_scope: query.canonical().to_string(),
            })
    }

    /// Whether `path`, resolved in the query scope, is the indexed expression
    pub fn indexes_path(&self, query: &FromClause, path: &PathExpr) -> bool {
        query.resolve(path) == self.definition.resolved
    }

    /// Cross-check the reverse map against the structure
    ///
    /// Returns one line per problem; empty when consistent.
    pub fn verify(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for entry in self.reverse.iter() {
            for slot in entry.value() {
                if !self.structure.contains(slot, entry.key()) {
                    problems.push(format!(
                        "index '{}': key {} missing under {:?}",
                        self.name(),
                        entry.key(),
                        slot
                    ));
                }
            }
        }
        let mapped: usize = self.reverse.iter().map(|e| e.value().len()).sum();
        let (_, values) = self.structure.counts();
        if mapped != values {
            problems.push(format!(
                "index '{}': {} mapped values but structure holds {}",
                self.name(),
                mapped,
                values
            ));
        }
        for key in self.degraded.iter() {
            problems.push(format!(
                "index '{}': key {} rejected by uniqueness constraint",
                self.name(),
                key.key()
            ));
        }
        problems
    }

    /// Drop all contents; called once the index is unregistered
    pub(crate) fn discard(&self) {
        self.set_state(IndexState::Removed);
        self.structure.clear();
        self.reverse.clear();
        self.degraded.clear();
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("expression", &self.expression().text())
            .field("from", &self.from_clause().text())
            .field("state", &self.state())
            .finish()
    }
}
