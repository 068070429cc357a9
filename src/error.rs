//! Error types for the region / index engine

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::index::Index;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index '{name}' already exists or is already defined on region {region}")]
    IndexNameConflict { name: String, region: String },

    #[error("Index '{name}' duplicates existing index '{existing}' (same kind, expression and scope)")]
    IndexExists { name: String, existing: String },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index '{0}' has been removed")]
    IndexRemoved(String),

    #[error("Index '{index}' ({kind}) does not support operator {operator}")]
    UnsupportedOperator {
        index: String,
        kind: &'static str,
        operator: &'static str,
    },

    #[error("Index '{index}' scope {index_scope} does not cover query scope {query_scope}")]
    ScopeMismatch {
        index: String,
        index_scope: String,
        query_scope: String,
    },

    #[error("Primary key index '{index}': value {value} already maps to key {owner}, rejected key {key}")]
    PrimaryKeyViolation {
        index: String,
        value: String,
        owner: String,
        key: String,
    },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Region not found: {0}")]
    RegionNotFound(String),

    #[error("Region already exists: {0}")]
    RegionExists(String),

    #[error("Region destroyed: {0}")]
    RegionDestroyed(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// One defined index that could not be built
#[derive(Error, Debug)]
#[error("index '{name}' on {region}: {error}")]
pub struct IndexCreationFailure {
    pub region: String,
    pub name: String,
    #[source]
    pub error: StorageError,
}

/// Aggregate failure of a batch `create_defined_indexes` call.
///
/// Indexes that were built successfully stay registered and usable; they are
/// handed back in `created` so callers do not have to look them up again.
/// Every failed attempt is kept, including repeats of one name across
/// regions or within a region.
#[derive(Error, Debug)]
#[error("{} of {} defined indexes failed: {}", .failures.len(), batch_size(.created, .failures), failure_names(.failures))]
pub struct MultiIndexCreationError {
    pub created: Vec<Arc<Index>>,
    /// Failed attempts, grouped by region in definition order
    pub failures: Vec<IndexCreationFailure>,
}

impl MultiIndexCreationError {
    /// Failure causes keyed by index name, one per failed attempt
    pub fn exceptions(&self) -> BTreeMap<&str, Vec<&StorageError>> {
        let mut by_name: BTreeMap<&str, Vec<&StorageError>> = BTreeMap::new();
        for failure in &self.failures {
            by_name.entry(failure.name.as_str()).or_default().push(&failure.error);
        }
        by_name
    }

    /// Causes for `name` on one region
    pub fn failures_of(&self, region: &str, name: &str) -> Vec<&StorageError> {
        self.failures
            .iter()
            .filter(|f| f.region == region && f.name == name)
            .map(|f| &f.error)
            .collect()
    }
}

fn batch_size(created: &[Arc<Index>], failures: &[IndexCreationFailure]) -> usize {
    created.len() + failures.len()
}

fn failure_names(failures: &[IndexCreationFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} on {}", f.name, f.region))
        .collect::<Vec<_>>()
        .join(", ")
}
