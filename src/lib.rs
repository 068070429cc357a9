//! regidx: embedded key/value regions with secondary indexes
//!
//! Regions hold keyed values in memory, optionally partitioned into buckets,
//! overflowed to a disk store or written through to it. Each region carries
//! a set of secondary indexes that are kept in step with every mutation and
//! used by the query layer to answer single-predicate queries.
//!
//! ## Architecture
//! - Region layer: per-entry mutation locks, LRU overflow, disk store
//! - Index layer: range (ordered), hash (striped) and primary-key indexes
//!   maintained through a reverse map from entry key to indexed slots
//! - Query layer: scope expressions, index selection, re-checking executor
//!
//! ## Example
//! ```
//! use regidx::{Cache, Key, RegionConfig, Value};
//!
//! let cache = Cache::new();
//! let region = cache.create_region("/portfolios", RegionConfig::replicate()).unwrap();
//! region.put(Key::Int(1), Value::object([("status", Value::text("active"))])).unwrap();
//!
//! let qs = cache.query_service();
//! qs.create_hash_index("status", "p.status", "/portfolios p").unwrap();
//! let rows = qs.query("SELECT * FROM /portfolios p WHERE p.status = 'active'").unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

pub mod cache;
pub mod config;
pub mod expr;
pub mod index;
pub mod query;
pub mod region;
pub mod types;

mod error;

pub use cache::{Cache, QueryService};
pub use config::{DataPolicy, EvictionConfig, IndexConfig, IndexMaintenanceMode, RegionConfig};
pub use error::{IndexCreationFailure, MultiIndexCreationError, Result, StorageError};
pub use expr::{FromClause, PathExpr, ScopeMatch};
pub use index::{
    HookContext, HookSpot, Index, IndexDefinition, IndexKind, IndexLookup, IndexManager, IndexStatsSnapshot,
    MaintenanceHook, Operator,
};
pub use query::{ExecutionPlan, Predicate, Query, QueryObserver, QueryResults, ResultRow};
pub use region::{DiskStore, EntryEvent, LocalRegion, Operation, RegionView};
pub use types::{Key, Value};
