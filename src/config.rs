//! Region configuration
//!
//! Data policy, overflow eviction, persistence and the index maintenance
//! mode are chosen per region when it is created.

use serde::{Deserialize, Serialize};

use crate::{Result, StorageError};

/// How entries are laid out inside a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DataPolicy {
    /// All entries in a single bucket map
    #[default]
    Replicate,

    /// Entries hashed across `total_buckets` independent bucket maps
    ///
    /// Indexes stay region-wide: one index covers every bucket.
    Partition {
        /// Number of buckets (default 113)
        total_buckets: usize,
    },
}

/// Index maintenance mode
///
/// - Synchronous: indexes updated inline, under the entry lock, before the
///   mutation returns
/// - Asynchronous: updates queued to a background worker; queries may see a
///   stale index until the queue drains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IndexMaintenanceMode {
    #[default]
    Synchronous,
    Asynchronous,
}

impl IndexMaintenanceMode {
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Synchronous => "synchronous (read-after-write through indexes)",
            Self::Asynchronous => "asynchronous (background worker, eventually consistent)",
        }
    }
}

/// Overflow-to-secondary-storage settings (LRU by entry count)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Entries kept in memory; least recently used entries beyond this are
    /// written to the disk store and dropped from memory
    pub max_resident_entries: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_resident_entries: 10_000,
        }
    }
}

/// Index structure settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Independently locked stripes in a hash index
    pub hash_stripes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { hash_stripes: 16 }
    }
}

/// Region configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RegionConfig {
    /// Bucket layout
    pub data_policy: DataPolicy,

    /// Write every value through to the disk store
    pub persistent: bool,

    /// Overflow eviction, `None` keeps every value in memory
    pub eviction: Option<EvictionConfig>,

    /// Index maintenance mode
    pub index_maintenance: IndexMaintenanceMode,

    /// Index structure settings
    pub index: IndexConfig,
}

impl RegionConfig {
    /// Replicated region, synchronous maintenance, no overflow
    pub fn replicate() -> Self {
        Self::default()
    }

    /// Partitioned region with `total_buckets` buckets
    pub fn partition(total_buckets: usize) -> Self {
        Self {
            data_policy: DataPolicy::Partition { total_buckets },
            ..Default::default()
        }
    }

    /// Enable overflow eviction
    pub fn with_overflow(mut self, max_resident_entries: usize) -> Self {
        self.eviction = Some(EvictionConfig { max_resident_entries });
        self
    }

    /// Enable write-through persistence
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn with_async_index_maintenance(mut self) -> Self {
        self.index_maintenance = IndexMaintenanceMode::Asynchronous;
        self
    }

    pub fn with_hash_stripes(mut self, hash_stripes: usize) -> Self {
        self.index.hash_stripes = hash_stripes;
        self
    }

    /// Replicated, partitioned, persistent and persistent+partitioned
    /// regions, each with and without overflow
    pub fn all_shapes(max_resident_entries: usize) -> Vec<RegionConfig> {
        let bases = [
            Self::replicate(),
            Self::partition(13),
            Self::replicate().persistent(),
            Self::partition(13).persistent(),
        ];
        bases
            .iter()
            .flat_map(|base| [base.clone(), base.clone().with_overflow(max_resident_entries)])
            .collect()
    }

    /// Number of bucket maps the region allocates
    pub fn bucket_count(&self) -> usize {
        match self.data_policy {
            DataPolicy::Replicate => 1,
            DataPolicy::Partition { total_buckets } => total_buckets,
        }
    }

    /// Whether values ever live on the disk store
    pub fn uses_disk(&self) -> bool {
        self.persistent || self.eviction.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let DataPolicy::Partition { total_buckets: 0 } = self.data_policy {
            return Err(StorageError::InvalidArgument(
                "partitioned region needs at least one bucket".to_string(),
            ));
        }
        if let Some(EvictionConfig { max_resident_entries: 0 }) = self.eviction {
            return Err(StorageError::InvalidArgument(
                "overflow eviction needs max_resident_entries >= 1".to_string(),
            ));
        }
        if self.index.hash_stripes == 0 {
            return Err(StorageError::InvalidArgument(
                "hash index needs at least one stripe".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: RegionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Short human-readable shape, used in logs and test names
    pub fn describe(&self) -> String {
        let policy = match self.data_policy {
            DataPolicy::Replicate => "replicate".to_string(),
            DataPolicy::Partition { total_buckets } => format!("partition({})", total_buckets),
        };
        let mut parts = vec![policy];
        if self.persistent {
            parts.push("persistent".to_string());
        }
        if let Some(eviction) = self.eviction {
            parts.push(format!("overflow({})", eviction.max_resident_entries));
        }
        if !self.index_maintenance.is_synchronous() {
            parts.push("async-index".to_string());
        }
        parts.join("+")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let r = RegionConfig::replicate();
        assert_eq!(r.bucket_count(), 1);
        assert!(!r.uses_disk());
        assert!(r.index_maintenance.is_synchronous());

        let p = RegionConfig::partition(7).persistent().with_overflow(1);
        assert_eq!(p.bucket_count(), 7);
        assert!(p.uses_disk());
        assert_eq!(p.describe(), "partition(7)+persistent+overflow(1)");
    }

    #[test]
    fn test_all_shapes() {
        let shapes = RegionConfig::all_shapes(1);
        assert_eq!(shapes.len(), 8);
        assert_eq!(shapes.iter().filter(|c| c.eviction.is_some()).count(), 4);
        assert_eq!(shapes.iter().filter(|c| c.persistent).count(), 4);
    }

    #[test]
    fn test_json_round_trip_and_validation() {
        let config = RegionConfig::partition(3).with_async_index_maintenance();
        let json = config.to_json().unwrap();
        assert_eq!(RegionConfig::from_json(&json).unwrap(), config);

        let bad = RegionConfig::partition(0).to_json().unwrap();
        assert!(RegionConfig::from_json(&bad).is_err());
        assert!(RegionConfig::replicate().with_overflow(0).validate().is_err());
    }
}
