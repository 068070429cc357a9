//! Initial population of a new index from the region's current entries

use std::time::{Duration, Instant};

use tracing::debug;

use super::maintenance;
use super::Index;
use crate::region::RegionView;
use crate::Result;

/// Outcome of the creation scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    /// Entries read under their lock
    pub entries_scanned: usize,

    /// Entries whose value came from secondary storage
    pub entries_from_disk: usize,

    /// Entries excluded because the indexed expression failed
    pub exceptions: usize,

    pub build_time: Duration,
}

/// Scan `region` and set the index mappings of every live entry
///
/// No lock is held across the scan: each entry is read under its own
/// entry lock, which serializes the read with concurrent mutations of that
/// key. The index must already be registered for maintenance so entries
/// created after the key snapshot are covered by the mutation path.
pub fn populate(index: &Index, region: &dyn RegionView) -> Result<BuildStats> {
    let started = Instant::now();
    let mut stats = BuildStats::default();

    for key in region.entry_keys() {
        let mut failed = false;
        region.with_entry_lock(&key, &mut |snapshot| {
            if let Some(value) = snapshot.value {
                stats.entries_scanned += 1;
                if snapshot.from_disk {
                    stats.entries_from_disk += 1;
                }
                failed = !maintenance::maintain(index, &key, Some(&value));
            }
        })?;
        if failed {
            stats.exceptions += 1;
        }
    }

    stats.build_time = started.elapsed();
    debug!(
        index = index.name(),
        scanned = stats.entries_scanned,
        from_disk = stats.entries_from_disk,
        exceptions = stats.exceptions,
        "initial index population finished"
    );
    Ok(stats)
}
