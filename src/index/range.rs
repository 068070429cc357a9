//! Ordered index: supports every operator, range lookups and sorted output

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::bucket::Bucket;
use super::lookup::IndexLookup;
use super::operator::Operator;
use super::structure::{IndexStore, KeyCollector, Slot};
use super::IndexKind;
use crate::types::Key;
use crate::Result;

#[derive(Default)]
struct RangeInner {
    values: BTreeMap<Key, Bucket>,
    undefined: Bucket,
    total_values: usize,
}

impl RangeInner {
    fn add(&mut self, key: &Key, slot: &Slot) {
        match slot {
            Slot::Defined(v) => self.values.entry(v.clone()).or_default().add(key),
            Slot::Undefined => self.undefined.add(key),
        }
        self.total_values += 1;
    }

    fn remove(&mut self, key: &Key, slot: &Slot) {
        let removed = match slot {
            Slot::Defined(v) => match self.values.get_mut(v) {
                Some(bucket) => {
                    let removed = bucket.remove(key);
                    if bucket.is_empty() {
                        self.values.remove(v);
                    }
                    removed
                }
                None => false,
            },
            Slot::Undefined => self.undefined.remove(key),
        };
        if removed {
            self.total_values -= 1;
        }
    }
}

/// Range index structure
///
/// One `RwLock` guards the whole tree; lookups take it shared and copy the
/// matching keys out before releasing it.
pub struct RangeStructure {
    inner: RwLock<RangeInner>,
}

impl RangeStructure {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RangeInner::default()),
        }
    }
}

impl Default for RangeStructure {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounds are empty when they cannot be satisfied (reversed, or spanning
/// two key classes); `BTreeMap::range` panics on some of those.
fn empty_bounds(lower: Bound<&Key>, upper: Bound<&Key>) -> bool {
    let (lo, lo_inclusive) = match lower {
        Bound::Included(k) => (k, true),
        Bound::Excluded(k) => (k, false),
        Bound::Unbounded => return false,
    };
    let (hi, hi_inclusive) = match upper {
        Bound::Included(k) => (k, true),
        Bound::Excluded(k) => (k, false),
        Bound::Unbounded => return false,
    };
    lo.class() != hi.class() || lo > hi || (lo == hi && !(lo_inclusive && hi_inclusive))
}

impl IndexStore for RangeStructure {
    fn kind(&self) -> IndexKind {
        IndexKind::Range
    }

    fn update_mapping(&self, key: &Key, old: &[Slot], new: &[Slot]) -> Result<()> {
        let mut inner = self.inner.write();
        for slot in old {
            inner.remove(key, slot);
        }
        for slot in new {
            inner.add(key, slot);
        }
        Ok(())
    }

    fn lookup(&self, op: Operator, probe: Option<&Key>) -> IndexLookup {
        let inner = self.inner.read();
        let mut out = KeyCollector::default();
        match op {
            Operator::IsUndefined => out.extend(inner.undefined.keys()),
            Operator::NotEqual => {
                for (value, bucket) in &inner.values {
                    if op.matches(Some(value), probe) {
                        out.extend(bucket.keys());
                    }
                }
            }
            Operator::Equal => {
                if let Some(bucket) = probe.and_then(|p| inner.values.get(p)) {
                    out.extend(bucket.keys());
                }
            }
            Operator::LessThan | Operator::LessThanOrEqual => {
                if let Some(p) = probe {
                    let floor = Key::class_floor(p.class());
                    let upper = if op == Operator::LessThan {
                        Bound::Excluded(p)
                    } else {
                        Bound::Included(p)
                    };
                    for (_, bucket) in inner.values.range((Bound::Included(&floor), upper)) {
                        out.extend(bucket.keys());
                    }
                }
            }
            Operator::GreaterThan | Operator::GreaterThanOrEqual => {
                if let Some(p) = probe {
                    let lower = if op == Operator::GreaterThan {
                        Bound::Excluded(p)
                    } else {
                        Bound::Included(p)
                    };
                    let class = p.class();
                    for (_, bucket) in inner
                        .values
                        .range((lower, Bound::Unbounded))
                        .take_while(|(v, _)| v.class() == class)
                    {
                        out.extend(bucket.keys());
                    }
                }
            }
        }
        out.finish(true)
    }

    fn lookup_range(&self, lower: Bound<&Key>, upper: Bound<&Key>) -> Option<IndexLookup> {
        let mut out = KeyCollector::default();
        if empty_bounds(lower, upper) {
            return Some(out.finish(true));
        }
        let inner = self.inner.read();
        let class = match (lower, upper) {
            (Bound::Included(k) | Bound::Excluded(k), _) => Some(k.class()),
            (_, Bound::Included(k) | Bound::Excluded(k)) => Some(k.class()),
            _ => None,
        };
        let floor;
        let lower = match (lower, class) {
            (Bound::Unbounded, Some(c)) => {
                floor = Key::class_floor(c);
                Bound::Included(&floor)
            }
            (bound, _) => bound,
        };
        for (value, bucket) in inner.values.range((lower, upper)) {
            if class.map_or(true, |c| value.class() == c) {
                out.extend(bucket.keys());
            } else {
                break;
            }
        }
        Some(out.finish(true))
    }

    fn contains(&self, slot: &Slot, key: &Key) -> bool {
        let inner = self.inner.read();
        match slot {
            Slot::Defined(v) => inner.values.get(v).map_or(false, |b| b.contains(key)),
            Slot::Undefined => inner.undefined.contains(key),
        }
    }

    fn counts(&self) -> (usize, usize) {
        let inner = self.inner.read();
        let keys = inner.values.len() + usize::from(!inner.undefined.is_empty());
        (keys, inner.total_values)
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        inner.values.clear();
        inner.undefined.clear();
        inner.total_values = 0;
    }
}
