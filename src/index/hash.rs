//! Striped hash index: equality lookups only

use std::hash::BuildHasher;
use std::ops::Bound;

use ahash::{AHashMap, RandomState};
use parking_lot::{RwLock, RwLockWriteGuard};

use super::bucket::Bucket;
use super::lookup::IndexLookup;
use super::operator::Operator;
use super::structure::{IndexStore, KeyCollector, Slot};
use super::IndexKind;
use crate::types::Key;
use crate::Result;

#[derive(Default)]
struct Stripe {
    buckets: AHashMap<Slot, Bucket>,
    values: usize,
}

impl Stripe {
    fn add(&mut self, key: &Key, slot: &Slot) {
        self.buckets.entry(slot.clone()).or_default().add(key);
        self.values += 1;
    }

    fn remove(&mut self, key: &Key, slot: &Slot) {
        if let Some(bucket) = self.buckets.get_mut(slot) {
            if bucket.remove(key) {
                self.values -= 1;
            }
            if bucket.is_empty() {
                self.buckets.remove(slot);
            }
        }
    }
}

/// Hash index structure
///
/// Defined values are spread over `stripes` independently locked maps; the
/// undefined bucket lives in one extra stripe at the end. Writers that touch
/// several stripes lock them in ascending stripe order.
pub struct HashStructure {
    stripes: Box<[RwLock<Stripe>]>,
    hasher: RandomState,
}

impl HashStructure {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1) + 1;
        Self {
            stripes: (0..stripes).map(|_| RwLock::new(Stripe::default())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn stripe_of(&self, slot: &Slot) -> usize {
        let defined = self.stripes.len() - 1;
        match slot {
            Slot::Defined(k) => (self.hasher.hash_one(k) % defined as u64) as usize,
            Slot::Undefined => defined,
        }
    }
}

impl IndexStore for HashStructure {
    fn kind(&self) -> IndexKind {
        IndexKind::Hash
    }

    fn update_mapping(&self, key: &Key, old: &[Slot], new: &[Slot]) -> Result<()> {
        let mut touched: Vec<usize> = old.iter().chain(new).map(|s| self.stripe_of(s)).collect();
        touched.sort_unstable();
        touched.dedup();

        let mut guards: Vec<(usize, RwLockWriteGuard<'_, Stripe>)> = touched
            .into_iter()
            .map(|i| (i, self.stripes[i].write()))
            .collect();

        for (slot, add) in old.iter().map(|s| (s, false)).chain(new.iter().map(|s| (s, true))) {
            let stripe = self.stripe_of(slot);
            if let Ok(pos) = guards.binary_search_by_key(&stripe, |(i, _)| *i) {
                let guard = &mut guards[pos].1;
                if add {
                    guard.add(key, slot);
                } else {
                    guard.remove(key, slot);
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, op: Operator, probe: Option<&Key>) -> IndexLookup {
        let mut out = KeyCollector::default();
        match op {
            Operator::Equal => {
                if let Some(p) = probe {
                    let slot = Slot::Defined(p.clone());
                    let stripe = self.stripes[self.stripe_of(&slot)].read();
                    if let Some(bucket) = stripe.buckets.get(&slot) {
                        out.extend(bucket.keys());
                    }
                }
            }
            Operator::IsUndefined => {
                let stripe = self.stripes[self.stripe_of(&Slot::Undefined)].read();
                if let Some(bucket) = stripe.buckets.get(&Slot::Undefined) {
                    out.extend(bucket.keys());
                }
            }
            Operator::NotEqual => {
                // all stripes held at once for a consistent view
                let guards: Vec<_> = self.stripes.iter().map(|s| s.read()).collect();
                for guard in &guards {
                    for (slot, bucket) in &guard.buckets {
                        if op.matches(slot.key(), probe) {
                            out.extend(bucket.keys());
                        }
                    }
                }
            }
            _ => {}
        }
        out.finish(false)
    }

    fn lookup_range(&self, _lower: Bound<&Key>, _upper: Bound<&Key>) -> Option<IndexLookup> {
        None
    }

    fn contains(&self, slot: &Slot, key: &Key) -> bool {
        let stripe = self.stripes[self.stripe_of(slot)].read();
        stripe.buckets.get(slot).map_or(false, |b| b.contains(key))
    }

    fn counts(&self) -> (usize, usize) {
        let guards: Vec<_> = self.stripes.iter().map(|s| s.read()).collect();
        guards
            .iter()
            .fold((0, 0), |(keys, values), g| (keys + g.buckets.len(), values + g.values))
    }

    fn clear(&self) {
        let mut guards: Vec<_> = self.stripes.iter().map(|s| s.write()).collect();
        for guard in guards.iter_mut() {
            guard.buckets.clear();
            guard.values = 0;
        }
    }
}
