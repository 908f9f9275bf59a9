use std::collections::{BTreeMap, BTreeSet};
use std::num::ParseIntError;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{BrokerId, PartitionMap, PartitionMetaMap};
use crate::constraints::Constraints;
use crate::metadata::BrokerMetaMap;
use crate::rebuild::PlacementStrategy;
use crate::{Error, SoftErrorKind};

/// A Kafka broker annotated with the placement-relevant attributes:
/// locality (rack), tags, current partition count, free storage, and the
/// lifecycle bits maintained by `BrokerMap::update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Broker {
    pub id: BrokerId,
    pub locality: String,
    pub tags: BTreeMap<String, String>,
    pub used: u32,
    pub storage_free: f64,
    pub new: bool,
    pub missing: bool,
    pub old_missing: bool,
    pub replace: bool,
}

impl Broker {
    pub fn from_meta(id: BrokerId, meta: &crate::metadata::BrokerMeta) -> Self {
        Self {
            id,
            locality: meta.rack.clone(),
            tags: meta.tags.clone(),
            storage_free: meta.storage_free,
            ..Default::default()
        }
    }
}

/// Counts of lifecycle transitions performed by a `BrokerMap::update` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStatus {
    pub new: u32,
    pub missing: u32,
    pub old_missing: u32,
    pub replace: u32,
}

impl BrokerStatus {
    /// Whether the update changed any broker lifecycle state.
    pub fn changes(&self) -> bool {
        self.new > 0 || self.missing > 0 || self.old_missing > 0 || self.replace > 0
    }
}

/// All known brokers, keyed by ID. Iteration order is ascending ID, which
/// every planning pass relies on for determinism.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerMap(BTreeMap<BrokerId, Broker>);

impl BrokerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, broker: Broker) {
        self.0.insert(broker.id, broker);
    }

    pub fn get(&self, id: BrokerId) -> Option<&Broker> {
        self.0.get(&id)
    }

    pub fn get_mut(&mut self, id: BrokerId) -> Option<&mut Broker> {
        self.0.get_mut(&id)
    }

    pub fn contains(&self, id: BrokerId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BrokerId, &Broker)> {
        self.0.iter()
    }

    /// Seeds a broker map from the IDs referenced in a partition map.
    /// `used` counts come from replica membership; locality, tags, and
    /// storage merge in from discovered metadata. With `force_rebuild`,
    /// every broker starts marked for replacement so a subsequent rebuild
    /// re-places the entire map.
    pub fn from_partition_map(
        pm: &PartitionMap,
        meta: &BrokerMetaMap,
        force_rebuild: bool,
    ) -> Self {
        let mut map: BTreeMap<BrokerId, Broker> = BTreeMap::new();

        for p in &pm.partitions {
            for slot in &p.replicas {
                if let Some(id) = slot.broker() {
                    let b = map.entry(id).or_insert_with(|| Broker {
                        id,
                        replace: force_rebuild,
                        ..Default::default()
                    });
                    b.used += 1;
                }
            }
        }

        for (id, b) in map.iter_mut() {
            match meta.get(id) {
                Some(m) => {
                    b.locality = m.rack.clone();
                    b.tags = m.tags.clone();
                    b.storage_free = m.storage_free;
                }
                None => {
                    // Referenced in the map but absent from discovery.
                    b.missing = true;
                    b.replace = true;
                }
            }
        }

        Self(map)
    }

    /// Reconciles the map against a reference broker list and a fresh
    /// metadata snapshot:
    ///
    /// - reference IDs absent from the snapshot are missing and replaced;
    /// - brokers dropped from the reference list are replaced; those also
    ///   gone from the snapshot are additionally missing and old-missing;
    /// - snapshot IDs not yet known are added as new;
    /// - brokers present in both keep only a previously set replace flag.
    pub fn update(&mut self, reference_ids: &[BrokerId], meta: &BrokerMetaMap) -> BrokerStatus {
        let mut status = BrokerStatus::default();
        let reference: BTreeSet<BrokerId> = reference_ids.iter().copied().collect();

        for (id, b) in self.0.iter_mut() {
            match (reference.contains(id), meta.contains_key(id)) {
                (true, true) => {
                    b.new = false;
                    b.missing = false;
                    b.old_missing = false;
                    if let Some(m) = meta.get(id) {
                        b.locality = m.rack.clone();
                        b.tags = m.tags.clone();
                        b.storage_free = m.storage_free;
                    }
                }
                (true, false) => {
                    b.missing = true;
                    b.replace = true;
                    status.missing += 1;
                }
                (false, true) => {
                    // Still alive, but dropped from the reference list:
                    // a decommission request.
                    b.replace = true;
                    status.replace += 1;
                }
                (false, false) => {
                    b.missing = true;
                    b.old_missing = true;
                    b.replace = true;
                    status.old_missing += 1;
                    status.replace += 1;
                }
            }
        }

        // Reference IDs we have no record of anywhere count as missing,
        // but aren't added to the map.
        for id in &reference {
            if !self.0.contains_key(id) && !meta.contains_key(id) {
                status.missing += 1;
            }
        }

        for (id, m) in meta.iter() {
            if !self.0.contains_key(id) {
                let mut b = Broker::from_meta(*id, m);
                b.new = true;
                self.0.insert(*id, b);
                status.new += 1;
            }
        }

        status
    }

    /// Brokers eligible for placement: everything not marked for
    /// replacement, in ascending ID order.
    pub fn filtered_list(&self) -> BrokerList {
        BrokerList(self.0.values().filter(|b| !b.replace).cloned().collect())
    }

    /// Arithmetic mean of free storage over the filtered list.
    pub fn mean(&self) -> f64 {
        let list = self.filtered_list();
        if list.is_empty() {
            return 0.0;
        }

        let total: f64 = list.iter().map(|b| b.storage_free).sum();
        total / list.len() as f64
    }

    /// Harmonic mean of free storage over the filtered list. Brokers with
    /// no free storage are excluded to keep the mean defined.
    pub fn h_mean(&self) -> f64 {
        let mut count = 0u32;
        let mut sum = 0.0;

        for b in self.filtered_list().iter() {
            if b.storage_free > 0.0 {
                count += 1;
                sum += 1.0 / b.storage_free;
            }
        }

        if sum == 0.0 {
            return 0.0;
        }

        f64::from(count) / sum
    }

    /// Broker IDs whose free storage is at least `threshold` (fractional)
    /// below the provided mean, ascending.
    pub fn below_mean(&self, threshold: f64, mean: f64) -> Vec<BrokerId> {
        if mean <= 0.0 {
            return Vec::new();
        }

        self.0
            .values()
            .filter(|b| (mean - b.storage_free) / mean >= threshold)
            .map(|b| b.id)
            .collect()
    }

    /// Subtracts every partition's size from the free storage of each of
    /// its replicas, bringing the map's storage view in line with current
    /// utilization before planning.
    pub fn sub_storage_all(
        &mut self,
        pm: &PartitionMap,
        meta: &PartitionMetaMap,
    ) -> Result<(), Error> {
        for p in &pm.partitions {
            let size = meta.size(p)?;
            for slot in &p.replicas {
                if let Some(id) = slot.broker() {
                    if let Some(b) = self.0.get_mut(&id) {
                        b.storage_free -= size;
                    }
                }
            }
        }

        Ok(())
    }
}

/// An ordered scratch copy of eligible brokers. Candidate selection
/// mutates only this list (`used` counts, storage accounting), leaving
/// the source `BrokerMap` untouched.
#[derive(Debug, Clone, Default)]
pub struct BrokerList(Vec<Broker>);

impl BrokerList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Broker> {
        self.0.iter()
    }

    pub fn ids(&self) -> Vec<BrokerId> {
        self.0.iter().map(|b| b.id).collect()
    }

    /// Ascending partition count, ties broken by ascending ID.
    pub fn sort_by_count(&mut self) {
        self.0.sort_by(|a, b| a.used.cmp(&b.used).then(a.id.cmp(&b.id)));
    }

    /// Descending free storage, ties broken by ascending ID.
    pub fn sort_by_storage(&mut self) {
        self.0.sort_by(|a, b| {
            b.storage_free
                .partial_cmp(&a.storage_free)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
    }

    /// Sorts by partition count, then shuffles brokers within each group
    /// of equal counts using a PRNG freshly seeded from `seed`. Placement
    /// fairness comes from varying the seed per call rather than from a
    /// shared RNG.
    pub fn pseudo_shuffle(&mut self, seed: u64) {
        self.sort_by_count();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut start = 0;

        while start < self.0.len() {
            let used = self.0[start].used;
            let mut end = start + 1;
            while end < self.0.len() && self.0[end].used == used {
                end += 1;
            }

            self.0[start..end].shuffle(&mut rng);
            start = end;
        }
    }

    /// Selects the first broker in strategy order that satisfies the
    /// constraints, charging the placement against the list's scratch
    /// state (`used`, and `storage_free` when a request size is set).
    pub fn best_candidate(
        &mut self,
        constraints: &Constraints,
        strategy: PlacementStrategy,
        seed: u64,
    ) -> Result<Broker, SoftErrorKind> {
        match strategy {
            PlacementStrategy::Count => self.pseudo_shuffle(seed),
            PlacementStrategy::Storage => self.sort_by_storage(),
        }

        for b in &mut self.0 {
            if constraints.passes(b) {
                b.used += 1;
                if constraints.request_size > 0.0 {
                    b.storage_free -= constraints.request_size;
                }

                return Ok(b.clone());
            }
        }

        Err(SoftErrorKind::NoSuitableBroker)
    }
}

/// Parses a comma-delimited broker ID list, dropping duplicates while
/// preserving order.
pub fn broker_ids_from_str(s: &str) -> Result<Vec<BrokerId>, ParseIntError> {
    let mut seen = BTreeSet::new();
    let mut ids = Vec::new();

    for token in s.split(',').filter(|t| !t.is_empty()) {
        let id: BrokerId = token.trim().parse()?;
        if seen.insert(id) {
            ids.push(id);
        }
    }

    Ok(ids)
}
