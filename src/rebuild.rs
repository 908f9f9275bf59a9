use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::constraints::merge_constraints;
use crate::models::{BrokerMap, Partition, PartitionMap, PartitionMetaMap, ReplicaSlot};
use crate::{Error, SoftError, SoftErrorKind};

/// How replacement brokers are chosen during a rebuild: spread partition
/// counts evenly, or spread stored bytes evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStrategy {
    Count,
    Storage,
}

impl FromStr for PlacementStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(PlacementStrategy::Count),
            "storage" => Ok(PlacementStrategy::Storage),
            other => Err(Error::InvalidStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStrategy::Count => write!(f, "count"),
            PlacementStrategy::Storage => write!(f, "storage"),
        }
    }
}

impl PartitionMap {
    /// Traverses the map, replacing brokers marked for removal with the
    /// best available candidate under the selected strategy. Returns the
    /// rebuilt map along with any per-partition soft errors; a partition
    /// that couldn't be fully placed ends up with fewer replicas and a
    /// corresponding error rather than aborting the rebuild.
    pub fn rebuild(
        &self,
        brokers: &BrokerMap,
        meta: &PartitionMetaMap,
        strategy: PlacementStrategy,
    ) -> (PartitionMap, Vec<SoftError>) {
        let mut source = self.clone();

        let (mut new_map, errs) = match strategy {
            PlacementStrategy::Count => {
                source.sort_canonical();
                place_by_position(&source, brokers, meta, strategy)
            }
            PlacementStrategy::Storage => {
                source.sort_by_size(meta);
                let (mut placed, errs) = place_by_partition(&source, brokers, meta, strategy);
                // Choosing all brokers for a partition at once leaves
                // leadership skewed toward the storage-sorted head, so
                // replica sets are shuffled deterministically afterward.
                shuffle_replicas(&mut placed);
                (placed, errs)
            }
        };

        new_map.sort_canonical();

        (new_map, errs)
    }
}

/// Builds a new map by filling one replica index at a time across all
/// partitions: pass 0 places every leader, pass 1 the first follower, and
/// so on. Spreading each index across the full partition list is what
/// keeps leadership balanced under the count strategy.
fn place_by_position(
    pm: &PartitionMap,
    brokers: &BrokerMap,
    meta: &PartitionMetaMap,
    strategy: PlacementStrategy,
) -> (PartitionMap, Vec<SoftError>) {
    let mut new_map = PartitionMap {
        version: pm.version,
        partitions: Vec::with_capacity(pm.partitions.len()),
    };

    let mut pool = brokers.filtered_list();
    let mut errs = Vec::new();
    let total = pm.partitions.len();
    let mut pass: usize = 0;

    loop {
        let mut skipped = 0;

        for (n, partn) in pm.partitions.iter().enumerate() {
            if pass == 0 {
                new_map
                    .partitions
                    .push(Partition::new(partn.topic.clone(), partn.partition));
            }

            // Replica set lengths vary; partitions with nothing at this
            // index sit the pass out.
            if pass >= partn.replicas.len() {
                skipped += 1;
                continue;
            }

            let slot = partn.replicas[pass];
            let keep = slot
                .broker()
                .and_then(|id| brokers.get(id))
                .is_some_and(|b| !b.replace);

            if keep {
                new_map.partitions[n].replicas.push(slot);
                continue;
            }

            // Constrain on the old replica set plus anything placed into
            // the new one so far.
            let mut constraints = merge_constraints(
                partn
                    .replicas
                    .iter()
                    .chain(new_map.partitions[n].replicas.iter())
                    .filter_map(|s| s.broker())
                    .filter_map(|id| brokers.get(id)),
            );

            if strategy == PlacementStrategy::Storage {
                match meta.size(partn) {
                    Ok(size) => constraints.request_size = size,
                    Err(_) => {
                        errs.push(SoftError::new(SoftErrorKind::UnknownSize, partn));
                        continue;
                    }
                }
            }

            let seed = (pass * n + 1) as u64;
            match pool.best_candidate(&constraints, strategy, seed) {
                Ok(b) => {
                    debug!(
                        topic = %partn.topic,
                        partition = partn.partition,
                        index = pass,
                        broker = b.id,
                        "placed replica"
                    );
                    new_map.partitions[n].replicas.push(ReplicaSlot::Broker(b.id));
                }
                Err(kind) => errs.push(SoftError::new(kind, partn)),
            }
        }

        pass += 1;
        if skipped >= total {
            break;
        }
    }

    check_zero_replicas(&new_map, &mut errs);

    (new_map, errs)
}

/// Builds a new map one partition at a time, filling every replacement
/// slot for a partition in the same iteration. Used by the storage
/// strategy so a partition's full footprint lands before the next
/// (smaller) partition is considered.
fn place_by_partition(
    pm: &PartitionMap,
    brokers: &BrokerMap,
    meta: &PartitionMetaMap,
    strategy: PlacementStrategy,
) -> (PartitionMap, Vec<SoftError>) {
    let mut new_map = PartitionMap {
        version: pm.version,
        partitions: Vec::with_capacity(pm.partitions.len()),
    };

    let mut pool = brokers.filtered_list();
    let mut errs = Vec::new();

    for partn in &pm.partitions {
        let mut new_partn = Partition::new(partn.topic.clone(), partn.partition);

        for slot in &partn.replicas {
            let keep = slot
                .broker()
                .and_then(|id| brokers.get(id))
                .is_some_and(|b| !b.replace);

            if keep {
                new_partn.replicas.push(*slot);
                continue;
            }

            let mut constraints = merge_constraints(
                partn
                    .replicas
                    .iter()
                    .chain(new_partn.replicas.iter())
                    .filter_map(|s| s.broker())
                    .filter_map(|id| brokers.get(id)),
            );

            if strategy == PlacementStrategy::Storage {
                match meta.size(partn) {
                    Ok(size) => constraints.request_size = size,
                    Err(_) => {
                        errs.push(SoftError::new(SoftErrorKind::UnknownSize, partn));
                        continue;
                    }
                }
            }

            match pool.best_candidate(&constraints, strategy, 1) {
                Ok(b) => {
                    debug!(
                        topic = %partn.topic,
                        partition = partn.partition,
                        broker = b.id,
                        storage_free = b.storage_free,
                        "placed replica"
                    );
                    new_partn.replicas.push(ReplicaSlot::Broker(b.id));
                }
                Err(kind) => errs.push(SoftError::new(kind, partn)),
            }
        }

        new_map.partitions.push(new_partn);
    }

    check_zero_replicas(&new_map, &mut errs);

    (new_map, errs)
}

fn check_zero_replicas(pm: &PartitionMap, errs: &mut Vec<SoftError>) {
    for partn in &pm.partitions {
        if partn.replicas.is_empty() {
            errs.push(SoftError::new(SoftErrorKind::ZeroReplicas, partn));
        }
    }
}

/// Shuffles each partition's replica sequence with a PRNG seeded from the
/// partition's position, so repeated rebuilds of the same input yield the
/// same ordering.
fn shuffle_replicas(pm: &mut PartitionMap) {
    for (n, partn) in pm.partitions.iter_mut().enumerate() {
        let mut rng = StdRng::seed_from_u64((n as u64) << 2);
        partn.replicas.shuffle(&mut rng);
    }
}
