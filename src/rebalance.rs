use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::constraints::merge_constraints;
use crate::models::{
    Broker, BrokerId, BrokerMap, Mappings, Partition, PartitionId, PartitionMap,
    PartitionMetaMap, ReplicaSlot, TopicName,
};
use crate::rebuild::PlacementStrategy;

/// Tunables for a rebalance run.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceParams {
    /// Brokers this fraction below the harmonic mean of free storage are
    /// offload targets. Zero targets every non-new broker.
    pub storage_threshold: f64,
    /// Fractional distance from the mean that bounds both sides of a
    /// planned move.
    pub tolerance: f64,
    /// Restrict destinations to the source broker's locality.
    pub locality_scoped: bool,
    /// Rotate replica sets after applying the plan to even out leadership.
    pub optimize_leaders: bool,
    /// How many of a source broker's largest partitions to consider per
    /// pass.
    pub top_partitions_limit: usize,
}

impl Default for RebalanceParams {
    fn default() -> Self {
        Self {
            storage_threshold: 0.20,
            tolerance: 0.10,
            locality_scoped: false,
            optimize_leaders: false,
            top_partitions_limit: 30,
        }
    }
}

/// A single planned partition move off a source broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Relocation {
    pub partition: Partition,
    pub destination: BrokerId,
}

/// Source and destination broker IDs keyed by topic and partition. At
/// most one move is planned per partition per run.
#[derive(Debug, Clone, Default)]
pub struct RelocationPlan(BTreeMap<TopicName, BTreeMap<PartitionId, (BrokerId, BrokerId)>>);

impl RelocationPlan {
    pub fn add(&mut self, p: &Partition, source: BrokerId, destination: BrokerId) {
        self.0
            .entry(p.topic.clone())
            .or_default()
            .insert(p.partition, (source, destination));
    }

    /// The planned (source, destination) pair for a partition, if any.
    pub fn planned(&self, p: &Partition) -> Option<(BrokerId, BrokerId)> {
        self.0.get(&p.topic).and_then(|t| t.get(&p.partition)).copied()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Plans partition moves off storage-overloaded brokers. The rebalancer
/// owns a working copy of the broker map; storage accounting for planned
/// moves lands there, never on the caller's inputs.
#[derive(Debug)]
pub struct Rebalancer {
    brokers: BrokerMap,
    mappings: Mappings,
    meta: PartitionMetaMap,
    params: RebalanceParams,
    plan: RelocationPlan,
    relos: BTreeMap<BrokerId, Vec<Relocation>>,
    pass: u32,
}

impl Rebalancer {
    pub fn new(
        pm: &PartitionMap,
        brokers: BrokerMap,
        meta: PartitionMetaMap,
        params: RebalanceParams,
    ) -> Self {
        Self {
            brokers,
            mappings: Mappings::from_partition_map(pm),
            meta,
            params,
            plan: RelocationPlan::default(),
            relos: BTreeMap::new(),
            pass: 0,
        }
    }

    pub fn plan(&self) -> &RelocationPlan {
        &self.plan
    }

    pub fn into_plan(self) -> RelocationPlan {
        self.plan
    }

    /// Relocations planned so far, grouped by source broker.
    pub fn relocations(&self) -> &BTreeMap<BrokerId, Vec<Relocation>> {
        &self.relos
    }

    /// The working broker map, with planned storage accounting applied.
    pub fn brokers(&self) -> &BrokerMap {
        &self.brokers
    }

    /// Brokers to offload, ascending: those below the harmonic mean of
    /// free storage by at least the configured threshold, or every
    /// non-new broker when the threshold is zero.
    pub fn offload_targets(&self) -> Vec<BrokerId> {
        if self.params.storage_threshold == 0.0 {
            return self
                .brokers
                .iter()
                .filter(|(_, b)| !b.new)
                .map(|(id, _)| *id)
                .collect();
        }

        self.brokers
            .below_mean(self.params.storage_threshold, self.brokers.h_mean())
    }

    /// Runs planning passes over the offload targets until a full pass
    /// plans no further moves. Returns the total number of relocations.
    pub fn run(&mut self) -> usize {
        let targets = self.offload_targets();
        if targets.is_empty() {
            return 0;
        }

        let mut total = 0;

        loop {
            let mut planned = 0;
            for &id in &targets {
                planned += self.plan_relocations_for_broker(id);
            }

            self.pass += 1;
            total += planned;

            if planned == 0 {
                break;
            }
        }

        total
    }

    /// Plans at most one partition move off the source broker: the
    /// largest partition that can relocate without pushing the source
    /// above, or the destination below, the tolerance band around the
    /// mean free storage. Committed moves update the working storage
    /// accounting and unmap the partition so it isn't retried.
    pub fn plan_relocations_for_broker(&mut self, source_id: BrokerId) -> usize {
        let tolerance = self.params.tolerance;
        let mean = self.brokers.mean();

        let top = match self.mappings.largest_partitions(
            source_id,
            self.params.top_partitions_limit,
            &self.meta,
        ) {
            Ok(top) => top,
            Err(e) => {
                warn!(source = source_id, error = %e, "cannot size partitions for broker");
                return 0;
            }
        };

        let source_locality = match self.brokers.get(source_id) {
            Some(b) => b.locality.clone(),
            None => return 0,
        };

        debug!(
            pass = self.pass,
            source = source_id,
            partitions = top.len(),
            "planning relocations"
        );

        let mut relo_count = 0;

        for p in &top {
            let p_size = match self.meta.size(p) {
                Ok(size) => size,
                Err(_) => continue,
            };

            let mut candidates = self.brokers.filtered_list();
            candidates.sort_by_storage();

            // Locality-scoped moves stay on the source's rack; otherwise
            // the destination must satisfy the constraints of the replica
            // set minus the source it replaces.
            let dest: Option<Broker> = if self.params.locality_scoped {
                candidates
                    .iter()
                    .find(|b| b.locality == source_locality && b.id != source_id)
                    .cloned()
            } else {
                let constraints = merge_constraints(
                    p.replicas
                        .iter()
                        .filter_map(|s| s.broker())
                        .filter(|id| *id != source_id)
                        .filter_map(|id| self.brokers.get(id)),
                );

                candidates
                    .best_candidate(&constraints, PlacementStrategy::Storage, 0)
                    .ok()
            };

            let dest = match dest {
                Some(dest) => dest,
                // No destination at all ends planning for this broker.
                None => return relo_count,
            };

            let source_free = match self.brokers.get(source_id) {
                Some(b) => b.storage_free + p_size,
                None => return relo_count,
            };
            let dest_free = dest.storage_free - p_size;

            let source_limit = mean * (1.0 + tolerance);
            if source_free > source_limit {
                debug!(
                    topic = %p.topic,
                    partition = p.partition,
                    projected = source_free,
                    limit = source_limit,
                    "source would overshoot the tolerance band"
                );
                continue;
            }

            let dest_limit = mean * (1.0 - tolerance);
            if dest_free < dest_limit {
                debug!(
                    topic = %p.topic,
                    partition = p.partition,
                    destination = dest.id,
                    projected = dest_free,
                    limit = dest_limit,
                    "destination would undershoot the tolerance band"
                );
                continue;
            }

            self.plan.add(p, source_id, dest.id);
            self.relos
                .entry(source_id)
                .or_default()
                .push(Relocation {
                    partition: p.clone(),
                    destination: dest.id,
                });

            if let Some(b) = self.brokers.get_mut(source_id) {
                b.storage_free = source_free;
            }
            if let Some(b) = self.brokers.get_mut(dest.id) {
                b.storage_free = dest_free;
            }

            self.mappings.remove(source_id, p);
            relo_count += 1;

            debug!(
                pass = self.pass,
                topic = %p.topic,
                partition = p.partition,
                source = source_id,
                destination = dest.id,
                size = p_size,
                "planned relocation"
            );

            // One move per source per pass; the mean is re-evaluated
            // before the next.
            break;
        }

        relo_count
    }

    /// Rewrites the partition map per the plan and, when configured,
    /// evens out leadership afterward.
    pub fn apply(&self, pm: &mut PartitionMap) {
        apply_relocation_plan(pm, &self.plan);

        if self.params.optimize_leaders {
            optimize_leaders(pm);
        }
    }
}

/// Replaces the first occurrence of each planned source broker with its
/// destination in the affected partition's replica list.
pub fn apply_relocation_plan(pm: &mut PartitionMap, plan: &RelocationPlan) {
    for p in &mut pm.partitions {
        if let Some((source, dest)) = plan.planned(p) {
            if let Some(slot) = p
                .replicas
                .iter_mut()
                .find(|s| s.broker() == Some(source))
            {
                *slot = ReplicaSlot::Broker(dest);
            }
        }
    }
}

/// Evens out leadership by rotating replica sets: while a broker leads
/// more than `ceil(total / brokers)` partitions, a partition it leads
/// whose first follower is below the target swaps indices 0 and 1. Stops
/// at the first full scan with no swap.
pub fn optimize_leaders(pm: &mut PartitionMap) {
    let stats = pm.use_stats();
    if stats.is_empty() {
        return;
    }

    let mut leader_counts: BTreeMap<BrokerId, u32> =
        stats.iter().map(|(id, s)| (*id, s.leader)).collect();

    let total: u32 = leader_counts.values().sum();
    let brokers = leader_counts.len() as u32;
    let target = total.div_ceil(brokers);

    loop {
        let mut swapped = false;

        for p in &mut pm.partitions {
            if p.replicas.len() < 2 {
                continue;
            }

            let (leader, follower) = match (p.replicas[0].broker(), p.replicas[1].broker()) {
                (Some(l), Some(f)) => (l, f),
                _ => continue,
            };

            let lc = leader_counts.get(&leader).copied().unwrap_or(0);
            let fc = leader_counts.get(&follower).copied().unwrap_or(0);

            if lc > target && fc < target {
                p.replicas.swap(0, 1);
                leader_counts.insert(leader, lc - 1);
                leader_counts.insert(follower, fc + 1);
                swapped = true;

                debug!(
                    topic = %p.topic,
                    partition = p.partition,
                    demoted = leader,
                    promoted = follower,
                    "rotated leadership"
                );
            }
        }

        if !swapped {
            break;
        }
    }
}
