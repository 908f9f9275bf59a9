use std::collections::BTreeMap;

use super::{BrokerId, Partition, PartitionId, PartitionMap, PartitionMetaMap, TopicName};
use crate::Error;

/// A derived index from broker ID to the partitions holding a replica on
/// that broker. Built from a `PartitionMap`; the rebalancer unmaps
/// partitions as moves are planned so they aren't retried.
#[derive(Debug, Clone, Default)]
pub struct Mappings(BTreeMap<BrokerId, BTreeMap<(TopicName, PartitionId), Partition>>);

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_partition_map(pm: &PartitionMap) -> Self {
        let mut mappings = Self::default();

        for p in &pm.partitions {
            for slot in &p.replicas {
                if let Some(id) = slot.broker() {
                    mappings
                        .0
                        .entry(id)
                        .or_default()
                        .insert((p.topic.clone(), p.partition), p.clone());
                }
            }
        }

        mappings
    }

    /// Number of partitions currently mapped to a broker.
    pub fn count(&self, id: BrokerId) -> usize {
        self.0.get(&id).map_or(0, |m| m.len())
    }

    /// Up to `limit` partitions mapped to a broker, largest first (ties
    /// broken by ascending partition number). Fails if any mapped
    /// partition is missing from the size metadata.
    pub fn largest_partitions(
        &self,
        id: BrokerId,
        limit: usize,
        meta: &PartitionMetaMap,
    ) -> Result<Vec<Partition>, Error> {
        let entries = match self.0.get(&id) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };

        let mut sized: Vec<(f64, &Partition)> = Vec::with_capacity(entries.len());
        for p in entries.values() {
            sized.push((meta.size(p)?, p));
        }

        sized.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.partition.cmp(&b.1.partition))
        });

        Ok(sized.into_iter().take(limit).map(|(_, p)| p.clone()).collect())
    }

    /// Unmaps a partition from a broker.
    pub fn remove(&mut self, id: BrokerId, p: &Partition) {
        if let Some(entries) = self.0.get_mut(&id) {
            entries.remove(&(p.topic.clone(), p.partition));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartitionMap;
    use crate::testutil::test_map_json;

    fn test_meta() -> PartitionMetaMap {
        let mut pmm = PartitionMetaMap::new();
        pmm.set("test_topic", 0, 30.0);
        pmm.set("test_topic", 1, 35.0);
        pmm.set("test_topic", 2, 60.0);
        pmm.set("test_topic", 3, 45.0);
        pmm
    }

    #[test]
    fn test_from_partition_map() {
        let pm = PartitionMap::from_json(&test_map_json("test_topic")).unwrap();
        let mappings = Mappings::from_partition_map(&pm);

        // Each broker holds two partitions in the fixture.
        for id in [1001, 1002, 1003, 1004] {
            assert_eq!(mappings.count(id), 2);
        }
        assert_eq!(mappings.count(1999), 0);
    }

    #[test]
    fn test_largest_partitions() {
        let pm = PartitionMap::from_json(&test_map_json("test_topic")).unwrap();
        let mappings = Mappings::from_partition_map(&pm);
        let meta = test_meta();

        // 1003 holds p2 (60) and p3 (45).
        let top = mappings.largest_partitions(1003, 2, &meta).unwrap();
        let order: Vec<u32> = top.iter().map(|p| p.partition).collect();
        assert_eq!(order, vec![2, 3]);

        // The limit truncates from the small end.
        let top = mappings.largest_partitions(1003, 1, &meta).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].partition, 2);

        // Unmapped brokers yield nothing.
        assert!(mappings.largest_partitions(1999, 5, &meta).unwrap().is_empty());
    }

    #[test]
    fn test_largest_partitions_unknown_size() {
        let pm = PartitionMap::from_json(&test_map_json("test_topic")).unwrap();
        let mappings = Mappings::from_partition_map(&pm);
        let empty = PartitionMetaMap::new();

        assert!(matches!(
            mappings.largest_partitions(1001, 2, &empty),
            Err(Error::UnknownSize { .. })
        ));
    }

    #[test]
    fn test_remove() {
        let pm = PartitionMap::from_json(&test_map_json("test_topic")).unwrap();
        let mut mappings = Mappings::from_partition_map(&pm);
        let meta = test_meta();

        let top = mappings.largest_partitions(1001, 2, &meta).unwrap();
        mappings.remove(1001, &top[0]);

        assert_eq!(mappings.count(1001), 1);
        let rest = mappings.largest_partitions(1001, 2, &meta).unwrap();
        assert_eq!(rest.len(), 1);
        assert_ne!(rest[0].partition, top[0].partition);
    }
}
