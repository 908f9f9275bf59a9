use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::{Deserializer, Error as _};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::{BrokerId, PartitionId, TopicName};
use crate::Error;

/// A single replica assignment slot. Slots that have no broker assigned
/// (because the map was stripped, or padded out to a higher replication
/// factor) are `Empty`; the persisted JSON form encodes an empty slot as
/// the stub broker ID 0 for compatibility with the Kafka reassignment
/// format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReplicaSlot {
    Empty,
    Broker(BrokerId),
}

impl ReplicaSlot {
    /// The assigned broker ID, if the slot is filled.
    pub fn broker(&self) -> Option<BrokerId> {
        match self {
            ReplicaSlot::Empty => None,
            ReplicaSlot::Broker(id) => Some(*id),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ReplicaSlot::Empty)
    }
}

impl From<BrokerId> for ReplicaSlot {
    fn from(id: BrokerId) -> Self {
        match id {
            0 => ReplicaSlot::Empty,
            id => ReplicaSlot::Broker(id),
        }
    }
}

impl fmt::Display for ReplicaSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaSlot::Empty => write!(f, "0"),
            ReplicaSlot::Broker(id) => write!(f, "{}", id),
        }
    }
}

impl Serialize for ReplicaSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.broker().unwrap_or(0))
    }
}

impl<'de> Deserialize<'de> for ReplicaSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = u64::deserialize(deserializer)?;
        let id = u32::try_from(id).map_err(|_| D::Error::custom("broker ID out of range"))?;
        Ok(ReplicaSlot::from(id))
    }
}

/// A partition in the Kafka topic mapping syntax: a topic, a partition
/// number, and an ordered replica list. Index 0 is the leader assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub topic: TopicName,
    pub partition: PartitionId,
    #[serde(default)]
    pub replicas: Vec<ReplicaSlot>,
}

impl Partition {
    pub fn new(topic: impl Into<TopicName>, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
            replicas: Vec::new(),
        }
    }

    /// Builds a partition with a filled replica list. An ID of 0 becomes
    /// an empty slot.
    pub fn with_replicas(
        topic: impl Into<TopicName>,
        partition: PartitionId,
        replicas: &[BrokerId],
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            replicas: replicas.iter().map(|id| ReplicaSlot::from(*id)).collect(),
        }
    }
}

/// Per-broker counts of leader and follower assignments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerUseStats {
    pub leader: u32,
    pub follower: u32,
}

/// The specific dimension on which two partition maps disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EqualMismatch {
    #[error("partitions len")]
    PartitionsLen,
    #[error("version")]
    Version,
    #[error("topic order")]
    TopicOrder,
    #[error("partition order")]
    PartitionOrder,
    #[error("replica list")]
    ReplicaList,
    #[error("replica")]
    Replica,
}

/// An ordered set of partitions plus the map format version. This is the
/// unit the rebuild and rebalance planners operate on, and it round-trips
/// the Kafka reassignment JSON exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMap {
    pub version: u32,
    pub partitions: Vec<Partition>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self {
            version: 1,
            partitions: Vec::new(),
        }
    }

    /// Parses a JSON encoded topic map. The result is canonically sorted.
    pub fn from_json(s: &str) -> Result<Self, Error> {
        let mut pm: PartitionMap = serde_json::from_str(s)?;
        pm.sort_canonical();
        Ok(pm)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Writes the map as JSON to `<path>.json` with a trailing newline,
    /// mode 0644.
    pub fn write_map(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let out = format!("{}\n", self.to_json()?);
        let target = format!("{}.json", path.as_ref().display());
        fs::write(&target, out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(0o644))?;
        }

        Ok(())
    }

    /// Canonical ordering: topic ascending, then partition number ascending.
    pub fn sort_canonical(&mut self) {
        self.partitions
            .sort_by(|a, b| a.topic.cmp(&b.topic).then(a.partition.cmp(&b.partition)));
    }

    /// Sorts partitions by size descending, breaking ties by partition
    /// number ascending. Partitions absent from the meta map sort as size 0.
    pub fn sort_by_size(&mut self, meta: &PartitionMetaMap) {
        self.partitions.sort_by(|a, b| {
            let s1 = meta.size(a).unwrap_or(0.0);
            let s2 = meta.size(b).unwrap_or(0.0);
            s2.partial_cmp(&s1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.partition.cmp(&b.partition))
        });
    }

    /// Returns a copy with every replica slot emptied, forcing a full
    /// placement on the next rebuild even when the broker list is unchanged.
    pub fn strip(&self) -> Self {
        let partitions = self
            .partitions
            .iter()
            .map(|p| Partition {
                topic: p.topic.clone(),
                partition: p.partition,
                replicas: vec![ReplicaSlot::Empty; p.replicas.len()],
            })
            .collect();

        Self {
            version: self.version,
            partitions,
        }
    }

    /// Resets every replica set to length `r`: sets exceeding `r` are
    /// truncated, sets below `r` are extended with empty slots. `r == 0`
    /// is a no-op.
    pub fn set_replication(&mut self, r: usize) {
        if r == 0 {
            return;
        }

        for p in &mut self.partitions {
            if p.replicas.len() > r {
                p.replicas.truncate(r);
            } else {
                p.replicas.resize(r, ReplicaSlot::Empty);
            }
        }
    }

    /// Checks equality against another map. Equality requires the exact
    /// same total order; the first dimension of disagreement is returned.
    pub fn check_equal(&self, other: &Self) -> Result<(), EqualMismatch> {
        if self.partitions.len() != other.partitions.len() {
            return Err(EqualMismatch::PartitionsLen);
        }
        if self.version != other.version {
            return Err(EqualMismatch::Version);
        }

        for (p1, p2) in self.partitions.iter().zip(&other.partitions) {
            if p1.topic != p2.topic {
                return Err(EqualMismatch::TopicOrder);
            }
            if p1.partition != p2.partition {
                return Err(EqualMismatch::PartitionOrder);
            }
            if p1.replicas.len() != p2.replicas.len() {
                return Err(EqualMismatch::ReplicaList);
            }
            if p1.replicas != p2.replicas {
                return Err(EqualMismatch::Replica);
            }
        }

        Ok(())
    }

    /// Counts leader and follower assignments per broker. Empty slots are
    /// not counted.
    pub fn use_stats(&self) -> BTreeMap<BrokerId, BrokerUseStats> {
        let mut stats: BTreeMap<BrokerId, BrokerUseStats> = BTreeMap::new();

        for p in &self.partitions {
            for (i, slot) in p.replicas.iter().enumerate() {
                if let Some(id) = slot.broker() {
                    let entry = stats.entry(id).or_default();
                    // Index 0 in a replica set is a leader assignment.
                    if i == 0 {
                        entry.leader += 1;
                    } else {
                        entry.follower += 1;
                    }
                }
            }
        }

        stats
    }
}

impl Default for PartitionMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Partition size metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionMeta {
    /// In bytes.
    pub size: f64,
}

/// A mapping of topic, partition number to PartitionMeta.
#[derive(Debug, Clone, Default)]
pub struct PartitionMetaMap(BTreeMap<TopicName, BTreeMap<PartitionId, PartitionMeta>>);

impl PartitionMetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, topic: impl Into<TopicName>, partition: PartitionId, size: f64) {
        self.0
            .entry(topic.into())
            .or_default()
            .insert(partition, PartitionMeta { size });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the size for a partition. Fails if the topic or partition
    /// isn't present in the metadata.
    pub fn size(&self, p: &Partition) -> Result<f64, Error> {
        self.0
            .get(&p.topic)
            .and_then(|t| t.get(&p.partition))
            .map(|m| m.size)
            .ok_or_else(|| Error::UnknownSize {
                topic: p.topic.clone(),
                partition: p.partition,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_map_json;

    fn test_map() -> PartitionMap {
        PartitionMap::from_json(&test_map_json("test_topic")).unwrap()
    }

    #[test]
    fn test_from_json_sorts_canonically() {
        let pm = PartitionMap::from_json(
            r#"{"version":1,"partitions":[
                {"topic":"b","partition":1,"replicas":[1002]},
                {"topic":"a","partition":1,"replicas":[1001]},
                {"topic":"b","partition":0,"replicas":[1001]},
                {"topic":"a","partition":0,"replicas":[1002]}]}"#,
        )
        .unwrap();

        let order: Vec<(&str, u32)> = pm
            .partitions
            .iter()
            .map(|p| (p.topic.as_str(), p.partition))
            .collect();

        assert_eq!(order, vec![("a", 0), ("a", 1), ("b", 0), ("b", 1)]);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            PartitionMap::from_json("{not json"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_replica_slot_sentinel_round_trip() {
        let pm = PartitionMap::from_json(
            r#"{"version":1,"partitions":[{"topic":"t","partition":0,"replicas":[1001,0,1003]}]}"#,
        )
        .unwrap();

        assert_eq!(
            pm.partitions[0].replicas,
            vec![
                ReplicaSlot::Broker(1001),
                ReplicaSlot::Empty,
                ReplicaSlot::Broker(1003)
            ]
        );

        let out = pm.to_json().unwrap();
        assert!(out.contains(r#""replicas":[1001,0,1003]"#));
    }

    #[test]
    fn test_copy_and_json_round_trip_preserve_order() {
        let pm = test_map();
        let copied = pm.clone();
        assert!(pm.check_equal(&copied).is_ok());

        let round = PartitionMap::from_json(&pm.to_json().unwrap()).unwrap();
        assert!(pm.check_equal(&round).is_ok());
    }

    #[test]
    fn test_strip() {
        let pm = test_map();
        let stripped = pm.strip();

        assert_eq!(stripped.partitions.len(), pm.partitions.len());
        for (orig, s) in pm.partitions.iter().zip(&stripped.partitions) {
            assert_eq!(s.replicas.len(), orig.replicas.len());
            assert!(s.replicas.iter().all(|r| r.is_empty()));
        }

        // Stripping is idempotent.
        assert!(stripped.strip().check_equal(&stripped).is_ok());
    }

    #[test]
    fn test_set_replication() {
        let mut pm = PartitionMap::new();
        pm.partitions = vec![
            Partition::with_replicas("t", 0, &[1001, 1002]),
            Partition::with_replicas("t", 1, &[1001, 1002, 1003]),
            Partition::with_replicas("t", 2, &[1001, 1002, 1003, 1004]),
        ];

        pm.set_replication(3);
        for p in &pm.partitions {
            assert_eq!(p.replicas.len(), 3);
        }

        // Padded slots are empty.
        assert_eq!(pm.partitions[0].replicas[2], ReplicaSlot::Empty);
        // Truncation keeps the leading replicas.
        assert_eq!(pm.partitions[2].replicas[0], ReplicaSlot::Broker(1001));

        // Zero is a no-op.
        pm.set_replication(0);
        for p in &pm.partitions {
            assert_eq!(p.replicas.len(), 3);
        }
    }

    #[test]
    fn test_check_equal_mismatch_reasons() {
        let pm = test_map();

        let mut other = pm.clone();
        other.partitions.pop();
        assert_eq!(pm.check_equal(&other), Err(EqualMismatch::PartitionsLen));

        let mut other = pm.clone();
        other.version = 2;
        assert_eq!(pm.check_equal(&other), Err(EqualMismatch::Version));

        let mut other = pm.clone();
        other.partitions[0].topic = "zzz".to_string();
        assert_eq!(pm.check_equal(&other), Err(EqualMismatch::TopicOrder));

        let mut other = pm.clone();
        other.partitions[0].partition = 99;
        assert_eq!(pm.check_equal(&other), Err(EqualMismatch::PartitionOrder));

        let mut other = pm.clone();
        other.partitions[0].replicas.pop();
        assert_eq!(pm.check_equal(&other), Err(EqualMismatch::ReplicaList));

        let mut other = pm.clone();
        other.partitions[0].replicas[0] = ReplicaSlot::Broker(9999);
        assert_eq!(pm.check_equal(&other), Err(EqualMismatch::Replica));
    }

    #[test]
    fn test_use_stats() {
        let pm = test_map();
        let stats = pm.use_stats();

        // test_topic: p0 [1001,1002], p1 [1002,1001], p2 [1003,1004],
        // p3 [1004,1003].
        assert_eq!(stats[&1001].leader, 1);
        assert_eq!(stats[&1001].follower, 1);
        assert_eq!(stats[&1002].leader, 1);
        assert_eq!(stats[&1002].follower, 1);
        assert_eq!(stats[&1003].leader, 1);
        assert_eq!(stats[&1003].follower, 1);
        assert_eq!(stats[&1004].leader, 1);
        assert_eq!(stats[&1004].follower, 1);
    }

    #[test]
    fn test_use_stats_skips_empty_slots() {
        let pm = PartitionMap {
            version: 1,
            partitions: vec![Partition::with_replicas("t", 0, &[0, 1001])],
        };

        let stats = pm.use_stats();
        assert!(!stats.contains_key(&0));
        assert_eq!(stats[&1001].follower, 1);
    }

    #[test]
    fn test_partition_meta_map_size() {
        let mut pmm = PartitionMetaMap::new();
        pmm.set("test_topic", 0, 30.0);

        let known = Partition::with_replicas("test_topic", 0, &[1001]);
        assert_eq!(pmm.size(&known).unwrap(), 30.0);

        let missing_partition = Partition::with_replicas("test_topic", 9, &[1001]);
        assert!(matches!(
            pmm.size(&missing_partition),
            Err(Error::UnknownSize { .. })
        ));

        let missing_topic = Partition::with_replicas("other", 0, &[1001]);
        assert!(matches!(
            pmm.size(&missing_topic),
            Err(Error::UnknownSize { .. })
        ));
    }

    #[test]
    fn test_sort_by_size() {
        let mut pmm = PartitionMetaMap::new();
        pmm.set("t", 0, 30.0);
        pmm.set("t", 1, 60.0);
        pmm.set("t", 2, 60.0);
        pmm.set("t", 3, 45.0);

        let mut pm = PartitionMap::new();
        pm.partitions = (0..4)
            .map(|n| Partition::with_replicas("t", n, &[1001]))
            .collect();

        pm.sort_by_size(&pmm);

        let order: Vec<u32> = pm.partitions.iter().map(|p| p.partition).collect();
        // Descending by size; the 60.0 tie breaks by partition number.
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_write_map() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out");

        let pm = test_map();
        pm.write_map(&base).unwrap();

        let target = dir.path().join("out.json");
        let contents = std::fs::read_to_string(&target).unwrap();
        assert!(contents.ends_with('\n'));

        let round = PartitionMap::from_json(contents.trim_end()).unwrap();
        assert!(pm.check_equal(&round).is_ok());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&target).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }
}
