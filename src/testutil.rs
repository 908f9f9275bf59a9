//! Shared test fixtures: mock broker maps mirroring a small two-rack
//! cluster, and a canned in-memory metadata handler.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;

use crate::metadata::{BrokerMeta, BrokerMetaMap, MetadataError, MetadataHandler};
use crate::models::{Broker, BrokerId, BrokerMap, PartitionMap, PartitionMetaMap, TopicName};

pub fn broker(id: BrokerId, locality: &str, used: u32, storage_free: f64) -> Broker {
    Broker {
        id,
        locality: locality.to_string(),
        used,
        storage_free,
        ..Default::default()
    }
}

pub fn test_map_json(topic: &str) -> String {
    format!(
        r#"{{"version":1,"partitions":[
            {{"topic":"{t}","partition":0,"replicas":[1001,1002]}},
            {{"topic":"{t}","partition":1,"replicas":[1002,1001]}},
            {{"topic":"{t}","partition":2,"replicas":[1003,1004]}},
            {{"topic":"{t}","partition":3,"replicas":[1004,1003]}}]}}"#,
        t = topic
    )
}

pub fn mock_broker_map() -> BrokerMap {
    let mut bm = BrokerMap::new();
    bm.insert(broker(1001, "a", 3, 100.0));
    bm.insert(broker(1002, "b", 3, 200.0));
    bm.insert(broker(1003, "c", 2, 300.0));
    bm.insert(broker(1004, "a", 2, 400.0));
    bm
}

pub fn mock_broker_map2() -> BrokerMap {
    let mut bm = BrokerMap::new();
    bm.insert(broker(1001, "a", 2, 100.0));
    bm.insert(broker(1002, "b", 2, 200.0));
    bm.insert(broker(1003, "c", 3, 300.0));
    bm.insert(broker(1004, "a", 2, 400.0));
    bm.insert(broker(1005, "b", 2, 400.0));
    bm.insert(broker(1006, "c", 3, 400.0));
    bm.insert(broker(1007, "a", 3, 400.0));
    bm
}

pub fn mock_broker_meta() -> BrokerMetaMap {
    let mut meta = BrokerMetaMap::new();
    for (id, rack, storage_free) in [
        (1001, "a", 100.0),
        (1002, "b", 200.0),
        (1003, "c", 300.0),
        (1004, "a", 400.0),
        (1005, "b", 500.0),
    ] {
        meta.insert(
            id,
            BrokerMeta {
                rack: rack.to_string(),
                storage_free,
                ..Default::default()
            },
        );
    }

    meta
}

/// A canned metadata store serving two topics of four partitions each.
pub struct MockHandler {
    pub topics: Vec<TopicName>,
    pub maps: BTreeMap<TopicName, PartitionMap>,
    pub broker_meta: BrokerMetaMap,
    pub partition_meta: PartitionMetaMap,
    pub meta_age: Duration,
    pub pending_deletion: Vec<TopicName>,
}

impl MockHandler {
    pub fn new() -> Self {
        let topics = vec!["test_topic".to_string(), "other_topic".to_string()];

        let mut maps = BTreeMap::new();
        let mut partition_meta = PartitionMetaMap::new();
        for t in &topics {
            maps.insert(t.clone(), PartitionMap::from_json(&test_map_json(t)).unwrap());
            partition_meta.set(t.clone(), 0, 30.0);
            partition_meta.set(t.clone(), 1, 35.0);
            partition_meta.set(t.clone(), 2, 60.0);
            partition_meta.set(t.clone(), 3, 45.0);
        }

        Self {
            topics,
            maps,
            broker_meta: mock_broker_meta(),
            partition_meta,
            meta_age: Duration::from_secs(60),
            pending_deletion: Vec::new(),
        }
    }
}

impl MetadataHandler for MockHandler {
    fn get_topics(&self, patterns: &[Regex]) -> Result<Vec<TopicName>, MetadataError> {
        Ok(self
            .topics
            .iter()
            .filter(|t| patterns.iter().any(|re| re.is_match(t)))
            .cloned()
            .collect())
    }

    fn get_partition_map(&self, topic: &str) -> Result<PartitionMap, MetadataError> {
        self.maps
            .get(topic)
            .cloned()
            .ok_or_else(|| MetadataError(format!("topic {} not found", topic)))
    }

    fn get_all_broker_meta(
        &self,
        _with_metrics: bool,
    ) -> Result<(BrokerMetaMap, Vec<MetadataError>), MetadataError> {
        Ok((self.broker_meta.clone(), Vec::new()))
    }

    fn get_all_partition_meta(&self) -> Result<PartitionMetaMap, MetadataError> {
        Ok(self.partition_meta.clone())
    }

    fn max_meta_age(&self) -> Result<Duration, MetadataError> {
        Ok(self.meta_age)
    }

    fn get_pending_deletion(&self) -> Result<Vec<TopicName>, MetadataError> {
        Ok(self.pending_deletion.clone())
    }
}
