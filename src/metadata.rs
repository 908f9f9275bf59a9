use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use tracing::info;

use crate::models::{BrokerId, BrokerMap, PartitionMap, PartitionMetaMap, TopicName};
use crate::Error;

/// Broker attributes discovered from the metadata store: rack, tags, and
/// the storage metrics merged in by the metrics pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerMeta {
    pub rack: String,
    pub tags: BTreeMap<String, String>,
    pub storage_free: f64,
    /// Set when storage metrics for the broker weren't available or were
    /// only partially collected.
    pub metrics_incomplete: bool,
}

pub type BrokerMetaMap = BTreeMap<BrokerId, BrokerMeta>;

/// An error raised by a metadata store implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("metadata store: {0}")]
pub struct MetadataError(pub String);

/// The metadata store operations the planners consume. Implementations
/// wrap whatever backs cluster state (a ZooKeeper-like service, a mock);
/// the core never talks to the store directly.
pub trait MetadataHandler {
    /// Topic names matching any of the provided patterns.
    fn get_topics(&self, patterns: &[Regex]) -> Result<Vec<TopicName>, MetadataError>;

    fn get_partition_map(&self, topic: &str) -> Result<PartitionMap, MetadataError>;

    /// All registered brokers. Metadata for individual brokers can fail
    /// without failing the snapshot; those are returned as soft errors.
    fn get_all_broker_meta(
        &self,
        with_metrics: bool,
    ) -> Result<(BrokerMetaMap, Vec<MetadataError>), MetadataError>;

    fn get_all_partition_meta(&self) -> Result<PartitionMetaMap, MetadataError>;

    /// Staleness of the most recent metrics snapshot.
    fn max_meta_age(&self) -> Result<Duration, MetadataError>;

    /// Topics awaiting deletion.
    fn get_pending_deletion(&self) -> Result<Vec<TopicName>, MetadataError>;
}

impl PartitionMap {
    /// Merges the partition maps of every topic matching any of the
    /// provided patterns into one canonically sorted map.
    pub fn from_metadata(
        handler: &dyn MetadataHandler,
        patterns: &[Regex],
    ) -> Result<Self, Error> {
        let topics = handler.get_topics(patterns)?;
        if topics.is_empty() {
            return Err(Error::NoMatchingTopics);
        }

        let mut merged = PartitionMap::new();
        for topic in &topics {
            let pm = handler.get_partition_map(topic)?;
            merged.partitions.extend(pm.partitions);
        }

        merged.sort_canonical();

        Ok(merged)
    }
}

/// Fails when the stored metrics snapshot is older than tolerated.
pub fn check_meta_age(handler: &dyn MetadataHandler, limit: Duration) -> Result<(), Error> {
    let age = handler.max_meta_age()?;
    if age > limit {
        return Err(Error::MetadataStale { age, limit });
    }

    Ok(())
}

/// Every non-missing broker in the map must have complete metrics in the
/// discovered metadata.
pub fn ensure_broker_metrics(brokers: &BrokerMap, meta: &BrokerMetaMap) -> Result<(), Error> {
    for (id, b) in brokers.iter() {
        // Missing brokers won't be found in the metadata at all.
        if b.missing {
            continue;
        }

        match meta.get(id) {
            Some(m) if !m.metrics_incomplete => {}
            _ => return Err(Error::MetricsIncomplete(*id)),
        }
    }

    Ok(())
}

/// Removes topics matching any pattern from the map, returning the names
/// that were dropped.
pub fn remove_topics(pm: &mut PartitionMap, patterns: &[Regex]) -> Vec<TopicName> {
    if patterns.is_empty() {
        return Vec::new();
    }

    let mut removed: Vec<TopicName> = Vec::new();

    pm.partitions.retain(|p| {
        if patterns.iter().any(|re| re.is_match(&p.topic)) {
            if !removed.contains(&p.topic) {
                removed.push(p.topic.clone());
            }
            false
        } else {
            true
        }
    });

    removed
}

/// Strips topics in a pending-delete state out of the map so they aren't
/// planned over, returning the names removed.
pub fn strip_pending_deletes(
    pm: &mut PartitionMap,
    handler: &dyn MetadataHandler,
) -> Result<Vec<TopicName>, Error> {
    let pending = handler.get_pending_deletion()?;
    if pending.is_empty() {
        return Ok(Vec::new());
    }

    let mut patterns = Vec::with_capacity(pending.len());
    for topic in &pending {
        patterns.push(Regex::new(&format!("^{}$", regex::escape(topic)))?);
    }

    let removed = remove_topics(pm, &patterns);
    if !removed.is_empty() {
        info!(topics = ?removed, "excluded topics pending deletion");
    }

    Ok(removed)
}
