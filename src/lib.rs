// Kafka Partition Placement Library
// Deterministic replica placement and storage rebalancing for Kafka topic maps

pub mod constraints;
pub mod metadata;
pub mod models;
pub mod rebalance;
pub mod rebuild;
pub mod tags;

#[cfg(test)]
pub(crate) mod testutil;

pub use constraints::{merge_constraints, Constraints};
pub use metadata::{
    check_meta_age, ensure_broker_metrics, remove_topics, strip_pending_deletes, BrokerMeta,
    BrokerMetaMap, MetadataError, MetadataHandler,
};
pub use models::{
    broker_ids_from_str, Broker, BrokerId, BrokerList, BrokerMap, BrokerStatus, BrokerUseStats,
    EqualMismatch, Mappings, Partition, PartitionId, PartitionMap, PartitionMeta,
    PartitionMetaMap, ReplicaSlot, TopicName,
};
pub use rebalance::{
    apply_relocation_plan, optimize_leaders, RebalanceParams, Rebalancer, Relocation,
    RelocationPlan,
};
pub use rebuild::PlacementStrategy;
pub use tags::{parse_tag_filters, TagError, TagFilter, TagKey};

use std::time::Duration;

/// A fatal planning error. These abort the call before any partially
/// computed result is returned; recoverable per-partition conditions are
/// reported as [`SoftError`]s instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid rebuild strategy '{0}'")]
    InvalidStrategy(String),

    #[error("{topic} p{partition} not found in partition metadata")]
    UnknownSize {
        topic: TopicName,
        partition: PartitionId,
    },

    #[error("metrics metadata is older than allowed: {age:?} > {limit:?}")]
    MetadataStale { age: Duration, limit: Duration },

    #[error("metrics not found for broker {0}")]
    MetricsIncomplete(BrokerId),

    #[error("no topics found matching the provided patterns")]
    NoMatchingTopics,

    #[error("error parsing topic map: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid topic pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The class of a recoverable per-partition planning condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SoftErrorKind {
    #[error("no suitable broker found")]
    NoSuitableBroker,
    #[error("not found in partition metadata")]
    UnknownSize,
    #[error("configured to zero replicas")]
    ZeroReplicas,
}

/// A recoverable planning condition tied to a specific partition.
/// Planning continues past these; callers surface the collected list
/// alongside the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftError {
    pub kind: SoftErrorKind,
    pub topic: TopicName,
    pub partition: PartitionId,
}

impl SoftError {
    pub fn new(kind: SoftErrorKind, p: &Partition) -> Self {
        Self {
            kind,
            topic: p.topic.clone(),
            partition: p.partition,
        }
    }
}

impl std::fmt::Display for SoftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} p{}: {}", self.topic, self.partition, self.kind)
    }
}
