use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Broker, BrokerId};

/// Placement constraints derived from a replica set: the broker IDs,
/// localities, and tag bindings already present. A candidate broker must
/// avoid the IDs and localities, agree on any shared tag keys, and (when
/// `request_size` is set) have enough free storage for the partition
/// being placed.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    ids: BTreeSet<BrokerId>,
    localities: BTreeSet<String>,
    tags: BTreeMap<String, String>,
    /// The size of the partition being placed, for storage feasibility
    /// checks. Zero disables the check.
    pub request_size: f64,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a broker's attributes into the constraints. Brokers marked
    /// for replacement contribute nothing: they are leaving the replica
    /// set and shouldn't restrict their own successor.
    pub fn merge_broker(&mut self, b: &Broker) {
        if b.replace {
            return;
        }

        self.ids.insert(b.id);

        if !b.locality.is_empty() {
            self.localities.insert(b.locality.clone());
        }

        for (k, v) in &b.tags {
            self.tags.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// Whether a candidate broker is admissible.
    pub fn passes(&self, b: &Broker) -> bool {
        if self.ids.contains(&b.id) {
            return false;
        }

        if !b.locality.is_empty() && self.localities.contains(&b.locality) {
            return false;
        }

        for (k, want) in &self.tags {
            if let Some(v) = b.tags.get(k) {
                if v != want {
                    return false;
                }
            }
        }

        if self.request_size > 0.0 && self.request_size > b.storage_free {
            return false;
        }

        true
    }
}

/// Folds a replica set's brokers into a single Constraints value.
pub fn merge_constraints<'a>(brokers: impl IntoIterator<Item = &'a Broker>) -> Constraints {
    let mut c = Constraints::new();
    for b in brokers {
        c.merge_broker(b);
    }

    c
}
