//! Vector clocks for per-device causality tracking

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Causal relation of one clock to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// The left clock happened before the right one
    Before,
    /// The left clock happened after the right one
    After,
    /// Neither dominates (includes identical clocks)
    Concurrent,
}

/// Mapping from device identifier to a monotonically increasing counter.
///
/// Absent entries read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    /// Create an empty clock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a device (zero when absent)
    pub fn get(&self, device_id: &str) -> u64 {
        self.0.get(device_id).copied().unwrap_or(0)
    }

    /// Return a copy with `device_id`'s counter bumped by one.
    #[must_use]
    pub fn increment(&self, device_id: &str) -> Self {
        let mut next = self.clone();
        let counter = next.0.entry(device_id.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        next
    }

    /// Causal ordering of `self` relative to `other`.
    pub fn compare(&self, other: &Self) -> ClockOrdering {
        let mut self_behind = false;
        let mut other_behind = false;

        for key in self.0.keys().chain(other.0.keys()) {
            let mine = self.get(key);
            let theirs = other.get(key);
            if mine < theirs {
                self_behind = true;
            }
            if theirs < mine {
                other_behind = true;
            }
        }

        match (self_behind, other_behind) {
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            _ => ClockOrdering::Concurrent,
        }
    }

    /// Whether every counter of `self` and `other` agrees.
    pub fn is_identical(&self, other: &Self) -> bool {
        self.0
            .keys()
            .chain(other.0.keys())
            .all(|key| self.get(key) == other.get(key))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|counter| *counter == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(device, counter)| (device.as_str(), *counter))
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
