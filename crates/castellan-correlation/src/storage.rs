//! Per-key sliding windows with retention eviction and a per-key size cap
//! (§4.9). Backed by `DashMap` so locking is per-shard/per-key, never
//! coarser, satisfying the "thread safety... no coarser than per-key"
//! requirement.

use std::collections::VecDeque;

use castellan_types::EventType;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// A single event's correlation-relevant facts, inserted into every
/// index the event participates in (by host, by (host,user), by
/// destination address). `user` is carried for attribution and rule
/// output only — no rule keys a lane by a bare user.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Originating `LogEvent::unique_id`.
    pub unique_id: String,
    /// Event timestamp, used for window membership and ordering.
    pub timestamp: DateTime<Utc>,
    /// Originating host.
    pub host: String,
    /// Originating user, if known.
    pub user: Option<String>,
    /// Deterministic or provisional classification used by the rules.
    pub event_type: EventType,
    /// Destination address extracted by enrichment, if any.
    pub destination_address: Option<String>,
}

/// A keyed sliding window: one `VecDeque` per key, each independently
/// bounded by retention age and a maximum length.
pub struct KeyedWindow {
    retention: chrono::Duration,
    cap: usize,
    lanes: DashMap<String, VecDeque<Observation>>,
}

impl KeyedWindow {
    /// Construct a window evicting entries older than `retention` and
    /// capping each key's lane at `cap` entries (oldest-first eviction).
    pub fn new(retention: chrono::Duration, cap: usize) -> Self {
        Self { retention, cap, lanes: DashMap::new() }
    }

    /// Insert `obs` under `key`, then evict stale/overflowing entries
    /// from that key's lane.
    pub fn push(&self, key: String, obs: Observation) {
        let mut lane = self.lanes.entry(key).or_default();
        let cutoff = obs.timestamp - self.retention;
        lane.push_back(obs);
        while lane.front().is_some_and(|o| o.timestamp < cutoff) {
            lane.pop_front();
        }
        while lane.len() > self.cap {
            lane.pop_front();
        }
    }

    /// Snapshot of a key's current lane, oldest first.
    pub fn get(&self, key: &str) -> Vec<Observation> {
        self.lanes.get(key).map(|lane| lane.iter().cloned().collect()).unwrap_or_default()
    }

    /// Number of distinct keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.lanes.len()
    }
}
