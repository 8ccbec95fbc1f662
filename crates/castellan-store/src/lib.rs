#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-store** – append-only security-event store (C10).
//!
//! Grounded on the reference workspace's `MemoryBackend` for its
//! `Arc<RwLock<...>>` concurrency shape, but indexed differently: an
//! append-only log plus a `BTreeMap<timestamp, id>` for efficient
//! time-range scans, since this component's defining read path is
//! "by time range with optional filter", not similarity search (§4.10).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use castellan_types::{EventType, RiskLevel, SecurityEvent};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Errors the store surfaces. Persistence is in-memory and infallible in
/// this implementation; the type exists so the trait remains meaningful
/// for a future durable backend (§4.10: "persistence medium is out of
/// scope").
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store is temporarily unavailable.
    #[error("security event store unavailable: {0}")]
    Unavailable(String),
}

/// An inclusive `[start, end]` timestamp range for queries.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    /// Range start, inclusive.
    pub start: DateTime<Utc>,
    /// Range end, inclusive.
    pub end: DateTime<Utc>,
}

/// Optional narrowing filters applied after the time-range scan.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Restrict to this classification, if set.
    pub event_type: Option<EventType>,
    /// Restrict to this risk level, if set.
    pub risk_level: Option<RiskLevel>,
}

/// Offset/limit pagination over a filtered, time-ordered result set.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Number of matching events to skip.
    pub offset: usize,
    /// Maximum number of events to return.
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 100 }
    }
}

/// One page of query results, plus whether more results exist beyond it.
#[derive(Debug, Clone)]
pub struct Page {
    /// Matching events, ascending by timestamp.
    pub events: Vec<SecurityEvent>,
    /// Whether additional matching events exist beyond this page.
    pub has_more: bool,
}

/// Append-only security-event store (§4.10).
#[async_trait]
pub trait SecurityEventStore: Send + Sync {
    /// Append `event`. Returns `true` if it was newly inserted, `false`
    /// if an event with the same id already existed (first writer wins).
    async fn append(&self, event: SecurityEvent) -> Result<bool, StoreError>;

    /// Look up a single event by id.
    async fn get(&self, id: &str) -> Result<Option<SecurityEvent>, StoreError>;

    /// Read events within `range`, optionally filtered, paginated.
    async fn query(&self, range: TimeRange, filter: Filter, pagination: Pagination) -> Result<Page, StoreError>;

    /// Total number of distinct events stored.
    async fn len(&self) -> usize;

    /// Whether the store is empty.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

struct Inner {
    log: Vec<SecurityEvent>,
    by_id: HashMap<String, usize>,
    by_time: BTreeMap<DateTime<Utc>, Vec<String>>,
}

impl Inner {
    fn new() -> Self {
        Self { log: Vec::new(), by_id: HashMap::new(), by_time: BTreeMap::new() }
    }
}

/// In-memory implementation of [`SecurityEventStore`] (§4.10).
pub struct InMemorySecurityEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemorySecurityEventStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::new())) }
    }
}

impl Default for InMemorySecurityEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecurityEventStore for InMemorySecurityEventStore {
    async fn append(&self, event: SecurityEvent) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&event.id) {
            return Ok(false);
        }

        let timestamp = event.source.timestamp;
        let id = event.id.clone();
        let index = inner.log.len();
        inner.log.push(event);
        inner.by_id.insert(id.clone(), index);
        inner.by_time.entry(timestamp).or_default().push(id);
        Ok(true)
    }

    async fn get(&self, id: &str) -> Result<Option<SecurityEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.by_id.get(id).map(|&idx| inner.log[idx].clone()))
    }

    async fn query(&self, range: TimeRange, filter: Filter, pagination: Pagination) -> Result<Page, StoreError> {
        let inner = self.inner.read().await;

        let matched: Vec<SecurityEvent> = inner
            .by_time
            .range(range.start..=range.end)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| inner.by_id.get(id).map(|&idx| &inner.log[idx]))
            .filter(|event| filter.event_type.map_or(true, |t| event.event_type == t))
            .filter(|event| filter.risk_level.map_or(true, |r| event.risk_level == r))
            .cloned()
            .collect();

        let total = matched.len();
        let end = (pagination.offset + pagination.limit).min(total);
        let page = if pagination.offset >= total { Vec::new() } else { matched[pagination.offset..end].to_vec() };
        let has_more = end < total;

        Ok(Page { events: page, has_more })
    }

    async fn len(&self) -> usize {
        self.inner.read().await.log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::LogEvent;

    fn event(id: &str, ts_secs: i64, event_type: EventType, risk_level: RiskLevel) -> SecurityEvent {
        let source = LogEvent::new(
            DateTime::<Utc>::from_timestamp(ts_secs, 0).unwrap(),
            "DC-01",
            "Security",
            4624,
            "Information",
            None,
            "message",
            "<Event/>",
            id,
        )
        .unwrap();
        SecurityEvent {
            id: id.to_string(),
            source,
            event_type,
            risk_level,
            confidence: 50,
            summary: "s".to_string(),
            mitre_techniques: vec![],
            recommended_actions: vec![],
            enrichment: None,
            correlation_score: 0.0,
            burst_score: 0.0,
            anomaly_score: 0.0,
            is_deterministic: true,
            is_correlation_based: false,
            is_enhanced: false,
        }
    }

    fn full_range() -> TimeRange {
        TimeRange { start: DateTime::<Utc>::from_timestamp(0, 0).unwrap(), end: DateTime::<Utc>::from_timestamp(i64::MAX / 2, 0).unwrap() }
    }

    #[tokio::test]
    async fn append_then_get_round_trips() {
        let store = InMemorySecurityEventStore::new();
        store.append(event("e1", 0, EventType::Other, RiskLevel::Low)).await.unwrap();
        let fetched = store.get("e1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "e1");
    }

    #[tokio::test]
    async fn duplicate_append_is_discarded() {
        let store = InMemorySecurityEventStore::new();
        assert!(store.append(event("e1", 0, EventType::Other, RiskLevel::Low)).await.unwrap());
        assert!(!store.append(event("e1", 10, EventType::PrivilegeEscalation, RiskLevel::High)).await.unwrap());
        let fetched = store.get("e1").await.unwrap().unwrap();
        assert_eq!(fetched.event_type, EventType::Other); // first writer wins
    }

    #[tokio::test]
    async fn query_filters_by_event_type_and_risk_level() {
        let store = InMemorySecurityEventStore::new();
        store.append(event("e1", 0, EventType::AuthenticationFailure, RiskLevel::Low)).await.unwrap();
        store.append(event("e2", 10, EventType::PrivilegeEscalation, RiskLevel::High)).await.unwrap();

        let page = store
            .query(full_range(), Filter { event_type: Some(EventType::PrivilegeEscalation), risk_level: None }, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].id, "e2");
    }

    #[tokio::test]
    async fn query_respects_time_range() {
        let store = InMemorySecurityEventStore::new();
        store.append(event("e1", 0, EventType::Other, RiskLevel::Low)).await.unwrap();
        store.append(event("e2", 1_000_000, EventType::Other, RiskLevel::Low)).await.unwrap();

        let range = TimeRange { start: DateTime::<Utc>::from_timestamp(0, 0).unwrap(), end: DateTime::<Utc>::from_timestamp(100, 0).unwrap() };
        let page = store.query(range, Filter::default(), Pagination::default()).await.unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].id, "e1");
    }

    #[tokio::test]
    async fn query_paginates_with_has_more() {
        let store = InMemorySecurityEventStore::new();
        for i in 0..5 {
            store.append(event(&format!("e{i}"), i, EventType::Other, RiskLevel::Low)).await.unwrap();
        }
        let page = store.query(full_range(), Filter::default(), Pagination { offset: 0, limit: 2 }).await.unwrap();
        assert_eq!(page.events.len(), 2);
        assert!(page.has_more);

        let page2 = store.query(full_range(), Filter::default(), Pagination { offset: 4, limit: 2 }).await.unwrap();
        assert_eq!(page2.events.len(), 1);
        assert!(!page2.has_more);
    }

    #[tokio::test]
    async fn len_and_is_empty_reflect_distinct_ids() {
        let store = InMemorySecurityEventStore::new();
        assert!(store.is_empty().await);
        store.append(event("e1", 0, EventType::Other, RiskLevel::Low)).await.unwrap();
        store.append(event("e1", 0, EventType::Other, RiskLevel::Low)).await.unwrap();
        assert_eq!(store.len().await, 1);
    }
}
