#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-vector-store** – in-memory vector index for Castellan (C4).
//!
//! Grounded on the reference workspace's `MemoryBackend` (an
//! `Arc<RwLock<HashMap>>`-backed event store with a broadcast live feed):
//! the same shape is reused here, with the map keyed by `unique_id` and the
//! broadcast channel notifying subscribers of each committed upsert instead
//! of a generic event header.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use castellan_types::LogEvent;
use chrono::{DateTime, Duration, Utc};
use ndarray::Array1;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Retention window for vector records (§3, §4.3): records older than this
/// are eligible for removal by [`VectorStore::delete_older_than_24h`].
pub const RETENTION_WINDOW: Duration = Duration::hours(24);

/// Default buffer size for the live-upsert broadcast channel.
const DEFAULT_BUFFER: usize = 1024;

/// Errors surfaced by a [`VectorStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    /// The backend could not be reached, or failed transiently. Per
    /// §4.3/§4.14 callers decide whether to skip or retry.
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    /// A vector did not match the collection's configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured for the collection.
        expected: usize,
        /// Dimension of the vector that was rejected.
        actual: usize,
    },
}

/// A single nearest-neighbor search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched log event.
    pub event: LogEvent,
    /// Cosine-similarity-derived score, monotone in similarity (§4.3).
    pub score: f32,
}

/// Operations required of the Castellan vector index (§4.3).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotently ensure the collection exists with schema `(dimension,
    /// cosine distance)`.
    async fn ensure_collection(&self) -> Result<(), VectorStoreError>;

    /// Upsert a single record; duplicates by `unique_id` overwrite
    /// (at-least-once semantics, §4.3).
    async fn upsert(&self, event: LogEvent, vector: Array1<f32>) -> Result<(), VectorStoreError>;

    /// Upsert a batch of records atomically with respect to visibility:
    /// after this call returns, every record in `items` is visible to
    /// subsequent searches (§4.3 eventual-visibility guarantee).
    async fn batch_upsert(&self, items: Vec<(LogEvent, Array1<f32>)>) -> Result<(), VectorStoreError>;

    /// Return up to `k` nearest neighbors of `vector` by cosine similarity,
    /// ordered by descending similarity with ties broken by ascending
    /// `unique_id` (§4.3).
    async fn search(&self, vector: &Array1<f32>, k: usize) -> Result<Vec<SearchHit>, VectorStoreError>;

    /// True iff the oldest stored record is at least 24h old, i.e. the
    /// store has full rolling coverage (§4.3).
    async fn has_24h_coverage(&self) -> Result<bool, VectorStoreError>;

    /// Remove all records whose timestamp is older than `now - 24h`. Safe
    /// to run concurrently with upserts (§4.3).
    async fn delete_older_than_24h(&self) -> Result<usize, VectorStoreError>;
}

#[derive(Clone)]
struct Record {
    event: LogEvent,
    vector: Array1<f32>,
}

/// In-memory, non-persistent vector store. All data is lost when the
/// process terminates; suitable as the reference implementation and for
/// tests, mirroring the reference workspace's memory storage backend.
#[derive(Clone)]
pub struct InMemoryVectorStore {
    dimension: usize,
    records: Arc<RwLock<HashMap<String, Record>>>,
    broadcast_tx: broadcast::Sender<String>,
}

impl InMemoryVectorStore {
    /// Construct a store fixed to embedding `dimension`.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(DEFAULT_BUFFER);
        Self {
            dimension,
            records: Arc::new(RwLock::new(HashMap::new())),
            broadcast_tx,
        }
    }

    /// Subscribe to committed-upsert notifications (carrying the
    /// `unique_id` that was written).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }

    /// Current number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True if the store currently holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn cosine_similarity(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }

    async fn insert_one(&self, event: LogEvent, vector: Array1<f32>) -> Result<(), VectorStoreError> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let unique_id = event.unique_id.clone();
        self.records
            .write()
            .await
            .insert(unique_id.clone(), Record { event, vector });
        let _ = self.broadcast_tx.send(unique_id);
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        // Idempotent by construction: the map already exists once the
        // store is built, so there is nothing further to provision.
        Ok(())
    }

    async fn upsert(&self, event: LogEvent, vector: Array1<f32>) -> Result<(), VectorStoreError> {
        self.insert_one(event, vector).await
    }

    async fn batch_upsert(&self, items: Vec<(LogEvent, Array1<f32>)>) -> Result<(), VectorStoreError> {
        for (event, vector) in items {
            self.insert_one(event, vector).await?;
        }
        Ok(())
    }

    async fn search(&self, vector: &Array1<f32>, k: usize) -> Result<Vec<SearchHit>, VectorStoreError> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let records = self.records.read().await;
        let mut scored: Vec<SearchHit> = records
            .values()
            .map(|r| SearchHit {
                event: r.event.clone(),
                score: Self::cosine_similarity(vector, &r.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.event.unique_id.cmp(&b.event.unique_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn has_24h_coverage(&self) -> Result<bool, VectorStoreError> {
        let records = self.records.read().await;
        let oldest = records.values().map(|r| r.event.timestamp).min();
        let now = Utc::now();
        Ok(match oldest {
            Some(ts) => now - ts >= RETENTION_WINDOW,
            None => false,
        })
    }

    async fn delete_older_than_24h(&self) -> Result<usize, VectorStoreError> {
        let cutoff: DateTime<Utc> = Utc::now() - RETENTION_WINDOW;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.event.timestamp >= cutoff);
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "retention sweep removed vector records older than 24h");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// Probe warning helper used by the orchestrator when backfill is skipped
/// because no historical collector is configured, kept here since it is a
/// vector-store-specific diagnostic rather than pipeline logic.
pub fn warn_no_backfill_source(has_coverage: bool) {
    if !has_coverage {
        warn!("vector store lacks 24h coverage and no historical collector is configured");
    }
}
