//! Buffered vector-store upserts (§4.12 step 4, §9).
//!
//! Grounded on §9's "batch-flush timer shared with size-triggered flush"
//! redesign note: a single mutex guards the buffer; whichever caller
//! (a size-triggered `push` or the periodic `tick`) observes the flush
//! condition drains the buffer under the lock and performs the actual
//! `batch_upsert` after releasing it, so the lock is never held across
//! I/O. On flush failure the drained items are put back (§7:
//! `BatchFlushError` is "retried on next flush; buffer preserved").

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use castellan_types::LogEvent;
use castellan_vector_store::{VectorStore, VectorStoreError};
use ndarray::Array1;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct Inner {
    items: Vec<(LogEvent, Array1<f32>)>,
    oldest_arrival: Option<Instant>,
}

/// Buffers vector upserts; flushes on size or idle-timer triggers.
pub struct VectorBatcher {
    store: Arc<dyn VectorStore>,
    inner: Mutex<Inner>,
    batch_size: usize,
    flush_timeout: Duration,
    flushes: AtomicU64,
}

impl VectorBatcher {
    /// Construct a batcher flushing into `store` once `batch_size` items
    /// accumulate, or once the oldest unflushed item has waited
    /// `flush_timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, batch_size: usize, flush_timeout: Duration) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner { items: Vec::new(), oldest_arrival: None }),
            batch_size: batch_size.max(1),
            flush_timeout,
            flushes: AtomicU64::new(0),
        }
    }

    /// Queue one record; flushes immediately if this push reaches
    /// `batch_size` (§8: "exactly `vector_batch_size` arrivals triggers
    /// immediate flush").
    pub async fn push(&self, event: LogEvent, vector: Array1<f32>) -> Result<(), VectorStoreError> {
        let drained = {
            let mut inner = self.inner.lock().await;
            if inner.items.is_empty() {
                inner.oldest_arrival = Some(Instant::now());
            }
            inner.items.push((event, vector));
            if inner.items.len() >= self.batch_size {
                inner.oldest_arrival = None;
                Some(std::mem::take(&mut inner.items))
            } else {
                None
            }
        };
        match drained {
            Some(items) => self.flush_items(items).await,
            None => Ok(()),
        }
    }

    /// Flush the buffer if its oldest unflushed arrival has aged past the
    /// flush timeout. Called periodically by the pipeline's timer loop.
    pub async fn tick(&self) -> Result<(), VectorStoreError> {
        let drained = {
            let mut inner = self.inner.lock().await;
            let due = inner.oldest_arrival.is_some_and(|t| t.elapsed() >= self.flush_timeout);
            if due {
                inner.oldest_arrival = None;
                Some(std::mem::take(&mut inner.items))
            } else {
                None
            }
        };
        match drained {
            Some(items) if !items.is_empty() => self.flush_items(items).await,
            _ => Ok(()),
        }
    }

    /// Force-flush whatever is buffered, regardless of size or timer
    /// state. Used during shutdown (§5).
    pub async fn flush_now(&self) -> Result<(), VectorStoreError> {
        let items = {
            let mut inner = self.inner.lock().await;
            inner.oldest_arrival = None;
            std::mem::take(&mut inner.items)
        };
        if items.is_empty() {
            Ok(())
        } else {
            self.flush_items(items).await
        }
    }

    async fn flush_items(&self, items: Vec<(LogEvent, Array1<f32>)>) -> Result<(), VectorStoreError> {
        let count = items.len();
        let restore = items.clone();
        match self.store.batch_upsert(items).await {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                debug!(count, "flushed vector batch");
                Ok(())
            }
            Err(err) => {
                warn!(%err, count, "batch flush failed, buffer preserved for retry");
                let mut inner = self.inner.lock().await;
                if inner.oldest_arrival.is_none() {
                    inner.oldest_arrival = Some(Instant::now());
                }
                let mut restored = restore;
                restored.extend(std::mem::take(&mut inner.items));
                inner.items = restored;
                Err(err)
            }
        }
    }

    /// Number of successful batch flushes performed so far.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Number of items currently buffered, unflushed.
    #[must_use]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_vector_store::InMemoryVectorStore;
    use chrono::Utc;

    fn event(id: &str) -> LogEvent {
        LogEvent::new(Utc::now(), "WS-01", "Security", 4624, "Information", None, "m", "<Event/>", id).unwrap()
    }

    fn vector() -> Array1<f32> {
        Array1::from(vec![0.0f32; castellan_embedder::EMBEDDING_DIM])
    }

    #[tokio::test]
    async fn size_trigger_flushes_immediately() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let batcher = VectorBatcher::new(Arc::clone(&store), 2, Duration::from_secs(60));
        batcher.push(event("e1"), vector()).await.unwrap();
        assert_eq!(batcher.len().await, 1);
        batcher.push(event("e2"), vector()).await.unwrap();
        assert_eq!(batcher.len().await, 0);
        assert_eq!(batcher.flush_count(), 1);
    }

    #[tokio::test]
    async fn tick_flushes_once_idle_past_timeout() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let batcher = VectorBatcher::new(Arc::clone(&store), 16, Duration::from_millis(10));
        batcher.push(event("e1"), vector()).await.unwrap();
        assert_eq!(batcher.len().await, 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        batcher.tick().await.unwrap();
        assert_eq!(batcher.len().await, 0);
        assert_eq!(batcher.flush_count(), 1);
    }

    #[tokio::test]
    async fn flush_now_drains_remaining_entries() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let batcher = VectorBatcher::new(Arc::clone(&store), 16, Duration::from_secs(60));
        batcher.push(event("e1"), vector()).await.unwrap();
        batcher.flush_now().await.unwrap();
        assert_eq!(batcher.len().await, 0);
    }
}
