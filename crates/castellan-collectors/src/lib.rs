#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-collectors** – Lazy event-stream producers for the Castellan
//! detection core (C2).
//!
//! A [`Collector`] exposes [`Collector::collect`], returning a boxed,
//! possibly-infinite stream of [`LogEvent`]s. Two reference shapes are
//! provided: [`LiveCollector`] (unbounded, driven by an external feed) and
//! [`HistoricalCollector`] (finite, timestamp-ascending, used for backfill).

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use castellan_types::LogEvent;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// A stream of [`LogEvent`]s, boxed for trait-object use.
pub type EventStream = Pin<Box<dyn Stream<Item = LogEvent> + Send>>;

/// Maximum time a collector is allowed to take to honor a cancellation
/// request (§4.1: "propagate cancellation within a bounded time (≤1s
/// target)").
pub const CANCELLATION_TARGET: Duration = Duration::from_secs(1);

/// Errors a collector surfaces while driving its stream. Per §4.14, the
/// orchestrator's policy for these is "log, skip record, continue" rather
/// than aborting the whole stream.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// The underlying source could not produce a record.
    #[error("collector source error: {0}")]
    Source(String),
}

/// A source of [`LogEvent`]s. Implementations MUST be restartable: calling
/// `collect()` again after a prior stream ended (or was cancelled) produces
/// a fresh, independent stream.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Human-readable source name, used in logs and metrics.
    fn name(&self) -> &str;

    /// Produce a lazy, ordered stream of events. Live collectors never
    /// complete on their own; historical collectors complete once all past
    /// records have been emitted in ascending timestamp order.
    async fn collect(&self) -> EventStream;
}

/// A handle used to request cooperative cancellation of a running
/// collector stream. Dropping all clones also signals cancellation.
#[derive(Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Create a fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new().0
    }
}

/// Unbounded collector fed by an external producer (e.g. a Windows event
/// subscription) pushing into an internal channel. Suspends awaiting new
/// records; restartable because each `collect()` call drains whatever is
/// currently queued on a fresh receiver built from the live feed handle.
pub struct LiveCollector {
    name: String,
    feed: Arc<std::sync::Mutex<Option<mpsc::Receiver<LogEvent>>>>,
    cancel_rx: watch::Receiver<bool>,
}

impl LiveCollector {
    /// Build a live collector that observes an existing cancellation
    /// signal, so multiple collectors can be torn down together.
    #[must_use]
    pub fn with_cancellation(
        name: impl Into<String>,
        buffer: usize,
        cancel_rx: watch::Receiver<bool>,
    ) -> (Self, mpsc::Sender<LogEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                name: name.into(),
                feed: Arc::new(std::sync::Mutex::new(Some(rx))),
                cancel_rx,
            },
            tx,
        )
    }
}

#[async_trait]
impl Collector for LiveCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> EventStream {
        let rx = self
            .feed
            .lock()
            .expect("collector feed mutex poisoned")
            .take();
        let Some(mut rx) = rx else {
            debug!(collector = %self.name, "collect() called with no live feed remaining; returning empty stream");
            return Box::pin(stream::empty());
        };

        let mut cancel_rx = self.cancel_rx.clone();
        let name = self.name.clone();
        let s = async_stream::stream! {
            loop {
                tokio::select! {
                    biased;
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            debug!(collector = %name, "cancellation observed, stopping live stream");
                            break;
                        }
                    }
                    item = rx.recv() => {
                        match item {
                            Some(event) => yield event,
                            None => break,
                        }
                    }
                }
            }
        };
        Box::pin(s)
    }
}

/// Finite collector over an already-materialized, ascending-by-timestamp
/// set of historical records. Used for startup backfill (§4.12).
pub struct HistoricalCollector {
    name: String,
    events: Arc<Vec<LogEvent>>,
}

impl HistoricalCollector {
    /// Construct a historical collector over `events`, which MUST already
    /// be sorted ascending by `timestamp` (§4.1).
    #[must_use]
    pub fn new(name: impl Into<String>, mut events: Vec<LogEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self {
            name: name.into(),
            events: Arc::new(events),
        }
    }

    /// Number of records this collector will emit.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if this collector has no records to emit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl Collector for HistoricalCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> EventStream {
        let events = Arc::clone(&self.events);
        Box::pin(stream::iter((0..events.len()).map(move |i| events[i].clone())))
    }
}

/// Merge multiple collector streams into a single ordered-by-arrival
/// stream via a bounded channel (§4.11). When the channel is full,
/// feeding tasks block, providing back-pressure.
pub async fn merge_streams(collectors: &[Arc<dyn Collector>], buffer: usize) -> EventStream {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    for collector in collectors {
        let collector = Arc::clone(collector);
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut stream = collector.collect().await;
            while let Some(event) = stream.next().await {
                if tx.send(event).await.is_err() {
                    warn!(collector = %collector.name(), "merge channel closed, stopping feed task");
                    break;
                }
            }
        });
    }
    drop(tx);
    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}
