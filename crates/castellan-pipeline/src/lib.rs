#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-pipeline** – the pipeline orchestrator wiring every other
//! Castellan component into one end-to-end flow (C12).
//!
//! Grounded on the reference workspace's orchestration crate for its
//! lifecycle shape (`Idle → Initializing → Running → Draining →
//! Stopped`) and its metrics-behind-a-lock pattern, but the control flow
//! itself is new: §4.12's five-stage per-event pipeline, fed by a merged
//! collector stream and throttled by a counting semaphore (§4.11, §5).
//! Stage boundaries use the tagged [`stage::StageOutcome`] variants per
//! §9's redesign note rather than exceptions.

mod batch;
pub mod config;
mod metrics;
mod stage;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use castellan_collectors::{merge_streams, CancellationToken, Collector, EventStream};
use castellan_correlation::{CorrelationConfig, CorrelationEngine, CorrelationInput};
use castellan_embedder::Embedder;
use castellan_enrichment::EnrichmentService;
use castellan_ignore::IgnoreList;
use castellan_llm::LlmClient;
use castellan_store::SecurityEventStore;
use castellan_types::{LogEvent, SecurityEvent};
use castellan_vector_store::VectorStore;
use futures::StreamExt;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use batch::VectorBatcher;
pub use config::{ConfigError, PipelineConfig};
pub use metrics::MetricsSnapshot;
pub use stage::{FailureKind, StageOutcome};

/// Errors the pipeline surfaces outside the per-event hot path: rejected
/// configuration and lifecycle misuse (§7).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Rejected at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Attempted an operation the lifecycle state machine forbids, e.g.
    /// `start()` after `stop()`.
    #[error("pipeline lifecycle violation: cannot {action} while {state:?}")]
    LifecycleViolation {
        /// The attempted action.
        action: &'static str,
        /// The state the pipeline was in when the action was attempted.
        state: PipelineState,
    },
}

/// Pipeline lifecycle states (§4.13). Transitions are driven by
/// `start`/`stop` and are idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed but never started.
    Idle,
    /// Running startup: `ensure_collection`, backfill.
    Initializing,
    /// Consuming the merged collector stream.
    Running,
    /// Stopping: no new intake, draining in-flight work.
    Draining,
    /// Fully stopped; `start()` is now a lifecycle violation.
    Stopped,
}

struct Inner {
    config: PipelineConfig,
    live_collectors: Vec<Arc<dyn Collector>>,
    historical_collector: Option<Arc<dyn Collector>>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    llm: Arc<LlmClient>,
    enrichment: Arc<EnrichmentService>,
    correlation: CorrelationEngine,
    store: Arc<dyn SecurityEventStore>,
    ignore_list: IgnoreList,
    batcher: VectorBatcher,
    metrics: metrics::PipelineMetrics,
    semaphore: Arc<tokio::sync::Semaphore>,
    in_flight: AtomicI64,
}

/// The pipeline orchestrator (C12): owns every collaborator and drives
/// §4.12's control flow end to end.
pub struct Pipeline {
    inner: Arc<Inner>,
    state: AsyncMutex<PipelineState>,
    shutdown: CancellationToken,
    shutdown_rx: watch::Receiver<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Construct a pipeline from its collaborators. Validates `config` per
    /// §7's `InvalidConfiguration` taxonomy entry before anything else
    /// runs.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] if `config` fails validation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        live_collectors: Vec<Arc<dyn Collector>>,
        historical_collector: Option<Arc<dyn Collector>>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        llm: Arc<LlmClient>,
        enrichment: Arc<EnrichmentService>,
        store: Arc<dyn SecurityEventStore>,
        ignore_list: IgnoreList,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let correlation = CorrelationEngine::with_config(CorrelationConfig {
            event_history_retention: chrono::Duration::minutes(config.event_history_retention_minutes),
            max_events_per_key: config.max_events_per_correlation_key,
            ..CorrelationConfig::default()
        });
        let batcher = VectorBatcher::new(
            Arc::clone(&vector_store),
            config.vector_batch_size,
            Duration::from_millis(config.vector_batch_timeout_ms),
        );
        let semaphore = Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_tasks.max(1)));
        let (shutdown, shutdown_rx) = CancellationToken::new();

        let inner = Arc::new(Inner {
            config,
            live_collectors,
            historical_collector,
            embedder,
            vector_store,
            llm,
            enrichment,
            correlation,
            store,
            ignore_list,
            batcher,
            metrics: metrics::PipelineMetrics::new(),
            semaphore,
            in_flight: AtomicI64::new(0),
        });

        Ok(Self { inner, state: AsyncMutex::new(PipelineState::Idle), shutdown, shutdown_rx, tasks: StdMutex::new(Vec::new()) })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> PipelineState {
        *self.state.lock().await
    }

    /// Run the startup sequence and begin consuming the merged collector
    /// stream (§4.12 step 1–3, §4.13). Idempotent: calling `start()` again
    /// while already `Running`/`Initializing`/`Draining` is a no-op.
    ///
    /// # Errors
    /// Returns [`PipelineError::LifecycleViolation`] if called after
    /// [`Pipeline::stop`] has completed.
    pub async fn start(&self) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                PipelineState::Idle => *state = PipelineState::Initializing,
                PipelineState::Running | PipelineState::Initializing | PipelineState::Draining => return Ok(()),
                PipelineState::Stopped => {
                    return Err(PipelineError::LifecycleViolation { action: "start", state: PipelineState::Stopped })
                }
            }
        }

        if let Err(err) = self.inner.vector_store.ensure_collection().await {
            warn!(%err, "ensure_collection failed during startup");
        }
        run_backfill(&self.inner).await;

        self.spawn_retention_task();
        self.spawn_batch_ticker();
        self.spawn_event_loop().await;

        *self.state.lock().await = PipelineState::Running;
        Ok(())
    }

    /// Stop accepting new events, drain in-flight work, force-flush
    /// batch buffers, and tear down background tasks (§5, §4.13).
    /// Idempotent: calling `stop` again after it has completed is a no-op.
    pub async fn stop(&self, drain_timeout: Duration) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                PipelineState::Stopped => return Ok(()),
                PipelineState::Idle => {
                    *state = PipelineState::Stopped;
                    return Ok(());
                }
                _ => *state = PipelineState::Draining,
            }
        }

        self.shutdown.cancel();

        let deadline = Instant::now() + drain_timeout;
        while self.inner.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            warn!("drain timeout elapsed with tasks still in flight");
        }

        match tokio::time::timeout(Duration::from_secs(5), self.inner.batcher.flush_now()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "force-flush on shutdown failed"),
            Err(_) => warn!("force-flush on shutdown did not complete within 5s"),
        }

        for handle in std::mem::take(&mut *self.tasks.lock().expect("tasks mutex poisoned")) {
            handle.abort();
        }

        *self.state.lock().await = PipelineState::Stopped;
        Ok(())
    }

    /// Point-in-time counters (§6).
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(self.inner.batcher.flush_count())
    }

    fn tasks_push(&self, handle: JoinHandle<()>) {
        self.tasks.lock().expect("tasks mutex poisoned").push(handle);
    }

    fn spawn_retention_task(&self) {
        let inner = Arc::clone(&self.inner);
        let mut cancel_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            debug!("retention task observed shutdown signal");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match inner.vector_store.delete_older_than_24h().await {
                            Ok(removed) => debug!(removed, "retention sweep complete"),
                            Err(err) => warn!(%err, "retention sweep failed, will retry next hour"),
                        }
                    }
                }
            }
        });
        self.tasks_push(handle);
    }

    fn spawn_batch_ticker(&self) {
        let inner = Arc::clone(&self.inner);
        let mut cancel_rx = self.shutdown_rx.clone();
        let period = Duration::from_millis((inner.config.vector_batch_timeout_ms / 4).max(10));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = inner.batcher.tick().await {
                            warn!(%err, "periodic batch flush failed, will retry");
                        }
                    }
                }
            }
        });
        self.tasks_push(handle);
    }

    async fn spawn_event_loop(&self) {
        let inner = Arc::clone(&self.inner);
        let stream = merge_streams(&inner.live_collectors, 256).await;
        let cancel_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(run_event_loop(inner, stream, cancel_rx));
        self.tasks_push(handle);
    }
}

async fn run_event_loop(inner: Arc<Inner>, mut events: EventStream, mut cancel_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    debug!("event loop observed shutdown signal, stopping intake");
                    break;
                }
            }
            maybe_event = events.next() => {
                let Some(event) = maybe_event else { break };
                let n = inner.metrics.record_in();
                dispatch_event(&inner, event, n).await;
            }
        }
    }
}

async fn dispatch_event(inner: &Arc<Inner>, event: LogEvent, sequence: u64) {
    let permit = if inner.config.enable_semaphore_throttling {
        let acquire = Arc::clone(&inner.semaphore).acquire_owned();
        match tokio::time::timeout(Duration::from_millis(inner.config.semaphore_timeout_ms), acquire).await {
            Ok(Ok(permit)) => {
                inner.metrics.record_semaphore_acquire();
                Some(permit)
            }
            _ => {
                inner.metrics.record_semaphore_timeout();
                inner.metrics.record_dropped("throttle_timeout");
                warn!(unique_id = %event.unique_id, skip = inner.config.skip_on_throttle_timeout, "semaphore acquisition timed out");
                return;
            }
        }
    } else {
        None
    };

    inner.in_flight.fetch_add(1, Ordering::SeqCst);
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        process_event(&inner, event, sequence).await;
        drop(permit);
        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    });
}

async fn process_event(inner: &Arc<Inner>, event: LogEvent, sequence: u64) {
    let deadline = Duration::from_millis(inner.config.parallel_operation_timeout_ms);

    let started = Instant::now();
    let stage_a_result = stage::stage_a(&inner.enrichment, deadline, &event).await;
    inner.metrics.record_stage_latency("stage_a", started.elapsed());

    let started = Instant::now();
    let stage_b_outcome = stage::stage_b(
        &inner.config,
        inner.embedder.as_ref(),
        inner.vector_store.as_ref(),
        &inner.batcher,
        &inner.llm,
        &event,
        &stage_a_result,
    )
    .await;
    inner.metrics.record_stage_latency("stage_b", started.elapsed());

    let llm_verdict = match stage_b_outcome {
        StageOutcome::Ok(result) => result.llm_verdict,
        StageOutcome::Skipped(_) => None,
        StageOutcome::Failed(kind, detail) => {
            debug!(?kind, detail, unique_id = %event.unique_id, "stage B did not produce an LLM contribution");
            None
        }
    };

    let started = Instant::now();
    let correlation_input = CorrelationInput {
        unique_id: event.unique_id.clone(),
        timestamp: event.timestamp,
        host: event.host.clone(),
        user: event.user.clone(),
        event_type: stage::classify_for_correlation(stage_a_result.deterministic.as_ref(), llm_verdict.as_ref()),
        destination_address: stage_a_result.enrichment.as_ref().and_then(|e| e.destination_address.clone()),
    };
    let correlation = inner.correlation.analyze_event(&correlation_input);
    let fused = castellan_fusion::fuse(&event, stage_a_result.deterministic.as_ref(), llm_verdict.as_ref(), &correlation);
    inner.metrics.record_stage_latency("stage_c", started.elapsed());

    let Some(mut security_event) = fused else {
        inner.metrics.record_dropped("no_verdict");
        return;
    };
    security_event.enrichment = stage_a_result.enrichment;

    if let Some(reason) = drop_reason(&inner.config, &inner.ignore_list, &security_event) {
        inner.metrics.record_dropped(reason);
        return;
    }

    match inner.store.append(security_event).await {
        Ok(true) => inner.metrics.record_persisted(),
        Ok(false) => debug!(unique_id = %event.unique_id, "duplicate event, not persisted again"),
        Err(err) => {
            warn!(%err, unique_id = %event.unique_id, "store persist failed, event dropped");
            inner.metrics.record_dropped("store_failure");
        }
    }

    if sequence % 10 == 0 {
        info!(snapshot = ?inner.metrics.snapshot(inner.batcher.flush_count()), "pipeline metrics");
    }
}

fn drop_reason(config: &PipelineConfig, ignore_list: &IgnoreList, event: &SecurityEvent) -> Option<&'static str> {
    if ignore_list.should_ignore(event) {
        return Some("ignored");
    }
    let has_strong_basis = event.is_deterministic || event.is_correlation_based || event.is_enhanced;
    let below_threshold = event.correlation_score < config.min_correlation_score_threshold
        && event.burst_score < config.min_burst_score_threshold
        && event.anomaly_score < config.min_anomaly_score_threshold;
    if !has_strong_basis && below_threshold {
        Some("below_threshold")
    } else {
        None
    }
}

async fn run_backfill(inner: &Arc<Inner>) {
    let has_coverage = match inner.vector_store.has_24h_coverage().await {
        Ok(has_coverage) => has_coverage,
        Err(err) => {
            warn!(%err, "could not determine vector store coverage, skipping backfill");
            return;
        }
    };
    if has_coverage {
        return;
    }

    let Some(historical) = inner.historical_collector.clone() else {
        castellan_vector_store::warn_no_backfill_source(has_coverage);
        return;
    };

    info!(source = %historical.name(), "starting startup backfill");
    let mut stream = historical.collect().await;
    let mut consecutive_errors: u32 = 0;
    while let Some(event) = stream.next().await {
        let text = stage::prepare_text(&event);
        let result: Result<(), String> = async {
            let vector = inner.embedder.embed(&text).await.map_err(|e| e.to_string())?;
            inner.vector_store.upsert(event.clone(), vector).await.map_err(|e| e.to_string())
        }
        .await;

        match result {
            Ok(()) => consecutive_errors = 0,
            Err(err) => {
                consecutive_errors += 1;
                warn!(%err, consecutive_errors, unique_id = %event.unique_id, "backfill record failed");
                if consecutive_errors >= inner.config.max_backfill_errors {
                    warn!("abandoning backfill after too many consecutive errors; pipeline continues online");
                    return;
                }
            }
        }
    }
    info!("startup backfill complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_embedder::HashingEmbedder;
    use castellan_enrichment::{RiskPolicy, StaticGeoProvider};
    use castellan_llm::Config as LlmConfig;
    use castellan_store::InMemorySecurityEventStore;
    use castellan_vector_store::InMemoryVectorStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn event(unique_id: &str, host: &str, user: Option<&str>, channel: &str, event_id: u32, offset_secs: i64) -> LogEvent {
        LogEvent::new(
            Utc::now() + ChronoDuration::seconds(offset_secs),
            host,
            channel,
            event_id,
            "Information",
            user.map(str::to_string),
            "message",
            "<Event/>",
            unique_id,
        )
        .unwrap()
    }

    fn event_with_message(unique_id: &str, host: &str, channel: &str, event_id: u32, message: &str, offset_secs: i64) -> LogEvent {
        LogEvent::new(Utc::now() + ChronoDuration::seconds(offset_secs), host, channel, event_id, "Information", None, message, "<Event/>", unique_id)
            .unwrap()
    }

    fn unreachable_llm() -> Arc<LlmClient> {
        let mut config = LlmConfig::local("http://127.0.0.1:1", "test-model");
        config.timeout = Duration::from_millis(200);
        Arc::new(LlmClient::new(config))
    }

    fn enrichment() -> Arc<EnrichmentService> {
        Arc::new(EnrichmentService::new(Arc::new(StaticGeoProvider::new()), RiskPolicy::new()))
    }

    fn build_pipeline(
        live: Vec<Arc<dyn Collector>>,
        historical: Option<Arc<dyn Collector>>,
        store: Arc<dyn SecurityEventStore>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Pipeline {
        Pipeline::new(
            PipelineConfig::default(),
            live,
            historical,
            Arc::new(HashingEmbedder::new()),
            vector_store,
            unreachable_llm(),
            enrichment(),
            store,
            IgnoreList::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn brute_force_then_success_persists_high_risk_correlation_event() {
        let mut events = Vec::new();
        for i in 0..10 {
            events.push(event(&format!("fail-{i}"), "DC-01", Some("admin"), "Security", 4625, i * 60));
        }
        events.push(event("success-1", "DC-01", Some("admin"), "Security", 4624, 10 * 60));

        let collector: Arc<dyn Collector> = Arc::new(castellan_collectors::HistoricalCollector::new("auth-log", events));
        let store: Arc<dyn SecurityEventStore> = Arc::new(InMemorySecurityEventStore::new());
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let pipeline = build_pipeline(vec![collector], None, Arc::clone(&store), vector_store);

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        pipeline.stop(Duration::from_secs(2)).await.unwrap();

        let persisted = store.get("success-1").await.unwrap().expect("success event persisted");
        assert!(persisted.is_correlation_based || persisted.correlation_score > 0.0);
        assert!(persisted.mitre_techniques.iter().any(|t| t == "T1110"));
    }

    #[tokio::test]
    async fn temporal_burst_on_single_host_is_flagged() {
        let mut events = Vec::new();
        for i in 0..15 {
            events.push(event(&format!("proc-{i}"), "WS-005", None, "Security", 4688, i * 5));
        }

        let collector: Arc<dyn Collector> = Arc::new(castellan_collectors::HistoricalCollector::new("proc-log", events));
        let store: Arc<dyn SecurityEventStore> = Arc::new(InMemorySecurityEventStore::new());
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let pipeline = build_pipeline(vec![collector], None, Arc::clone(&store), vector_store);

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        pipeline.stop(Duration::from_secs(2)).await.unwrap();

        let page = store
            .query(
                castellan_store::TimeRange { start: Utc::now() - ChronoDuration::hours(1), end: Utc::now() + ChronoDuration::hours(1) },
                castellan_store::Filter::default(),
                castellan_store::Pagination { offset: 0, limit: 100 },
            )
            .await
            .unwrap();
        assert!(page.events.iter().any(|e| e.burst_score >= 0.5));
    }

    #[tokio::test]
    async fn lateral_movement_across_distinct_hosts_is_flagged() {
        let hosts = ["WS-001", "WS-002", "WS-003"];
        let events: Vec<LogEvent> = hosts
            .iter()
            .enumerate()
            .map(|(i, host)| {
                event_with_message(
                    &format!("lateral-{i}"),
                    host,
                    "Security",
                    4624,
                    "Source Network Address:\t192.168.1.100",
                    i as i64 * 60,
                )
            })
            .collect();

        let collector: Arc<dyn Collector> = Arc::new(castellan_collectors::HistoricalCollector::new("lateral-log", events));
        let store: Arc<dyn SecurityEventStore> = Arc::new(InMemorySecurityEventStore::new());
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let pipeline = build_pipeline(vec![collector], None, Arc::clone(&store), vector_store);

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        pipeline.stop(Duration::from_secs(2)).await.unwrap();

        let last = store.get("lateral-2").await.unwrap().expect("third host's event persisted");
        assert!(last.is_correlation_based || last.correlation_score > 0.0);
        assert!(last.mitre_techniques.iter().any(|t| t == "T1021"));
    }

    #[tokio::test]
    async fn deterministic_fast_path_skips_llm_but_still_persists() {
        let events = vec![event("fast-path-1", "DC-01", Some("admin"), "Security", 4672, 0)];
        let collector: Arc<dyn Collector> = Arc::new(castellan_collectors::HistoricalCollector::new("single", events));
        let store: Arc<dyn SecurityEventStore> = Arc::new(InMemorySecurityEventStore::new());
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let pipeline = build_pipeline(vec![collector], None, Arc::clone(&store), vector_store);

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        pipeline.stop(Duration::from_secs(2)).await.unwrap();

        let persisted = store.get("fast-path-1").await.unwrap().expect("deterministic event persisted");
        assert!(persisted.is_deterministic);
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_idempotent_and_reject_restart() {
        let store: Arc<dyn SecurityEventStore> = Arc::new(InMemorySecurityEventStore::new());
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let pipeline = build_pipeline(vec![], None, store, vector_store);

        pipeline.start().await.unwrap();
        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state().await, PipelineState::Running);

        pipeline.stop(Duration::from_secs(1)).await.unwrap();
        pipeline.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(pipeline.state().await, PipelineState::Stopped);

        let err = pipeline.start().await.unwrap_err();
        assert!(matches!(err, PipelineError::LifecycleViolation { .. }));
    }

    #[tokio::test]
    async fn backfill_establishes_24h_coverage_before_running() {
        let events: Vec<LogEvent> = (0..50).map(|i| event(&format!("hist-{i}"), "DC-02", None, "Security", 4624, -i * 3600)).collect();
        let historical: Arc<dyn Collector> = Arc::new(castellan_collectors::HistoricalCollector::new("history", events));
        let store: Arc<dyn SecurityEventStore> = Arc::new(InMemorySecurityEventStore::new());
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(castellan_embedder::EMBEDDING_DIM));
        let pipeline = build_pipeline(vec![], Some(historical), Arc::clone(&store), Arc::clone(&vector_store));

        pipeline.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        pipeline.stop(Duration::from_secs(2)).await.unwrap();

        assert!(vector_store.has_24h_coverage().await.unwrap());
    }

    #[test]
    fn dropped_reason_is_below_threshold_for_weak_correlation_only_event() {
        let source = event("weak-1", "WS-09", None, "Security", 9999, 0);
        let security_event = SecurityEvent {
            id: SecurityEvent::derive_id(&source),
            source,
            event_type: castellan_types::EventType::Other,
            risk_level: castellan_types::RiskLevel::Low,
            confidence: 10,
            summary: "s".to_string(),
            mitre_techniques: vec![],
            recommended_actions: vec![],
            enrichment: None,
            correlation_score: 0.1,
            burst_score: 0.1,
            anomaly_score: 0.1,
            is_deterministic: false,
            is_correlation_based: false,
            is_enhanced: false,
        };
        let config = PipelineConfig::default();
        assert_eq!(drop_reason(&config, &IgnoreList::new(), &security_event), Some("below_threshold"));
    }
}
