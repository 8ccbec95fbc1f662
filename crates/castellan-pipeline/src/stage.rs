//! Per-event stage implementations (§4.12 step 3).
//!
//! Grounded on §9's redesign notes: "exceptions for control flow at
//! stage boundaries" become the tagged [`StageOutcome`] variants below,
//! and Stage A is a literal scatter/gather under one shared deadline
//! ("on partial failure the stage still returns with nulls for the
//! failed sub-results").

use std::time::Duration;

use castellan_detector::Verdict as DeterministicVerdict;
use castellan_enrichment::EnrichmentService;
use castellan_llm::{LlmClient, LlmVerdict, Neighbor};
use castellan_types::{EventType, IpEnrichment, LogEvent, RiskLevel};
use castellan_vector_store::VectorStore;
use futures::future::Either;
use ndarray::Array1;
use tracing::warn;

use crate::batch::VectorBatcher;
use crate::PipelineConfig;

/// Fixed neighbor count for the vector-store k-NN search feeding the LLM
/// stage (§4.12 step 3, Stage B).
pub const NEIGHBOR_K: usize = 8;

/// The outcome of one stage: a value, a deliberate skip, or a failure
/// tagged with the kind of thing that went wrong (§9).
#[derive(Debug, Clone)]
pub enum StageOutcome<T> {
    /// The stage ran to completion.
    Ok(T),
    /// The stage deliberately did nothing, e.g. a conditional branch that
    /// did not apply.
    Skipped(&'static str),
    /// The stage attempted work and failed.
    Failed(FailureKind, String),
}

/// Taxonomy of stage failures (§7), attached to [`StageOutcome::Failed`]
/// for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// `EmbedderUnavailable`.
    Embedder,
    /// `LLMUnavailable` or malformed/timed-out response.
    Llm,
    /// `VectorStoreUnavailable`.
    VectorStore,
    /// `EnrichmentUnavailable`.
    Enrichment,
    /// `StorePersist` failure.
    Store,
}

/// Stage A's gathered results: IP enrichment, deterministic
/// classification, and the text prepared for embedding.
#[derive(Debug, Clone, Default)]
pub struct StageAResult {
    /// IP enrichment, if an address was found and the provider responded
    /// within the shared deadline.
    pub enrichment: Option<IpEnrichment>,
    /// Deterministic verdict, if the `(channel, event_id)` pair is known.
    pub deterministic: Option<DeterministicVerdict>,
    /// Text prepared for the embedder.
    pub text: String,
}

/// Build the embedding input text from a `LogEvent`'s structured fields.
#[must_use]
pub fn prepare_text(event: &LogEvent) -> String {
    format!(
        "{} {} host={} user={} {}",
        event.channel,
        event.event_id,
        event.host,
        event.user.as_deref().unwrap_or("-"),
        event.message
    )
}

/// Run Stage A: IP enrichment, deterministic detection, and text
/// preparation, scattered under one shared deadline (§4.12, §9).
/// Detection and text preparation are pure and synchronous, so the only
/// real suspension point is enrichment; the deadline still bounds the
/// whole gather so a slow provider cannot stall the event indefinitely.
pub async fn stage_a(enrichment: &EnrichmentService, deadline: Duration, event: &LogEvent) -> StageAResult {
    let gathered = tokio::time::timeout(deadline, enrichment.enrich(event)).await;
    let enrichment = match gathered {
        Ok(value) => value,
        Err(_) => {
            warn!(unique_id = %event.unique_id, "stage A enrichment deadline exceeded, continuing without it");
            None
        }
    };
    StageAResult { enrichment, deterministic: castellan_detector::detect(event), text: prepare_text(event) }
}

/// Stage B's gathered results: an LLM verdict, if one was produced.
#[derive(Debug, Clone, Default)]
pub struct StageBResult {
    /// LLM verdict, present only when embedding, search, and the LLM call
    /// all succeeded within budget.
    pub llm_verdict: Option<LlmVerdict>,
}

/// Whether Stage B's embed/search/LLM path should run at all: skipped
/// when the deterministic detector already produced a confident,
/// above-`Low` verdict (§4.12 step 3, §9 open question — resolved in
/// DESIGN.md: deterministic high-risk events still get indexed via the
/// batch-upsert-after-search path below is skipped too, so they are
/// *not* embedded; see DESIGN.md for the tradeoff).
#[must_use]
pub fn needs_embedding(deterministic: Option<&DeterministicVerdict>) -> bool {
    deterministic.map_or(true, |v| v.risk_level == RiskLevel::Low)
}

/// Run Stage B: conditional embedding, parallel batch-upsert + k-NN
/// search, then LLM analysis over the resulting neighbors (§4.12 step 3).
#[allow(clippy::too_many_arguments)]
pub async fn stage_b(
    config: &PipelineConfig,
    embedder: &dyn castellan_embedder::Embedder,
    vector_store: &dyn VectorStore,
    batcher: &VectorBatcher,
    llm: &LlmClient,
    event: &LogEvent,
    stage_a: &StageAResult,
) -> StageOutcome<StageBResult> {
    if !needs_embedding(stage_a.deterministic.as_ref()) {
        return StageOutcome::Skipped("deterministic_high_risk");
    }

    let vector: Array1<f32> = match embedder.embed(&stage_a.text).await {
        Ok(vector) => vector,
        Err(err) => {
            warn!(%err, unique_id = %event.unique_id, "embedder unavailable, skipping LLM path");
            return StageOutcome::Failed(FailureKind::Embedder, err.to_string());
        }
    };

    let search_fut = vector_store.search(&vector, NEIGHBOR_K);
    let upsert_fut = if config.enable_vector_batching {
        Either::Left(batcher.push(event.clone(), vector.clone()))
    } else {
        Either::Right(vector_store.upsert(event.clone(), vector.clone()))
    };

    let (search_result, upsert_result) = if config.enable_parallel_vector_operations {
        tokio::join!(search_fut, upsert_fut)
    } else {
        (search_fut.await, upsert_fut.await)
    };

    if let Err(err) = upsert_result {
        warn!(%err, unique_id = %event.unique_id, "vector upsert failed, event still considered");
    }

    let neighbors: Vec<Neighbor> = match search_result {
        Ok(hits) => hits.into_iter().map(|hit| Neighbor { event: hit.event, score: hit.score }).collect(),
        Err(err) => {
            warn!(%err, unique_id = %event.unique_id, "vector search failed, proceeding without LLM contribution");
            return StageOutcome::Failed(FailureKind::VectorStore, err.to_string());
        }
    };

    match llm.analyze(event, &neighbors).await {
        Ok(verdict) => StageOutcome::Ok(StageBResult { llm_verdict: Some(verdict) }),
        Err(err) => {
            warn!(%err, unique_id = %event.unique_id, "llm analysis failed or timed out");
            StageOutcome::Failed(FailureKind::Llm, err.to_string())
        }
    }
}

/// Best-known classification to feed the correlation engine: the
/// deterministic verdict's type if present, else the LLM's, else
/// [`EventType::Other`] (§4.9's `CorrelationInput` is built before fusion
/// runs, so it cannot use fusion's own output).
#[must_use]
pub fn classify_for_correlation(deterministic: Option<&DeterministicVerdict>, llm: Option<&LlmVerdict>) -> EventType {
    deterministic.map(|v| v.event_type).or_else(|| llm.map(|v| v.event_type)).unwrap_or(EventType::Other)
}
