#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-llm** – LLM verdict client for the Castellan detection core
//! (C6).
//!
//! Grounded on the reference workspace's `LlmGateway`: a provider seam
//! (`LlmProvider`), a governor-backed rate limiter, a sanitizer applied to
//! outbound prompts, a validator applied to inbound completions, and a
//! rolling metrics snapshot — reused here and narrowed to a single
//! operation, `analyze(event, neighbors) -> verdict`, per §4.5.

pub mod config;
mod providers;
pub mod sanitizer;
pub mod validator;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use castellan_types::{EventType, LogEvent, RiskLevel};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub use config::Config;
pub use providers::{build_provider, LlmProvider};

/// Errors the LLM client surfaces. Per §4.5/§7, every variant is treated
/// identically by the orchestrator: "no LLM contribution", never a fatal
/// error.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Timeout, transport failure, or the provider otherwise could not be
    /// reached.
    #[error("llm unavailable: {0}")]
    Unavailable(String),
    /// The provider responded but the completion did not parse as a
    /// well-formed verdict.
    #[error("malformed llm response")]
    MalformedResponse,
}

/// Structured verdict returned by [`LlmClient::analyze`]. Same shape as a
/// [`castellan_types::SecurityEvent`] minus `id` and the provenance flags
/// (§4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct LlmVerdict {
    /// Closed classification.
    pub event_type: EventType,
    /// Coarse severity bucket.
    pub risk_level: RiskLevel,
    /// Confidence in `[0, 100]`.
    pub confidence: u8,
    /// Human-readable summary.
    pub summary: String,
    /// Ordered MITRE ATT&CK technique identifiers.
    pub mitre_techniques: Vec<String>,
    /// Ordered recommended remediation actions.
    pub recommended_actions: Vec<String>,
}

/// A nearest-neighbor event supplied as context to the LLM, independent of
/// any specific vector-store implementation.
#[derive(Debug, Clone)]
pub struct Neighbor {
    /// The neighboring event.
    pub event: LogEvent,
    /// Its similarity score to the event under analysis.
    pub score: f32,
}

#[derive(Debug, Default)]
struct ClientMetrics {
    total_requests: u64,
    successful_responses: u64,
    failed_requests: u64,
    avg_response_time_ms: f64,
}

impl ClientMetrics {
    fn record(&mut self, elapsed: Duration, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_responses += 1;
        } else {
            self.failed_requests += 1;
        }
        let elapsed_ms = elapsed.as_millis() as f64;
        let n = self.total_requests as f64;
        self.avg_response_time_ms = (self.avg_response_time_ms * (n - 1.0) + elapsed_ms) / n;
    }
}

/// A point-in-time snapshot of client metrics, safe to hand to callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    /// Total `analyze` calls attempted.
    pub total_requests: u64,
    /// Calls that produced a valid verdict.
    pub successful_responses: u64,
    /// Calls that failed (timeout, transport, malformed JSON).
    pub failed_requests: u64,
    /// Rolling average response latency in milliseconds.
    pub avg_response_time_ms: f64,
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// LLM client: wraps a provider with rate limiting, sanitization,
/// validation, a timeout, and metrics (§4.5).
pub struct LlmClient {
    provider: Box<dyn LlmProvider>,
    rate_limiter: DirectRateLimiter,
    sanitizer: sanitizer::RequestSanitizer,
    validator: validator::ResponseValidator,
    timeout: Duration,
    metrics: Arc<RwLock<ClientMetrics>>,
}

impl LlmClient {
    /// Construct a client from a fully-materialized [`Config`] (§6: the
    /// core never reads environment directly).
    #[must_use]
    pub fn new(config: Config) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.rate_limit_per_second.max(1)).unwrap());
        Self {
            provider: build_provider(&config.provider),
            rate_limiter: RateLimiter::direct(quota),
            sanitizer: sanitizer::RequestSanitizer::new(),
            validator: validator::ResponseValidator::new(),
            timeout: config.timeout,
            metrics: Arc::new(RwLock::new(ClientMetrics::default())),
        }
    }

    /// Produce a verdict for `event` given its `neighbors` (§4.5).
    ///
    /// Enforces the configured request timeout; on timeout, transport
    /// error, or malformed JSON this returns [`LlmError`] and the caller
    /// (the orchestrator) treats it as "no LLM contribution" (§4.5, §7).
    pub async fn analyze(&self, event: &LogEvent, neighbors: &[Neighbor]) -> Result<LlmVerdict, LlmError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.analyze_inner(event, neighbors)).await;

        let outcome = match result {
            Ok(inner) => inner,
            Err(_) => {
                warn!(unique_id = %event.unique_id, timeout_ms = self.timeout.as_millis(), "llm request timed out");
                Err(LlmError::Unavailable("request timeout".to_string()))
            }
        };

        self.metrics.write().await.record(started.elapsed(), outcome.is_ok());
        outcome
    }

    async fn analyze_inner(&self, event: &LogEvent, neighbors: &[Neighbor]) -> Result<LlmVerdict, LlmError> {
        self.rate_limiter.until_ready().await;

        let prompt = self.build_prompt(event, neighbors);
        let completion = self.provider.complete(&prompt).await?;

        self.validator.validate(&completion).ok_or_else(|| {
            debug!(unique_id = %event.unique_id, "llm response failed validation");
            LlmError::MalformedResponse
        })
    }

    fn build_prompt(&self, event: &LogEvent, neighbors: &[Neighbor]) -> String {
        let message = self.sanitizer.sanitize(&event.message);
        let neighbor_lines: String = neighbors
            .iter()
            .map(|n| format!("- ({:.3}) {}: {}", n.score, n.event.channel, self.sanitizer.sanitize(&n.event.message)))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Analyze this Windows event and respond with a single JSON object with fields \
             event_type, risk_level, confidence (0-100), summary, mitre_techniques, \
             recommended_actions.\n\nEvent:\nhost={host}\nchannel={channel}\nevent_id={event_id}\n\
             message={message}\n\nSimilar recent events:\n{neighbor_lines}\n",
            host = event.host,
            channel = event.channel,
            event_id = event.event_id,
        )
    }

    /// Current metrics snapshot.
    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let m = self.metrics.read().await;
        MetricsSnapshot {
            total_requests: m.total_requests,
            successful_responses: m.successful_responses,
            failed_requests: m.failed_requests,
            avg_response_time_ms: m.avg_response_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    struct StaticProvider(String);

    #[async_trait]
    impl LlmProvider for StaticProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl LlmProvider for HangingProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn sample_event() -> LogEvent {
        LogEvent::new(
            Utc::now(),
            "APP-01",
            "Application",
            9999,
            "Information",
            None,
            "unrecognized application event",
            "<Event/>",
            "llm-1",
        )
        .unwrap()
    }

    fn client_with(provider: Box<dyn LlmProvider>, timeout: Duration) -> LlmClient {
        LlmClient {
            provider,
            rate_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::new(1000).unwrap())),
            sanitizer: sanitizer::RequestSanitizer::new(),
            validator: validator::ResponseValidator::new(),
            timeout,
            metrics: Arc::new(RwLock::new(ClientMetrics::default())),
        }
    }

    #[tokio::test]
    async fn analyze_returns_verdict_on_valid_json() {
        let provider = StaticProvider(
            r#"{"event_type":"Other","risk_level":"low","confidence":20,"summary":"benign"}"#.to_string(),
        );
        let client = client_with(Box::new(provider), Duration::from_secs(5));
        let verdict = client.analyze(&sample_event(), &[]).await.unwrap();
        assert_eq!(verdict.event_type, EventType::Other);
    }

    #[tokio::test]
    async fn analyze_times_out_on_hanging_provider() {
        let client = client_with(Box::new(HangingProvider), Duration::from_millis(50));
        let err = client.analyze(&sample_event(), &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn analyze_reports_malformed_response() {
        let provider = StaticProvider("not json".to_string());
        let client = client_with(Box::new(provider), Duration::from_secs(5));
        let err = client.analyze(&sample_event(), &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::MalformedResponse));
    }

    #[tokio::test]
    async fn metrics_track_success_and_failure() {
        let provider = StaticProvider(
            r#"{"event_type":"Other","risk_level":"low","confidence":20,"summary":"benign"}"#.to_string(),
        );
        let client = client_with(Box::new(provider), Duration::from_secs(5));
        client.analyze(&sample_event(), &[]).await.unwrap();
        let snapshot = client.metrics_snapshot().await;
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.successful_responses, 1);
    }
}
