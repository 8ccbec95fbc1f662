//! Pipeline configuration and validation (§6).
//!
//! Grounded on the reference workspace's `OrchestrationConfig` /
//! `AgentConfigLoader::validate_config`: a plain struct plus a `validate`
//! entry point rejected at construction. Unlike the reference loader
//! (which returns on the first violation), `validate` here accumulates
//! every offending field into one [`ConfigError::Invalid`], matching
//! §7's taxonomy entry for `InvalidConfiguration`: "rejected at
//! construction with a structured error listing offending fields".

use std::time::Duration;

/// A configuration value together with the field name that was rejected.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid pipeline configuration: {0:?}")]
pub struct ConfigError(pub Vec<String>);

/// Fully-materialized pipeline configuration (§6). Constructed once and
/// observed as an atomic snapshot; `reconfigure` points are left to the
/// embedding application (§9: "atomic configuration snapshot plus a
/// reconfigure entry point").
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Toggles Stage A parallelism.
    pub enable_parallel_processing: bool,
    /// Per-stage deadline for Stage A and Stage B.
    pub parallel_operation_timeout_ms: u64,
    /// Toggles upsert∥search within Stage B.
    pub enable_parallel_vector_operations: bool,
    /// Whether per-event work is throttled by a counting semaphore.
    pub enable_semaphore_throttling: bool,
    /// Semaphore capacity when throttling is enabled.
    pub max_concurrent_tasks: usize,
    /// Semaphore acquisition timeout.
    pub semaphore_timeout_ms: u64,
    /// On acquisition timeout: skip the event (`true`) or drop it with a
    /// warning (`false`).
    pub skip_on_throttle_timeout: bool,
    /// Whether vector upserts are buffered before flushing.
    pub enable_vector_batching: bool,
    /// Buffer size that triggers an immediate flush.
    pub vector_batch_size: usize,
    /// Idle time after which a partial buffer is flushed.
    pub vector_batch_timeout_ms: u64,
    /// Correlation window retention.
    pub event_history_retention_minutes: i64,
    /// Per-key correlation window cap.
    pub max_events_per_correlation_key: usize,
    /// Drop threshold: correlation score.
    pub min_correlation_score_threshold: f64,
    /// Drop threshold: burst score.
    pub min_burst_score_threshold: f64,
    /// Drop threshold: anomaly score.
    pub min_anomaly_score_threshold: f64,
    /// Graceful-shutdown wait for in-flight tasks.
    pub drain_timeout: Duration,
    /// Consecutive backfill errors before abandoning backfill (§7).
    pub max_backfill_errors: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_parallel_processing: true,
            parallel_operation_timeout_ms: 30_000,
            enable_parallel_vector_operations: true,
            enable_semaphore_throttling: true,
            max_concurrent_tasks: 8,
            semaphore_timeout_ms: 5_000,
            skip_on_throttle_timeout: true,
            enable_vector_batching: true,
            vector_batch_size: 16,
            vector_batch_timeout_ms: 2_000,
            event_history_retention_minutes: 60,
            max_events_per_correlation_key: 1_000,
            min_correlation_score_threshold: 0.5,
            min_burst_score_threshold: 0.5,
            min_anomaly_score_threshold: 0.5,
            drain_timeout: Duration::from_secs(10),
            max_backfill_errors: 50,
        }
    }
}

impl PipelineConfig {
    /// Validate every field with a bearing on correctness, returning a
    /// single [`ConfigError`] naming every offending field at once rather
    /// than stopping at the first.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if one or more fields are out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        if self.max_concurrent_tasks == 0 {
            violations.push("max_concurrent_tasks must be >= 1".to_string());
        }
        if self.semaphore_timeout_ms == 0 {
            violations.push("semaphore_timeout_ms must be >= 1".to_string());
        }
        if self.vector_batch_size == 0 {
            violations.push("vector_batch_size must be >= 1".to_string());
        }
        if self.event_history_retention_minutes <= 0 {
            violations.push("event_history_retention_minutes must be > 0".to_string());
        }
        if self.max_events_per_correlation_key == 0 {
            violations.push("max_events_per_correlation_key must be >= 1".to_string());
        }
        for (name, value) in [
            ("min_correlation_score_threshold", self.min_correlation_score_threshold),
            ("min_burst_score_threshold", self.min_burst_score_threshold),
            ("min_anomaly_score_threshold", self.min_anomaly_score_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                violations.push(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        if self.max_backfill_errors == 0 {
            violations.push("max_backfill_errors must be >= 1".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn reports_every_violation_at_once() {
        let config = PipelineConfig {
            max_concurrent_tasks: 0,
            vector_batch_size: 0,
            min_correlation_score_threshold: 1.5,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.0.len(), 3);
    }
}
