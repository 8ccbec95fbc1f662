#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-types** – Immutable event model for the Castellan detection core.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.
//! It makes no assumptions about I/O, transport, or storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum allowed length for a log message, guarding against unbounded
/// payloads from a misbehaving collector.
pub const MAX_MESSAGE_LEN: usize = 1_048_576;

/// Maximum allowed length for a `unique_id`.
pub const MAX_UNIQUE_ID_LEN: usize = 512;

/// Maximum allowed length for a host name.
pub const MAX_HOST_LEN: usize = 256;

/// Error returned when constructing or validating a [`LogEvent`] or
/// [`SecurityEvent`] fails.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TypesError {
    /// The `unique_id` field was empty or exceeded [`MAX_UNIQUE_ID_LEN`].
    #[error("invalid unique_id: {0}")]
    InvalidUniqueId(String),
    /// The `host` field was empty or exceeded [`MAX_HOST_LEN`].
    #[error("invalid host: {0}")]
    InvalidHost(String),
    /// The `message` field exceeded [`MAX_MESSAGE_LEN`].
    #[error("message too long: {0} > {MAX_MESSAGE_LEN}")]
    MessageTooLong(usize),
    /// A score field fell outside its required range.
    #[error("score out of range: {0}")]
    ScoreOutOfRange(f64),
}

/// An immutable record ingested from a collector.
///
/// Equality and hashing are defined over `unique_id` alone (§3): two
/// `LogEvent`s with the same `unique_id` are the same logical event
/// regardless of any other field drift a re-read from the source might
/// introduce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Instant the record occurred at the source, with UTC offset already
    /// applied.
    pub timestamp: DateTime<Utc>,
    /// Host the record originated from (hostname or IP).
    pub host: String,
    /// Windows event-log channel name (e.g. `"Security"`).
    pub channel: String,
    /// Numeric Windows event id (e.g. `4625`).
    pub event_id: u32,
    /// Severity level as reported by the source (e.g. `"Information"`).
    pub level: String,
    /// Principal associated with the record, if any.
    pub user: Option<String>,
    /// Free-text message body.
    pub message: String,
    /// Opaque original payload, kept verbatim for audit/debugging.
    pub raw: String,
    /// Opaque, collector-assigned identifier. Two events with the same
    /// `unique_id` are considered the same logical event (§3).
    pub unique_id: String,
}

impl PartialEq for LogEvent {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}
impl Eq for LogEvent {}

impl std::hash::Hash for LogEvent {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.unique_id.hash(state);
    }
}

impl LogEvent {
    /// Construct a new `LogEvent`, validating the fields collectors are
    /// required to populate correctly.
    ///
    /// # Errors
    /// Returns [`TypesError`] if `unique_id` is empty/too long, `host` is
    /// empty/too long, or `message` exceeds [`MAX_MESSAGE_LEN`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        host: impl Into<String>,
        channel: impl Into<String>,
        event_id: u32,
        level: impl Into<String>,
        user: Option<String>,
        message: impl Into<String>,
        raw: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Result<Self, TypesError> {
        let host = host.into();
        let message = message.into();
        let unique_id = unique_id.into();

        if unique_id.trim().is_empty() || unique_id.len() > MAX_UNIQUE_ID_LEN {
            return Err(TypesError::InvalidUniqueId(unique_id));
        }
        if host.trim().is_empty() || host.len() > MAX_HOST_LEN {
            return Err(TypesError::InvalidHost(host));
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(TypesError::MessageTooLong(message.len()));
        }

        Ok(Self {
            timestamp,
            host,
            channel: channel.into(),
            event_id,
            level: level.into(),
            user,
            message,
            raw: raw.into(),
            unique_id,
        })
    }
}

/// Closed classification of what a [`SecurityEvent`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Successful authentication (e.g. logon event id 4624/4672).
    AuthenticationSuccess,
    /// Failed authentication attempt.
    AuthenticationFailure,
    /// Escalation to elevated privileges.
    PrivilegeEscalation,
    /// New process creation.
    ProcessCreation,
    /// Outbound or inbound network connection.
    NetworkConnection,
    /// Account creation, modification, or deletion.
    AccountManagement,
    /// Local or group policy change.
    PolicyChange,
    /// A Windows service was installed.
    ServiceInstallation,
    /// A scheduled task was created or modified.
    ScheduledTask,
    /// PowerShell script block or command execution.
    PowerShellExecution,
    /// No classifier fired; the catch-all bucket (§3 invariant).
    Other,
}

/// Coarse-grained severity bucket attached to every [`SecurityEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Benign or informational.
    Low,
    /// Worth surfacing but not urgent.
    Medium,
    /// Likely malicious or highly suspicious.
    High,
    /// Confirmed or near-certain compromise indicator.
    Critical,
}

impl RiskLevel {
    /// Raise the risk level by one step, saturating at [`RiskLevel::Critical`].
    ///
    /// Used by the fusion engine's risk-upgrade rule (§4.7): when any scalar
    /// score reaches 0.9 the risk is bumped one notch.
    #[must_use]
    pub fn upgrade(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
        }
    }
}

/// Opaque, structured IP enrichment metadata attached to a [`SecurityEvent`].
///
/// Produced by the IP enrichment component (C7); absent (`None` inside
/// `SecurityEvent::enrichment`) when no address could be extracted or the
/// enrichment provider failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpEnrichment {
    /// The address this metadata describes.
    pub ip: String,
    /// Resolved country name, if known.
    pub country: Option<String>,
    /// ISO country code, if known.
    pub country_code: Option<String>,
    /// Resolved city, if known.
    pub city: Option<String>,
    /// Latitude, if known.
    pub latitude: Option<f64>,
    /// Longitude, if known.
    pub longitude: Option<f64>,
    /// Autonomous system number, if known.
    pub asn: Option<u32>,
    /// Autonomous system organization name, if known.
    pub asn_organization: Option<String>,
    /// Whether this address is considered high risk (e.g. known-bad, geo
    /// mismatch, anonymizing infrastructure).
    pub is_high_risk: bool,
    /// Human-readable reasons backing `is_high_risk`.
    pub risk_factors: Vec<String>,
    /// Whether this address is within an RFC1918 / private range.
    pub is_private: bool,
    /// The destination address extracted, used as a correlation key when
    /// present (§4.9).
    pub destination_address: Option<String>,
}

/// An analyzed, classified, and scored event emitted by the detection core.
///
/// Produced exclusively by the deterministic detector, the LLM path, or the
/// fusion engine (§3 lifecycle) – never mutated in place. A new verdict is
/// always a new `SecurityEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Stable identifier, derived deterministically from the source
    /// `LogEvent` so replays produce the same id (§3, §8).
    pub id: String,
    /// The underlying immutable log record.
    pub source: LogEvent,
    /// Closed classification.
    pub event_type: EventType,
    /// Coarse severity bucket.
    pub risk_level: RiskLevel,
    /// Confidence in `[0, 100]`.
    pub confidence: u8,
    /// Human-readable summary of why this event was flagged.
    pub summary: String,
    /// Ordered set of MITRE ATT&CK technique identifiers (e.g. `"T1110"`).
    pub mitre_techniques: Vec<String>,
    /// Ordered list of recommended remediation actions.
    pub recommended_actions: Vec<String>,
    /// Structured IP metadata, if an address was extracted and enriched.
    pub enrichment: Option<IpEnrichment>,
    /// Correlation-rule confidence in `[0, 1]`; 0 if no correlation fired.
    pub correlation_score: f64,
    /// Temporal-burst-rule confidence in `[0, 1]`; 0 if no burst fired.
    pub burst_score: f64,
    /// Frequency-anomaly score in `[0, 1]`; 0 until a baseline is
    /// established (§4.9).
    pub anomaly_score: f64,
    /// Set when the base verdict came from the deterministic detector.
    pub is_deterministic: bool,
    /// Set when the base verdict came from the correlation engine.
    pub is_correlation_based: bool,
    /// Set when an LLM verdict was merged with a deterministic hint.
    pub is_enhanced: bool,
}

impl SecurityEvent {
    /// Derive the stable persistence id for a `LogEvent`.
    ///
    /// Per §3/§8 the id must be stable for a given input so that replaying
    /// the same `LogEvent` twice yields at most one persisted record; using
    /// `unique_id` directly satisfies that without inventing a separate
    /// hashing scheme (open question in SPEC_FULL.md §9, resolved in
    /// DESIGN.md).
    #[must_use]
    pub fn derive_id(source: &LogEvent) -> String {
        source.unique_id.clone()
    }

    /// Validate the scalar score invariants required of every persisted
    /// `SecurityEvent` (§8): each of `correlation_score`, `burst_score`,
    /// `anomaly_score` must lie in `[0, 1]`.
    ///
    /// # Errors
    /// Returns [`TypesError::ScoreOutOfRange`] naming the first offending
    /// score.
    pub fn validate_scores(&self) -> Result<(), TypesError> {
        for score in [self.correlation_score, self.burst_score, self.anomaly_score] {
            if !(0.0..=1.0).contains(&score) {
                return Err(TypesError::ScoreOutOfRange(score));
            }
        }
        Ok(())
    }

    /// Ordered-set union of two MITRE technique lists, preserving the order
    /// of `mine` then any new techniques from `theirs` (§4.7 "techniques and
    /// actions are union-merged").
    #[must_use]
    pub fn union_techniques(mine: &[String], theirs: &[String]) -> Vec<String> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut out = Vec::with_capacity(mine.len() + theirs.len());
        for t in mine.iter().chain(theirs.iter()) {
            if seen.insert(t.as_str()) {
                out.push(t.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log_event(unique_id: &str) -> LogEvent {
        LogEvent::new(
            Utc::now(),
            "DC-01",
            "Security",
            4625,
            "Information",
            Some("admin".to_string()),
            "An account failed to log on.",
            "<Event/>",
            unique_id,
        )
        .unwrap()
    }

    #[test]
    fn equality_is_by_unique_id_only() {
        let mut a = sample_log_event("abc-1");
        let b = sample_log_event("abc-1");
        a.message = "different text".to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_empty_unique_id() {
        let err = LogEvent::new(
            Utc::now(),
            "DC-01",
            "Security",
            4625,
            "Information",
            None,
            "msg",
            "raw",
            "",
        )
        .unwrap_err();
        assert!(matches!(err, TypesError::InvalidUniqueId(_)));
    }

    #[test]
    fn rejects_oversized_host() {
        let huge_host = "a".repeat(MAX_HOST_LEN + 1);
        let err = LogEvent::new(
            Utc::now(),
            huge_host,
            "Security",
            4625,
            "Information",
            None,
            "msg",
            "raw",
            "id-1",
        )
        .unwrap_err();
        assert!(matches!(err, TypesError::InvalidHost(_)));
    }

    #[test]
    fn risk_upgrade_saturates_at_critical() {
        assert_eq!(RiskLevel::Low.upgrade(), RiskLevel::Medium);
        assert_eq!(RiskLevel::Critical.upgrade(), RiskLevel::Critical);
    }

    #[test]
    fn derive_id_is_stable_across_calls() {
        let e = sample_log_event("stable-1");
        assert_eq!(SecurityEvent::derive_id(&e), SecurityEvent::derive_id(&e));
    }

    #[test]
    fn union_techniques_dedupes_preserving_order() {
        let mine = vec!["T1110".to_string(), "T1021".to_string()];
        let theirs = vec!["T1021".to_string(), "T1059".to_string()];
        let merged = SecurityEvent::union_techniques(&mine, &theirs);
        assert_eq!(merged, vec!["T1110", "T1021", "T1059"]);
    }
}
