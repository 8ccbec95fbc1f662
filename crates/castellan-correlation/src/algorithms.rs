//! Pattern-detection rules and the anomaly-score baseline (§4.9). Each
//! rule is a pure function over an already-windowed observation slice;
//! the engine in `lib.rs` owns gathering that slice and running every
//! rule in turn ("all fire in parallel; results merged" — implemented
//! here as sequential pure calls, since none of the rules share mutable
//! state with each other).

use std::collections::HashSet;

use castellan_types::EventType;
use chrono::Duration;

use crate::storage::Observation;

/// Minimum baseline samples before `anomaly_score` is considered
/// meaningful (§4.9: "default 20").
pub const BASELINE_MIN_SAMPLES: u32 = 20;

/// A single rule's verdict when it fires.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    /// Stable rule identifier, e.g. `"brute_force"`.
    pub rule: &'static str,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// MITRE ATT&CK techniques associated with this rule.
    pub mitre_techniques: Vec<String>,
}

/// Priority order used to break confidence ties among simultaneously
/// matched rules (§4.9: "brute-force > chain > lateral > burst").
pub const RULE_PRIORITY: &[&str] = &["brute_force", "attack_chain", "lateral_movement", "temporal_burst"];

/// Brute force (§4.9): `>= threshold` `AuthenticationFailure` events on
/// one `(host, user)` lane within `window`, optionally followed by an
/// `AuthenticationSuccess`.
pub fn brute_force(lane: &[Observation], threshold: u32, window: Duration) -> Option<RuleMatch> {
    let latest = lane.last()?.timestamp;
    let cutoff = latest - window;
    let in_window: Vec<&Observation> = lane.iter().filter(|o| o.timestamp >= cutoff).collect();

    let failures = in_window.iter().filter(|o| o.event_type == EventType::AuthenticationFailure).count() as u32;
    if failures < threshold {
        return None;
    }

    let mut confidence = (failures as f64 / threshold as f64).min(1.0);
    let last_failure_at = in_window
        .iter()
        .filter(|o| o.event_type == EventType::AuthenticationFailure)
        .map(|o| o.timestamp)
        .max()?;
    let success_follows = in_window
        .iter()
        .any(|o| o.event_type == EventType::AuthenticationSuccess && o.timestamp > last_failure_at);
    if success_follows {
        confidence = (confidence + 0.2).min(1.0);
    }

    Some(RuleMatch { rule: "brute_force", confidence, mitre_techniques: vec!["T1110".to_string()] })
}

/// Lateral movement (§4.9): `>= min_hosts` distinct hosts observed
/// against the same `destination_address` within `window`.
pub fn lateral_movement(lane: &[Observation], min_hosts: u32, window: Duration) -> Option<RuleMatch> {
    let latest = lane.last()?.timestamp;
    let cutoff = latest - window;
    let hosts: HashSet<&str> = lane.iter().filter(|o| o.timestamp >= cutoff).map(|o| o.host.as_str()).collect();
    if (hosts.len() as u32) < min_hosts {
        return None;
    }
    let confidence = (hosts.len() as f64 / 5.0).min(1.0);
    Some(RuleMatch { rule: "lateral_movement", confidence, mitre_techniques: vec!["T1021".to_string()] })
}

/// Temporal burst (§4.9): `>= threshold` events of the same
/// `event_type` on one host within `window`. Populates `burst_score`
/// independently of the other correlation rules.
pub fn temporal_burst(lane: &[Observation], event_type: EventType, threshold: u32, window: Duration) -> Option<RuleMatch> {
    let latest = lane.last()?.timestamp;
    let cutoff = latest - window;
    let count = lane.iter().filter(|o| o.timestamp >= cutoff && o.event_type == event_type).count() as u32;
    if count < threshold {
        return None;
    }
    let confidence = (count as f64 / (2.0 * threshold as f64)).min(1.0);
    Some(RuleMatch { rule: "temporal_burst", confidence, mitre_techniques: Vec::new() })
}

/// Attack chain / privilege escalation (§4.9): an ordered
/// `AuthenticationSuccess -> PrivilegeEscalation -> ProcessCreation`
/// sequence on one `(host, user)` lane, each step strictly after the
/// previous, within `window`.
///
/// The literal trigger condition names a complete three-step sequence,
/// so `missing_steps` is always `0` when this fires; the
/// `0.8 + 0.1 * (3 - missing_steps)` formula is kept verbatim (clamped
/// to 1.0) to leave room for a future partial-chain variant.
pub fn attack_chain(lane: &[Observation], window: Duration) -> Option<RuleMatch> {
    let latest = lane.last()?.timestamp;
    let cutoff = latest - window;
    let in_window: Vec<&Observation> = lane.iter().filter(|o| o.timestamp >= cutoff).collect();

    let success = in_window.iter().find(|o| o.event_type == EventType::AuthenticationSuccess)?;
    let escalation = in_window
        .iter()
        .find(|o| o.event_type == EventType::PrivilegeEscalation && o.timestamp > success.timestamp)?;
    let process = in_window
        .iter()
        .find(|o| o.event_type == EventType::ProcessCreation && o.timestamp > escalation.timestamp)?;
    let _ = process;

    let missing_steps = 0.0_f64;
    let confidence = (0.8 + 0.1 * (3.0 - missing_steps)).min(1.0);
    Some(RuleMatch { rule: "attack_chain", confidence, mitre_techniques: vec!["T1078".to_string()] })
}

/// Exponentially-weighted moving average/variance baseline used to turn
/// a per-key event rate into a z-score, then a logistic-mapped
/// `anomaly_score` in `[0, 1]` (§4.9).
#[derive(Debug, Clone)]
pub struct Baseline {
    mean: f64,
    variance: f64,
    samples: u32,
}

impl Baseline {
    const ALPHA: f64 = 0.1;

    /// A fresh, unseeded baseline.
    pub fn new() -> Self {
        Self { mean: 0.0, variance: 0.0, samples: 0 }
    }

    /// Fold in a new rate observation and return the resulting
    /// `anomaly_score`. Returns `0.0` until [`BASELINE_MIN_SAMPLES`] have
    /// been observed.
    pub fn observe(&mut self, value: f64) -> f64 {
        self.samples += 1;
        if self.samples == 1 {
            self.mean = value;
            return 0.0;
        }

        let diff = value - self.mean;
        self.mean += Self::ALPHA * diff;
        self.variance = (1.0 - Self::ALPHA) * (self.variance + Self::ALPHA * diff * diff);

        if self.samples < BASELINE_MIN_SAMPLES {
            return 0.0;
        }

        let std_dev = self.variance.sqrt().max(1e-6);
        let z = (value - self.mean) / std_dev;
        1.0 / (1.0 + (-z).exp())
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn obs(host: &str, user: Option<&str>, event_type: EventType, ts_secs: i64) -> Observation {
        Observation {
            unique_id: format!("{host}-{ts_secs}"),
            timestamp: DateTime::<Utc>::from_timestamp(ts_secs, 0).unwrap(),
            host: host.to_string(),
            user: user.map(str::to_string),
            event_type,
            destination_address: None,
        }
    }

    #[test]
    fn brute_force_fires_past_threshold() {
        let lane: Vec<_> = (0..5).map(|i| obs("h1", Some("alice"), EventType::AuthenticationFailure, i * 10)).collect();
        let result = brute_force(&lane, 5, Duration::minutes(10)).unwrap();
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn brute_force_boosts_confidence_when_success_follows() {
        let mut lane: Vec<_> = (0..5).map(|i| obs("h1", Some("alice"), EventType::AuthenticationFailure, i * 10)).collect();
        lane.push(obs("h1", Some("alice"), EventType::AuthenticationSuccess, 100));
        let result = brute_force(&lane, 5, Duration::minutes(10)).unwrap();
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn brute_force_does_not_fire_below_threshold() {
        let lane: Vec<_> = (0..3).map(|i| obs("h1", Some("alice"), EventType::AuthenticationFailure, i * 10)).collect();
        assert!(brute_force(&lane, 5, Duration::minutes(10)).is_none());
    }

    #[test]
    fn lateral_movement_counts_distinct_hosts() {
        let lane: Vec<_> = ["h1", "h2", "h3"]
            .iter()
            .enumerate()
            .map(|(i, h)| obs(h, None, EventType::NetworkConnection, i as i64 * 10))
            .collect();
        let result = lateral_movement(&lane, 3, Duration::minutes(30)).unwrap();
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn temporal_burst_requires_same_event_type() {
        let lane: Vec<_> = (0..10).map(|i| obs("h1", None, EventType::ProcessCreation, i * 10)).collect();
        let result = temporal_burst(&lane, EventType::ProcessCreation, 10, Duration::minutes(5)).unwrap();
        assert!((result.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn attack_chain_requires_strict_ordering() {
        let lane = vec![
            obs("h1", Some("alice"), EventType::AuthenticationSuccess, 0),
            obs("h1", Some("alice"), EventType::PrivilegeEscalation, 60),
            obs("h1", Some("alice"), EventType::ProcessCreation, 120),
        ];
        assert!(attack_chain(&lane, Duration::minutes(30)).is_some());
    }

    #[test]
    fn attack_chain_rejects_out_of_order_steps() {
        let lane = vec![
            obs("h1", Some("alice"), EventType::ProcessCreation, 0),
            obs("h1", Some("alice"), EventType::PrivilegeEscalation, 60),
            obs("h1", Some("alice"), EventType::AuthenticationSuccess, 120),
        ];
        assert!(attack_chain(&lane, Duration::minutes(30)).is_none());
    }

    #[test]
    fn baseline_is_silent_before_minimum_samples() {
        let mut baseline = Baseline::new();
        for _ in 0..BASELINE_MIN_SAMPLES - 1 {
            assert_eq!(baseline.observe(1.0), 0.0);
        }
    }

    #[test]
    fn baseline_flags_a_spike_after_warmup() {
        let mut baseline = Baseline::new();
        for _ in 0..BASELINE_MIN_SAMPLES {
            baseline.observe(1.0);
        }
        let score = baseline.observe(50.0);
        assert!(score > 0.9);
    }
}
