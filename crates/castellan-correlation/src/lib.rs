#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-correlation** – windowed correlation engine (C9).
//!
//! Grounded on the reference workspace's rate-limiter crate: per-key
//! sliding state with retention-based eviction, a set of independent
//! rules evaluated against that state, and a composite result merging
//! their verdicts — the same shape the reference crate used for
//! rate-limit policies, retargeted here at attack-pattern detection.
//! Per-key locking granularity is inherited from `DashMap` in
//! [`storage::KeyedWindow`].

mod algorithms;
mod storage;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use castellan_types::{EventType, RiskLevel};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

pub use algorithms::{Baseline, RuleMatch, BASELINE_MIN_SAMPLES, RULE_PRIORITY};
pub use storage::Observation;

/// Per-event facts the correlation engine needs. Deliberately narrower
/// than a full `SecurityEvent`: the engine runs *before* fusion produces
/// one (§4.12 stage ordering), so its input is built from the `LogEvent`
/// plus whatever Stage A already knows (deterministic event type,
/// enrichment's destination address) rather than the fused verdict the
/// engine itself helps compute. Keeping this dependency one-directional
/// — correlation never depends on fusion's output — maintains the DAG
/// shape required by §9.
#[derive(Debug, Clone)]
pub struct CorrelationInput {
    /// `LogEvent::unique_id` of the event under analysis.
    pub unique_id: String,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Originating host.
    pub host: String,
    /// Originating user, if known.
    pub user: Option<String>,
    /// Best available classification at the time correlation runs
    /// (deterministic verdict's type, or `EventType::Other`).
    pub event_type: EventType,
    /// Destination address from IP enrichment, if resolved.
    pub destination_address: Option<String>,
}

/// Tunable thresholds and windows for every rule (§4.9 defaults).
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// How long an observation stays in any per-key lane.
    pub event_history_retention: Duration,
    /// Maximum observations retained per key, oldest-first eviction.
    pub max_events_per_key: usize,
    /// Brute force: failure count threshold.
    pub brute_force_threshold: u32,
    /// Brute force: lookback window.
    pub brute_force_window: Duration,
    /// Lateral movement: distinct-host threshold.
    pub lateral_min_hosts: u32,
    /// Lateral movement: lookback window.
    pub lateral_window: Duration,
    /// Temporal burst: event-count threshold.
    pub burst_threshold: u32,
    /// Temporal burst: lookback window.
    pub burst_window: Duration,
    /// Attack chain: lookback window.
    pub chain_window: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            event_history_retention: Duration::minutes(60),
            max_events_per_key: 1000,
            brute_force_threshold: 5,
            brute_force_window: Duration::minutes(10),
            lateral_min_hosts: 3,
            lateral_window: Duration::minutes(30),
            burst_threshold: 10,
            burst_window: Duration::minutes(5),
            chain_window: Duration::minutes(30),
        }
    }
}

/// Result of [`CorrelationEngine::analyze_event`] (§4.9).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    /// Whether any rule matched.
    pub has_correlation: bool,
    /// Confidence of the primary (tie-broken, highest-priority) match.
    pub confidence_score: f64,
    /// Every rule that matched, in priority order.
    pub matched_rules: Vec<String>,
    /// The rule selected as primary, if any.
    pub primary_rule: Option<String>,
    /// Risk level implied by the primary rule, for the fusion engine.
    pub risk_level: Option<RiskLevel>,
    /// MITRE techniques contributed by the primary rule.
    pub mitre_techniques: Vec<String>,
    /// Max confidence among brute-force/lateral-movement/attack-chain.
    pub correlation_score: f64,
    /// Temporal-burst rule's confidence, tracked independently.
    pub burst_score: f64,
    /// EWMA/logistic anomaly score for this event's host.
    pub anomaly_score: f64,
}

/// One matched privilege-escalation attack chain (§4.9,
/// `detect_attack_chains`).
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    /// Host the chain occurred on.
    pub host: String,
    /// User the chain occurred under, if known.
    pub user: Option<String>,
    /// `unique_id`s of the three steps, in order.
    pub steps: Vec<String>,
    /// Confidence of the chain match.
    pub confidence: f64,
}

/// Aggregate counters and the most frequently matched rules
/// (§4.9, `get_statistics`).
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    /// Total calls to `analyze_event`.
    pub total_analyzed: u64,
    /// Calls where at least one rule matched.
    pub total_matched: u64,
    /// Match counts per rule name.
    pub matches_by_rule: HashMap<String, u64>,
}

impl Statistics {
    /// The `k` most frequently matched rules, descending by count.
    #[must_use]
    pub fn top_patterns(&self, k: usize) -> Vec<(String, u64)> {
        let mut pairs: Vec<(String, u64)> = self.matches_by_rule.iter().map(|(k, v)| (k.clone(), *v)).collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(k);
        pairs
    }
}

/// The stateful, per-process correlation engine (§4.9).
pub struct CorrelationEngine {
    config: CorrelationConfig,
    by_host: storage::KeyedWindow,
    by_host_user: storage::KeyedWindow,
    by_destination: storage::KeyedWindow,
    baselines: DashMap<String, Baseline>,
    total_analyzed: AtomicU64,
    total_matched: AtomicU64,
    matches_by_rule: Mutex<HashMap<String, u64>>,
}

impl CorrelationEngine {
    /// Construct an engine with §4.9's default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CorrelationConfig::default())
    }

    /// Construct an engine with custom thresholds.
    #[must_use]
    pub fn with_config(config: CorrelationConfig) -> Self {
        Self {
            by_host: storage::KeyedWindow::new(config.event_history_retention, config.max_events_per_key),
            by_host_user: storage::KeyedWindow::new(config.event_history_retention, config.max_events_per_key),
            by_destination: storage::KeyedWindow::new(config.event_history_retention, config.max_events_per_key),
            baselines: DashMap::new(),
            total_analyzed: AtomicU64::new(0),
            total_matched: AtomicU64::new(0),
            matches_by_rule: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Analyze one event against the engine's live sliding-window state,
    /// inserting it into every index it participates in (§4.9).
    pub fn analyze_event(&self, input: &CorrelationInput) -> Correlation {
        let obs = storage::Observation {
            unique_id: input.unique_id.clone(),
            timestamp: input.timestamp,
            host: input.host.clone(),
            user: input.user.clone(),
            event_type: input.event_type,
            destination_address: input.destination_address.clone(),
        };

        self.by_host.push(input.host.clone(), obs.clone());
        let host_user_key = host_user_key(&input.host, input.user.as_deref());
        if input.user.is_some() {
            self.by_host_user.push(host_user_key.clone(), obs.clone());
        }
        if let Some(dest) = &input.destination_address {
            self.by_destination.push(dest.clone(), obs.clone());
        }

        let host_lane = self.by_host.get(&input.host);
        let host_user_lane = if input.user.is_some() { self.by_host_user.get(&host_user_key) } else { Vec::new() };
        let dest_lane = input.destination_address.as_deref().map(|d| self.by_destination.get(d)).unwrap_or_default();

        let mut matches = Vec::new();
        if !host_user_lane.is_empty() {
            if let Some(m) = algorithms::brute_force(&host_user_lane, self.config.brute_force_threshold, self.config.brute_force_window) {
                matches.push(m);
            }
            if let Some(m) = algorithms::attack_chain(&host_user_lane, self.config.chain_window) {
                matches.push(m);
            }
        }
        if !dest_lane.is_empty() {
            if let Some(m) = algorithms::lateral_movement(&dest_lane, self.config.lateral_min_hosts, self.config.lateral_window) {
                matches.push(m);
            }
        }
        if let Some(m) = algorithms::temporal_burst(&host_lane, input.event_type, self.config.burst_threshold, self.config.burst_window) {
            matches.push(m);
        }

        let anomaly_score = {
            let mut baseline = self.baselines.entry(input.host.clone()).or_insert_with(Baseline::new);
            baseline.observe(host_lane.len() as f64)
        };

        self.record_stats(&matches);
        self.fold_result(matches, anomaly_score)
    }

    fn record_stats(&self, matches: &[RuleMatch]) {
        self.total_analyzed.fetch_add(1, Ordering::Relaxed);
        if !matches.is_empty() {
            self.total_matched.fetch_add(1, Ordering::Relaxed);
        }
        let mut counts = self.matches_by_rule.lock().expect("matches_by_rule mutex poisoned");
        for m in matches {
            *counts.entry(m.rule.to_string()).or_insert(0) += 1;
        }
    }

    fn fold_result(&self, matches: Vec<RuleMatch>, anomaly_score: f64) -> Correlation {
        let burst_score = matches.iter().find(|m| m.rule == "temporal_burst").map_or(0.0, |m| m.confidence);
        let correlation_score = matches
            .iter()
            .filter(|m| m.rule != "temporal_burst")
            .map(|m| m.confidence)
            .fold(0.0_f64, f64::max);

        let primary = matches.iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| priority_rank(b.rule).cmp(&priority_rank(a.rule)))
        });

        Correlation {
            has_correlation: !matches.is_empty(),
            confidence_score: primary.map_or(0.0, |m| m.confidence),
            matched_rules: matches.iter().map(|m| m.rule.to_string()).collect(),
            primary_rule: primary.map(|m| m.rule.to_string()),
            risk_level: primary.map(|m| risk_for_rule(m.rule)),
            mitre_techniques: primary.map(|m| m.mitre_techniques.clone()).unwrap_or_default(),
            correlation_score,
            burst_score,
            anomaly_score,
        }
    }

    /// Batch form for backfill and tests (§4.9): analyzes `events` in
    /// timestamp order against fresh, ephemeral state using a single
    /// uniform `window` for every rule, independent of the engine's own
    /// live state.
    #[must_use]
    pub fn analyze_batch(events: &[CorrelationInput], window: Duration) -> Vec<Correlation> {
        let mut config = CorrelationConfig::default();
        config.brute_force_window = window;
        config.lateral_window = window;
        config.burst_window = window;
        config.chain_window = window;

        let engine = Self::with_config(config);
        let mut sorted: Vec<&CorrelationInput> = events.iter().collect();
        sorted.sort_by_key(|e| e.timestamp);
        sorted.iter().map(|e| engine.analyze_event(e)).collect()
    }

    /// Pure attack-chain detection over a provided event slice and
    /// window, independent of any engine's live state (§4.9).
    #[must_use]
    pub fn detect_attack_chains(events: &[CorrelationInput], window: Duration) -> Vec<Chain> {
        let mut by_host_user: HashMap<String, Vec<&CorrelationInput>> = HashMap::new();
        for e in events {
            by_host_user.entry(host_user_key(&e.host, e.user.as_deref())).or_default().push(e);
        }

        let mut chains = Vec::new();
        for (_, mut group) in by_host_user {
            group.sort_by_key(|e| e.timestamp);
            let Some(success) = group.iter().find(|e| e.event_type == EventType::AuthenticationSuccess) else { continue };
            let Some(escalation) = group.iter().find(|e| e.event_type == EventType::PrivilegeEscalation && e.timestamp > success.timestamp) else { continue };
            let Some(process) = group.iter().find(|e| e.event_type == EventType::ProcessCreation && e.timestamp > escalation.timestamp) else { continue };
            if process.timestamp - success.timestamp > window {
                continue;
            }
            chains.push(Chain {
                host: success.host.clone(),
                user: success.user.clone(),
                steps: vec![success.unique_id.clone(), escalation.unique_id.clone(), process.unique_id.clone()],
                confidence: 1.0,
            });
        }
        chains
    }

    /// Aggregate counters and top-matched rules to date.
    #[must_use]
    pub fn get_statistics(&self) -> Statistics {
        Statistics {
            total_analyzed: self.total_analyzed.load(Ordering::Relaxed),
            total_matched: self.total_matched.load(Ordering::Relaxed),
            matches_by_rule: self.matches_by_rule.lock().expect("matches_by_rule mutex poisoned").clone(),
        }
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn host_user_key(host: &str, user: Option<&str>) -> String {
    format!("{host}\u{1f}{}", user.unwrap_or(""))
}

fn priority_rank(rule: &str) -> usize {
    RULE_PRIORITY.iter().position(|r| *r == rule).unwrap_or(RULE_PRIORITY.len())
}

fn risk_for_rule(rule: &str) -> RiskLevel {
    match rule {
        "attack_chain" => RiskLevel::Critical,
        "brute_force" | "lateral_movement" => RiskLevel::High,
        _ => RiskLevel::Medium,
    }
}
