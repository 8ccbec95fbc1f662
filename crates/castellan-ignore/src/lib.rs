#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-ignore** – post-fusion ignore-pattern predicate (C11).
//!
//! A pure function of a [`SecurityEvent`] and a config-supplied rule
//! list: no I/O, no shared state. Applied after fusion (§4.8); a match
//! means the event is dropped rather than persisted.

use castellan_types::{EventType, SecurityEvent};
use glob::Pattern;

/// One field an ignore rule can match against. Exact matches compare the
/// field verbatim; glob matches support `*`/`?`/`[...]` via the `glob`
/// crate's `Pattern`, the same matcher used for filesystem ignore lists.
#[derive(Debug, Clone)]
pub enum FieldMatch {
    /// Match `event_type` exactly.
    EventType(EventType),
    /// Match any MITRE technique, exact string.
    MitreTechnique(String),
    /// Match `channel` via glob.
    Channel(Pattern),
    /// Match `event_id` exactly.
    EventId(u32),
    /// Match `user` via glob (case-sensitive).
    User(Pattern),
}

/// One ignore rule: an event is ignored when **every** field in the rule
/// matches (a rule with a single field is a simple exact/glob filter; a
/// rule with several fields is a conjunction).
#[derive(Debug, Clone, Default)]
pub struct IgnoreRule {
    fields: Vec<FieldMatch>,
}

impl IgnoreRule {
    /// Start building a rule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an exact `event_type` match.
    #[must_use]
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.fields.push(FieldMatch::EventType(event_type));
        self
    }

    /// Require `mitre_techniques` to contain this exact technique id.
    #[must_use]
    pub fn mitre_technique(mut self, technique: impl Into<String>) -> Self {
        self.fields.push(FieldMatch::MitreTechnique(technique.into()));
        self
    }

    /// Require `channel` to match this glob pattern.
    ///
    /// # Panics
    /// Panics if `pattern` is not a valid glob; rules are config data
    /// validated at load time, not per-event input.
    #[must_use]
    pub fn channel_glob(mut self, pattern: &str) -> Self {
        self.fields.push(FieldMatch::Channel(Pattern::new(pattern).expect("invalid channel glob pattern")));
        self
    }

    /// Require an exact `event_id` match.
    #[must_use]
    pub fn event_id(mut self, event_id: u32) -> Self {
        self.fields.push(FieldMatch::EventId(event_id));
        self
    }

    /// Require `user` to match this glob pattern.
    ///
    /// # Panics
    /// Panics if `pattern` is not a valid glob.
    #[must_use]
    pub fn user_glob(mut self, pattern: &str) -> Self {
        self.fields.push(FieldMatch::User(Pattern::new(pattern).expect("invalid user glob pattern")));
        self
    }

    fn matches(&self, event: &SecurityEvent) -> bool {
        if self.fields.is_empty() {
            return false;
        }
        self.fields.iter().all(|field| match field {
            FieldMatch::EventType(t) => event.event_type == *t,
            FieldMatch::MitreTechnique(t) => event.mitre_techniques.iter().any(|m| m == t),
            FieldMatch::Channel(p) => p.matches(&event.source.channel),
            FieldMatch::EventId(id) => event.source.event_id == *id,
            FieldMatch::User(p) => event.source.user.as_deref().is_some_and(|u| p.matches(u)),
        })
    }
}

/// An ordered list of [`IgnoreRule`]s; an event is ignored if any rule
/// matches.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    rules: Vec<IgnoreRule>,
}

impl IgnoreList {
    /// An empty list: nothing is ever ignored.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: IgnoreRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Whether `event` should be dropped rather than persisted (§4.8).
    #[must_use]
    pub fn should_ignore(&self, event: &SecurityEvent) -> bool {
        self.rules.iter().any(|rule| rule.matches(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::{LogEvent, RiskLevel};
    use chrono::Utc;

    fn event(channel: &str, event_id: u32, user: Option<&str>, event_type: EventType) -> SecurityEvent {
        let source = LogEvent::new(Utc::now(), "DC-01", channel, event_id, "Information", user.map(str::to_string), "message", "<Event/>", "ignore-1").unwrap();
        SecurityEvent {
            id: "ignore-1".to_string(),
            source,
            event_type,
            risk_level: RiskLevel::Low,
            confidence: 10,
            summary: "s".to_string(),
            mitre_techniques: vec!["T1110".to_string()],
            recommended_actions: vec![],
            enrichment: None,
            correlation_score: 0.0,
            burst_score: 0.0,
            anomaly_score: 0.0,
            is_deterministic: true,
            is_correlation_based: false,
            is_enhanced: false,
        }
    }

    #[test]
    fn empty_list_ignores_nothing() {
        let list = IgnoreList::new();
        assert!(!list.should_ignore(&event("Security", 4624, None, EventType::Other)));
    }

    #[test]
    fn exact_event_id_rule_matches() {
        let list = IgnoreList::new().with_rule(IgnoreRule::new().event_id(4624));
        assert!(list.should_ignore(&event("Security", 4624, None, EventType::Other)));
        assert!(!list.should_ignore(&event("Security", 4625, None, EventType::Other)));
    }

    #[test]
    fn channel_glob_rule_matches() {
        let list = IgnoreList::new().with_rule(IgnoreRule::new().channel_glob("Microsoft-Windows-*"));
        assert!(list.should_ignore(&event("Microsoft-Windows-PowerShell/Operational", 4104, None, EventType::PowerShellExecution)));
        assert!(!list.should_ignore(&event("Security", 4104, None, EventType::PowerShellExecution)));
    }

    #[test]
    fn user_glob_rule_matches_service_accounts() {
        let list = IgnoreList::new().with_rule(IgnoreRule::new().user_glob("svc_*"));
        assert!(list.should_ignore(&event("Security", 4624, Some("svc_backup"), EventType::AuthenticationSuccess)));
        assert!(!list.should_ignore(&event("Security", 4624, Some("alice"), EventType::AuthenticationSuccess)));
    }

    #[test]
    fn conjunction_rule_requires_all_fields() {
        let list = IgnoreList::new().with_rule(IgnoreRule::new().event_type(EventType::AuthenticationSuccess).user_glob("svc_*"));
        assert!(list.should_ignore(&event("Security", 4624, Some("svc_backup"), EventType::AuthenticationSuccess)));
        assert!(!list.should_ignore(&event("Security", 4624, Some("svc_backup"), EventType::Other)));
    }

    #[test]
    fn mitre_technique_rule_matches() {
        let list = IgnoreList::new().with_rule(IgnoreRule::new().mitre_technique("T1110"));
        assert!(list.should_ignore(&event("Security", 4625, None, EventType::AuthenticationFailure)));
    }
}
