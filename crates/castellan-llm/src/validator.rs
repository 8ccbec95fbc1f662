//! Response validation: parse and sanity-check the JSON verdict a provider
//! returns before it is trusted by the fusion engine.

use castellan_types::{EventType, RiskLevel};
use serde::Deserialize;

use crate::LlmVerdict;

/// Raw shape expected from the provider, deserialized before being
/// converted (and bounds-checked) into an [`LlmVerdict`].
#[derive(Debug, Deserialize)]
struct RawVerdict {
    event_type: String,
    risk_level: String,
    confidence: i64,
    summary: String,
    #[serde(default)]
    mitre_techniques: Vec<String>,
    #[serde(default)]
    recommended_actions: Vec<String>,
}

/// Parses and validates a provider's completion text as a JSON verdict.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseValidator;

impl ResponseValidator {
    /// Construct a validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse `text` as a [`LlmVerdict`]. Any parse or range failure is
    /// reported as `None`; per §4.5/§7 the caller treats this as
    /// `MalformedLLMResponse`, i.e. no LLM contribution.
    #[must_use]
    pub fn validate(&self, text: &str) -> Option<LlmVerdict> {
        let json_slice = extract_json_object(text)?;
        let raw: RawVerdict = serde_json::from_str(json_slice).ok()?;

        let event_type = parse_event_type(&raw.event_type)?;
        let risk_level = parse_risk_level(&raw.risk_level)?;
        if !(0..=100).contains(&raw.confidence) {
            return None;
        }

        Some(LlmVerdict {
            event_type,
            risk_level,
            confidence: raw.confidence as u8,
            summary: raw.summary,
            mitre_techniques: raw.mitre_techniques,
            recommended_actions: raw.recommended_actions,
        })
    }
}

/// Providers sometimes wrap JSON in prose or markdown fences; find the
/// outermost `{...}` object rather than requiring an exact-match response.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn parse_event_type(s: &str) -> Option<EventType> {
    Some(match s {
        "AuthenticationSuccess" => EventType::AuthenticationSuccess,
        "AuthenticationFailure" => EventType::AuthenticationFailure,
        "PrivilegeEscalation" => EventType::PrivilegeEscalation,
        "ProcessCreation" => EventType::ProcessCreation,
        "NetworkConnection" => EventType::NetworkConnection,
        "AccountManagement" => EventType::AccountManagement,
        "PolicyChange" => EventType::PolicyChange,
        "ServiceInstallation" => EventType::ServiceInstallation,
        "ScheduledTask" => EventType::ScheduledTask,
        "PowerShellExecution" => EventType::PowerShellExecution,
        "Other" => EventType::Other,
        _ => return None,
    })
}

fn parse_risk_level(s: &str) -> Option<RiskLevel> {
    Some(match s.to_ascii_lowercase().as_str() {
        "low" => RiskLevel::Low,
        "medium" => RiskLevel::Medium,
        "high" => RiskLevel::High,
        "critical" => RiskLevel::Critical,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_verdict() {
        let validator = ResponseValidator::new();
        let text = r#"{"event_type":"AuthenticationFailure","risk_level":"medium","confidence":70,"summary":"s","mitre_techniques":["T1110"],"recommended_actions":["a"]}"#;
        let verdict = validator.validate(text).unwrap();
        assert_eq!(verdict.event_type, EventType::AuthenticationFailure);
        assert_eq!(verdict.risk_level, RiskLevel::Medium);
        assert_eq!(verdict.confidence, 70);
    }

    #[test]
    fn tolerates_surrounding_prose() {
        let validator = ResponseValidator::new();
        let text = "Here is my analysis:\n{\"event_type\":\"Other\",\"risk_level\":\"low\",\"confidence\":10,\"summary\":\"s\"}\nHope that helps.";
        assert!(validator.validate(text).is_some());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let validator = ResponseValidator::new();
        let text = r#"{"event_type":"Other","risk_level":"low","confidence":150,"summary":"s"}"#;
        assert!(validator.validate(text).is_none());
    }

    #[test]
    fn rejects_malformed_json() {
        let validator = ResponseValidator::new();
        assert!(validator.validate("not json at all").is_none());
    }

    #[test]
    fn rejects_unknown_risk_level() {
        let validator = ResponseValidator::new();
        let text = r#"{"event_type":"Other","risk_level":"apocalyptic","confidence":10,"summary":"s"}"#;
        assert!(validator.validate(text).is_none());
    }
}
