#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-fusion** – rules and fusion engine (C8).
//!
//! A pure function: given a `LogEvent` plus the (possibly absent)
//! deterministic, correlation, and LLM signals, applies §4.7's five
//! ordered rules to pick a base verdict, then merges scores and applies
//! the risk-upgrade and confidence-merge rules. Grounded on the
//! reference workspace's rate-limiter crate (`CompositePolicy`), which
//! applies an ordered list of policies and folds their results —
//! generalized here from "first blocking policy wins" to "first
//! matching rule wins, then scores merge".

use castellan_correlation::Correlation;
use castellan_detector::Verdict as DeterministicVerdict;
use castellan_llm::LlmVerdict;
use castellan_types::{LogEvent, RiskLevel, SecurityEvent};

/// Fuse the per-stage signals for one event into a [`SecurityEvent`],
/// or `None` if no signal justifies emitting one (§4.7, rule 5).
#[must_use]
pub fn fuse(
    source: &LogEvent,
    deterministic: Option<&DeterministicVerdict>,
    llm: Option<&LlmVerdict>,
    correlation: &Correlation,
) -> Option<SecurityEvent> {
    let base = select_base(deterministic, llm, correlation)?;

    let correlation_score = correlation.correlation_score;
    let burst_score = correlation.burst_score;
    let anomaly_score = correlation.anomaly_score;

    let mut risk_level = base.risk_level;
    let max_signal = correlation_score.max(burst_score).max(anomaly_score);
    if max_signal >= 0.9 {
        risk_level = risk_level.upgrade();
    }

    let correlation_confidence = (100.0 * correlation_score).round() as u8;
    let confidence = base.confidence.max(correlation_confidence);

    Some(SecurityEvent {
        id: SecurityEvent::derive_id(source),
        source: source.clone(),
        event_type: base.event_type,
        risk_level,
        confidence,
        summary: base.summary,
        mitre_techniques: base.mitre_techniques,
        recommended_actions: base.recommended_actions,
        enrichment: None,
        correlation_score,
        burst_score,
        anomaly_score,
        is_deterministic: base.is_deterministic,
        is_correlation_based: base.is_correlation_based,
        is_enhanced: base.is_enhanced,
    })
}

struct BaseVerdict {
    event_type: castellan_types::EventType,
    risk_level: RiskLevel,
    confidence: u8,
    summary: String,
    mitre_techniques: Vec<String>,
    recommended_actions: Vec<String>,
    is_deterministic: bool,
    is_correlation_based: bool,
    is_enhanced: bool,
}

/// §4.7's ordered rule list: first match wins.
fn select_base(deterministic: Option<&DeterministicVerdict>, llm: Option<&LlmVerdict>, correlation: &Correlation) -> Option<BaseVerdict> {
    // Rule 1: high/critical deterministic verdicts always win outright.
    if let Some(d) = deterministic {
        if matches!(d.risk_level, RiskLevel::High | RiskLevel::Critical) {
            return Some(from_deterministic(d, false));
        }
    }

    // Rule 2: a confident correlation match outranks a low-risk
    // deterministic hit or a bare LLM opinion.
    if correlation.has_correlation && correlation.confidence_score >= 0.7 {
        return Some(from_correlation(correlation));
    }

    // Rule 3: LLM verdict, enhanced with deterministic techniques/actions
    // when both fired.
    if let Some(l) = llm {
        return Some(from_llm(l, deterministic));
    }

    // Rule 4: any deterministic verdict, regardless of risk.
    if let Some(d) = deterministic {
        return Some(from_deterministic(d, false));
    }

    // Rule 5: nothing to report.
    None
}

fn from_deterministic(verdict: &DeterministicVerdict, is_enhanced: bool) -> BaseVerdict {
    BaseVerdict {
        event_type: verdict.event_type,
        risk_level: verdict.risk_level,
        confidence: verdict.confidence,
        summary: verdict.summary.clone(),
        mitre_techniques: verdict.mitre_techniques.clone(),
        recommended_actions: verdict.recommended_actions.clone(),
        is_deterministic: true,
        is_correlation_based: false,
        is_enhanced,
    }
}

fn from_correlation(correlation: &Correlation) -> BaseVerdict {
    BaseVerdict {
        event_type: castellan_types::EventType::Other,
        risk_level: correlation.risk_level.unwrap_or(RiskLevel::Medium),
        confidence: (100.0 * correlation.confidence_score).round() as u8,
        summary: format!(
            "correlation rule {} matched with confidence {:.2}",
            correlation.primary_rule.as_deref().unwrap_or("unknown"),
            correlation.confidence_score
        ),
        mitre_techniques: correlation.mitre_techniques.clone(),
        recommended_actions: Vec::new(),
        is_deterministic: false,
        is_correlation_based: true,
        is_enhanced: false,
    }
}

fn from_llm(verdict: &LlmVerdict, deterministic: Option<&DeterministicVerdict>) -> BaseVerdict {
    let is_enhanced = deterministic.is_some();
    let (mitre_techniques, recommended_actions) = match deterministic {
        Some(d) => (
            SecurityEvent::union_techniques(&verdict.mitre_techniques, &d.mitre_techniques),
            SecurityEvent::union_techniques(&verdict.recommended_actions, &d.recommended_actions),
        ),
        None => (verdict.mitre_techniques.clone(), verdict.recommended_actions.clone()),
    };

    BaseVerdict {
        event_type: verdict.event_type,
        risk_level: verdict.risk_level,
        confidence: verdict.confidence,
        summary: verdict.summary.clone(),
        mitre_techniques,
        recommended_actions,
        is_deterministic: false,
        is_correlation_based: false,
        is_enhanced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::EventType;
    use chrono::Utc;

    fn source() -> LogEvent {
        LogEvent::new(Utc::now(), "DC-01", "Security", 4672, "Information", Some("alice".to_string()), "Special privileges assigned to new logon", "<Event/>", "fuse-1").unwrap()
    }

    fn high_risk_det() -> DeterministicVerdict {
        DeterministicVerdict {
            event_type: EventType::PrivilegeEscalation,
            risk_level: RiskLevel::High,
            confidence: 75,
            mitre_techniques: vec!["T1078".to_string()],
            recommended_actions: vec!["review admin group membership".to_string()],
            summary: "privileged logon".to_string(),
        }
    }

    fn empty_correlation() -> Correlation {
        Correlation::default()
    }

    #[test]
    fn high_risk_deterministic_wins_outright() {
        let result = fuse(&source(), Some(&high_risk_det()), None, &empty_correlation()).unwrap();
        assert!(result.is_deterministic);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn confident_correlation_outranks_low_risk_deterministic() {
        let low_risk = DeterministicVerdict { risk_level: RiskLevel::Low, ..high_risk_det() };
        let mut correlation = empty_correlation();
        correlation.has_correlation = true;
        correlation.confidence_score = 0.9;
        correlation.correlation_score = 0.9;
        correlation.primary_rule = Some("brute_force".to_string());
        correlation.risk_level = Some(RiskLevel::High);

        let result = fuse(&source(), Some(&low_risk), None, &correlation).unwrap();
        assert!(result.is_correlation_based);
        assert_eq!(result.risk_level, RiskLevel::Critical); // risk-upgrade rule: 0.9 >= 0.9
    }

    #[test]
    fn llm_verdict_is_enhanced_when_deterministic_also_fired() {
        let low_risk = DeterministicVerdict { risk_level: RiskLevel::Low, ..high_risk_det() };
        let llm = LlmVerdict {
            event_type: EventType::PrivilegeEscalation,
            risk_level: RiskLevel::Medium,
            confidence: 60,
            summary: "llm summary".to_string(),
            mitre_techniques: vec!["T1068".to_string()],
            recommended_actions: vec!["rotate credentials".to_string()],
        };

        let result = fuse(&source(), Some(&low_risk), Some(&llm), &empty_correlation()).unwrap();
        assert!(result.is_enhanced);
        assert!(result.mitre_techniques.contains(&"T1078".to_string()));
        assert!(result.mitre_techniques.contains(&"T1068".to_string()));
    }

    #[test]
    fn low_risk_deterministic_alone_still_emits() {
        let low_risk = DeterministicVerdict { risk_level: RiskLevel::Low, ..high_risk_det() };
        let result = fuse(&source(), Some(&low_risk), None, &empty_correlation()).unwrap();
        assert!(result.is_deterministic);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn nothing_fired_yields_no_event() {
        assert!(fuse(&source(), None, None, &empty_correlation()).is_none());
    }

    #[test]
    fn confidence_merges_with_correlation_signal() {
        let low_risk = DeterministicVerdict { risk_level: RiskLevel::Low, confidence: 40, ..high_risk_det() };
        let mut correlation = empty_correlation();
        correlation.correlation_score = 0.6;
        let result = fuse(&source(), Some(&low_risk), None, &correlation).unwrap();
        assert_eq!(result.confidence, 60);
    }
}
