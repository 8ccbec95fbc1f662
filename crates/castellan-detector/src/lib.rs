#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-detector** – deterministic `(channel, event_id)` classifier
//! for the Castellan detection core (C5).
//!
//! A pure function of the [`LogEvent`]: no I/O, no shared state, no async.
//! Unknown `(channel, event_id)` pairs return `None`.

use castellan_types::{EventType, LogEvent, RiskLevel};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Provisional classification produced by the deterministic table, prior
/// to fusion (§4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Closed classification.
    pub event_type: EventType,
    /// Coarse severity bucket.
    pub risk_level: RiskLevel,
    /// Confidence in `[0, 100]`.
    pub confidence: u8,
    /// Ordered MITRE ATT&CK technique identifiers.
    pub mitre_techniques: Vec<String>,
    /// Ordered recommended remediation actions.
    pub recommended_actions: Vec<String>,
    /// Human-readable summary.
    pub summary: String,
}

struct TableEntry {
    event_type: EventType,
    risk_level: RiskLevel,
    confidence: u8,
    mitre_techniques: &'static [&'static str],
    recommended_actions: &'static [&'static str],
    summary: &'static str,
}

type TableKey = (&'static str, u32);

static TABLE: Lazy<HashMap<TableKey, TableEntry>> = Lazy::new(|| {
    let mut m: HashMap<TableKey, TableEntry> = HashMap::new();

    m.insert(
        ("Security", 4624),
        TableEntry {
            event_type: EventType::AuthenticationSuccess,
            risk_level: RiskLevel::Low,
            confidence: 60,
            mitre_techniques: &[],
            recommended_actions: &["Verify logon source is expected for this account"],
            summary: "Successful account logon",
        },
    );
    m.insert(
        ("Security", 4625),
        TableEntry {
            event_type: EventType::AuthenticationFailure,
            risk_level: RiskLevel::Low,
            confidence: 55,
            mitre_techniques: &["T1110"],
            recommended_actions: &["Monitor for repeated failures from the same source"],
            summary: "Failed account logon attempt",
        },
    );
    m.insert(
        ("Security", 4672),
        TableEntry {
            event_type: EventType::PrivilegeEscalation,
            risk_level: RiskLevel::High,
            confidence: 75,
            mitre_techniques: &["T1078"],
            recommended_actions: &[
                "Confirm the account is authorized for administrative privileges",
                "Review recent activity for this account",
            ],
            summary: "Special privileges assigned to new logon",
        },
    );
    m.insert(
        ("Security", 4688),
        TableEntry {
            event_type: EventType::ProcessCreation,
            risk_level: RiskLevel::Low,
            confidence: 40,
            mitre_techniques: &[],
            recommended_actions: &["Review parent/child process lineage if unexpected"],
            summary: "New process created",
        },
    );
    m.insert(
        ("Security", 4697),
        TableEntry {
            event_type: EventType::ServiceInstallation,
            risk_level: RiskLevel::High,
            confidence: 70,
            mitre_techniques: &["T1543.003"],
            recommended_actions: &["Verify the service binary path and publisher"],
            summary: "A service was installed on the system",
        },
    );
    m.insert(
        ("Security", 4698),
        TableEntry {
            event_type: EventType::ScheduledTask,
            risk_level: RiskLevel::Medium,
            confidence: 65,
            mitre_techniques: &["T1053.005"],
            recommended_actions: &["Review the scheduled task action and trigger"],
            summary: "A scheduled task was created",
        },
    );
    m.insert(
        ("Security", 4720),
        TableEntry {
            event_type: EventType::AccountManagement,
            risk_level: RiskLevel::Medium,
            confidence: 60,
            mitre_techniques: &["T1136"],
            recommended_actions: &["Confirm the new account was expected"],
            summary: "A user account was created",
        },
    );
    m.insert(
        ("Security", 4732),
        TableEntry {
            event_type: EventType::AccountManagement,
            risk_level: RiskLevel::Medium,
            confidence: 65,
            mitre_techniques: &["T1098"],
            recommended_actions: &["Confirm the account was intended to join this group"],
            summary: "A member was added to a security-enabled local group",
        },
    );
    m.insert(
        ("Security", 4719),
        TableEntry {
            event_type: EventType::PolicyChange,
            risk_level: RiskLevel::High,
            confidence: 70,
            mitre_techniques: &["T1562.002"],
            recommended_actions: &["Review the audit policy change for legitimacy"],
            summary: "System audit policy was changed",
        },
    );
    m.insert(
        ("Security", 5156),
        TableEntry {
            event_type: EventType::NetworkConnection,
            risk_level: RiskLevel::Low,
            confidence: 35,
            mitre_techniques: &[],
            recommended_actions: &["Correlate with destination reputation if unusual"],
            summary: "The Windows Filtering Platform permitted a connection",
        },
    );
    m.insert(
        ("Microsoft-Windows-PowerShell/Operational", 4104),
        TableEntry {
            event_type: EventType::PowerShellExecution,
            risk_level: RiskLevel::Medium,
            confidence: 55,
            mitre_techniques: &["T1059.001"],
            recommended_actions: &["Review script block content for obfuscation or suspicious cmdlets"],
            summary: "PowerShell script block executed",
        },
    );

    m
});

/// Classify `event` against the static `(channel, event_id)` table (§4.4).
///
/// Returns `None` for unrecognized pairs; the catch-all `EventType::Other`
/// classification is the fusion engine's responsibility when every signal
/// is absent, not this function's (§3 invariant: `event_type == Other` iff
/// no classifier fired — the detector itself simply abstains).
#[must_use]
pub fn detect(event: &LogEvent) -> Option<Verdict> {
    let key: TableKey = (leak_or_match(&event.channel)?, event.event_id);
    TABLE.get(&key).map(|entry| Verdict {
        event_type: entry.event_type,
        risk_level: entry.risk_level,
        confidence: entry.confidence,
        mitre_techniques: entry.mitre_techniques.iter().map(|s| (*s).to_string()).collect(),
        recommended_actions: entry.recommended_actions.iter().map(|s| (*s).to_string()).collect(),
        summary: entry.summary.to_string(),
    })
}

/// Match `channel` against the table's static channel names without
/// allocating a `&'static str` from a runtime `String` (the table is keyed
/// by `&'static str` for zero-cost lookups).
fn leak_or_match(channel: &str) -> Option<&'static str> {
    const KNOWN_CHANNELS: &[&str] = &["Security", "Microsoft-Windows-PowerShell/Operational"];
    KNOWN_CHANNELS.iter().find(|c| **c == channel).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(channel: &str, event_id: u32) -> LogEvent {
        LogEvent::new(
            Utc::now(),
            "DC-01",
            channel,
            event_id,
            "Information",
            Some("admin".to_string()),
            "message",
            "<Event/>",
            "id-1",
        )
        .unwrap()
    }

    #[test]
    fn known_pair_returns_verdict() {
        let verdict = detect(&event("Security", 4672)).unwrap();
        assert_eq!(verdict.event_type, EventType::PrivilegeEscalation);
        assert_eq!(verdict.risk_level, RiskLevel::High);
    }

    #[test]
    fn unknown_pair_returns_none() {
        assert!(detect(&event("Security", 9999)).is_none());
    }

    #[test]
    fn unknown_channel_returns_none() {
        assert!(detect(&event("Application", 4624)).is_none());
    }

    #[test]
    fn is_pure_same_input_same_output() {
        let e = event("Security", 4625);
        assert_eq!(detect(&e), detect(&e));
    }
}
