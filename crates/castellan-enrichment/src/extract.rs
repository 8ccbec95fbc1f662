//! Candidate address extraction from a [`LogEvent`] message (§4.6).

use std::net::IpAddr;

use castellan_types::LogEvent;
use once_cell::sync::Lazy;
use regex::Regex;

/// Authentication-related event IDs (Security channel) where the
/// "Source Network Address" field is the authoritative source of the
/// remote address, rather than whatever address happens to appear first
/// in the raw message.
const AUTH_EVENT_IDS: &[u32] = &[4624, 4625, 4648, 4672, 4776];

static SOURCE_NETWORK_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Source Network Address:\s*([0-9a-fA-F:.]+)").unwrap());

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b").unwrap()
});

static IPV6_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{1,4}\b").unwrap());

/// Extract the single most relevant candidate address from `event`'s
/// message, per §4.6: auth events prefer "Source Network Address";
/// otherwise the first non-loopback, non-unspecified address found.
#[must_use]
pub fn extract_candidate(event: &LogEvent) -> Option<IpAddr> {
    if event.channel == "Security" && AUTH_EVENT_IDS.contains(&event.event_id) {
        if let Some(addr) = SOURCE_NETWORK_ADDRESS_RE
            .captures(&event.message)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_usable(m.as_str()))
        {
            return Some(addr);
        }
    }

    IPV4_RE
        .find_iter(&event.message)
        .filter_map(|m| parse_usable(m.as_str()))
        .next()
        .or_else(|| IPV6_RE.find_iter(&event.message).filter_map(|m| parse_usable(m.as_str())).next())
}

fn parse_usable(text: &str) -> Option<IpAddr> {
    let addr: IpAddr = text.parse().ok()?;
    if addr.is_unspecified() {
        return None;
    }
    Some(addr)
}
