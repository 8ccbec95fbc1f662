#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-enrichment** – IP address extraction and geo/ASN/risk
//! enrichment (C7).
//!
//! Extraction is pure and synchronous; the geo/ASN lookup itself is an
//! async, swappable [`GeoProvider`] seam — the same provider-trait shape
//! used by `castellan-llm`'s `LlmProvider` and grounded on the reference
//! workspace's `GeographicalPolicy`, which resolves an IP to a country
//! code behind a single pluggable method. Results are cached per address
//! with a TTL, and every lookup is bounded by a deadline (§4.6): on
//! timeout or provider failure the caller gets `None`, never an error.

mod cache;
mod extract;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use castellan_types::{IpEnrichment, LogEvent};
use tokio::sync::RwLock;
use tracing::debug;

pub use cache::CacheStats;
pub use extract::extract_candidate;

/// Default cache time-to-live for a resolved address (§4.6: "default
/// 24h").
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default lookup deadline (§4.6: "default 2s").
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(2);

/// Geo/ASN facts about an IP address, independent of any specific
/// backend. [`EnrichmentService`] folds this together with
/// locally-computed fields (`is_private`, risk scoring) into the public
/// [`IpEnrichment`] type.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    /// Full country name.
    pub country: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country_code: String,
    /// City name, if resolvable.
    pub city: Option<String>,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Autonomous system number.
    pub asn: u32,
    /// Autonomous system organization name.
    pub asn_organization: String,
}

/// Abstract geo/ASN backend. Mirrors the reference workspace's
/// `GeographicalPolicy::get_country_code` seam, generalized to return a
/// full [`GeoRecord`] rather than just a country code.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Resolve `ip` to geo/ASN facts, or `None` if unresolvable.
    async fn lookup(&self, ip: IpAddr) -> Option<GeoRecord>;
}

/// A provider backed by a small static table, keyed by exact address.
/// Real deployments plug in a MaxMind-style database or a remote geo-IP
/// API; this is the dependency-free default and the shape used in tests.
#[derive(Debug, Default)]
pub struct StaticGeoProvider {
    table: std::collections::HashMap<IpAddr, GeoRecord>,
}

impl StaticGeoProvider {
    /// An empty provider: every lookup resolves to `None`, matching the
    /// reference implementation's "no GeoIP database available" stub.
    #[must_use]
    pub fn new() -> Self {
        Self { table: std::collections::HashMap::new() }
    }

    /// Seed a known address with its geo/ASN record.
    #[must_use]
    pub fn with_record(mut self, ip: IpAddr, record: GeoRecord) -> Self {
        self.table.insert(ip, record);
        self
    }
}

#[async_trait]
impl GeoProvider for StaticGeoProvider {
    async fn lookup(&self, ip: IpAddr) -> Option<GeoRecord> {
        self.table.get(&ip).cloned()
    }
}

/// Enrichment failures. Per §4.6/§7, the service never propagates these:
/// `enrich` always returns `Option<IpEnrichment>`, folding any failure
/// into `None`. The error type exists for internal bookkeeping and for
/// embedding applications that want to log the distinction.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// No address could be extracted from the event.
    #[error("no ip address found in event")]
    NoAddress,
    /// The provider did not resolve before the deadline elapsed.
    #[error("enrichment deadline exceeded")]
    DeadlineExceeded,
}

/// Countries treated as elevated risk, contributing to `is_high_risk`
/// and `risk_factors` (§4.6). Grounded on the reference workspace's
/// `GeographicalPolicy::blocked_countries`, repurposed here as a risk
/// signal rather than an access-control gate, since blocking traffic is
/// out of this component's scope.
#[derive(Debug, Clone, Default)]
pub struct RiskPolicy {
    high_risk_countries: Vec<String>,
}

impl RiskPolicy {
    /// An empty policy: nothing is flagged high-risk by country alone.
    #[must_use]
    pub fn new() -> Self {
        Self { high_risk_countries: Vec::new() }
    }

    /// Flag `country_code` as elevated risk.
    #[must_use]
    pub fn with_high_risk_country(mut self, country_code: impl Into<String>) -> Self {
        self.high_risk_countries.push(country_code.into());
        self
    }

    fn assess(&self, record: &GeoRecord, is_private: bool) -> (bool, Vec<String>) {
        let mut factors = Vec::new();
        if self.high_risk_countries.iter().any(|c| c == &record.country_code) {
            factors.push(format!("high_risk_country:{}", record.country_code));
        }
        if !is_private && record.asn_organization.is_empty() {
            factors.push("unresolved_asn".to_string());
        }
        (!factors.is_empty(), factors)
    }
}

/// Enrichment service: extracts a candidate address, resolves it through
/// a [`GeoProvider`] within [`DEFAULT_DEADLINE`], and caches the result
/// for [`DEFAULT_TTL`] (§4.6).
pub struct EnrichmentService {
    provider: Arc<dyn GeoProvider>,
    policy: RiskPolicy,
    cache: cache::TtlCache,
    deadline: Duration,
}

impl EnrichmentService {
    /// Construct a service with the default TTL and deadline.
    #[must_use]
    pub fn new(provider: Arc<dyn GeoProvider>, policy: RiskPolicy) -> Self {
        Self { provider, policy, cache: cache::TtlCache::new(DEFAULT_TTL), deadline: DEFAULT_DEADLINE }
    }

    /// Override the cache TTL and lookup deadline.
    #[must_use]
    pub fn with_ttl_and_deadline(mut self, ttl: Duration, deadline: Duration) -> Self {
        self.cache = cache::TtlCache::new(ttl);
        self.deadline = deadline;
        self
    }

    /// Enrich `event` with IP/geo/ASN/risk metadata, or `None` if no
    /// address could be extracted (§4.6). The extracted address is
    /// always surfaced as `destination_address` — a correlation key for
    /// lateral-movement detection (§4.9) — even when geo resolution
    /// fails or times out, so a failed lookup does not silently drop the
    /// only thing the correlation engine needs.
    pub async fn enrich(&self, event: &LogEvent) -> Option<IpEnrichment> {
        let ip = extract_candidate(event)?;

        if let Some(cached) = self.cache.get(ip).await {
            return Some(cached);
        }

        let is_private = is_private_address(ip);
        let resolved = tokio::time::timeout(self.deadline, self.provider.lookup(ip)).await;
        let record = match resolved {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(%ip, "geo provider did not resolve address");
                return Some(address_only_enrichment(ip, is_private));
            }
            Err(_) => {
                debug!(%ip, deadline_ms = self.deadline.as_millis(), "ip enrichment deadline exceeded");
                return Some(address_only_enrichment(ip, is_private));
            }
        };

        let (is_high_risk, risk_factors) = self.policy.assess(&record, is_private);

        let enrichment = IpEnrichment {
            ip: ip.to_string(),
            country: Some(record.country),
            country_code: Some(record.country_code),
            city: record.city,
            latitude: Some(record.latitude),
            longitude: Some(record.longitude),
            asn: Some(record.asn),
            asn_organization: Some(record.asn_organization),
            is_high_risk,
            risk_factors,
            is_private,
            destination_address: Some(ip.to_string()),
        };

        self.cache.insert(ip, enrichment.clone()).await;
        Some(enrichment)
    }

    /// Current cache occupancy and hit/miss counters, for diagnostics.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

fn is_private_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// An enrichment record with nothing but the extracted address and its
/// privacy classification — used when geo resolution fails or times
/// out, so the address still reaches correlation (§4.9) as a key even
/// without a risk assessment.
fn address_only_enrichment(ip: IpAddr, is_private: bool) -> IpEnrichment {
    IpEnrichment {
        ip: ip.to_string(),
        country: None,
        country_code: None,
        city: None,
        latitude: None,
        longitude: None,
        asn: None,
        asn_organization: None,
        is_high_risk: false,
        risk_factors: Vec::new(),
        is_private,
        destination_address: Some(ip.to_string()),
    }
}
