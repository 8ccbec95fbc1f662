//! Per-address TTL cache for resolved enrichments (§4.6: "caches results
//! per address with a configurable TTL, default 24h").

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use castellan_types::IpEnrichment;
use tokio::sync::RwLock;

struct Entry {
    value: IpEnrichment,
    inserted_at: Instant,
}

/// Hit/miss counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Lookups served from a non-expired cache entry.
    pub hits: u64,
    /// Lookups that required (or would have required) a provider call.
    pub misses: u64,
    /// Entries currently held, including expired-but-not-yet-evicted ones.
    pub len: usize,
}

pub struct TtlCache {
    ttl: Duration,
    entries: RwLock<HashMap<IpAddr, Entry>>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn get(&self, ip: IpAddr) -> Option<IpEnrichment> {
        let entries = self.entries.read().await;
        match entries.get(&ip) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert(&self, ip: IpAddr, value: IpEnrichment) {
        let mut entries = self.entries.write().await;
        entries.insert(ip, Entry { value, inserted_at: Instant::now() });
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
            len: entries.len(),
        }
    }
}
