//! HTTPDNS result cache.
//!
//! A forward map (domain -> resolution) with TTL-based expiry, plus a reverse
//! index (domain -> every IP ever cached for it) used to map a connected IP
//! back to its origin domain during certificate validation. Live entries are
//! consulted before the history.

use super::{DomainName, ResolutionRecord};
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Default share of the upstream TTL a record is served for.
pub const DEFAULT_TTL_FACTOR: f64 = 0.75;

/// A cached lookup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedResolution {
    pub record: ResolutionRecord,
    pub expires_at: Instant,
    /// `false` only on the value handed out by the lookup that produced it.
    pub served_from_cache: bool,
}

impl CachedResolution {
    /// Build from a fresh record: `expires_at = now + ttl * factor`.
    pub fn from_record(record: ResolutionRecord, ttl_factor: f64) -> Self {
        let lifetime = record.ttl.mul_f64(ttl_factor.clamp(0.0, 1.0));
        Self {
            record,
            expires_at: Instant::now() + lifetime,
            served_from_cache: false,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.record.ip
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Thread-safe HTTPDNS cache.
///
/// Readers run concurrently; writes exclude other access to the same shard.
#[derive(Debug, Default)]
pub struct DnsCache {
    forward: DashMap<DomainName, CachedResolution>,
    reverse: DashMap<DomainName, HashSet<IpAddr>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the unexpired entry for `domain`. An expired entry is evicted
    /// and reported as a miss.
    pub fn get(&self, domain: &DomainName) -> Option<CachedResolution> {
        let entry = *self.forward.get(domain)?;
        if entry.is_expired() {
            self.forward.remove_if(domain, |_, cached| cached.is_expired());
            tracing::debug!(domain = %domain, "evicted expired HTTPDNS entry");
            return None;
        }
        Some(entry)
    }

    /// Stores `resolution` (last write wins) and records its IP in the
    /// reverse index. The stored copy is marked as served from cache.
    pub fn insert(&self, domain: DomainName, resolution: CachedResolution) {
        let ip = resolution.ip();
        self.forward.insert(
            domain.clone(),
            CachedResolution {
                served_from_cache: true,
                ..resolution
            },
        );
        self.reverse.entry(domain).or_default().insert(ip);
    }

    /// Removes the forward entry only.
    pub fn invalidate(&self, domain: &DomainName) -> bool {
        self.forward.remove(domain).is_some()
    }

    /// Clears the forward cache. The reverse index is kept.
    pub fn invalidate_all(&self) {
        self.forward.clear();
    }

    /// Finds the domain an IP was cached for.
    ///
    /// A domain whose unexpired forward entry holds `ip` wins over domains
    /// that only held it in the past; several IPs can be shared behind one
    /// CDN edge.
    pub fn origin_domain(&self, ip: IpAddr) -> Option<DomainName> {
        let live = self
            .forward
            .iter()
            .find(|entry| entry.value().ip() == ip && !entry.value().is_expired())
            .map(|entry| entry.key().clone());
        live.or_else(|| {
            self.reverse
                .iter()
                .find(|entry| entry.value().contains(&ip))
                .map(|entry| entry.key().clone())
        })
    }

    /// Number of forward entries, expired ones included.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Forward entry without the expiry check.
    pub fn peek(&self, domain: &DomainName) -> Option<CachedResolution> {
        self.forward.get(domain).map(|entry| *entry)
    }
}
