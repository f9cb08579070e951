//! Core lookup types and traits.
//!
//! This module defines the `DnsLookup` trait and supporting types that the
//! HTTPDNS cache sits in front of.

use crate::base::neterror::{NetError, TransportErrorKind};
use std::{
    collections::HashMap, fmt, future::Future, net::IpAddr, pin::Pin, sync::Arc, time::Duration,
};

/// A domain name used as a cache key.
///
/// Normalised on construction: surrounding whitespace and a single trailing
/// dot are removed and the name is lower-cased.
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct DomainName {
    host: Box<str>,
}

impl DomainName {
    /// Creates a new [`DomainName`] from any string-like type.
    pub fn new(host: impl AsRef<str>) -> Self {
        let trimmed = host.as_ref().trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
        Self {
            host: trimmed.to_ascii_lowercase().into_boxed_str(),
        }
    }

    /// View the domain as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }
}

impl From<&str> for DomainName {
    fn from(value: &str) -> Self {
        DomainName::new(value)
    }
}

impl From<String> for DomainName {
    fn from(value: String) -> Self {
        DomainName::new(value)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// One answer from the lookup service. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionRecord {
    pub ip: IpAddr,
    pub ttl: Duration,
}

impl ResolutionRecord {
    pub fn new(ip: IpAddr, ttl: Duration) -> Self {
        Self { ip, ttl }
    }
}

/// Alias for the `Future` type returned by a lookup service.
pub type Lookup = Pin<Box<dyn Future<Output = Result<ResolutionRecord, NetError>> + Send>>;

/// An upstream HTTPDNS-style lookup service.
///
/// Each call is a single attempt; coalescing concurrent calls for the same
/// domain is the cache's job, not the implementor's.
pub trait DnsLookup: Send + Sync {
    /// Look up `domain`. `max_ttl` caps the TTL the service may report.
    fn lookup(&self, domain: DomainName, max_ttl: Duration) -> Lookup;
}

impl<L: DnsLookup + ?Sized> DnsLookup for Arc<L> {
    fn lookup(&self, domain: DomainName, max_ttl: Duration) -> Lookup {
        (**self).lookup(domain, max_ttl)
    }
}

/// Lookup service answering from a fixed table.
///
/// Domains missing from the table go to the optional fallback service, or
/// fail with `NameNotResolved`. Useful for:
/// - Testing without a real lookup service
/// - Pinning specific IPs for certain domains
///
/// # Example
///
/// ```rust,ignore
/// use mixednet::dns::{StaticLookup, ResolutionRecord};
///
/// let lookup = StaticLookup::new()
///     .with_record("api.example.com", ResolutionRecord::new(
///         "1.2.3.4".parse().unwrap(),
///         Duration::from_secs(300),
///     ));
/// ```
#[derive(Default)]
pub struct StaticLookup {
    records: HashMap<DomainName, ResolutionRecord>,
    fallback: Option<Arc<dyn DnsLookup>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the record for `domain`.
    pub fn with_record(mut self, domain: impl Into<DomainName>, record: ResolutionRecord) -> Self {
        self.records.insert(domain.into(), record);
        self
    }

    /// Sets the service consulted for domains not in the table.
    pub fn with_fallback(mut self, fallback: Arc<dyn DnsLookup>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Returns the number of configured records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl DnsLookup for StaticLookup {
    fn lookup(&self, domain: DomainName, max_ttl: Duration) -> Lookup {
        if let Some(record) = self.records.get(&domain) {
            let record = ResolutionRecord::new(record.ip, record.ttl.min(max_ttl));
            return Box::pin(std::future::ready(Ok(record)));
        }
        match &self.fallback {
            Some(fallback) => fallback.lookup(domain, max_ttl),
            None => Box::pin(std::future::ready(Err(NetError::transport(
                TransportErrorKind::NameNotResolved,
                format!("no static record for {}", domain),
            )))),
        }
    }
}

impl fmt::Debug for StaticLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLookup")
            .field("record_count", &self.records.len())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}
