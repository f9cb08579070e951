//! The HTTPDNS service: cache, coalescer and network gate behind one handle.

use super::{
    AddressTracker, CachedResolution, DnsCache, DnsLookup, DomainName, LookupCoalescer,
    NetworkMonitor, UdpProbeMonitor, Waiter, DEFAULT_TTL_FACTOR,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for [`HttpDns`].
#[derive(Debug, Clone)]
pub struct HttpDnsConfig {
    /// Upper bound on the TTL the lookup service may report.
    pub max_ttl: Duration,
    /// Share of the TTL a record is served for before it expires locally.
    pub ttl_factor: f64,
    /// Whether a synchronous miss schedules a background lookup.
    pub refresh_on_miss: bool,
}

impl Default for HttpDnsConfig {
    fn default() -> Self {
        Self {
            max_ttl: Duration::from_secs(300),
            ttl_factor: DEFAULT_TTL_FACTOR,
            refresh_on_miss: true,
        }
    }
}

/// Process-wide HTTPDNS result cache with lookup coalescing.
///
/// Construct one per application and share it as `Arc<HttpDns>` between
/// every client that routes through the resolver stage. Tests build their
/// own isolated instances.
///
/// Every query is gated on the local network: if the device has no IPv4
/// address the query returns `None` without touching the cache or the
/// lookup service, and a change of local address clears the cache.
///
/// # Example
///
/// ```rust,ignore
/// use mixednet::dns::{HickoryLookup, HttpDns, HttpDnsConfig};
///
/// let dns = Arc::new(HttpDns::new(Arc::new(HickoryLookup::new()), HttpDnsConfig::default()));
/// if let Some(hit) = dns.resolve("api.example.com").await {
///     println!("{} (cached: {})", hit.ip(), hit.served_from_cache);
/// }
/// ```
pub struct HttpDns {
    cache: Arc<DnsCache>,
    coalescer: LookupCoalescer,
    monitor: Arc<dyn NetworkMonitor>,
    tracker: AddressTracker,
    config: HttpDnsConfig,
}

impl HttpDns {
    /// Service gated by a [`UdpProbeMonitor`].
    pub fn new(lookup: Arc<dyn DnsLookup>, config: HttpDnsConfig) -> Self {
        Self::with_monitor(lookup, Arc::new(UdpProbeMonitor::new()), config)
    }

    pub fn with_monitor(
        lookup: Arc<dyn DnsLookup>,
        monitor: Arc<dyn NetworkMonitor>,
        config: HttpDnsConfig,
    ) -> Self {
        let cache = Arc::new(DnsCache::new());
        let coalescer =
            LookupCoalescer::new(lookup, Arc::clone(&cache), config.max_ttl, config.ttl_factor);
        Self {
            cache,
            coalescer,
            monitor,
            tracker: AddressTracker::new(),
            config,
        }
    }

    /// Runs the network gate. Clears the cache on a change and reports
    /// whether HTTPDNS may be used right now.
    fn gate(&self, domain: &DomainName) -> bool {
        let observation = self.tracker.observe(self.monitor.current_address());
        if observation.changed() {
            tracing::debug!(domain = %domain, "network changed, clearing HTTPDNS cache");
            self.cache.invalidate_all();
        }
        if !observation.is_ipv4() {
            tracing::trace!(domain = %domain, "no IPv4 network, HTTPDNS bypassed");
            return false;
        }
        true
    }

    /// Cache-only lookup. Never waits on the network.
    ///
    /// With `refresh_on_miss`, a miss starts a background lookup (joined
    /// with any already in flight) so a later query can hit.
    pub fn query(&self, domain: impl Into<DomainName>) -> Option<CachedResolution> {
        let domain = domain.into();
        if !self.gate(&domain) {
            return None;
        }
        let hit = self.cache.get(&domain);
        if hit.is_none() && self.config.refresh_on_miss {
            self.coalescer.join(domain, None);
        }
        hit
    }

    /// Cache hit: `completion` runs before this returns. Miss: `completion`
    /// is queued behind the single in-flight lookup for the domain and runs
    /// on the lookup task. `None` means no usable answer.
    pub fn query_async<F>(&self, domain: impl Into<DomainName>, completion: F)
    where
        F: FnOnce(Option<CachedResolution>) + Send + 'static,
    {
        let domain = domain.into();
        if !self.gate(&domain) {
            completion(None);
            return;
        }
        if let Some(hit) = self.cache.get(&domain) {
            tracing::trace!(domain = %domain, ip = %hit.ip(), "HTTPDNS cache hit");
            completion(Some(hit));
            return;
        }
        let waiter: Waiter = Box::new(completion);
        self.coalescer.join(domain, Some(waiter));
    }

    /// Async form of [`query_async`](Self::query_async).
    pub async fn resolve(&self, domain: impl Into<DomainName>) -> Option<CachedResolution> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.query_async(domain, move |result| {
            let _ = tx.send(result);
        });
        rx.await.ok().flatten()
    }

    /// Drops the cached answer for `domain`, e.g. after a request to its IP
    /// failed. Historical IPs stay in the reverse index.
    pub fn invalidate(&self, domain: impl Into<DomainName>) {
        let domain = domain.into();
        if self.cache.invalidate(&domain) {
            tracing::debug!(domain = %domain, "invalidated HTTPDNS entry");
        }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Maps an IP previously handed out back to the domain it was resolved
    /// for.
    pub fn origin_domain(&self, ip: IpAddr) -> Option<DomainName> {
        self.cache.origin_domain(ip)
    }

    /// Forward cache entries, expired ones included.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.coalescer.in_flight_count()
    }

    pub fn config(&self) -> &HttpDnsConfig {
        &self.config
    }
}

impl std::fmt::Debug for HttpDns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDns")
            .field("entries", &self.cache.len())
            .field("coalescer", &self.coalescer)
            .field("config", &self.config)
            .finish()
    }
}
