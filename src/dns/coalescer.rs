//! In-flight lookup coalescing.
//!
//! At most one upstream lookup runs per domain. Callers arriving while a
//! lookup is in flight are queued and all receive the same result in the
//! order they arrived.

use super::{CachedResolution, DnsCache, DnsLookup, DomainName};
use dashmap::{mapref::entry::Entry, DashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Completion for a coalesced lookup. `None` means the lookup failed.
pub type Waiter = Box<dyn FnOnce(Option<CachedResolution>) + Send>;

type InFlight = DashMap<DomainName, std::sync::Mutex<Vec<Waiter>>>;

pub struct LookupCoalescer {
    lookup: Arc<dyn DnsLookup>,
    cache: Arc<DnsCache>,
    in_flight: Arc<InFlight>,
    max_ttl: Duration,
    ttl_factor: f64,
}

impl LookupCoalescer {
    pub fn new(
        lookup: Arc<dyn DnsLookup>,
        cache: Arc<DnsCache>,
        max_ttl: Duration,
        ttl_factor: f64,
    ) -> Self {
        Self {
            lookup,
            cache,
            in_flight: Arc::new(DashMap::new()),
            max_ttl,
            ttl_factor,
        }
    }

    /// Queues `waiter` behind the lookup for `domain`, starting one if none
    /// is in flight. Returns `true` when this call started the lookup.
    ///
    /// A `None` waiter registers interest without expecting a callback; used
    /// for background refreshes.
    pub fn join(&self, domain: DomainName, waiter: Option<Waiter>) -> bool {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(domain = %domain, "no Tokio runtime, HTTPDNS lookup skipped");
                if let Some(waiter) = waiter {
                    waiter(None);
                }
                return false;
            }
        };

        match self.in_flight.entry(domain.clone()) {
            Entry::Occupied(mut queued) => {
                if let Some(waiter) = waiter {
                    queued.get_mut().get_mut().unwrap().push(waiter);
                }
                tracing::trace!(domain = %domain, "joined in-flight HTTPDNS lookup");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(std::sync::Mutex::new(waiter.into_iter().collect()));
            }
        }

        let lookup = Arc::clone(&self.lookup);
        let cache = Arc::clone(&self.cache);
        let max_ttl = self.max_ttl;
        let ttl_factor = self.ttl_factor;
        let settle = Settle {
            domain: domain.clone(),
            in_flight: Arc::clone(&self.in_flight),
            resolution: None,
        };

        tracing::debug!(domain = %domain, "starting HTTPDNS lookup");
        handle.spawn(async move {
            let mut settle = settle;
            match lookup.lookup(domain.clone(), max_ttl).await {
                Ok(record) => {
                    tracing::debug!(
                        domain = %domain,
                        ip = %record.ip,
                        ttl_secs = record.ttl.as_secs(),
                        "HTTPDNS lookup complete"
                    );
                    let resolution = CachedResolution::from_record(record, ttl_factor);
                    cache.insert(domain, resolution);
                    settle.resolution = Some(resolution);
                }
                Err(e) => {
                    tracing::warn!(domain = %domain, error = %e, "HTTPDNS lookup failed");
                }
            }
            // `settle` drops here, or during unwinding if the lookup panicked.
        });

        true
    }

    /// Number of domains with a lookup in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, domain: &DomainName) -> bool {
        self.in_flight.contains_key(domain)
    }
}

/// Ends a lookup: clears its in-flight entry and answers every waiter.
struct Settle {
    domain: DomainName,
    in_flight: Arc<InFlight>,
    resolution: Option<CachedResolution>,
}

impl Drop for Settle {
    fn drop(&mut self) {
        let waiters = self
            .in_flight
            .remove(&self.domain)
            .map(|(_, waiters)| waiters.into_inner().unwrap())
            .unwrap_or_default();
        for waiter in waiters {
            let resolution = self.resolution;
            if panic::catch_unwind(AssertUnwindSafe(move || waiter(resolution))).is_err() {
                tracing::warn!(domain = %self.domain, "HTTPDNS waiter panicked");
            }
        }
    }
}

impl std::fmt::Debug for LookupCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCoalescer")
            .field("in_flight", &self.in_flight.len())
            .field("max_ttl", &self.max_ttl)
            .field("ttl_factor", &self.ttl_factor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Lookup, ResolutionRecord};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Lookup that blocks until released and counts its calls.
    struct GatedLookup {
        calls: AtomicUsize,
        release: Arc<Notify>,
        fail: bool,
    }

    impl DnsLookup for GatedLookup {
        fn lookup(&self, _domain: DomainName, _max_ttl: Duration) -> Lookup {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let release = Arc::clone(&self.release);
            let fail = self.fail;
            Box::pin(async move {
                release.notified().await;
                if fail {
                    Err(crate::base::neterror::NetError::transport(
                        crate::base::neterror::TransportErrorKind::NameNotResolved,
                        "gated failure",
                    ))
                } else {
                    Ok(ResolutionRecord::new(
                        IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
                        Duration::from_secs(300),
                    ))
                }
            })
        }
    }

    fn coalescer(fail: bool) -> (LookupCoalescer, Arc<GatedLookup>, Arc<DnsCache>) {
        let lookup = Arc::new(GatedLookup {
            calls: AtomicUsize::new(0),
            release: Arc::new(Notify::new()),
            fail,
        });
        let cache = Arc::new(DnsCache::new());
        let coalescer = LookupCoalescer::new(
            lookup.clone(),
            Arc::clone(&cache),
            Duration::from_secs(300),
            0.75,
        );
        (coalescer, lookup, cache)
    }

    #[tokio::test]
    async fn test_single_lookup_fifo_fanout() {
        let (coalescer, lookup, cache) = coalescer(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for i in 0..5 {
            let order = Arc::clone(&order);
            let tx = tx.clone();
            coalescer.join(
                DomainName::new("api.example.com"),
                Some(Box::new(move |result| {
                    order.lock().unwrap().push(i);
                    tx.send(result).unwrap();
                })),
            );
        }
        assert_eq!(coalescer.in_flight_count(), 1);

        lookup.release.notify_one();
        for _ in 0..5 {
            let result = rx.recv().await.unwrap().unwrap();
            assert_eq!(result.ip(), IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
            assert!(!result.served_from_cache);
        }

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(coalescer.in_flight_count(), 0);
        assert!(cache.get(&DomainName::new("api.example.com")).is_some());
    }

    #[tokio::test]
    async fn test_failure_fans_out_none() {
        let (coalescer, lookup, cache) = coalescer(true);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for _ in 0..3 {
            let tx = tx.clone();
            coalescer.join(
                DomainName::new("api.example.com"),
                Some(Box::new(move |result| tx.send(result).unwrap())),
            );
        }

        lookup.release.notify_one();
        for _ in 0..3 {
            assert!(rx.recv().await.unwrap().is_none());
        }
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
        assert!(!coalescer.is_in_flight(&DomainName::new("api.example.com")));
    }

    struct PanickingLookup;

    fn explode(domain: &DomainName) -> Result<ResolutionRecord, crate::base::neterror::NetError> {
        panic!("lookup for {} blew up", domain)
    }

    impl DnsLookup for PanickingLookup {
        fn lookup(&self, domain: DomainName, _max_ttl: Duration) -> Lookup {
            Box::pin(async move { explode(&domain) })
        }
    }

    #[tokio::test]
    async fn test_panicking_lookup_releases_waiters() {
        let coalescer = LookupCoalescer::new(
            Arc::new(PanickingLookup),
            Arc::new(DnsCache::new()),
            Duration::from_secs(300),
            0.75,
        );
        let domain = DomainName::new("api.example.com");
        let (tx, rx) = tokio::sync::oneshot::channel();

        assert!(coalescer.join(
            domain.clone(),
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        ));

        assert!(rx.await.unwrap().is_none());
        assert!(!coalescer.is_in_flight(&domain));
        // The next caller starts a fresh lookup instead of queueing forever.
        assert!(coalescer.join(domain, None));
    }

    #[tokio::test]
    async fn test_panicking_waiter_does_not_starve_others() {
        let (coalescer, lookup, _cache) = coalescer(false);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let domain = DomainName::new("api.example.com");

        coalescer.join(domain.clone(), Some(Box::new(|_| panic!("waiter failed"))));
        coalescer.join(
            domain.clone(),
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        );

        lookup.release.notify_one();
        assert!(rx.await.unwrap().is_some());
        assert!(!coalescer.is_in_flight(&domain));
    }

    #[test]
    fn test_without_runtime_fails_waiter() {
        let (coalescer, lookup, _cache) = coalescer(false);
        let called = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&called);

        let started = coalescer.join(
            DomainName::new("api.example.com"),
            Some(Box::new(move |result| {
                assert!(result.is_none());
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert!(!started);
        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }
}
