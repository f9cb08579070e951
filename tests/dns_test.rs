//! HTTPDNS Tests
//!
//! Covers:
//! - Coalescing of concurrent lookups for one domain
//! - TTL scaling and expiry
//! - Network gating and cache clearing on address change
//! - Reverse IP index

use mixednet::dns::{
    DnsLookup, DomainName, HttpDns, HttpDnsConfig, Lookup, ResolutionRecord, StaticLookup,
    StaticNetwork,
};
use mixednet::base::neterror::{NetError, TransportErrorKind};

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
}

/// Lookup that blocks until released and counts calls.
struct SlowLookup {
    calls: AtomicUsize,
    release: Arc<Notify>,
    answer: Option<IpAddr>,
}

impl DnsLookup for SlowLookup {
    fn lookup(&self, domain: DomainName, _max_ttl: Duration) -> Lookup {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let release = Arc::clone(&self.release);
        let answer = self.answer;
        Box::pin(async move {
            release.notified().await;
            match answer {
                Some(ip) => Ok(ResolutionRecord::new(ip, Duration::from_secs(100))),
                None => Err(NetError::transport(
                    TransportErrorKind::NameNotResolved,
                    format!("{} unknown", domain),
                )),
            }
        })
    }
}

fn slow(answer: Option<IpAddr>) -> (Arc<SlowLookup>, Arc<Notify>) {
    let release = Arc::new(Notify::new());
    (
        Arc::new(SlowLookup {
            calls: AtomicUsize::new(0),
            release: Arc::clone(&release),
            answer,
        }),
        release,
    )
}

fn service(lookup: Arc<dyn DnsLookup>, network: Arc<StaticNetwork>) -> Arc<HttpDns> {
    Arc::new(HttpDns::with_monitor(lookup, network, HttpDnsConfig::default()))
}

#[tokio::test]
async fn test_concurrent_queries_share_one_lookup() {
    let (lookup, release) = slow(Some(ip(7)));
    let dns = service(lookup.clone(), Arc::new(StaticNetwork::ipv4()));

    let mut receivers = Vec::new();
    for _ in 0..5 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        dns.query_async("api.example.com", move |hit| {
            let _ = tx.send(hit);
        });
        receivers.push(rx);
    }
    assert_eq!(dns.in_flight_count(), 1);

    tokio::task::yield_now().await;
    release.notify_one();

    for rx in receivers {
        let hit = rx.await.unwrap().unwrap();
        assert_eq!(hit.ip(), ip(7));
        assert!(!hit.served_from_cache);
    }
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    assert_eq!(dns.in_flight_count(), 0);

    // Later queries are answered from the cache.
    let cached = dns.query("api.example.com").unwrap();
    assert!(cached.served_from_cache);
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_lookup_notifies_every_waiter() {
    let (lookup, release) = slow(None);
    let dns = service(lookup, Arc::new(StaticNetwork::ipv4()));

    let (tx1, rx1) = tokio::sync::oneshot::channel();
    let (tx2, rx2) = tokio::sync::oneshot::channel();
    dns.query_async("gone.example.com", move |hit| {
        let _ = tx1.send(hit);
    });
    dns.query_async("gone.example.com", move |hit| {
        let _ = tx2.send(hit);
    });

    tokio::task::yield_now().await;
    release.notify_one();

    assert!(rx1.await.unwrap().is_none());
    assert!(rx2.await.unwrap().is_none());
    assert!(dns.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_at_scaled_ttl() {
    let lookup = StaticLookup::new().with_record(
        "api.example.com",
        ResolutionRecord::new(ip(1), Duration::from_secs(100)),
    );
    let dns = Arc::new(HttpDns::with_monitor(
        Arc::new(lookup),
        Arc::new(StaticNetwork::ipv4()),
        HttpDnsConfig {
            refresh_on_miss: false,
            ..HttpDnsConfig::default()
        },
    ));

    dns.resolve("api.example.com").await.unwrap();

    tokio::time::advance(Duration::from_secs(74)).await;
    assert!(dns.query("api.example.com").is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(dns.query("api.example.com").is_none());
}

#[tokio::test]
async fn test_network_change_clears_cache() {
    let network = Arc::new(StaticNetwork::ipv4());
    let lookup = StaticLookup::new()
        .with_record("a.example.com", ResolutionRecord::new(ip(1), Duration::from_secs(300)))
        .with_record("b.example.com", ResolutionRecord::new(ip(2), Duration::from_secs(300)));
    let dns = service(Arc::new(lookup), network.clone());

    dns.resolve("a.example.com").await.unwrap();
    dns.resolve("b.example.com").await.unwrap();
    assert_eq!(dns.len(), 2);

    network.set_address(Some(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 9))));
    let (tx, rx) = tokio::sync::oneshot::channel();
    dns.query_async("a.example.com", move |hit| {
        let _ = tx.send(hit);
    });

    // The gate cleared both entries before the lookup for `a` started.
    assert!(dns.query("b.example.com").is_none());
    let fresh = rx.await.unwrap().unwrap();
    assert!(!fresh.served_from_cache);
}

#[tokio::test]
async fn test_ipv6_network_bypasses_resolver() {
    let lookup = StaticLookup::new()
        .with_record("api.example.com", ResolutionRecord::new(ip(1), Duration::from_secs(300)));
    let dns = service(Arc::new(lookup), Arc::new(StaticNetwork::ipv6()));

    assert!(dns.resolve("api.example.com").await.is_none());
    assert!(dns.query("api.example.com").is_none());
    assert_eq!(dns.in_flight_count(), 0);
}

#[tokio::test]
async fn test_reverse_index_survives_invalidation() {
    let lookup = StaticLookup::new()
        .with_record("api.example.com", ResolutionRecord::new(ip(3), Duration::from_secs(300)));
    let dns = service(Arc::new(lookup), Arc::new(StaticNetwork::ipv4()));

    dns.resolve("api.example.com").await.unwrap();
    dns.invalidate("api.example.com");

    assert!(dns.query("api.example.com").is_none());
    assert_eq!(
        dns.origin_domain(ip(3)),
        Some(DomainName::new("api.example.com"))
    );
    assert_eq!(dns.origin_domain(ip(4)), None);
}
