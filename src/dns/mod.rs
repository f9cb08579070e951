//! HTTPDNS Module
//!
//! A client-side result cache and coalescer in front of an HTTPDNS-style
//! lookup service:
//! - TTL-bounded forward cache plus a reverse IP index
//! - One in-flight lookup per domain, results fanned out to every waiter
//! - IPv4 gating and network-change invalidation
//!
//! # Architecture
//!
//! The `DnsLookup` trait is the boundary to the upstream service; this
//! module never speaks the DNS wire protocol itself. `HttpDns` is an
//! explicitly constructed service, shared as `Arc<HttpDns>` by every client
//! that wants it.
//!
//! # Example
//!
//! ```rust,ignore
//! use mixednet::dns::{HickoryLookup, HttpDns, HttpDnsConfig};
//!
//! let dns = HttpDns::new(Arc::new(HickoryLookup::new()), HttpDnsConfig::default());
//! dns.query_async("api.example.com", |hit| {
//!     if let Some(hit) = hit {
//!         println!("Resolved: {}", hit.ip());
//!     }
//! });
//! ```

mod cache;
mod coalescer;
mod hickory;
mod httpdns;
mod lookup;
mod network;

pub use cache::{CachedResolution, DnsCache, DEFAULT_TTL_FACTOR};
pub use coalescer::{LookupCoalescer, Waiter};
pub use hickory::HickoryLookup;
pub use httpdns::{HttpDns, HttpDnsConfig};
pub use lookup::{DnsLookup, DomainName, Lookup, ResolutionRecord, StaticLookup};
pub use network::{
    AddressTracker, NetworkMonitor, NetworkObservation, StaticNetwork, UdpProbeMonitor,
    DEFAULT_PROBE_INTERVAL,
};
