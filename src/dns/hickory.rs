//! Lookup service backed by hickory-dns.
//!
//! Stands in for a vendor HTTPDNS service when none is configured. The
//! underlying resolver can be pointed at DoH/DoT upstreams through its own
//! configuration, which is what makes it useful as a bypass for an
//! unreliable system resolver.

use super::{DnsLookup, DomainName, Lookup, ResolutionRecord};
use crate::base::neterror::{NetError, TransportErrorKind};
use hickory_resolver::{
    config::{LookupIpStrategy, ResolverConfig},
    name_server::TokioConnectionProvider,
    TokioResolver,
};
use std::{
    net::IpAddr,
    sync::LazyLock,
    time::{Duration, Instant},
};

/// Async lookup service backed by hickory-dns.
///
/// The resolver is lazily initialized on first use and shared across all
/// instances via a static `LazyLock`. Only IPv4 answers are returned since
/// HTTPDNS routing is IPv4-only.
///
/// # Example
///
/// ```rust,ignore
/// use mixednet::dns::{HickoryLookup, HttpDns, HttpDnsConfig};
///
/// let dns = HttpDns::new(Arc::new(HickoryLookup::new()), HttpDnsConfig::default());
/// ```
#[derive(Debug, Clone)]
pub struct HickoryLookup {
    resolver: &'static LazyLock<TokioResolver>,
}

impl HickoryLookup {
    /// Creates a new `HickoryLookup`.
    ///
    /// It will attempt to read system DNS configuration; if that fails, it
    /// falls back to the resolver's defaults.
    pub fn new() -> Self {
        static RESOLVER: LazyLock<TokioResolver> = LazyLock::new(|| {
            let mut builder = match TokioResolver::builder_tokio() {
                Ok(builder) => {
                    tracing::debug!("Using system DNS configuration");
                    builder
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Failed to read system DNS config, using defaults"
                    );
                    TokioResolver::builder_with_config(
                        ResolverConfig::default(),
                        TokioConnectionProvider::default(),
                    )
                }
            };

            builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4Only;

            builder.build()
        });

        Self {
            resolver: &RESOLVER,
        }
    }
}

impl Default for HickoryLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsLookup for HickoryLookup {
    fn lookup(&self, domain: DomainName, max_ttl: Duration) -> Lookup {
        let resolver = self.resolver;
        Box::pin(async move {
            tracing::debug!(domain = %domain, "looking up via hickory-dns");

            let lookup = resolver.lookup_ip(domain.as_str()).await.map_err(|e| {
                tracing::debug!(domain = %domain, error = %e, "hickory-dns lookup failed");
                NetError::transport(
                    TransportErrorKind::NameNotResolved,
                    format!("{}: {}", domain, e),
                )
            })?;

            let ip = lookup
                .iter()
                .find(IpAddr::is_ipv4)
                .ok_or_else(|| {
                    NetError::transport(
                        TransportErrorKind::NameNotResolved,
                        format!("{}: no IPv4 address returned", domain),
                    )
                })?;

            let ttl = lookup
                .valid_until()
                .saturating_duration_since(Instant::now())
                .min(max_ttl);

            tracing::debug!(domain = %domain, ip = %ip, ttl_secs = ttl.as_secs(), "hickory-dns lookup complete");
            Ok(ResolutionRecord::new(ip, ttl))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hickory_lookup_is_clone() {
        let l1 = HickoryLookup::new();
        let l2 = l1.clone();
        // Both should point to the same static resolver
        assert!(std::ptr::eq(l1.resolver, l2.resolver));
    }

    #[tokio::test]
    async fn test_hickory_lookup_invalid_domain() {
        let lookup = HickoryLookup::new();
        let result = lookup
            .lookup(
                DomainName::new("this-domain-definitely-does-not-exist.invalid"),
                Duration::from_secs(300),
            )
            .await;

        let err = result.err().expect("Should have error");
        assert_eq!(
            err.transport_kind(),
            Some(TransportErrorKind::NameNotResolved)
        );
    }
}
