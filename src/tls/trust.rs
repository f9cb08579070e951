//! Server trust evaluation for HTTPDNS-routed connections.
//!
//! A request routed through the resolver stage connects to an IP literal,
//! so the certificate has to be checked against the domain that IP was
//! resolved for rather than the URL host. `ServerTrust` maps the IP back
//! through the HTTPDNS reverse index, verifies the chain and hostname with
//! BoringSSL, then applies SPKI pins for that domain.

use crate::base::neterror::{NetError, TransportErrorKind};
use crate::dns::{DomainName, HttpDns};
use base64::Engine;
use boring::hash::{hash, MessageDigest};
use boring::ssl::{SslConnector, SslMethod, SslVerifyMode};
use boring::x509::X509Ref;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_boring::SslStream;

/// SHA-256 of a certificate's Subject Public Key Info.
pub type SpkiHash = [u8; 32];

/// Accepted keys for one domain.
#[derive(Debug, Clone)]
pub struct PinSet {
    pub domain: DomainName,
    pub include_subdomains: bool,
    pub pins: Vec<SpkiHash>,
    /// Pins stop being enforced after this instant.
    pub expires: Option<OffsetDateTime>,
}

impl PinSet {
    pub fn new(domain: impl Into<DomainName>) -> Self {
        Self {
            domain: domain.into(),
            include_subdomains: false,
            pins: Vec::new(),
            expires: None,
        }
    }

    /// Add a base64 SPKI hash as printed by `openssl ... | base64`.
    pub fn with_pin_base64(mut self, pin: &str) -> Result<Self, NetError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(pin)
            .map_err(|e| NetError::RequestConstructionFailed(format!("pin {}: {}", pin, e)))?;
        let hash: SpkiHash = decoded.as_slice().try_into().map_err(|_| {
            NetError::RequestConstructionFailed(format!(
                "pin {}: expected 32 bytes, got {}",
                pin,
                decoded.len()
            ))
        })?;
        self.pins.push(hash);
        Ok(self)
    }

    pub fn with_pin(mut self, hash: SpkiHash) -> Self {
        self.pins.push(hash);
        self
    }

    pub fn include_subdomains(mut self, include: bool) -> Self {
        self.include_subdomains = include;
        self
    }

    pub fn expires_at(mut self, at: OffsetDateTime) -> Self {
        self.expires = Some(at);
        self
    }

    fn is_expired(&self) -> bool {
        self.expires
            .is_some_and(|at| OffsetDateTime::now_utc() > at)
    }

    /// Expired sets accept anything.
    fn accepts(&self, chain: &[SpkiHash]) -> bool {
        self.is_expired() || chain.iter().any(|h| self.pins.contains(h))
    }
}

/// Trust policy for one stage's transport.
#[derive(Clone, Default)]
pub struct ServerTrust {
    pins: Arc<DashMap<DomainName, PinSet>>,
    dns: Option<Arc<HttpDns>>,
}

impl ServerTrust {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve IP hosts back to domains through `dns`.
    pub fn with_dns(mut self, dns: Arc<HttpDns>) -> Self {
        self.dns = Some(dns);
        self
    }

    pub fn with_pins(self, pin_set: PinSet) -> Self {
        self.add_pins(pin_set);
        self
    }

    pub fn add_pins(&self, pin_set: PinSet) {
        self.pins.insert(pin_set.domain.clone(), pin_set);
    }

    pub fn pinned_domains(&self) -> usize {
        self.pins.len()
    }

    /// The name the certificate must match: the origin domain for an IP the
    /// resolver handed out, otherwise `host` unchanged.
    pub fn verification_host(&self, host: &str) -> String {
        let Ok(ip) = host.parse::<IpAddr>() else {
            return host.to_owned();
        };
        match self.dns.as_ref().and_then(|dns| dns.origin_domain(ip)) {
            Some(domain) => {
                tracing::trace!(ip = %ip, domain = %domain, "verifying IP host as origin domain");
                domain.as_str().to_owned()
            }
            None => host.to_owned(),
        }
    }

    /// Checks `chain` against the pins for `host` or, with
    /// `include_subdomains`, a parent domain. Unpinned hosts pass.
    pub fn check_pins(&self, host: &str, chain: &[SpkiHash]) -> Result<(), NetError> {
        let host = DomainName::new(host);
        let labels: Vec<&str> = host.as_str().split('.').collect();

        for skip in 0..labels.len() {
            let candidate = DomainName::new(labels[skip..].join("."));
            let Some(pin_set) = self.pins.get(&candidate) else {
                continue;
            };
            if skip > 0 && !pin_set.include_subdomains {
                continue;
            }
            if pin_set.accepts(chain) {
                return Ok(());
            }
            tracing::warn!(host = %host, pinned = %candidate, "certificate chain matches no pin");
            return Err(NetError::transport(
                TransportErrorKind::CertificatePinningFailed,
                format!("no pinned key for {} in certificate chain", host),
            ));
        }
        Ok(())
    }

    fn connector(&self) -> Result<SslConnector, NetError> {
        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(ssl_error)?;
        builder.set_alpn_protos(b"\x08http/1.1").map_err(ssl_error)?;
        builder.set_verify(SslVerifyMode::PEER);
        Ok(builder.build())
    }

    /// TLS handshake over `stream` for a URL whose host is `host`.
    pub async fn connect<S>(&self, host: &str, stream: S) -> Result<SslStream<S>, NetError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug,
    {
        let verify_host = self.verification_host(host);
        let config = self.connector()?.configure().map_err(ssl_error)?;

        let tls = tokio_boring::connect(config, &verify_host, stream)
            .await
            .map_err(|e| {
                tracing::debug!(host = %verify_host, error = ?e, "TLS handshake failed");
                NetError::transport(
                    TransportErrorKind::SslProtocolError,
                    format!("TLS handshake with {} failed", verify_host),
                )
            })?;

        let chain = match tls.ssl().peer_cert_chain() {
            Some(chain) => chain
                .iter()
                .map(spki_hash)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        self.check_pins(&verify_host, &chain)?;
        Ok(tls)
    }
}

fn ssl_error(e: boring::error::ErrorStack) -> NetError {
    NetError::transport(TransportErrorKind::SslProtocolError, e.to_string())
}

/// SPKI SHA-256 of a certificate.
pub fn spki_hash(cert: &X509Ref) -> Result<SpkiHash, NetError> {
    let pin_error = |_| {
        NetError::transport(
            TransportErrorKind::CertificatePinningFailed,
            "unreadable certificate public key",
        )
    };
    let spki = cert
        .public_key()
        .and_then(|key| key.public_key_to_der())
        .map_err(pin_error)?;
    let digest = hash(MessageDigest::sha256(), &spki).map_err(pin_error)?;

    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

impl std::fmt::Debug for ServerTrust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTrust")
            .field("pinned_domains", &self.pins.len())
            .field("has_dns", &self.dns.is_some())
            .finish()
    }
}
