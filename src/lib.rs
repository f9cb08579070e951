//! # mixednet
//!
//! An HTTP request layer that reaches its servers over more than one path.
//!
//! A request first goes out as addressed. If that fails, it can be retried
//! against an address from an HTTPDNS cache (bypassing the system resolver)
//! and then against a CDN host, in an order chosen per request. The caller
//! holds a single cancellable handle throughout and gets exactly one result.
//!
//! ## Features
//!
//! - **HTTPDNS cache**: TTL-scaled expiry, one in-flight lookup per domain,
//!   reverse IP index, cleared on network change, IPv4 networks only
//! - **Fallback stages**: normal, resolver and CDN, each with its own
//!   transport, plugins and timeout
//! - **Task handles**: resume, suspend, cancel and resume data for
//!   downloads, stable across stage restarts
//! - **TLS**: BoringSSL with certificate checks against the origin domain of
//!   an IP route, plus SPKI pinning
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mixednet::urlrequest::DataTarget;
//! use mixednet::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new();
//!     let target = DataTarget::new("https://api.example.com".parse().unwrap(), "status");
//!     let response = client.send(target).await.unwrap();
//!     println!("Status: {}", response.status_code);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions
//! - [`dns`] - HTTPDNS cache, lookup coalescing and network monitoring
//! - [`http`] - Request encoding, transports and responses
//! - [`plugin`] - Request lifecycle hooks
//! - [`tls`] - Server trust and certificate pinning
//! - [`urlrequest`] - Targets, task handles, stages and fallback

pub mod base;
pub mod client;
pub mod dns;
pub mod http;
pub mod plugin;
pub mod tls;
pub mod urlrequest;

pub use base::neterror::NetError;
pub use client::{Client, ClientBuilder};
pub use crate::http::Response;
