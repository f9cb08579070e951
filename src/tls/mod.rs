//! TLS trust policy: hostname verification for IP-routed requests and
//! SPKI pinning.

pub mod trust;

pub use trust::{spki_hash, PinSet, ServerTrust, SpkiHash};
