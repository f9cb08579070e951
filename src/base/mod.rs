//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): errors delivered to request completions
//! - [`TransportErrorKind`](neterror::TransportErrorKind): transport failure
//!   classes with Chromium-style numeric codes

pub mod context;
pub mod neterror;
