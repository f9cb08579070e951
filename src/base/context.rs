//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into context-rich `NetError` variants.

use crate::base::neterror::{NetError, TransportErrorKind};
use std::io;
use std::path::Path;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Add file context to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use mixednet::base::context::IoResultExt;
    ///
    /// let bytes = tokio::fs::read(&path).await.file_context(&path)?;
    /// // Error: "File access failed: /tmp/upload.bin: not found"
    /// ```
    fn file_context(self, path: &Path) -> Result<T, NetError>;

    /// Add transport context to an IO error, classifying it by kind.
    fn transport_context(self, url: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn file_context(self, path: &Path) -> Result<T, NetError> {
        self.map_err(|e| {
            NetError::transport(
                TransportErrorKind::FileIo,
                format!("{}: {}", path.display(), e),
            )
        })
    }

    fn transport_context(self, url: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::transport(classify_io(&e), format!("{}: {}", url, e)))
    }
}

/// Map an IO error kind onto the transport taxonomy.
pub fn classify_io(error: &io::Error) -> TransportErrorKind {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
        io::ErrorKind::ConnectionReset => TransportErrorKind::ConnectionReset,
        io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
            TransportErrorKind::ConnectionClosed
        }
        io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
        io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => {
            TransportErrorKind::ConnectionFailed
        }
        io::ErrorKind::UnexpectedEof => TransportErrorKind::EmptyResponse,
        _ => TransportErrorKind::Failed,
    }
}
