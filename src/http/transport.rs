//! Transport boundary.
//!
//! Each stage executes requests through an `HttpTransport`. The crate ships
//! [`HyperTransport`](super::HyperTransport); tests and embedders plug in
//! their own.

use crate::base::neterror::TransportErrorKind;
use crate::http::RequestBody;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode, Version};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// Completed share in `0.0..=1.0`, `0.0` when the total is unknown.
    pub fn fraction(&self) -> f64 {
        match self.total {
            Some(0) => 1.0,
            Some(total) => (self.completed as f64 / total as f64).min(1.0),
            None => 0.0,
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Destination for a response body.
///
/// Shared between the transport writing into it and the job that owns the
/// request, so bytes received before a cancellation can be handed back as
/// resume data. A sink may start with a prefix (bytes from an earlier,
/// interrupted download); the prefix is kept only if the server answers
/// `206 Partial Content`.
#[derive(Clone, Default)]
pub struct BodySink {
    inner: Arc<Mutex<SinkState>>,
    progress: Option<ProgressFn>,
}

#[derive(Default)]
struct SinkState {
    buffer: BytesMut,
    prefix_len: usize,
    total: Option<u64>,
}

impl BodySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: Bytes) -> Self {
        let sink = Self::default();
        {
            let mut state = sink.lock();
            state.prefix_len = prefix.len();
            state.buffer.extend_from_slice(&prefix);
        }
        sink
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called once the status line is known.
    pub fn begin(&self, status: StatusCode, content_length: Option<u64>) {
        let mut state = self.lock();
        if status != StatusCode::PARTIAL_CONTENT && state.prefix_len > 0 {
            tracing::debug!(
                status = status.as_u16(),
                discarded = state.prefix_len,
                "server ignored range request, restarting body"
            );
            state.buffer.clear();
            state.prefix_len = 0;
        }
        let already = state.buffer.len() as u64;
        state.total = content_length.map(|len| len + already);
    }

    pub fn push(&self, chunk: &[u8]) {
        let progress = {
            let mut state = self.lock();
            state.buffer.extend_from_slice(chunk);
            Progress {
                completed: state.buffer.len() as u64,
                total: state.total,
            }
        };
        if let Some(report) = &self.progress {
            report(progress);
        }
    }

    /// Everything received so far, prefix included.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().buffer)
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the accumulated body, leaving the sink empty.
    pub fn take(&self) -> Bytes {
        let mut state = self.lock();
        state.prefix_len = 0;
        state.buffer.split().freeze()
    }
}

impl fmt::Debug for BodySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BodySink")
            .field("len", &state.buffer.len())
            .field("prefix_len", &state.prefix_len)
            .field("total", &state.total)
            .finish()
    }
}

/// A fully built request handed to a transport.
#[derive(Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub timeout: Duration,
    pub sink: BodySink,
    pub upload_progress: Option<ProgressFn>,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: Duration::from_secs(30),
            sink: BodySink::new(),
            upload_progress: None,
        }
    }
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// What came back from the server. The body has been drained from the sink.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: Bytes,
}

/// A failed transport call, with whatever response arrived before the
/// failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub partial: Option<TransportResponse>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            partial: None,
        }
    }

    pub fn with_partial(mut self, partial: TransportResponse) -> Self {
        self.partial = Some(partial);
        self
    }
}

pub type Executing =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send>>;

/// Executes one request. Implementations must be thread-safe and must not
/// retry: falling back is the orchestrator's job.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: TransportRequest) -> Executing;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn execute(&self, request: TransportRequest) -> Executing {
        (**self).execute(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_progress_fraction() {
        let p = Progress {
            completed: 50,
            total: Some(200),
        };
        assert_eq!(p.fraction(), 0.25);
        assert_eq!(
            Progress {
                completed: 5,
                total: None
            }
            .fraction(),
            0.0
        );
    }

    #[test]
    fn test_sink_reports_progress() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = Arc::clone(&seen);
        let sink = BodySink::new().with_progress(Arc::new(move |p: Progress| {
            assert_eq!(p.total, Some(6));
            seen_cb.store(p.completed, Ordering::SeqCst);
        }));

        sink.begin(StatusCode::OK, Some(6));
        sink.push(b"abc");
        sink.push(b"def");

        assert_eq!(seen.load(Ordering::SeqCst), 6);
        assert_eq!(sink.take(), Bytes::from_static(b"abcdef"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_prefix_kept_on_partial_content() {
        let sink = BodySink::with_prefix(Bytes::from_static(b"hello "));
        sink.begin(StatusCode::PARTIAL_CONTENT, Some(5));
        sink.push(b"world");
        assert_eq!(sink.snapshot(), Bytes::from_static(b"hello world"));
    }

    #[test]
    fn test_prefix_dropped_on_full_response() {
        let sink = BodySink::with_prefix(Bytes::from_static(b"stale"));
        sink.begin(StatusCode::OK, None);
        sink.push(b"fresh");
        assert_eq!(sink.take(), Bytes::from_static(b"fresh"));
    }

    #[test]
    fn test_clones_share_buffer() {
        let sink = BodySink::new();
        let observer = sink.clone();
        sink.push(b"partial");
        assert_eq!(observer.snapshot().len(), 7);
    }
}
