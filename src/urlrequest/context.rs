//! Per-stage configuration.
//!
//! Each fallback stage has its own transport, plugins and defaults, so the
//! resolver stage can verify certificates against origin domains while the
//! CDN stage uses a plain transport.

use crate::http::{HttpTransport, HyperTransport, ParameterEncoding};
use crate::plugin::Plugin;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

/// Whether data targets answer from their sample response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StubBehavior {
    #[default]
    Never,
    Immediate,
    Delayed(Duration),
}

/// Configuration options for one stage.
#[derive(Clone)]
pub struct StageConfig {
    /// Transport requests are executed on.
    pub transport: Arc<dyn HttpTransport>,

    /// Lifecycle hooks, run in order.
    pub plugins: Vec<Arc<dyn Plugin>>,

    /// Parameter placement for data targets.
    pub encoding: ParameterEncoding,

    /// Headers sent with every request. Target headers override them.
    pub default_headers: HeaderMap,

    /// Timeout for targets that don't set their own.
    pub default_timeout: Duration,

    /// Route through a cached HTTPDNS answer when one is available. Only
    /// consulted when the stage is used on its own.
    pub use_resolver: bool,

    pub stub: StubBehavior,
}

impl Default for StageConfig {
    fn default() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            transport: Arc::new(HyperTransport::new()),
            plugins: Vec::new(),
            encoding: ParameterEncoding::default(),
            default_headers,
            default_timeout: Duration::from_secs(60),
            use_resolver: false,
            stub: StubBehavior::Never,
        }
    }
}

impl StageConfig {
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_stub(mut self, stub: StubBehavior) -> Self {
        self.stub = stub;
        self
    }
}

impl std::fmt::Debug for StageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageConfig")
            .field("plugins_count", &self.plugins.len())
            .field("encoding", &self.encoding)
            .field("default_headers", &self.default_headers)
            .field("default_timeout", &self.default_timeout)
            .field("use_resolver", &self.use_resolver)
            .field("stub", &self.stub)
            .finish()
    }
}
