//! Client with builder pattern.
//!
//! Bundles one configuration per stage, the process-wide HTTPDNS service and
//! the fallback strategy.
//!
//! # Example
//!
//! ```rust,ignore
//! use mixednet::urlrequest::{DataTarget, FallbackStrategy};
//! use mixednet::Client;
//!
//! let client = Client::builder()
//!     .strategy(FallbackStrategy::NormalFirst)
//!     .cdn_mapper(|host| (host == "api.example.com").then(|| "cdn.example.net".to_owned()))
//!     .build();
//!
//! let target = DataTarget::new("https://api.example.com/v1".parse()?, "users/7");
//! let response = client.send(target).await?;
//! let user: User = response.map(None, true)?;
//! ```

use crate::base::neterror::NetError;
use crate::dns::{HickoryLookup, HttpDns, HttpDnsConfig};
use crate::http::{HyperTransport, Response};
use crate::plugin::Plugin;
use crate::tls::ServerTrust;
use crate::urlrequest::fallback::Providers;
use crate::urlrequest::{
    CdnMapper, FallbackOrchestrator, FallbackStrategy, Stage, StageConfig, StageProvider, Target,
    TaskHandle,
};
use std::sync::Arc;
use std::time::Duration;

/// Entry point for requests.
///
/// Use [`Client::builder()`] to configure and create a client. Clones share
/// the same stages and HTTPDNS cache.
#[derive(Clone, Debug)]
pub struct Client {
    orchestrator: FallbackOrchestrator,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client with default stages, a Hickory-backed HTTPDNS service and
    /// [`FallbackStrategy::NormalFirst`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Runs `target` through the configured strategy. `completion` is called
    /// exactly once.
    pub fn request<T, F>(&self, target: T, completion: F) -> TaskHandle
    where
        T: Into<Target>,
        F: FnOnce(Result<Response, NetError>) + Send + 'static,
    {
        self.orchestrator.request(target.into(), completion)
    }

    pub fn request_with_strategy<T, F>(
        &self,
        target: T,
        strategy: FallbackStrategy,
        completion: F,
    ) -> TaskHandle
    where
        T: Into<Target>,
        F: FnOnce(Result<Response, NetError>) + Send + 'static,
    {
        self.orchestrator
            .request_with_strategy(target.into(), strategy, completion)
    }

    /// Awaitable form of [`request`](Self::request).
    pub async fn send<T: Into<Target>>(&self, target: T) -> Result<Response, NetError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.request(target, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or_else(|_| Err(NetError::cancelled()))
    }

    /// A single stage, for requests that should not fall back.
    pub fn stage(&self, stage: Stage) -> &StageProvider {
        self.orchestrator.provider(stage)
    }

    pub fn dns(&self) -> &Arc<HttpDns> {
        self.orchestrator.dns()
    }

    pub fn strategy(&self) -> FallbackStrategy {
        self.orchestrator.strategy()
    }
}

/// Builder for creating a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    normal: Option<StageConfig>,
    resolver: Option<StageConfig>,
    cdn: Option<StageConfig>,
    dns: Option<Arc<HttpDns>>,
    cdn_mapper: Option<CdnMapper>,
    strategy: FallbackStrategy,
    plugins: Vec<Arc<dyn Plugin>>,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Configuration of the normal stage.
    pub fn normal(mut self, config: StageConfig) -> Self {
        self.normal = Some(config);
        self
    }

    /// Configuration of the resolver stage. Without one, the stage uses a
    /// transport that verifies certificates against the origin domain of
    /// the IP it connected to.
    pub fn resolver(mut self, config: StageConfig) -> Self {
        self.resolver = Some(config);
        self
    }

    /// Configuration of the CDN stage.
    pub fn cdn(mut self, config: StageConfig) -> Self {
        self.cdn = Some(config);
        self
    }

    /// Share an existing HTTPDNS service, e.g. between several clients.
    pub fn dns(mut self, dns: Arc<HttpDns>) -> Self {
        self.dns = Some(dns);
        self
    }

    pub fn cdn_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.cdn_mapper = Some(Arc::new(mapper));
        self
    }

    pub fn strategy(mut self, strategy: FallbackStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Plugin appended to every stage.
    pub fn plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Default timeout for every stage.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        let dns = self.dns.unwrap_or_else(|| {
            Arc::new(HttpDns::new(
                Arc::new(HickoryLookup::new()),
                HttpDnsConfig::default(),
            ))
        });

        let resolver = self.resolver.unwrap_or_else(|| {
            let trust = ServerTrust::new().with_dns(Arc::clone(&dns));
            StageConfig::default().with_transport(Arc::new(HyperTransport::new().with_trust(trust)))
        });
        let finish = |mut config: StageConfig| {
            config.plugins.extend(self.plugins.iter().cloned());
            if let Some(timeout) = self.timeout {
                config.default_timeout = timeout;
            }
            config
        };

        let providers = Providers {
            normal: StageProvider::new(Stage::Normal, finish(self.normal.unwrap_or_default()))
                .with_dns(Arc::clone(&dns)),
            resolver: StageProvider::new(Stage::Resolver, finish(resolver))
                .with_dns(Arc::clone(&dns)),
            cdn: StageProvider::new(Stage::Cdn, finish(self.cdn.unwrap_or_default())),
        };

        tracing::debug!(strategy = ?self.strategy, "client built");
        Client {
            orchestrator: FallbackOrchestrator::new(
                providers,
                dns,
                self.cdn_mapper,
                self.strategy,
            ),
        }
    }
}
