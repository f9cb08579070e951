//! Multi-stage request fallback.
//!
//! A request walks an ordered list of stages. Each stage either runs an
//! attempt or is skipped because it cannot route the target (no HTTPDNS
//! answer, no CDN mapping). A successful or cancelled attempt ends the walk;
//! any other failure moves to the next stage. When the list runs out, the
//! last real failure is delivered, or [`NetError::NoRouteAvailable`] when
//! every stage was skipped.
//!
//! All attempts share the caller's [`TaskHandle`], so cancelling it stops
//! whichever attempt is current and keeps later stages from starting.

use crate::base::neterror::NetError;
use crate::dns::{DomainName, HttpDns};
use crate::http::{rewrite_host, Response};
use crate::urlrequest::job::dispatch;
use crate::urlrequest::provider::{Route, StageProvider};
use crate::urlrequest::target::Target;
use crate::urlrequest::task::{NetworkTask, TaskHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Routing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The URL as given.
    Normal,
    /// Host replaced by an HTTPDNS answer.
    Resolver,
    /// Host replaced by a CDN host.
    Cdn,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Normal => write!(f, "normal"),
            Stage::Resolver => write!(f, "resolver"),
            Stage::Cdn => write!(f, "CDN"),
        }
    }
}

/// Stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Normal, then resolver, then CDN.
    #[default]
    NormalFirst,
    /// Resolver, then CDN, then normal.
    ResolverFirst,
    /// CDN, then normal, then resolver.
    CdnFirst,
}

impl FallbackStrategy {
    pub fn stages(self) -> &'static [Stage] {
        match self {
            FallbackStrategy::NormalFirst => &[Stage::Normal, Stage::Resolver, Stage::Cdn],
            FallbackStrategy::ResolverFirst => &[Stage::Resolver, Stage::Cdn, Stage::Normal],
            FallbackStrategy::CdnFirst => &[Stage::Cdn, Stage::Normal, Stage::Resolver],
        }
    }
}

/// Maps an origin host to its CDN host, `None` when there is no mapping.
pub type CdnMapper = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub(crate) struct Providers {
    pub normal: StageProvider,
    pub resolver: StageProvider,
    pub cdn: StageProvider,
}

struct Inner {
    providers: Providers,
    dns: Arc<HttpDns>,
    cdn_mapper: Option<CdnMapper>,
    strategy: FallbackStrategy,
}

/// Runs targets through the stage list of a [`FallbackStrategy`].
#[derive(Clone)]
pub struct FallbackOrchestrator {
    inner: Arc<Inner>,
}

impl FallbackOrchestrator {
    pub(crate) fn new(
        providers: Providers,
        dns: Arc<HttpDns>,
        cdn_mapper: Option<CdnMapper>,
        strategy: FallbackStrategy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                providers,
                dns,
                cdn_mapper,
                strategy,
            }),
        }
    }

    pub fn strategy(&self) -> FallbackStrategy {
        self.inner.strategy
    }

    pub fn dns(&self) -> &Arc<HttpDns> {
        &self.inner.dns
    }

    pub fn provider(&self, stage: Stage) -> &StageProvider {
        self.inner.provider(stage)
    }

    /// Runs `target` with the configured strategy.
    pub fn request<F>(&self, target: Target, completion: F) -> TaskHandle
    where
        F: FnOnce(Result<Response, NetError>) + Send + 'static,
    {
        self.request_with_strategy(target, self.inner.strategy, completion)
    }

    /// Runs `target` through `strategy`'s stages. `completion` is called
    /// exactly once.
    pub fn request_with_strategy<F>(
        &self,
        target: Target,
        strategy: FallbackStrategy,
        completion: F,
    ) -> TaskHandle
    where
        F: FnOnce(Result<Response, NetError>) + Send + 'static,
    {
        let task = TaskHandle::idle();
        let url = match target.url() {
            Ok(url) => url,
            Err(error) => {
                dispatch(move || completion(Err(error)));
                return task;
            }
        };
        tracing::debug!(
            kind = target.kind(),
            url = %url,
            strategy = ?strategy,
            "starting request"
        );

        Walk {
            inner: Arc::clone(&self.inner),
            target,
            url,
            stages: strategy.stages(),
            next: 0,
            last_error: None,
            task: task.clone(),
            completion: Box::new(completion),
        }
        .advance();
        task
    }
}

impl Inner {
    fn provider(&self, stage: Stage) -> &StageProvider {
        match stage {
            Stage::Normal => &self.providers.normal,
            Stage::Resolver => &self.providers.resolver,
            Stage::Cdn => &self.providers.cdn,
        }
    }
}

impl fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("strategy", &self.inner.strategy)
            .field("has_cdn_mapper", &self.inner.cdn_mapper.is_some())
            .finish()
    }
}

/// Error carried past a skipped `stage`. An error from a real attempt is
/// kept; otherwise the skip itself becomes the error.
fn skipped(last_error: Option<NetError>, stage: Stage) -> Option<NetError> {
    match last_error {
        Some(NetError::NoRouteAvailable { .. }) | None => {
            Some(NetError::NoRouteAvailable { stage })
        }
        real => real,
    }
}

/// State of one request's walk through its stages. Moved from callback to
/// callback; whoever holds it owns the completion.
struct Walk {
    inner: Arc<Inner>,
    target: Target,
    url: Url,
    stages: &'static [Stage],
    next: usize,
    last_error: Option<NetError>,
    task: TaskHandle,
    completion: Box<dyn FnOnce(Result<Response, NetError>) + Send>,
}

impl Walk {
    fn advance(mut self) {
        let Some(&stage) = self.stages.get(self.next) else {
            let error = self.last_error.take().unwrap_or(NetError::NoRouteAvailable {
                stage: self.stages.last().copied().unwrap_or(Stage::Normal),
            });
            tracing::debug!(url = %self.url, code = error.code(), "all stages exhausted");
            (self.completion)(Err(error));
            return;
        };
        self.next += 1;

        match stage {
            Stage::Normal => self.attempt(stage, Route::Direct, None),
            Stage::Resolver => self.via_resolver(),
            Stage::Cdn => self.via_cdn(),
        }
    }

    fn skip(mut self, stage: Stage, reason: &'static str) {
        tracing::debug!(stage = %stage, url = %self.url, reason, "stage skipped");
        self.last_error = skipped(self.last_error.take(), stage);
        self.advance();
    }

    fn via_resolver(self) {
        if !self.target.uses_resolver() {
            return self.skip(Stage::Resolver, "target not eligible");
        }
        let Some(host) = self.url.host_str().map(DomainName::new) else {
            return self.skip(Stage::Resolver, "no host");
        };
        let dns = Arc::clone(&self.inner.dns);
        dns.query_async(host.clone(), move |hit| {
            let Some(hit) = hit else {
                return self.skip(Stage::Resolver, "no address");
            };
            match Route::resolved(&self.url, &hit) {
                Some(route) => {
                    let cached = hit.served_from_cache.then_some(host);
                    self.attempt(Stage::Resolver, route, cached)
                }
                None => self.skip(Stage::Resolver, "host rewrite failed"),
            }
        });
    }

    fn via_cdn(self) {
        let mapped = self.inner.cdn_mapper.as_ref().and_then(|mapper| {
            let host = self.url.host_str()?;
            let cdn_host = mapper(host)?;
            rewrite_host(&self.url, &cdn_host)
        });
        match mapped {
            Some(url) => self.attempt(Stage::Cdn, Route::Url(url), None),
            None => self.skip(Stage::Cdn, "no CDN host"),
        }
    }

    /// `cached` is the domain whose cached answer this attempt relies on.
    fn attempt(self, stage: Stage, route: Route, cached: Option<DomainName>) {
        let inner = Arc::clone(&self.inner);
        let task = self.task.clone();
        let target = self.target.clone();

        let job = inner.provider(stage).job(
            target,
            route,
            Box::new(move |result| self.finish_attempt(stage, cached, result)),
        );
        let job = Arc::new(job);
        if !task.restart(job.clone()) {
            // Cancelled between stages. Cancelling the unstarted job delivers
            // the cancellation through this attempt's completion.
            job.cancel();
        }
    }

    fn finish_attempt(
        mut self,
        stage: Stage,
        cached: Option<DomainName>,
        result: Result<Response, NetError>,
    ) {
        self.task.mark_finished();
        match result {
            Ok(response) => {
                tracing::debug!(stage = %stage, status = response.status_code, "request succeeded");
                (self.completion)(Ok(response));
            }
            Err(error) if error.is_cancelled() => (self.completion)(Err(error)),
            Err(error) => {
                if let Some(domain) = cached.filter(|_| error.is_transport_failure()) {
                    tracing::debug!(domain = %domain, "dropping cached address after failure");
                    self.inner.dns.invalidate(domain);
                }
                tracing::warn!(stage = %stage, url = %self.url, error = %error, "stage failed");
                self.last_error = Some(error);
                self.advance();
            }
        }
    }
}
