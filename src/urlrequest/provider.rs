//! Request execution for a single stage.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::dns::{CachedResolution, DomainName, HttpDns};
use crate::http::{
    rewrite_host, BodySink, Parameters, RequestBody, RequestInfo, Response, TransportRequest,
};
use crate::plugin::Plugin;
use crate::urlrequest::context::{StageConfig, StubBehavior};
use crate::urlrequest::fallback::Stage;
use crate::urlrequest::job::{Completion, TransportJob};
use crate::urlrequest::target::{SampleResponse, SampleResponseFn, Target, UploadSource};
use crate::urlrequest::task::TaskHandle;
use bytes::Bytes;
use http::header::{HeaderValue, HOST, RANGE};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Where an attempt sends its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The target's own URL.
    Direct,
    /// Another URL, e.g. on a CDN host.
    Url(Url),
    /// A URL whose host was replaced by a resolved IP. `origin_host` is sent
    /// as the `Host` header.
    Resolved { url: Url, origin_host: String },
}

impl Route {
    /// Route to the IP in `hit` for a request to `url`.
    pub fn resolved(url: &Url, hit: &CachedResolution) -> Option<Route> {
        let host = url.host_str()?;
        let origin_host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_owned(),
        };
        let ip = match hit.ip() {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{}]", v6),
        };
        let rewritten = rewrite_host(url, &ip)?;
        Some(Route::Resolved {
            url: rewritten,
            origin_host,
        })
    }
}

/// Executes targets with one stage's configuration.
pub struct StageProvider {
    stage: Stage,
    config: StageConfig,
    dns: Option<Arc<HttpDns>>,
}

impl StageProvider {
    pub fn new(stage: Stage, config: StageConfig) -> Self {
        Self {
            stage,
            config,
            dns: None,
        }
    }

    /// Resolver consulted when `use_resolver` is set.
    pub fn with_dns(mut self, dns: Arc<HttpDns>) -> Self {
        self.dns = Some(dns);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// An unstarted attempt for `target` along `route`.
    pub fn job(&self, target: Target, route: Route, completion: Completion) -> TransportJob {
        let mut sink = BodySink::new();
        let mut resume_url = None;
        if let Target::Download(download) = &target {
            if let Some(resume) = &download.resume_data {
                sink = BodySink::with_prefix(resume.bytes.clone());
            }
            if let Some(progress) = &download.progress {
                sink = sink.with_progress(progress.clone());
            }
            resume_url = Some(download.url.clone());
        }
        let timeout = target.timeout().unwrap_or(self.config.default_timeout);
        let hooks = Arc::new(AfterSend::new(self.config.plugins.clone(), target));

        let work = Box::pin(perform(
            self.config.clone(),
            self.stage,
            Arc::clone(&hooks),
            route,
            sink.clone(),
            timeout,
        ));
        // A timeout or cancel drops `perform` before its own hook calls.
        let completion: Completion = Box::new(move |result| completion(hooks.finish(result)));
        let job = TransportJob::new(work, timeout, sink, completion);
        match resume_url {
            Some(url) => job.resumable(url),
            None => job,
        }
    }

    /// Runs `target` on this stage alone and starts it.
    ///
    /// With `use_resolver` set, a cached or freshly coalesced HTTPDNS answer
    /// routes the request to that IP; a transport failure on a cached answer
    /// drops it from the cache.
    pub fn request<F>(&self, target: Target, completion: F) -> TaskHandle
    where
        F: FnOnce(Result<Response, NetError>) + Send + 'static,
    {
        let (route, cached_domain) = self.resolver_route(&target);
        let handle = TaskHandle::idle();
        let finished = handle.clone();
        let dns = self.dns.clone();

        let job = self.job(
            target,
            route,
            Box::new(move |result: Result<Response, NetError>| {
                finished.mark_finished();
                if let (Err(error), Some(domain), Some(dns)) = (&result, cached_domain, dns) {
                    if error.is_transport_failure() && !error.is_cancelled() {
                        tracing::debug!(domain = %domain, "dropping cached address after failure");
                        dns.invalidate(domain);
                    }
                }
                completion(result);
            }),
        );
        handle.restart(Arc::new(job));
        handle
    }

    fn resolver_route(&self, target: &Target) -> (Route, Option<DomainName>) {
        let direct = (Route::Direct, None);
        if !self.config.use_resolver || !target.uses_resolver() {
            return direct;
        }
        let (Some(dns), Ok(url)) = (self.dns.as_ref(), target.url()) else {
            return direct;
        };
        let Some(host) = url.host_str() else {
            return direct;
        };
        let Some(hit) = dns.query(host) else {
            return direct;
        };
        match Route::resolved(&url, &hit) {
            Some(route) => (route, hit.served_from_cache.then(|| DomainName::new(host))),
            None => direct,
        }
    }
}

impl std::fmt::Debug for StageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageProvider")
            .field("stage", &self.stage)
            .field("config", &self.config)
            .field("has_dns", &self.dns.is_some())
            .finish()
    }
}

/// `did_receive` and `process` for one attempt, run at most once and only
/// if `will_send` ran.
struct AfterSend {
    plugins: Vec<Arc<dyn Plugin>>,
    target: Target,
    sent: AtomicBool,
}

impl AfterSend {
    fn new(plugins: Vec<Arc<dyn Plugin>>, target: Target) -> Self {
        Self {
            plugins,
            target,
            sent: AtomicBool::new(false),
        }
    }

    fn mark_sent(&self) {
        self.sent.store(true, Ordering::SeqCst);
    }

    fn finish(&self, result: Result<Response, NetError>) -> Result<Response, NetError> {
        if !self.sent.swap(false, Ordering::SeqCst) {
            return result;
        }
        for plugin in &self.plugins {
            plugin.did_receive(&result, &self.target);
        }
        self.plugins
            .iter()
            .fold(result, |result, plugin| plugin.process(result, &self.target))
    }
}

async fn perform(
    config: StageConfig,
    stage: Stage,
    hooks: Arc<AfterSend>,
    route: Route,
    sink: BodySink,
    timeout: Duration,
) -> Result<Response, NetError> {
    let target = &hooks.target;
    let request = build_request(&config, target, &route, sink, timeout).await?;
    let request = config
        .plugins
        .iter()
        .fold(request, |request, plugin| plugin.prepare(request, target));
    for plugin in &config.plugins {
        plugin.will_send(&request, target);
    }
    hooks.mark_sent();

    tracing::debug!(
        stage = %stage,
        kind = target.kind(),
        method = %request.method,
        url = %request.url,
        "sending request"
    );
    let info = RequestInfo::from(&request);

    let result = match stubbed(&config.stub, target) {
        Some(sample) => answer_from_sample(&config.stub, sample(), info).await,
        None => match config.transport.execute(request).await {
            Ok(response) => Ok(Response::from_transport(Some(info), response)),
            Err(error) => Err(NetError::TransportFailure {
                kind: error.kind,
                message: error.message,
                response: error
                    .partial
                    .map(|partial| Box::new(Response::from_transport(Some(info), partial))),
            }),
        },
    };

    let result = match result {
        Ok(response) if !target.validation().accepts(response.status_code) => {
            Err(NetError::StatusCodeRejected(Box::new(response)))
        }
        Ok(response) => store_download(target, response).await,
        Err(error) => Err(error),
    };

    match &result {
        Ok(response) => {
            tracing::debug!(stage = %stage, status = response.status_code, "request finished")
        }
        Err(error) => {
            tracing::debug!(stage = %stage, code = error.code(), error = %error, "request failed")
        }
    }

    hooks.finish(result)
}

async fn build_request(
    config: &StageConfig,
    target: &Target,
    route: &Route,
    sink: BodySink,
    timeout: Duration,
) -> Result<TransportRequest, NetError> {
    let mut url = match route {
        Route::Direct => target.url()?,
        Route::Url(url) | Route::Resolved { url, .. } => url.clone(),
    };
    let method = target.method();

    let mut headers = config.default_headers.clone();
    for (name, value) in target.headers() {
        headers.insert(name.clone(), value.clone());
    }
    if let Route::Resolved { origin_host, .. } = route {
        let value = HeaderValue::from_str(origin_host).map_err(|e| {
            NetError::RequestConstructionFailed(format!("host {}: {}", origin_host, e))
        })?;
        headers.insert(HOST, value);
    }

    let mut body = RequestBody::Empty;
    let mut upload_progress = None;
    match target {
        Target::Data(data) => {
            let mut parameters = Parameters::new();
            for plugin in &config.plugins {
                if let Some(extra) = plugin.extra_parameters() {
                    parameters.extend(extra);
                }
            }
            parameters.extend(data.parameters.clone());
            if let Some(encoded) =
                config
                    .encoding
                    .encode(&method, &mut url, &mut headers, &parameters)?
            {
                body = encoded;
            }
        }
        Target::Download(download) => {
            if let Some(resume) = download.resume_data.as_ref().filter(|r| !r.bytes.is_empty()) {
                let range = format!("bytes={}-", resume.bytes.len());
                headers.insert(
                    RANGE,
                    HeaderValue::from_str(&range)
                        .map_err(|e| NetError::RequestConstructionFailed(e.to_string()))?,
                );
            }
        }
        Target::Upload(upload) => {
            body = match &upload.source {
                UploadSource::Data(bytes) => bytes.clone().into(),
                UploadSource::File(path) => tokio::fs::read(path).await.file_context(path)?.into(),
            };
            upload_progress = upload.progress.clone();
        }
    }

    let mut request = TransportRequest::new(method, url);
    request.headers = headers;
    request.body = body;
    request.timeout = timeout;
    request.sink = sink;
    request.upload_progress = upload_progress;
    Ok(request)
}

fn stubbed(stub: &StubBehavior, target: &Target) -> Option<SampleResponseFn> {
    match (stub, target) {
        (StubBehavior::Never, _) => None,
        (_, Target::Data(data)) => data.sample_response.clone(),
        _ => None,
    }
}

async fn answer_from_sample(
    stub: &StubBehavior,
    sample: SampleResponse,
    info: RequestInfo,
) -> Result<Response, NetError> {
    if let StubBehavior::Delayed(delay) = stub {
        tokio::time::sleep(*delay).await;
    }
    match sample {
        SampleResponse::Network(status, data) => Ok(Response::new(Some(status), data, Some(info), None)),
        SampleResponse::Error(error) => Err(error),
    }
}

/// Writes a download body to its destination. The response then carries
/// the destination path as its data.
async fn store_download(target: &Target, mut response: Response) -> Result<Response, NetError> {
    let Target::Download(download) = target else {
        return Ok(response);
    };
    let Some(path) = &download.destination else {
        return Ok(response);
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.file_context(parent)?;
    }
    tokio::fs::write(path, &response.data)
        .await
        .file_context(path)?;
    tracing::debug!(path = %path.display(), bytes = response.data.len(), "download stored");
    response.data = Bytes::from(path.to_string_lossy().into_owned());
    Ok(response)
}
