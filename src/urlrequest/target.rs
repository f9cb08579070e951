//! Request descriptors.
//!
//! A [`Target`] is one of three kinds, each with its own execution details:
//! plain data requests, downloads (resumable, optionally written to a file)
//! and uploads.

use crate::base::neterror::NetError;
use crate::http::{Parameters, ProgressFn, ValidationType};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Canned answer used when stubbing is enabled for a stage.
#[derive(Debug, Clone)]
pub enum SampleResponse {
    /// Status code and body.
    Network(u16, Bytes),
    /// A transport-level failure.
    Error(NetError),
}

pub type SampleResponseFn = Arc<dyn Fn() -> SampleResponse + Send + Sync>;

/// How the `Authorization` header is formed by the access-token plugin.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthorizationType {
    #[default]
    None,
    /// `Basic <token>`
    Basic,
    /// `<scheme> <token>`, e.g. `Bearer`.
    Custom(String),
}

impl AuthorizationType {
    /// Header scheme, `None` when no header should be sent.
    pub fn scheme(&self) -> Option<&str> {
        match self {
            AuthorizationType::None => None,
            AuthorizationType::Basic => Some("Basic"),
            AuthorizationType::Custom(scheme) if scheme.is_empty() => None,
            AuthorizationType::Custom(scheme) => Some(scheme),
        }
    }
}

impl From<&str> for AuthorizationType {
    fn from(raw: &str) -> Self {
        match raw {
            "" => AuthorizationType::None,
            "Basic" => AuthorizationType::Basic,
            other => AuthorizationType::Custom(other.to_owned()),
        }
    }
}

/// Bytes received by a cancelled download, enough to continue it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeData {
    pub url: Url,
    pub bytes: Bytes,
}

/// A REST-style request against `base_url` + `path`.
#[derive(Clone)]
pub struct DataTarget {
    pub base_url: Url,
    pub path: String,
    pub method: Method,
    pub parameters: Parameters,
    pub headers: HeaderMap,
    pub validation: ValidationType,
    pub timeout: Option<Duration>,
    pub sample_response: Option<SampleResponseFn>,
    pub authorization: AuthorizationType,
}

impl DataTarget {
    pub fn new(base_url: Url, path: impl Into<String>) -> Self {
        Self {
            base_url,
            path: path.into(),
            method: Method::GET,
            parameters: Parameters::new(),
            headers: HeaderMap::new(),
            validation: ValidationType::default(),
            timeout: None,
            sample_response: None,
            authorization: AuthorizationType::None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Invalid header names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn validation(mut self, validation: ValidationType) -> Self {
        self.validation = validation;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn sample_response(mut self, sample: SampleResponseFn) -> Self {
        self.sample_response = Some(sample);
        self
    }

    pub fn authorization(mut self, authorization: AuthorizationType) -> Self {
        self.authorization = authorization;
        self
    }

    /// `path` resolved against `base_url`. A base with a non-empty path gets
    /// a trailing `/` first so relative paths extend it rather than replace
    /// its last segment.
    pub fn full_url(&self) -> Result<Url, NetError> {
        let mut base = self.base_url.clone();
        if !base.path().is_empty() && !base.path().ends_with('/') {
            let extended = format!("{}/", base.path());
            base.set_path(&extended);
        }
        base.join(&self.path).map_err(|e| {
            NetError::RequestConstructionFailed(format!(
                "{} relative to {}: {}",
                self.path, self.base_url, e
            ))
        })
    }
}

/// Fetch of a resource, optionally resuming an earlier attempt.
#[derive(Clone)]
pub struct DownloadTarget {
    pub url: Url,
    pub resume_data: Option<ResumeData>,
    /// Where to write the body. The response data then holds this path.
    pub destination: Option<PathBuf>,
    pub headers: HeaderMap,
    pub validation: ValidationType,
    pub timeout: Option<Duration>,
    pub progress: Option<ProgressFn>,
    pub authorization: AuthorizationType,
}

impl DownloadTarget {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            resume_data: None,
            destination: None,
            headers: HeaderMap::new(),
            validation: ValidationType::default(),
            timeout: None,
            progress: None,
            authorization: AuthorizationType::None,
        }
    }

    /// Continue from data produced by a cancelled download.
    pub fn resuming(resume_data: ResumeData) -> Self {
        let mut target = Self::new(resume_data.url.clone());
        target.resume_data = Some(resume_data);
        target
    }

    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    pub fn progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validation(mut self, validation: ValidationType) -> Self {
        self.validation = validation;
        self
    }
}

/// Upload body source.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Data(Bytes),
    /// Read when the request is sent.
    File(PathBuf),
}

#[derive(Clone)]
pub struct UploadTarget {
    pub url: Url,
    pub source: UploadSource,
    pub method: Method,
    pub headers: HeaderMap,
    pub validation: ValidationType,
    pub timeout: Option<Duration>,
    pub progress: Option<ProgressFn>,
    pub authorization: AuthorizationType,
}

impl UploadTarget {
    pub fn new(url: Url, source: UploadSource) -> Self {
        Self {
            url,
            source,
            method: Method::POST,
            headers: HeaderMap::new(),
            validation: ValidationType::default(),
            timeout: None,
            progress: None,
            authorization: AuthorizationType::None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A logical request.
#[derive(Clone)]
pub enum Target {
    Data(DataTarget),
    Download(DownloadTarget),
    Upload(UploadTarget),
}

impl Target {
    /// The URL before any stage rewrites it.
    pub fn url(&self) -> Result<Url, NetError> {
        match self {
            Target::Data(data) => data.full_url(),
            Target::Download(download) => Ok(download.url.clone()),
            Target::Upload(upload) => Ok(upload.url.clone()),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Target::Data(data) => data.method.clone(),
            Target::Download(_) => Method::GET,
            Target::Upload(upload) => upload.method.clone(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            Target::Data(data) => &data.headers,
            Target::Download(download) => &download.headers,
            Target::Upload(upload) => &upload.headers,
        }
    }

    pub fn validation(&self) -> &ValidationType {
        match self {
            Target::Data(data) => &data.validation,
            Target::Download(download) => &download.validation,
            Target::Upload(upload) => &upload.validation,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Target::Data(data) => data.timeout,
            Target::Download(download) => download.timeout,
            Target::Upload(upload) => upload.timeout,
        }
    }

    pub fn authorization(&self) -> &AuthorizationType {
        match self {
            Target::Data(data) => &data.authorization,
            Target::Download(download) => &download.authorization,
            Target::Upload(upload) => &upload.authorization,
        }
    }

    /// Whether requests for this target may be routed through an HTTPDNS
    /// answer. HTTPS downloads always go to the named host.
    pub fn uses_resolver(&self) -> bool {
        match self {
            Target::Download(download) => download.url.scheme() != "https",
            Target::Data(_) | Target::Upload(_) => true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Target::Data(_) => "data",
            Target::Download(_) => "download",
            Target::Upload(_) => "upload",
        }
    }
}

impl From<DataTarget> for Target {
    fn from(target: DataTarget) -> Self {
        Target::Data(target)
    }
}

impl From<DownloadTarget> for Target {
    fn from(target: DownloadTarget) -> Self {
        Target::Download(target)
    }
}

impl From<UploadTarget> for Target {
    fn from(target: UploadTarget) -> Self {
        Target::Upload(target)
    }
}

impl fmt::Debug for DataTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTarget")
            .field("base_url", &self.base_url.as_str())
            .field("path", &self.path)
            .field("method", &self.method)
            .field("parameters", &self.parameters.len())
            .field("validation", &self.validation)
            .field("timeout", &self.timeout)
            .field("has_sample_response", &self.sample_response.is_some())
            .finish()
    }
}

impl fmt::Debug for DownloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTarget")
            .field("url", &self.url.as_str())
            .field(
                "resume_bytes",
                &self.resume_data.as_ref().map(|r| r.bytes.len()),
            )
            .field("destination", &self.destination)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTarget")
            .field("url", &self.url.as_str())
            .field("source", &self.source)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Data(t) => t.fmt(f),
            Target::Download(t) => t.fmt(f),
            Target::Upload(t) => t.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_full_url_extends_base_path() {
        let t = DataTarget::new(url("https://api.example.com/v1"), "users/7");
        assert_eq!(t.full_url().unwrap().as_str(), "https://api.example.com/v1/users/7");

        let t = DataTarget::new(url("https://api.example.com/v1/"), "users");
        assert_eq!(t.full_url().unwrap().as_str(), "https://api.example.com/v1/users");

        let t = DataTarget::new(url("https://api.example.com"), "users");
        assert_eq!(t.full_url().unwrap().as_str(), "https://api.example.com/users");
    }

    #[test]
    fn test_absolute_path_replaces_base_path() {
        let t = DataTarget::new(url("https://api.example.com/v1"), "/health");
        assert_eq!(t.full_url().unwrap().as_str(), "https://api.example.com/health");
    }

    #[test]
    fn test_https_download_skips_resolver() {
        let https: Target = DownloadTarget::new(url("https://cdn.example.com/a.bin")).into();
        let http: Target = DownloadTarget::new(url("http://cdn.example.com/a.bin")).into();
        let data: Target = DataTarget::new(url("https://api.example.com"), "x").into();

        assert!(!https.uses_resolver());
        assert!(http.uses_resolver());
        assert!(data.uses_resolver());
        assert_eq!(https.method(), Method::GET);
    }

    #[test]
    fn test_authorization_scheme() {
        assert_eq!(AuthorizationType::from("").scheme(), None);
        assert_eq!(AuthorizationType::from("Basic").scheme(), Some("Basic"));
        assert_eq!(AuthorizationType::from("Bearer").scheme(), Some("Bearer"));
    }

    #[test]
    fn test_resuming_uses_resume_url() {
        let resume = ResumeData {
            url: url("http://cdn.example.com/big.bin"),
            bytes: Bytes::from_static(b"abc"),
        };
        let target = DownloadTarget::resuming(resume.clone());
        assert_eq!(target.url, resume.url);
        assert_eq!(target.resume_data, Some(resume));
    }

    #[test]
    fn test_upload_defaults_to_post() {
        let t = UploadTarget::new(url("https://api.example.com/up"), UploadSource::Data(Bytes::new()));
        assert_eq!(Target::from(t).method(), Method::POST);
    }
}
