//! Default transport over hyper's HTTP/1.1 client connection.
//!
//! One connection per request: resolve, TCP connect, optional TLS through
//! [`ServerTrust`], HTTP/1.1 handshake, then stream the body into the
//! request's sink. Timeouts and cancellation are applied by the job that
//! drives the returned future.

use crate::base::context::classify_io;
use crate::base::neterror::TransportErrorKind;
use crate::http::transport::{
    Executing, HttpTransport, Progress, TransportError, TransportRequest, TransportResponse,
};
use crate::tls::ServerTrust;
use http::header::{CONTENT_LENGTH, HOST};
use http::HeaderValue;
use http_body_util::BodyExt;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Transport used by stages that don't configure their own.
///
/// # Example
///
/// ```rust,ignore
/// use mixednet::http::HyperTransport;
/// use mixednet::tls::{PinSet, ServerTrust};
///
/// let trust = ServerTrust::new()
///     .with_dns(dns.clone())
///     .with_pins(PinSet::new("api.example.com").with_pin_base64(PIN)?);
/// let transport = HyperTransport::new().with_trust(trust);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HyperTransport {
    trust: ServerTrust,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trust(mut self, trust: ServerTrust) -> Self {
        self.trust = trust;
        self
    }
}

impl HttpTransport for HyperTransport {
    fn execute(&self, request: TransportRequest) -> Executing {
        let trust = self.trust.clone();
        Box::pin(async move { send(trust, request).await })
    }
}

async fn send(
    trust: ServerTrust,
    request: TransportRequest,
) -> Result<TransportResponse, TransportError> {
    let host = request
        .url
        .host_str()
        .ok_or_else(|| TransportError::new(TransportErrorKind::InvalidResponse, "URL has no host"))?
        .to_owned();
    let port = request.url.port_or_known_default().ok_or_else(|| {
        TransportError::new(TransportErrorKind::Failed, "URL has no known port")
    })?;

    let tcp = connect_tcp(&host, port).await?;

    if request.url.scheme() == "https" {
        let tls = trust
            .connect(&host, tcp)
            .await
            .map_err(|e| match e.transport_kind() {
                Some(kind) => TransportError::new(kind, e.to_string()),
                None => TransportError::new(TransportErrorKind::SslProtocolError, e.to_string()),
            })?;
        exchange(tls, request).await
    } else {
        exchange(tcp, request).await
    }
}

async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| {
            TransportError::new(
                TransportErrorKind::NameNotResolved,
                format!("{}: {}", host, e),
            )
        })?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::trace!(host = %host, addr = %addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(addr = %addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => TransportError::new(classify_io(&e), format!("{}:{}: {}", host, port, e)),
        None => TransportError::new(
            TransportErrorKind::NameNotResolved,
            format!("{}: no addresses", host),
        ),
    })
}

async fn exchange<S>(
    stream: S,
    request: TransportRequest,
) -> Result<TransportResponse, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| TransportError::new(classify_hyper(&e), e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "connection closed with error");
        }
    });

    let url = request.url.clone();
    let sink = request.sink.clone();
    let upload_progress = request.upload_progress.clone();
    let upload_len = request.body.len() as u64;

    let mut builder = http::Request::builder()
        .method(request.method.clone())
        .uri(origin_form(&url));
    if let Some(headers) = builder.headers_mut() {
        *headers = request.headers.clone();
        if !headers.contains_key(HOST) {
            let authority = match url.port() {
                Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
                None => url.host_str().unwrap_or_default().to_owned(),
            };
            if let Ok(value) = HeaderValue::from_str(&authority) {
                headers.insert(HOST, value);
            }
        }
    }
    let req = builder
        .body(request.body.into_full())
        .map_err(|e| TransportError::new(TransportErrorKind::Failed, e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| TransportError::new(classify_hyper(&e), e.to_string()))?;

    if let Some(report) = &upload_progress {
        report(Progress {
            completed: upload_len,
            total: Some(upload_len),
        });
    }

    let (parts, mut body) = resp.into_parts();
    let content_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    sink.begin(parts.status, content_length);

    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(data) = frame.data_ref() {
                    sink.push(data);
                }
            }
            Err(e) => {
                let partial = TransportResponse {
                    status: parts.status,
                    version: parts.version,
                    headers: parts.headers.clone(),
                    url: url.clone(),
                    body: sink.snapshot(),
                };
                return Err(
                    TransportError::new(classify_hyper(&e), e.to_string()).with_partial(partial)
                );
            }
        }
    }

    Ok(TransportResponse {
        status: parts.status,
        version: parts.version,
        headers: parts.headers,
        url,
        body: sink.take(),
    })
}

/// `/path?query` for the request line.
fn origin_form(url: &url::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_owned(),
    }
}

fn classify_hyper(e: &hyper::Error) -> TransportErrorKind {
    if e.is_incomplete_message() {
        TransportErrorKind::EmptyResponse
    } else if e.is_closed() || e.is_canceled() {
        TransportErrorKind::ConnectionClosed
    } else if e.is_timeout() {
        TransportErrorKind::TimedOut
    } else if e.is_parse() || e.is_parse_status() {
        TransportErrorKind::InvalidResponse
    } else if let Some(io) = std::error::Error::source(e)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
    {
        classify_io(io)
    } else {
        TransportErrorKind::Failed
    }
}
