//! Client Tests
//!
//! End to end over the default hyper transport against a local HTTP/1.1
//! server:
//! - Data requests with query and JSON parameters
//! - Status validation
//! - Downloads to disk and resumed downloads
//! - File uploads with progress
//! - Timeouts

use bytes::Bytes;
use http::Method;
use mixednet::base::neterror::{NetError, TransportErrorKind};
use mixednet::dns::{HttpDns, HttpDnsConfig, StaticLookup, StaticNetwork};
use mixednet::http::Progress;
use mixednet::urlrequest::{
    DataTarget, DownloadTarget, ResumeData, UploadSource, UploadTarget,
};
use mixednet::Client;
use serde::Deserialize;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

#[derive(Debug, Clone)]
struct RawRequest {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RawRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RawRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_owned();
    let target = request_line.next()?.to_owned();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_owned()))
        .collect();

    let len = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < len {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RawRequest {
        method,
        target,
        headers,
        body,
    })
}

fn reply(status: &str, extra_headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n",
        status,
        body.len()
    );
    for (name, value) in extra_headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

/// Serves each connection with `handler`. `None` keeps the connection open
/// without answering.
async fn spawn_server<F>(handler: F) -> (SocketAddr, Arc<Mutex<Vec<RawRequest>>>)
where
    F: Fn(&RawRequest) -> Option<Vec<u8>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let handler = Arc::clone(&handler);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                log.lock().unwrap().push(request.clone());
                match handler(&request) {
                    Some(bytes) => {
                        let _ = stream.write_all(&bytes).await;
                        let _ = stream.shutdown().await;
                    }
                    None => tokio::time::sleep(Duration::from_secs(30)).await,
                }
            });
        }
    });
    (addr, seen)
}

/// Client whose resolver stage never finds an address and which has no
/// CDN mapping, so only the normal stage runs.
fn local_client() -> Client {
    let dns = Arc::new(HttpDns::with_monitor(
        Arc::new(StaticLookup::new()),
        Arc::new(StaticNetwork::ipv4()),
        HttpDnsConfig::default(),
    ));
    Client::builder().dns(dns).build()
}

fn base(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{}/api", addr)).unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
struct Echo {
    method: String,
    target: String,
}

#[tokio::test]
async fn test_get_with_query_parameters() {
    let (addr, _) = spawn_server(|req| {
        let body = format!(r#"{{"data":{{"method":"{}","target":"{}"}}}}"#, req.method, req.target);
        Some(reply("200 OK", &[("content-type", "application/json")], body.as_bytes()))
    })
    .await;

    let target = DataTarget::new(base(addr), "users").parameter("page", 2).parameter("q", "a b");
    let response = local_client().send(target).await.unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.header("content-type"), Some("application/json"));
    let echo: Echo = response.map(Some("data"), true).unwrap();
    assert_eq!(
        echo,
        Echo {
            method: "GET".into(),
            target: "/api/users?page=2&q=a+b".into(),
        }
    );
}

#[tokio::test]
async fn test_post_json_body() {
    let (addr, seen) = spawn_server(|req| Some(reply("201 Created", &[], &req.body))).await;

    let target = DataTarget::new(base(addr), "users")
        .method(Method::POST)
        .parameter("name", "ann");
    let response = local_client().send(target).await.unwrap();

    assert_eq!(response.status_code, 201);
    assert_eq!(response.data, Bytes::from_static(b"{\"name\":\"ann\"}"));
    let request = seen.lock().unwrap()[0].clone();
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("host"), Some(addr.to_string().as_str()));
}

#[tokio::test]
async fn test_rejected_status_carries_response() {
    let (addr, _) = spawn_server(|_| Some(reply("404 Not Found", &[], b"nope"))).await;

    let err = local_client()
        .send(DataTarget::new(base(addr), "missing"))
        .await
        .unwrap_err();

    match err {
        NetError::StatusCodeRejected(response) => {
            assert_eq!(response.status_code, 404);
            assert_eq!(response.data, Bytes::from_static(b"nope"));
            assert!(response.request.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_download_to_destination() {
    let (addr, _) = spawn_server(|_| Some(reply("200 OK", &[], b"hello world"))).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("file.bin");

    let url = Url::parse(&format!("http://{}/file.bin", addr)).unwrap();
    let progress = Arc::new(Mutex::new(Vec::<Progress>::new()));
    let log = Arc::clone(&progress);
    let target = DownloadTarget::new(url)
        .destination(&path)
        .progress(Arc::new(move |p| log.lock().unwrap().push(p)));

    let response = local_client().send(target).await.unwrap();

    assert_eq!(response.data, Bytes::from(path.to_string_lossy().into_owned()));
    assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    let last = *progress.lock().unwrap().last().unwrap();
    assert_eq!(last.completed, 11);
    assert_eq!(last.total, Some(11));
}

#[tokio::test]
async fn test_resumed_download_requests_range() {
    let (addr, seen) = spawn_server(|req| match req.header("range") {
        Some("bytes=5-") => Some(reply("206 Partial Content", &[], b" world")),
        _ => Some(reply("200 OK", &[], b"hello world")),
    })
    .await;

    let url = Url::parse(&format!("http://{}/file.bin", addr)).unwrap();
    let target = DownloadTarget::resuming(ResumeData {
        url,
        bytes: Bytes::from_static(b"hello"),
    });
    let response = local_client().send(target).await.unwrap();

    assert_eq!(response.status_code, 206);
    assert_eq!(response.data, Bytes::from_static(b"hello world"));
    assert_eq!(seen.lock().unwrap()[0].header("range"), Some("bytes=5-"));
}

#[tokio::test]
async fn test_resume_ignored_by_server_restarts_body() {
    let (addr, _) = spawn_server(|_| Some(reply("200 OK", &[], b"fresh body"))).await;

    let url = Url::parse(&format!("http://{}/file.bin", addr)).unwrap();
    let target = DownloadTarget::resuming(ResumeData {
        url,
        bytes: Bytes::from_static(b"stale"),
    });
    let response = local_client().send(target).await.unwrap();

    assert_eq!(response.data, Bytes::from_static(b"fresh body"));
}

#[tokio::test]
async fn test_upload_from_file() {
    let (addr, seen) = spawn_server(|req| Some(reply("200 OK", &[], &req.body))).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.txt");
    std::fs::write(&path, b"upload payload").unwrap();

    let sent = Arc::new(Mutex::new(None));
    let log = Arc::clone(&sent);
    let url = Url::parse(&format!("http://{}/upload", addr)).unwrap();
    let target = UploadTarget::new(url, UploadSource::File(path))
        .progress(Arc::new(move |p| *log.lock().unwrap() = Some(p)));

    let response = local_client().send(target).await.unwrap();

    assert_eq!(response.data, Bytes::from_static(b"upload payload"));
    assert_eq!(seen.lock().unwrap()[0].method, "POST");
    let progress = sent.lock().unwrap().unwrap();
    assert_eq!(progress.completed, 14);
    assert_eq!(progress.fraction(), 1.0);
}

#[tokio::test]
async fn test_missing_upload_file() {
    let url = Url::parse("http://127.0.0.1:9/upload").unwrap();
    let target = UploadTarget::new(url, UploadSource::File("/nonexistent/mixednet.bin".into()));

    let err = local_client().send(target).await.unwrap_err();
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::FileIo));
}

#[tokio::test]
async fn test_timeout() {
    let (addr, _) = spawn_server(|_| None).await;

    let target = DataTarget::new(base(addr), "slow").timeout(Duration::from_millis(200));
    let err = local_client().send(target).await.unwrap_err();

    assert_eq!(err.transport_kind(), Some(TransportErrorKind::TimedOut));
}
