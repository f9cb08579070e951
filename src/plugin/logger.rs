//! Request/response logging through `tracing`.
//!
//! Events go to the `mixednet::network` target at debug level, so they can be
//! enabled independently of the crate's other diagnostics.

use crate::base::neterror::NetError;
use crate::http::{Response, TransportRequest};
use crate::plugin::Plugin;
use crate::urlrequest::target::Target;

const LOG_TARGET: &str = "mixednet::network";

#[derive(Debug, Clone, Copy)]
pub struct LoggerPlugin {
    /// Render requests as curl commands.
    pub curl: bool,
    /// Include up to this many body bytes in response events.
    pub body_limit: usize,
}

impl LoggerPlugin {
    pub fn new() -> Self {
        Self {
            curl: false,
            body_limit: 1024,
        }
    }

    pub fn curl(mut self, enabled: bool) -> Self {
        self.curl = enabled;
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

impl Default for LoggerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for LoggerPlugin {
    fn will_send(&self, request: &TransportRequest, target: &Target) {
        if self.curl {
            tracing::debug!(target: LOG_TARGET, kind = target.kind(), "{}", curl_command(request));
        } else {
            tracing::debug!(
                target: LOG_TARGET,
                kind = target.kind(),
                method = %request.method,
                url = %request.url,
                headers = request.headers.len(),
                body = request.body.len(),
                "sending request"
            );
        }
    }

    fn did_receive(&self, result: &Result<Response, NetError>, target: &Target) {
        match result {
            Ok(response) => {
                let shown = response.data.len().min(self.body_limit);
                tracing::debug!(
                    target: LOG_TARGET,
                    kind = target.kind(),
                    status = response.status_code,
                    bytes = response.data.len(),
                    body = %String::from_utf8_lossy(&response.data[..shown]),
                    "received response"
                );
            }
            Err(error) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    kind = target.kind(),
                    code = error.code(),
                    error = %error,
                    "request failed"
                );
            }
        }
    }
}

/// `curl` invocation reproducing `request`.
pub fn curl_command(request: &TransportRequest) -> String {
    let mut out = format!("curl -X {}", request.method);
    for (name, value) in &request.headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        out.push_str(&format!(" -H \"{}: {}\"", name, value.replace('"', "\\\"")));
    }
    if !request.body.is_empty() {
        let body = String::from_utf8_lossy(&request.body.as_bytes()).into_owned();
        out.push_str(&format!(" -d \"{}\"", body.replace('"', "\\\"")));
    }
    out.push_str(&format!(" \"{}\"", request.url));
    out
}
