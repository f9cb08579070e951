//! Response delivered to request completions, with decoding helpers.

use crate::base::neterror::{DecodeFailure, NetError};
use crate::http::transport::{TransportRequest, TransportResponse};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::ops::RangeInclusive;
use url::Url;

/// Status code reported when no transport response exists.
pub const MISSING_RESPONSE_STATUS: u16 = 400;

/// The request as it was sent.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl From<&TransportRequest> for RequestInfo {
    fn from(request: &TransportRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
        }
    }
}

/// Status line and headers of the server's answer.
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub url: Url,
}

/// HTTP response as seen by callers.
#[derive(Clone)]
pub struct Response {
    pub status_code: u16,
    pub data: Bytes,
    pub request: Option<RequestInfo>,
    pub metadata: Option<ResponseMetadata>,
}

impl Response {
    /// A missing status code defaults to 400.
    pub fn new(
        status_code: Option<u16>,
        data: Bytes,
        request: Option<RequestInfo>,
        metadata: Option<ResponseMetadata>,
    ) -> Self {
        Self {
            status_code: status_code.unwrap_or(MISSING_RESPONSE_STATUS),
            data,
            request,
            metadata,
        }
    }

    pub fn from_transport(request: Option<RequestInfo>, response: TransportResponse) -> Self {
        let metadata = ResponseMetadata {
            status: response.status,
            version: response.version,
            headers: response.headers,
            url: response.url,
        };
        Self::new(
            Some(response.status.as_u16()),
            response.body,
            request,
            Some(metadata),
        )
    }

    /// Header lookup on the response metadata.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.metadata
            .as_ref()?
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
    }

    pub fn filter_status_codes(self, codes: RangeInclusive<u16>) -> Result<Self, NetError> {
        if codes.contains(&self.status_code) {
            Ok(self)
        } else {
            Err(NetError::StatusCodeRejected(Box::new(self)))
        }
    }

    pub fn filter_status_code(self, code: u16) -> Result<Self, NetError> {
        self.filter_status_codes(code..=code)
    }

    pub fn filter_successful_status_codes(self) -> Result<Self, NetError> {
        self.filter_status_codes(200..=299)
    }

    pub fn filter_successful_status_and_redirect_codes(self) -> Result<Self, NetError> {
        self.filter_status_codes(200..=399)
    }

    fn decode_error(&self, reason: DecodeFailure) -> NetError {
        NetError::ResponseDecodeFailed {
            reason,
            response: Box::new(self.clone()),
        }
    }

    /// Body as UTF-8, or the string found at `key_path` in a JSON body.
    pub fn map_string(&self, key_path: Option<&str>) -> Result<String, NetError> {
        match key_path {
            Some(path) => {
                let json = self.map_json(true)?;
                value_at_key_path(&json, path)
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or_else(|| self.decode_error(DecodeFailure::String))
            }
            None => std::str::from_utf8(&self.data)
                .map(str::to_owned)
                .map_err(|_| self.decode_error(DecodeFailure::String)),
        }
    }

    /// Body as JSON. Fragments (bare strings, numbers) are accepted. An
    /// empty body maps to `null` unless `fails_on_empty` is set.
    pub fn map_json(&self, fails_on_empty: bool) -> Result<Value, NetError> {
        if self.data.is_empty() && !fails_on_empty {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.data).map_err(|_| self.decode_error(DecodeFailure::Json))
    }

    /// Decode the body, or the value at `key_path`, into `T`.
    ///
    /// With `fails_on_empty == false`, an empty body (or a missing key path)
    /// decodes as `{}` and then `[{}]` before giving up, so types with all
    /// optional fields still decode.
    #[cfg(feature = "json")]
    pub fn map<T: DeserializeOwned>(
        &self,
        key_path: Option<&str>,
        fails_on_empty: bool,
    ) -> Result<T, NetError> {
        let value = match key_path {
            Some(path) => {
                let json = self.map_json(fails_on_empty)?;
                match value_at_key_path(&json, path) {
                    Some(found) => Some(found.clone()),
                    None if fails_on_empty => {
                        return Err(self.decode_error(DecodeFailure::Json));
                    }
                    None => None,
                }
            }
            None => None,
        };

        if let Some(value) = value {
            return serde_json::from_value(value)
                .map_err(|e| self.decode_error(DecodeFailure::Object(e.to_string())));
        }

        if self.data.is_empty() && !fails_on_empty {
            if let Ok(empty) = serde_json::from_str::<T>("{}") {
                return Ok(empty);
            }
            if let Ok(empty) = serde_json::from_str::<T>("[{}]") {
                return Ok(empty);
            }
        }
        serde_json::from_slice(&self.data)
            .map_err(|e| self.decode_error(DecodeFailure::Object(e.to_string())))
    }
}

/// Walks a dot-separated key path through nested JSON objects.
fn value_at_key_path<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(json, |current, key| current.as_object()?.get(key))
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        self.status_code == other.status_code && self.data == other.data
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status Code: {}, Data Length: {}",
            self.status_code,
            self.data.len()
        )
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status_code", &self.status_code)
            .field("data_len", &self.data.len())
            .field("url", &self.metadata.as_ref().map(|m| m.url.as_str()))
            .finish()
    }
}
