//! Outgoing request payloads.
//!
//! Data targets produce a JSON body through [`ParameterEncoding`]; upload
//! targets hand over raw bytes or a file read into memory.
//!
//! [`ParameterEncoding`]: crate::http::ParameterEncoding

use crate::base::neterror::NetError;
use bytes::Bytes;
use http_body_util::Full;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            RequestBody::Empty
        } else {
            RequestBody::Bytes(bytes)
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(buf: Vec<u8>) -> Self {
        Bytes::from(buf).into()
    }
}

impl RequestBody {
    /// Encode `value` as JSON.
    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self, NetError> {
        serde_json::to_vec(value)
            .map(Self::from)
            .map_err(|e| NetError::RequestConstructionFailed(format!("JSON body: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Bytes(bytes) => bytes.len(),
        }
    }

    /// Cheap clone of the payload; `Empty` yields an empty buffer.
    pub fn as_bytes(&self) -> Bytes {
        match self {
            RequestBody::Empty => Bytes::new(),
            RequestBody::Bytes(bytes) => bytes.clone(),
        }
    }

    pub fn into_full(self) -> Full<Bytes> {
        match self {
            RequestBody::Empty => Full::new(Bytes::new()),
            RequestBody::Bytes(bytes) => Full::new(bytes),
        }
    }
}
