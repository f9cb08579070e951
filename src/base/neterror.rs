use crate::http::response::Response;
use crate::urlrequest::fallback::Stage;
use thiserror::Error;

/// Low-level transport failure classes.
///
/// Codes follow Chromium's `net_error_list.h` where a matching entry exists.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TransportErrorKind {
    #[error("Request cancelled")]
    Cancelled,
    #[error("Operation failed")]
    Failed,
    #[error("File access failed")]
    FileIo,
    #[error("Request timed out")]
    TimedOut,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection reset")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Internet disconnected")]
    InternetDisconnected,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Pinned key not in certificate chain")]
    CertificatePinningFailed,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Empty response")]
    EmptyResponse,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl TransportErrorKind {
    pub fn as_i32(&self) -> i32 {
        match self {
            TransportErrorKind::Failed => -2,
            TransportErrorKind::Cancelled => -3,
            TransportErrorKind::FileIo => -6,
            TransportErrorKind::TimedOut => -7,
            TransportErrorKind::ConnectionClosed => -100,
            TransportErrorKind::ConnectionReset => -101,
            TransportErrorKind::ConnectionRefused => -102,
            TransportErrorKind::ConnectionFailed => -104,
            TransportErrorKind::NameNotResolved => -105,
            TransportErrorKind::InternetDisconnected => -106,
            TransportErrorKind::SslProtocolError => -107,
            TransportErrorKind::CertificatePinningFailed => -150,
            TransportErrorKind::InvalidResponse => -320,
            TransportErrorKind::EmptyResponse => -324,
            TransportErrorKind::Unknown(code) => *code,
        }
    }

    /// Whether a request that failed this way may succeed over another route.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::TimedOut
                | TransportErrorKind::ConnectionClosed
                | TransportErrorKind::ConnectionReset
                | TransportErrorKind::ConnectionRefused
                | TransportErrorKind::ConnectionFailed
                | TransportErrorKind::NameNotResolved
                | TransportErrorKind::SslProtocolError
                | TransportErrorKind::CertificatePinningFailed
        )
    }
}

impl From<i32> for TransportErrorKind {
    fn from(code: i32) -> Self {
        match code {
            -2 => TransportErrorKind::Failed,
            -3 => TransportErrorKind::Cancelled,
            -6 => TransportErrorKind::FileIo,
            -7 => TransportErrorKind::TimedOut,
            -100 => TransportErrorKind::ConnectionClosed,
            -101 => TransportErrorKind::ConnectionReset,
            -102 => TransportErrorKind::ConnectionRefused,
            -104 => TransportErrorKind::ConnectionFailed,
            -105 => TransportErrorKind::NameNotResolved,
            -106 => TransportErrorKind::InternetDisconnected,
            -107 => TransportErrorKind::SslProtocolError,
            -150 => TransportErrorKind::CertificatePinningFailed,
            -320 => TransportErrorKind::InvalidResponse,
            -324 => TransportErrorKind::EmptyResponse,
            _ => TransportErrorKind::Unknown(code),
        }
    }
}

/// Why a response body could not be decoded.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecodeFailure {
    #[error("failed to map data to a String")]
    String,
    #[error("failed to map data to JSON")]
    Json,
    #[error("failed to map data to a typed object: {0}")]
    Object(String),
}

/// Errors surfaced to request completions.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    /// The transport failed. `response` holds whatever was received before
    /// the failure, if anything.
    #[error("{kind}: {message}")]
    TransportFailure {
        kind: TransportErrorKind,
        message: String,
        response: Option<Box<Response>>,
    },

    #[error("Status code {} didn't fall within the accepted range", .0.status_code)]
    StatusCodeRejected(Box<Response>),

    #[error("Failed to build request: {0}")]
    RequestConstructionFailed(String),

    #[error("{reason}")]
    ResponseDecodeFailed {
        reason: DecodeFailure,
        response: Box<Response>,
    },

    #[error("No route available for the {stage} stage")]
    NoRouteAvailable { stage: Stage },
}

impl NetError {
    /// Transport failure without a partial response.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        NetError::TransportFailure {
            kind,
            message: message.into(),
            response: None,
        }
    }

    /// The cancellation marker error.
    pub fn cancelled() -> Self {
        Self::transport(TransportErrorKind::Cancelled, "request was cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            NetError::TransportFailure {
                kind: TransportErrorKind::Cancelled,
                ..
            }
        )
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, NetError::TransportFailure { .. })
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            NetError::TransportFailure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The response attached to this error, if one was received.
    pub fn response(&self) -> Option<&Response> {
        match self {
            NetError::TransportFailure { response, .. } => response.as_deref(),
            NetError::StatusCodeRejected(response) => Some(response),
            NetError::ResponseDecodeFailed { response, .. } => Some(response),
            NetError::RequestConstructionFailed(_) | NetError::NoRouteAvailable { .. } => None,
        }
    }

    /// Numeric code. Transport failures use their kind's code; the other
    /// variants live in a custom range well clear of Chromium's.
    pub fn code(&self) -> i32 {
        match self {
            NetError::TransportFailure { kind, .. } => kind.as_i32(),
            NetError::StatusCodeRejected(_) => -10001,
            NetError::RequestConstructionFailed(_) => -10002,
            NetError::ResponseDecodeFailed { .. } => -10003,
            NetError::NoRouteAvailable { .. } => -10004,
        }
    }
}
