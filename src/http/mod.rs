//! Request construction, the transport boundary and responses.

pub mod encoding;
pub mod hostrewrite;
pub mod hyperclient;
pub mod requestbody;
pub mod response;
pub mod transport;
pub mod validation;

// Re-exports for convenience
pub use encoding::{ParameterEncoding, Parameters};
pub use hostrewrite::{replace_host, rewrite_host};
pub use hyperclient::HyperTransport;
pub use requestbody::RequestBody;
pub use response::{RequestInfo, Response, ResponseMetadata};
pub use transport::{
    BodySink, Executing, HttpTransport, Progress, ProgressFn, TransportError, TransportRequest,
    TransportResponse,
};
pub use validation::ValidationType;
