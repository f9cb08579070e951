//! Request lifecycle hooks.
//!
//! A stage runs its plugins in order at each point of an attempt:
//! parameters are merged before encoding, `prepare` may rewrite the built
//! request, `will_send`/`did_receive` observe, and `process` may replace
//! the result handed to the completion.

pub mod activity;
pub mod logger;
pub mod token;

use crate::base::neterror::NetError;
use crate::http::{Parameters, Response, TransportRequest};
use crate::urlrequest::target::Target;

pub use activity::{ActivityChange, ActivityPlugin};
pub use logger::LoggerPlugin;
pub use token::AccessTokenPlugin;

pub trait Plugin: Send + Sync {
    /// Parameters added to every data request. Target parameters win on
    /// conflicting keys.
    fn extra_parameters(&self) -> Option<Parameters> {
        None
    }

    fn prepare(&self, request: TransportRequest, _target: &Target) -> TransportRequest {
        request
    }

    fn will_send(&self, _request: &TransportRequest, _target: &Target) {}

    fn did_receive(&self, _result: &Result<Response, NetError>, _target: &Target) {}

    fn process(
        &self,
        result: Result<Response, NetError>,
        _target: &Target,
    ) -> Result<Response, NetError> {
        result
    }
}
