use crate::http::TransportRequest;
use crate::plugin::Plugin;
use crate::urlrequest::target::Target;
use http::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;

pub type TokenFn = Arc<dyn Fn(&Target) -> Option<String> + Send + Sync>;

/// Sets `Authorization: <scheme> <token>` for targets that ask for it.
///
/// The token is fetched per request so it can rotate. Targets with
/// [`AuthorizationType::None`](crate::urlrequest::AuthorizationType::None)
/// are left alone.
#[derive(Clone)]
pub struct AccessTokenPlugin {
    token: TokenFn,
}

impl AccessTokenPlugin {
    pub fn new<F>(token: F) -> Self
    where
        F: Fn(&Target) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            token: Arc::new(token),
        }
    }
}

impl Plugin for AccessTokenPlugin {
    fn prepare(&self, mut request: TransportRequest, target: &Target) -> TransportRequest {
        let Some(scheme) = target.authorization().scheme() else {
            return request;
        };
        let Some(token) = (self.token)(target) else {
            return request;
        };
        match HeaderValue::from_str(&format!("{} {}", scheme, token)) {
            Ok(value) => {
                request.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!(scheme = scheme, "access token is not a valid header value"),
        }
        request
    }
}

impl std::fmt::Debug for AccessTokenPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenPlugin").finish_non_exhaustive()
    }
}
