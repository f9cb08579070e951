use crate::base::neterror::NetError;
use crate::http::{Response, TransportRequest};
use crate::plugin::Plugin;
use crate::urlrequest::target::Target;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityChange {
    Began,
    Ended,
}

pub type ActivityFn = Arc<dyn Fn(ActivityChange, &Target) + Send + Sync>;

/// Reports when each attempt starts and finishes, e.g. to drive a
/// network-activity indicator.
#[derive(Clone)]
pub struct ActivityPlugin {
    on_change: ActivityFn,
}

impl ActivityPlugin {
    pub fn new<F>(on_change: F) -> Self
    where
        F: Fn(ActivityChange, &Target) + Send + Sync + 'static,
    {
        Self {
            on_change: Arc::new(on_change),
        }
    }
}

impl Plugin for ActivityPlugin {
    fn will_send(&self, _request: &TransportRequest, target: &Target) {
        (self.on_change)(ActivityChange::Began, target);
    }

    fn did_receive(&self, _result: &Result<Response, NetError>, target: &Target) {
        (self.on_change)(ActivityChange::Ended, target);
    }
}

impl std::fmt::Debug for ActivityPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityPlugin").finish_non_exhaustive()
    }
}
