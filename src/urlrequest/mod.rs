//! Request descriptors, task handles and stage execution.

pub mod context;
pub mod fallback;
pub mod job;
pub mod provider;
pub mod target;
pub mod task;

pub use context::{StageConfig, StubBehavior};
pub use fallback::{CdnMapper, FallbackOrchestrator, FallbackStrategy, Stage};
pub use job::{Completion, TransportJob};
pub use provider::{Route, StageProvider};
pub use target::{
    AuthorizationType, DataTarget, DownloadTarget, ResumeData, SampleResponse, SampleResponseFn,
    Target, UploadSource, UploadTarget,
};
pub use task::{DownloadTask, NetworkTask, ResumeDataFn, TaskHandle};
