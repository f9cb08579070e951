//! One underlying operation: a single attempt on a single stage.
//!
//! The work future is spawned on the first `resume`, polled only while the
//! job is not suspended, bounded by the request timeout and abortable by
//! `cancel`. Its result reaches the completion exactly once, never on the
//! thread that called `resume` or `cancel`.

use crate::base::neterror::{NetError, TransportErrorKind};
use crate::http::{BodySink, Response};
use crate::urlrequest::target::ResumeData;
use crate::urlrequest::task::{next_task_identifier, DownloadTask, NetworkTask, ResumeDataFn};
use futures::future::{AbortHandle, Abortable};
use futures::task::AtomicWaker;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use url::Url;

pub type Completion = Box<dyn FnOnce(Result<Response, NetError>) + Send>;

pub type Work = Pin<Box<dyn Future<Output = Result<Response, NetError>> + Send>>;

/// Runs `f` on the current runtime, or on a fresh thread when there is none.
///
/// Never runs `f` on the calling thread: callers may hold a [`TaskHandle`]
/// lock that the completion takes again.
///
/// [`TaskHandle`]: crate::urlrequest::TaskHandle
pub(crate) fn dispatch<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { f() });
        }
        Err(_) => {
            std::thread::spawn(f);
        }
    }
}

#[derive(Default)]
struct PauseGate {
    paused: AtomicBool,
    waker: AtomicWaker,
}

impl PauseGate {
    fn close(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn open(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.waker.wake();
    }
}

/// Polls the inner future only while the gate is open.
struct Pausable<F> {
    inner: Pin<Box<F>>,
    gate: Arc<PauseGate>,
}

impl<F: Future> Future for Pausable<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.gate.paused.load(Ordering::SeqCst) {
            self.gate.waker.register(cx.waker());
            // Re-check in case `open` ran between the load and the register.
            if self.gate.paused.load(Ordering::SeqCst) {
                return Poll::Pending;
            }
        }
        self.inner.as_mut().poll(cx)
    }
}

struct Shared {
    completion: Mutex<Option<Completion>>,
}

impl Shared {
    fn complete(&self, result: Result<Response, NetError>) {
        let completion = self
            .completion
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(completion) = completion {
            completion(result);
        }
    }
}

/// A stage attempt as a [`NetworkTask`].
pub struct TransportJob {
    identifier: u64,
    work: Mutex<Option<Work>>,
    timeout: Duration,
    shared: Arc<Shared>,
    gate: Arc<PauseGate>,
    abort: Mutex<Option<AbortHandle>>,
    cancelled: AtomicBool,
    sink: BodySink,
    /// Set for downloads, which can produce resume data.
    resume_url: Option<Url>,
}

impl TransportJob {
    pub fn new(work: Work, timeout: Duration, sink: BodySink, completion: Completion) -> Self {
        Self {
            identifier: next_task_identifier(),
            work: Mutex::new(Some(work)),
            timeout,
            shared: Arc::new(Shared {
                completion: Mutex::new(Some(completion)),
            }),
            gate: Arc::new(PauseGate::default()),
            abort: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            sink,
            resume_url: None,
        }
    }

    /// Marks this job as a download whose partial body resumes `url`.
    pub fn resumable(mut self, url: Url) -> Self {
        self.resume_url = Some(url);
        self
    }

    pub fn is_started(&self) -> bool {
        self.work.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    fn start(&self, work: Work) {
        let (abort, registration) = AbortHandle::new_pair();
        *self.abort.lock().unwrap_or_else(|e| e.into_inner()) = Some(abort);

        let identifier = self.identifier;
        let timeout = self.timeout;
        let bounded = async move {
            match tokio::time::timeout(timeout, work).await {
                Ok(result) => result,
                Err(_) => Err(NetError::transport(
                    TransportErrorKind::TimedOut,
                    format!("no result within {:?}", timeout),
                )),
            }
        };
        let guarded = Abortable::new(
            Pausable {
                inner: Box::pin(bounded),
                gate: Arc::clone(&self.gate),
            },
            registration,
        );
        let shared = Arc::clone(&self.shared);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::trace!(task = identifier, "job started");
                handle.spawn(async move {
                    let result = guarded.await.unwrap_or_else(|_| Err(NetError::cancelled()));
                    shared.complete(result);
                });
            }
            Err(_) => {
                tracing::warn!(task = identifier, "job resumed outside a Tokio runtime");
                dispatch(move || {
                    shared.complete(Err(NetError::transport(
                        TransportErrorKind::Failed,
                        "no async runtime to run the request on",
                    )))
                });
            }
        }
    }
}

impl NetworkTask for TransportJob {
    fn task_identifier(&self) -> u64 {
        self.identifier
    }

    fn resume(&self) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let pending = self.work.lock().unwrap_or_else(|e| e.into_inner()).take();
        match pending {
            Some(work) => self.start(work),
            None => self.gate.open(),
        }
    }

    fn suspend(&self) {
        self.gate.close();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.work.lock().unwrap_or_else(|e| e.into_inner()).take();
        if pending.is_some() {
            tracing::trace!(task = self.identifier, "job cancelled before start");
            let shared = Arc::clone(&self.shared);
            dispatch(move || shared.complete(Err(NetError::cancelled())));
            return;
        }
        if let Some(abort) = self.abort.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            abort.abort();
        }
        // A suspended job still has to observe the abort.
        self.gate.open();
    }

    fn as_download(&self) -> Option<&dyn DownloadTask> {
        self.resume_url.is_some().then_some(self as &dyn DownloadTask)
    }
}

impl DownloadTask for TransportJob {
    fn cancel_producing_resume_data(&self, done: ResumeDataFn) {
        let resume = self.resume_url.clone().map(|url| ResumeData {
            url,
            bytes: self.sink.snapshot(),
        });
        self.cancel();
        dispatch(move || done(resume));
    }
}

impl std::fmt::Debug for TransportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportJob")
            .field("identifier", &self.identifier)
            .field("timeout", &self.timeout)
            .field("started", &self.is_started())
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .field("resumable", &self.resume_url.is_some())
            .finish()
    }
}
