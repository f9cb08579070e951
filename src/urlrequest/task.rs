//! Cancellable task handles.
//!
//! A logical request may run several underlying operations in sequence (one
//! per fallback stage). The caller gets a single [`TaskHandle`] whose
//! operation is swapped on every [`restart`](TaskHandle::restart); control
//! calls always reach whichever operation is current.

use crate::urlrequest::target::ResumeData;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub type ResumeDataFn = Box<dyn FnOnce(Option<ResumeData>) + Send>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Fresh identifier for an underlying operation. Never returns 0, which
/// stands for "nothing started yet".
pub fn next_task_identifier() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Control surface of one underlying operation.
///
/// Implementations must not run request completions inline from `resume`,
/// `suspend` or `cancel`; [`TaskHandle`] holds its lock across these calls.
pub trait NetworkTask: Send + Sync {
    fn task_identifier(&self) -> u64;

    fn resume(&self);

    fn suspend(&self);

    fn cancel(&self);

    /// Download operations that can hand back partial data.
    fn as_download(&self) -> Option<&dyn DownloadTask> {
        None
    }
}

pub trait DownloadTask: NetworkTask {
    /// Cancels and passes whatever was received so far to `done`.
    fn cancel_producing_resume_data(&self, done: ResumeDataFn);
}

struct Idle;

impl NetworkTask for Idle {
    fn task_identifier(&self) -> u64 {
        0
    }
    fn resume(&self) {}
    fn suspend(&self) {}
    fn cancel(&self) {}
}

/// Adapter for plain closures.
struct ClosureTask<R, S, C> {
    identifier: u64,
    resume: R,
    suspend: S,
    cancel: C,
}

impl<R, S, C> NetworkTask for ClosureTask<R, S, C>
where
    R: Fn() + Send + Sync,
    S: Fn() + Send + Sync,
    C: Fn() + Send + Sync,
{
    fn task_identifier(&self) -> u64 {
        self.identifier
    }
    fn resume(&self) {
        (self.resume)()
    }
    fn suspend(&self) {
        (self.suspend)()
    }
    fn cancel(&self) {
        (self.cancel)()
    }
}

struct TaskState {
    operation: Arc<dyn NetworkTask>,
    running: bool,
    cancelled: bool,
}

/// Handle returned for every request.
///
/// Clones share state. All transitions are serialized, and the current
/// operation's action runs while the transition holds the lock.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<Mutex<TaskState>>,
}

impl TaskHandle {
    fn with_operation(operation: Arc<dyn NetworkTask>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TaskState {
                operation,
                running: false,
                cancelled: false,
            })),
        }
    }

    /// A handle with no operation yet.
    pub fn idle() -> Self {
        Self::with_operation(Arc::new(Idle))
    }

    /// A handle over three plain actions.
    pub fn from_fns<R, S, C>(resume: R, suspend: S, cancel: C) -> Self
    where
        R: Fn() + Send + Sync + 'static,
        S: Fn() + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        Self::with_operation(Arc::new(ClosureTask {
            identifier: next_task_identifier(),
            resume,
            suspend,
            cancel,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Identifier of the current operation.
    pub fn task_identifier(&self) -> u64 {
        self.lock().operation.task_identifier()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Resumes the current operation unless running or cancelled.
    pub fn resume(&self) {
        let mut state = self.lock();
        if state.running || state.cancelled {
            return;
        }
        state.running = true;
        state.operation.resume();
    }

    /// Suspends the current operation if running.
    pub fn suspend(&self) {
        let mut state = self.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.operation.suspend();
    }

    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        state.running = false;
        state.operation.cancel();
    }

    /// Cancels the current download and passes its partial data to `done`.
    ///
    /// An operation without download capability is not told to cancel; the
    /// handle is only marked cancelled and `done` is dropped unrun, as it is
    /// when the handle was already cancelled.
    pub fn cancel_producing_resume_data<F>(&self, done: F)
    where
        F: FnOnce(Option<ResumeData>) + Send + 'static,
    {
        let mut state = self.lock();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        state.running = false;
        match state.operation.as_download() {
            Some(download) => download.cancel_producing_resume_data(Box::new(done)),
            None => {
                tracing::debug!(
                    task = state.operation.task_identifier(),
                    "operation cannot produce resume data"
                )
            }
        }
    }

    /// Records that the current operation delivered its result.
    pub fn mark_finished(&self) {
        self.lock().running = false;
    }

    /// Installs `operation` as current and resumes it.
    ///
    /// Returns `false` without touching anything once the handle has been
    /// cancelled; the caller still owns `operation` and must settle it.
    pub fn restart(&self, operation: Arc<dyn NetworkTask>) -> bool {
        let mut state = self.lock();
        if state.cancelled {
            return false;
        }
        tracing::trace!(
            from = state.operation.task_identifier(),
            to = operation.task_identifier(),
            "restarting task"
        );
        state.operation = operation;
        state.running = true;
        state.operation.resume();
        true
    }
}

impl NetworkTask for TaskHandle {
    fn task_identifier(&self) -> u64 {
        TaskHandle::task_identifier(self)
    }
    fn resume(&self) {
        TaskHandle::resume(self)
    }
    fn suspend(&self) {
        TaskHandle::suspend(self)
    }
    fn cancel(&self) {
        TaskHandle::cancel(self)
    }
    fn as_download(&self) -> Option<&dyn DownloadTask> {
        Some(self)
    }
}

impl DownloadTask for TaskHandle {
    fn cancel_producing_resume_data(&self, done: ResumeDataFn) {
        TaskHandle::cancel_producing_resume_data(self, done)
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::idle()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TaskHandle")
            .field("task_identifier", &state.operation.task_identifier())
            .field("running", &state.running)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        resumed: AtomicUsize,
        suspended: AtomicUsize,
        cancelled: AtomicUsize,
    }

    fn counted() -> (TaskHandle, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let (r, s, c) = (counters.clone(), counters.clone(), counters.clone());
        let handle = TaskHandle::from_fns(
            move || {
                r.resumed.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                s.suspended.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                c.cancelled.fetch_add(1, Ordering::SeqCst);
            },
        );
        (handle, counters)
    }

    #[test]
    fn test_resume_twice_runs_once() {
        let (handle, counters) = counted();
        handle.resume();
        handle.resume();
        assert!(handle.is_running());
        assert_eq!(counters.resumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_suspend_only_when_running() {
        let (handle, counters) = counted();
        handle.suspend();
        assert_eq!(counters.suspended.load(Ordering::SeqCst), 0);

        handle.resume();
        handle.suspend();
        assert!(!handle.is_running());
        assert_eq!(counters.suspended.load(Ordering::SeqCst), 1);

        handle.resume();
        assert_eq!(counters.resumed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let (handle, counters) = counted();
        handle.resume();
        handle.cancel();
        handle.cancel();
        handle.resume();

        assert!(handle.is_cancelled());
        assert!(!handle.is_running());
        assert_eq!(counters.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(counters.resumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mark_finished_allows_restart() {
        let (handle, _) = counted();
        handle.resume();
        handle.mark_finished();
        assert!(!handle.is_running());

        let (next, next_counters) = counted();
        let next_id = next.task_identifier();
        assert!(handle.restart(Arc::new(next)));
        assert!(handle.is_running());
        assert_eq!(handle.task_identifier(), next_id);
        assert_eq!(next_counters.resumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_after_cancel_is_refused() {
        let (handle, _) = counted();
        handle.cancel();
        let before = handle.task_identifier();

        let (next, next_counters) = counted();
        assert!(!handle.restart(Arc::new(next)));
        assert_eq!(handle.task_identifier(), before);
        assert_eq!(next_counters.resumed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_reaches_current_operation() {
        let handle = TaskHandle::idle();
        assert_eq!(handle.task_identifier(), 0);

        let (next, next_counters) = counted();
        handle.restart(Arc::new(next));
        handle.cancel();
        assert_eq!(next_counters.cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resume_data_without_download_capability() {
        let (handle, counters) = counted();
        handle.resume();
        let called = Arc::new(AtomicUsize::new(0));
        let seen = called.clone();
        handle.cancel_producing_resume_data(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.is_cancelled());
        assert_eq!(counters.cancelled.load(Ordering::SeqCst), 0);
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let (handle, _) = counted();
        let other = handle.clone();
        other.resume();
        assert!(handle.is_running());
        assert_eq!(handle.task_identifier(), other.task_identifier());
    }
}
