//! Caller-visible tasks.
//!
//! A [`LogicalTask`] spans every transport attempt made for one submitted
//! request. Retries swap the underlying attempt; the task identity stays.

use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{DomainError, TransportError};
use crate::http::{CachePolicy, LogicalRequest, LogicalResponse, RawResponse};
use crate::retry::RetryPolicy;
use crate::transport::{AttemptHandle, Progress, TransferMetrics};

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;
pub type CompletionCallback =
    Box<dyn FnOnce(Option<LogicalResponse>, Option<DomainError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Identifies one transport attempt of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);

impl AttemptId {
    pub(crate) fn next() -> Self {
        AttemptId(NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not resumed yet.
    Suspended,
    Running,
    /// Between a finished attempt and the start of its replacement.
    Retrying,
    /// Cancellation requested, waiting for the transport to report back.
    Canceling,
    Completed,
}

/// One-shot signal released at the terminal transition.
///
/// Releasing is safe with or without waiters, and only the first release
/// counts.
pub struct CompletionSignal {
    released: Mutex<bool>,
    cond: Condvar,
    watch: watch::Sender<bool>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(false);
        Self {
            released: Mutex::new(false),
            cond: Condvar::new(),
            watch,
        }
    }

    /// Returns `true` on the first release only.
    pub fn release(&self) -> bool {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        if *released {
            return false;
        }
        *released = true;
        self.cond.notify_all();
        self.watch.send_replace(true);
        true
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait_blocking(&self) {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        while !*released {
            released = self
                .cond
                .wait(released)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns whether the signal was released before the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        let (released, _) = self
            .cond
            .wait_timeout_while(released, timeout, |released| !*released)
            .unwrap_or_else(PoisonError::into_inner);
        *released
    }

    pub async fn wait(&self) {
        let mut rx = self.watch.subscribe();
        // The sender lives as long as `self`, so this only returns once released
        let _ = rx.wait_for(|released| *released).await;
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome reported by the transport for one attempt.
pub(crate) type AttemptOutcome = (Option<RawResponse>, Option<TransportError>);

pub(crate) struct TaskInner {
    pub(crate) state: TaskState,
    pub(crate) handle: Option<Arc<dyn AttemptHandle>>,
    pub(crate) attempt: AttemptId,
    pub(crate) attempt_finished: bool,
    /// Set while some frame is running the retry loop for this task.
    pub(crate) driving: bool,
    /// Completion handed over to the frame that is driving.
    pub(crate) pending: Option<AttemptOutcome>,
    pub(crate) retry_count: u32,
    pub(crate) cancelled: bool,
    pub(crate) response: Option<LogicalResponse>,
    pub(crate) error: Option<DomainError>,
    pub(crate) progress: Progress,
    pub(crate) metrics: Option<TransferMetrics>,
    pub(crate) retry_policy: Option<RetryPolicy>,
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) on_complete: Option<CompletionCallback>,
}

pub(crate) struct TaskShared {
    pub(crate) id: TaskId,
    pub(crate) request: LogicalRequest,
    pub(crate) cache_policy: CachePolicy,
    pub(crate) timeout: Duration,
    pub(crate) signal: CompletionSignal,
    inner: Mutex<TaskInner>,
}

impl TaskShared {
    pub(crate) fn new(
        request: LogicalRequest,
        cache_policy: CachePolicy,
        timeout: Duration,
        attempt: AttemptId,
    ) -> Self {
        Self {
            id: TaskId::next(),
            request,
            cache_policy,
            timeout,
            signal: CompletionSignal::new(),
            inner: Mutex::new(TaskInner {
                state: TaskState::Suspended,
                handle: None,
                attempt,
                attempt_finished: false,
                driving: false,
                pending: None,
                retry_count: 0,
                cancelled: false,
                response: None,
                error: None,
                progress: Progress::default(),
                metrics: None,
                retry_policy: None,
                on_progress: None,
                on_complete: None,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle on a submitted request.
///
/// Cloning is cheap; all clones refer to the same task. Callbacks and the
/// retry policy should be installed before [`LogicalTask::resume`].
#[derive(Clone)]
pub struct LogicalTask {
    shared: Arc<TaskShared>,
}

impl LogicalTask {
    pub(crate) fn from_shared(shared: Arc<TaskShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn request(&self) -> &LogicalRequest {
        &self.shared.request
    }

    pub fn state(&self) -> TaskState {
        self.shared.lock().state
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.lock().retry_count
    }

    pub fn current_attempt(&self) -> AttemptId {
        self.shared.lock().attempt
    }

    pub fn progress(&self) -> Progress {
        self.shared.lock().progress
    }

    pub fn metrics(&self) -> Option<TransferMetrics> {
        self.shared.lock().metrics.clone()
    }

    /// Response of the latest finished attempt.
    pub fn response(&self) -> Option<LogicalResponse> {
        self.shared.lock().response.clone()
    }

    /// Error of the latest finished attempt.
    pub fn error(&self) -> Option<DomainError> {
        self.shared.lock().error.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.shared.signal.is_released()
    }

    /// Override the session-wide retry policy for this task.
    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.shared.lock().retry_policy = Some(policy);
    }

    pub fn on_progress<F>(&self, f: F)
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.shared.lock().on_progress = Some(Arc::new(f));
    }

    /// Install the completion handler.
    ///
    /// It runs exactly once, at the terminal transition. If the task is
    /// already finished it runs immediately with the final outcome.
    pub fn on_completion<F>(&self, f: F)
    where
        F: FnOnce(Option<LogicalResponse>, Option<DomainError>) + Send + 'static,
    {
        let mut inner = self.shared.lock();
        if inner.state == TaskState::Completed {
            let (response, error) = (inner.response.clone(), inner.error.clone());
            drop(inner);
            f(response, error);
        } else {
            inner.on_complete = Some(Box::new(f));
        }
    }

    /// Start the current attempt. Has no effect once running or finished.
    pub fn resume(&self) {
        let handle = {
            let mut inner = self.shared.lock();
            if inner.state != TaskState::Suspended || inner.cancelled {
                return;
            }
            inner.state = TaskState::Running;
            inner.handle.clone()
        };
        debug!("Resuming {}", self.shared.id);
        if let Some(handle) = handle {
            handle.resume();
        }
    }

    /// Cancel the task.
    ///
    /// No further attempt is scheduled afterwards, and completion fires once
    /// with a cancellation error.
    pub fn cancel(&self) {
        let handle = {
            let mut inner = self.shared.lock();
            if inner.state == TaskState::Completed || inner.cancelled {
                return;
            }
            inner.cancelled = true;
            inner.state = TaskState::Canceling;
            inner.handle.clone()
        };
        debug!("Cancelling {}", self.shared.id);
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// Final `(response, error)` pair, once the task has finished.
    pub fn outcome(&self) -> Option<(Option<LogicalResponse>, Option<DomainError>)> {
        let inner = self.shared.lock();
        (inner.state == TaskState::Completed).then(|| (inner.response.clone(), inner.error.clone()))
    }

    /// Wait asynchronously for the terminal state.
    pub async fn wait(&self) -> (Option<LogicalResponse>, Option<DomainError>) {
        self.shared.signal.wait().await;
        self.final_snapshot()
    }

    /// Block the current thread until the terminal state.
    pub fn wait_blocking(&self) -> (Option<LogicalResponse>, Option<DomainError>) {
        self.shared.signal.wait_blocking();
        self.final_snapshot()
    }

    /// Block up to `timeout`; `None` if the task has not finished by then.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<(Option<LogicalResponse>, Option<DomainError>)> {
        self.shared
            .signal
            .wait_timeout(timeout)
            .then(|| self.final_snapshot())
    }

    fn final_snapshot(&self) -> (Option<LogicalResponse>, Option<DomainError>) {
        let inner = self.shared.lock();
        (inner.response.clone(), inner.error.clone())
    }
}

impl fmt::Debug for LogicalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("LogicalTask")
            .field("id", &self.shared.id)
            .field("url", &self.shared.request.url())
            .field("state", &inner.state)
            .field("retry_count", &inner.retry_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_release_without_waiters() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_released());
        assert!(signal.release());
        assert!(!signal.release());
        assert!(signal.is_released());
        // Waiting after release returns immediately
        signal.wait_blocking();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_signal_wait_timeout_expires() {
        let signal = CompletionSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_signal_wakes_blocked_thread() {
        let signal = Arc::new(CompletionSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        signal.release();
        waiter.join().unwrap();
    }

    #[tokio::test]
    async fn test_signal_async_wait() {
        let signal = Arc::new(CompletionSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.release();
        waiter.await.unwrap();

        // Already released
        signal.wait().await;
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TaskId::next(), TaskId::next());
        assert_ne!(AttemptId::next(), AttemptId::next());
        assert!(TaskId(3).to_string() == "task-3");
    }

    #[test]
    fn test_new_task_defaults() {
        let shared = Arc::new(TaskShared::new(
            LogicalRequest::get("http://example.com"),
            CachePolicy::default(),
            Duration::from_secs(1),
            AttemptId::next(),
        ));
        let task = LogicalTask::from_shared(shared);
        assert_eq!(task.state(), TaskState::Suspended);
        assert_eq!(task.retry_count(), 0);
        assert!(task.response().is_none());
        assert!(task.error().is_none());
        assert!(task.outcome().is_none());
        assert!(!task.is_finished());
        assert!(task.wait_timeout(Duration::from_millis(1)).is_none());
    }
}
