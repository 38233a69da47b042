//! Session and retry engine.
//!
//! The transport reports each attempt's events through an [`AttemptObserver`].
//! Every report is one transition of the task's state machine:
//!
//! ```text
//! Suspended -> Running -> { Retrying -> Running }* -> Completed
//!                    \-> Canceling ------------------/
//! ```
//!
//! On completion the engine classifies the outcome, asks the retry policy,
//! and either starts a fresh attempt under the same task or finalizes the
//! task. Finalization is the only place the completion callback and the
//! completion signal fire.

use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::{DomainError, TransportError, classify};
use crate::http::{
    AcceptableStatusSet, CachePolicy, LogicalRequest, LogicalResponse, RawResponse,
    RequestBuilder, ResponseBuilder,
};
use crate::interceptor::{Interceptor, InterceptorRegistry, InterceptorToken};
use crate::pipeline::{RequestPipeline, ResponsePipeline, decode_json};
use crate::retry::{self, RetryPolicy};
use crate::task::{AttemptId, AttemptOutcome, LogicalTask, TaskShared, TaskState};
use crate::transport::{AttemptHandle, Progress, TransferMetrics, Transport};

pub(crate) struct SessionCore {
    transport: Arc<dyn Transport>,
    interceptors: InterceptorRegistry,
    acceptable: RwLock<AcceptableStatusSet>,
    default_retry: RwLock<Option<RetryPolicy>>,
    closed: AtomicBool,
}

/// Callback channel a transport uses to report one attempt.
#[derive(Clone)]
pub struct AttemptObserver {
    core: Arc<SessionCore>,
    task: Arc<TaskShared>,
    attempt: AttemptId,
}

impl AttemptObserver {
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn progress(&self, progress: Progress) {
        self.core.on_progress(&self.task, self.attempt, progress);
    }

    pub fn metrics(&self, metrics: TransferMetrics) {
        self.core.on_metrics(&self.task, self.attempt, metrics);
    }

    pub fn complete(&self, response: Option<RawResponse>, error: Option<TransportError>) {
        self.core
            .on_attempt_complete(&self.task, self.attempt, response, error);
    }
}

impl fmt::Debug for AttemptObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptObserver")
            .field("task", &self.task.id)
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl SessionCore {
    fn acceptable_status_codes(&self) -> AcceptableStatusSet {
        self.acceptable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn default_retry_policy(&self) -> Option<RetryPolicy> {
        self.default_retry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Build the request for a new attempt and hand it to the transport.
    fn create_attempt(
        self: &Arc<Self>,
        task: &Arc<TaskShared>,
        attempt: AttemptId,
    ) -> Arc<dyn AttemptHandle> {
        let request = RequestPipeline::new(&self.interceptors).build(
            &task.request,
            task.cache_policy,
            task.timeout,
        );
        let observer = AttemptObserver {
            core: Arc::clone(self),
            task: Arc::clone(task),
            attempt,
        };
        self.transport.create_attempt(request, observer)
    }

    fn on_progress(&self, task: &TaskShared, attempt: AttemptId, progress: Progress) {
        let callback = {
            let mut inner = task.lock();
            if inner.attempt != attempt || inner.state == TaskState::Completed {
                debug!("Ignoring progress from superseded attempt of {}", task.id);
                return;
            }
            inner.progress = progress;
            inner.on_progress.clone()
        };
        if let Some(callback) = callback {
            callback(progress);
        }
    }

    fn on_metrics(&self, task: &TaskShared, attempt: AttemptId, metrics: TransferMetrics) {
        let mut inner = task.lock();
        if inner.attempt != attempt || inner.state == TaskState::Completed {
            debug!("Ignoring metrics from superseded attempt of {}", task.id);
            return;
        }
        inner.metrics = Some(metrics);
    }

    /// Accept the outcome of `attempt` and run the retry loop for it.
    ///
    /// Only one frame drives a task at a time. A completion reported while
    /// the driving frame is still inside `resume` is parked in the task and
    /// picked up by that frame, so synchronous transports never nest.
    fn on_attempt_complete(
        self: &Arc<Self>,
        task: &Arc<TaskShared>,
        attempt: AttemptId,
        raw: Option<RawResponse>,
        transport_error: Option<TransportError>,
    ) {
        {
            let mut inner = task.lock();
            if inner.attempt != attempt
                || inner.attempt_finished
                || inner.state == TaskState::Completed
            {
                warn!("Ignoring duplicate or stale completion for {}", task.id);
                return;
            }
            inner.attempt_finished = true;
            if inner.driving {
                inner.pending = Some((raw, transport_error));
                return;
            }
            inner.driving = true;
        }
        self.drive(task, (raw, transport_error));
    }

    fn drive(self: &Arc<Self>, task: &Arc<TaskShared>, mut outcome: AttemptOutcome) {
        loop {
            let Some(handle) = self.settle(task, outcome) else {
                return;
            };
            handle.resume();

            let mut inner = task.lock();
            match inner.pending.take() {
                Some(next) => outcome = next,
                None => {
                    inner.driving = false;
                    return;
                }
            }
        }
    }

    /// Record one finished attempt and decide what follows it.
    ///
    /// Returns the handle of the next attempt, not yet resumed, or `None`
    /// once the task has been finalized.
    fn settle(
        self: &Arc<Self>,
        task: &Arc<TaskShared>,
        (raw, transport_error): AttemptOutcome,
    ) -> Option<Arc<dyn AttemptHandle>> {
        let raw = raw.map(Arc::new);
        let decoded = decode_json(raw.as_deref());
        let error = classify(
            transport_error.as_ref(),
            decoded.as_ref(),
            raw.as_ref(),
            &self.acceptable_status_codes(),
        );
        let response =
            ResponsePipeline::new(&self.interceptors).build(raw, Some(task.id), decoded);

        let (task_policy, retry_count, cancelled) = {
            let mut inner = task.lock();
            inner.response = response.clone();
            inner.error = error.clone();
            if !inner.cancelled {
                inner.state = TaskState::Retrying;
            }
            (inner.retry_policy.clone(), inner.retry_count, inner.cancelled)
        };

        if let Some(error) = &error {
            debug!("{} attempt {} failed: {}", task.id, retry_count + 1, error);
        }

        let should_retry = !cancelled
            && !self.is_closed()
            && retry::decide(
                task_policy.as_ref(),
                self.default_retry_policy().as_ref(),
                response.as_ref(),
                error.as_ref(),
                retry_count,
            );

        if should_retry && let Some(handle) = self.retry(task) {
            return Some(handle);
        }
        self.finalize(task);
        None
    }

    /// Install the next attempt under the same task.
    ///
    /// Returns `None` when the task was cancelled or the session closed meanwhile;
    /// a new attempt created for a cancelled task is discarded without being resumed.
    fn retry(self: &Arc<Self>, task: &Arc<TaskShared>) -> Option<Arc<dyn AttemptHandle>> {
        if self.is_closed() {
            debug!("Session closed, not retrying {}", task.id);
            return None;
        }
        let next = AttemptId::next();
        let handle = self.create_attempt(task, next);
        let retry_count = {
            let mut inner = task.lock();
            if inner.cancelled || inner.state == TaskState::Completed {
                drop(inner);
                debug!("{} was cancelled before its retry could start", task.id);
                handle.cancel();
                return None;
            }
            inner.handle = Some(Arc::clone(&handle));
            inner.attempt = next;
            inner.attempt_finished = false;
            inner.retry_count += 1;
            inner.state = TaskState::Running;
            inner.retry_count
        };
        warn!(
            "{} {}: retrying (retry {})",
            task.request.method(),
            task.request.url(),
            retry_count
        );
        Some(handle)
    }

    /// Move the task to its terminal state and notify the caller.
    fn finalize(&self, task: &TaskShared) {
        let (callback, response, error, retry_count) = {
            let mut inner = task.lock();
            if inner.state == TaskState::Completed {
                return;
            }
            if inner.cancelled && !inner.error.as_ref().is_some_and(DomainError::is_cancelled) {
                inner.error = Some(DomainError::cancelled());
            }
            inner.state = TaskState::Completed;
            inner.handle = None;
            inner.driving = false;
            inner.pending = None;
            (
                inner.on_complete.take(),
                inner.response.clone(),
                inner.error.clone(),
                inner.retry_count,
            )
        };

        task.signal.release();

        match &error {
            Some(error) => info!(
                "{} {} finished with error after {} retries: {}",
                task.request.method(),
                task.request.url(),
                retry_count,
                error
            ),
            None => info!(
                "{} {} finished after {} retries",
                task.request.method(),
                task.request.url(),
                retry_count
            ),
        }

        if let Some(callback) = callback {
            callback(response, error);
        }
    }
}

/// Caller-facing entry point: interceptors, configuration and task submission
/// on top of one transport.
///
/// Dropping the session closes it.
pub struct Session {
    core: Arc<SessionCore>,
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let core = SessionCore {
            transport,
            interceptors: InterceptorRegistry::new(),
            acceptable: RwLock::new(config.acceptable_status_codes.clone()),
            default_retry: RwLock::new(Some(config.default_retry_policy())),
            closed: AtomicBool::new(false),
        };
        Self {
            core: Arc::new(core),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.core.interceptors
    }

    pub fn add_interceptor(&self, interceptor: Interceptor) -> InterceptorToken {
        self.core.interceptors.add(interceptor)
    }

    pub fn add_request_interceptor<F>(&self, f: F) -> InterceptorToken
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync + 'static,
    {
        self.add_interceptor(Interceptor::request(f))
    }

    pub fn add_response_interceptor<F>(&self, f: F) -> InterceptorToken
    where
        F: Fn(ResponseBuilder) -> ResponseBuilder + Send + Sync + 'static,
    {
        self.add_interceptor(Interceptor::response(f))
    }

    pub fn remove_interceptor(&self, token: InterceptorToken) -> bool {
        self.core.interceptors.remove(token)
    }

    pub fn acceptable_status_codes(&self) -> AcceptableStatusSet {
        self.core.acceptable_status_codes()
    }

    pub fn set_acceptable_status_codes(&self, codes: AcceptableStatusSet) {
        *self
            .core
            .acceptable
            .write()
            .unwrap_or_else(PoisonError::into_inner) = codes;
    }

    pub fn default_retry_policy(&self) -> Option<RetryPolicy> {
        self.core.default_retry_policy()
    }

    /// Replace the session-wide retry policy; `None` disables it.
    pub fn set_default_retry_policy(&self, policy: Option<RetryPolicy>) {
        *self
            .core
            .default_retry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Create a suspended task for `request`.
    ///
    /// `cache_policy` and `timeout` override the request's own values, which
    /// in turn override the transport defaults.
    #[tracing::instrument(skip(self, request), fields(url = %request.url()))]
    pub fn submit(
        &self,
        request: LogicalRequest,
        cache_policy: Option<CachePolicy>,
        timeout: Option<Duration>,
    ) -> LogicalTask {
        let cache_policy = cache_policy.or(request.requested_cache_policy());
        let timeout = timeout.or(request.requested_timeout());
        let attempt = AttemptId::next();

        if self.is_closed() {
            warn!("Submitting {} on a closed session", request.url());
            let task = Arc::new(TaskShared::new(
                request,
                cache_policy.unwrap_or_default(),
                timeout.unwrap_or_default(),
                attempt,
            ));
            task.lock().error = Some(DomainError::from_transport(
                TransportError::invalidated(),
                None,
                None,
            ));
            self.core.finalize(&task);
            return LogicalTask::from_shared(task);
        }

        let cache_policy =
            cache_policy.unwrap_or_else(|| self.core.transport.default_cache_policy());
        let timeout = timeout.unwrap_or_else(|| self.core.transport.default_timeout());
        let task = Arc::new(TaskShared::new(request, cache_policy, timeout, attempt));
        let handle = self.core.create_attempt(&task, attempt);
        task.lock().handle = Some(handle);
        debug!("Submitted {} for {}", task.id, task.request.url());
        LogicalTask::from_shared(task)
    }

    /// Submit, resume and wait for `request`.
    #[tracing::instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn send(&self, request: LogicalRequest) -> Result<LogicalResponse, DomainError> {
        let task = self.submit(request, None, None);
        task.resume();
        match task.wait().await {
            (_, Some(error)) => Err(error),
            (Some(response), None) => Ok(response),
            (None, None) => Err(DomainError::from_transport(
                TransportError::new(
                    TransportError::UNKNOWN,
                    "transport completed without a response",
                ),
                None,
                None,
            )),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Tear the session down: drop interceptors and invalidate the transport.
    /// Idempotent.
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing session");
        self.core.interceptors.clear();
        self.core.transport.invalidate();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
