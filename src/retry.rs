//! Retry policies.
//!
//! A policy is a predicate over the latest outcome and the number of retries
//! already made. The engine has no ceiling, backoff or jitter of its own; a
//! policy that wants a ceiling enforces it through the retry count.

use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;

use crate::error::{DomainError, ErrorKind};
use crate::http::LogicalResponse;

type RetryFn = dyn Fn(Option<&LogicalResponse>, Option<&DomainError>, u32) -> bool + Send + Sync;

/// Decides whether a finished attempt should be resubmitted.
#[derive(Clone)]
pub struct RetryPolicy {
    decide: Arc<RetryFn>,
}

impl RetryPolicy {
    /// Wrap an arbitrary predicate `(response, error, retry_count) -> retry?`.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Option<&LogicalResponse>, Option<&DomainError>, u32) -> bool + Send + Sync + 'static,
    {
        Self { decide: Arc::new(f) }
    }

    pub fn never() -> Self {
        Self::from_fn(|_, _, _| false)
    }

    /// Retry any failed attempt until `max_retries` retries have been made.
    pub fn up_to(max_retries: u32) -> Self {
        Self::from_fn(move |_, error, retries| {
            retries < max_retries && error.is_some_and(|e| !e.is_cancelled())
        })
    }

    /// Retry only transient failures (see [`is_transient`]) until
    /// `max_retries` retries have been made.
    pub fn transient(max_retries: u32) -> Self {
        Self::from_fn(move |_, error, retries| {
            retries < max_retries && error.is_some_and(is_transient)
        })
    }

    /// Like [`RetryPolicy::transient`], but additionally retries the listed
    /// status codes.
    pub fn transient_or_status(max_retries: u32, statuses: Vec<u16>) -> Self {
        Self::from_fn(move |_, error, retries| {
            retries < max_retries
                && error.is_some_and(|e| {
                    is_transient(e)
                        || (e.kind() == ErrorKind::UnacceptableStatus
                            && statuses.iter().any(|s| i64::from(*s) == e.code()))
                })
        })
    }

    pub fn should_retry(
        &self,
        response: Option<&LogicalResponse>,
        error: Option<&DomainError>,
        retry_count: u32,
    ) -> bool {
        (self.decide)(response, error, retry_count)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryPolicy")
    }
}

/// Whether an error is worth another attempt.
///
/// Transport failures and 5xx responses are transient. Client errors (4xx,
/// including authentication failures, 404 and rate limiting) will not succeed
/// on an immediate retry, and cancellation is final.
pub fn is_transient(error: &DomainError) -> bool {
    match error.kind() {
        ErrorKind::Cancelled => false,
        ErrorKind::Transport => true,
        ErrorKind::UnacceptableStatus => u16::try_from(error.code())
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .is_some_and(|status| status.is_server_error()),
    }
}

/// Combine a task-level and a session-level policy.
///
/// The task policy is asked first; a `true` short-circuits. A missing policy
/// counts as "do not retry".
pub fn decide(
    task_policy: Option<&RetryPolicy>,
    session_policy: Option<&RetryPolicy>,
    response: Option<&LogicalResponse>,
    error: Option<&DomainError>,
    retry_count: u32,
) -> bool {
    task_policy.is_some_and(|p| p.should_retry(response, error, retry_count))
        || session_policy.is_some_and(|p| p.should_retry(response, error, retry_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, classify};
    use crate::http::{AcceptableStatusSet, RawResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status_error(status: u16) -> DomainError {
        let raw = Arc::new(RawResponse::http(
            "http://example.com",
            StatusCode::from_u16(status).unwrap(),
            Default::default(),
            Vec::new(),
        ));
        classify(None, None, Some(&raw), &AcceptableStatusSet::default()).unwrap()
    }

    fn transport_error() -> DomainError {
        DomainError::from_transport(
            TransportError::new(TransportError::CANNOT_CONNECT, "connection refused"),
            None,
            None,
        )
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&transport_error()));
        assert!(is_transient(&status_error(500)));
        assert!(is_transient(&status_error(503)));
        assert!(!is_transient(&status_error(401)));
        assert!(!is_transient(&status_error(403)));
        assert!(!is_transient(&status_error(404)));
        assert!(!is_transient(&status_error(429)));
        assert!(!is_transient(&DomainError::cancelled()));
    }

    #[test]
    fn test_up_to_respects_ceiling() {
        let policy = RetryPolicy::up_to(2);
        let error = status_error(404);
        assert!(policy.should_retry(None, Some(&error), 0));
        assert!(policy.should_retry(None, Some(&error), 1));
        assert!(!policy.should_retry(None, Some(&error), 2));
        // Success never retries
        assert!(!policy.should_retry(None, None, 0));
        assert!(!policy.should_retry(None, Some(&DomainError::cancelled()), 0));
    }

    #[test]
    fn test_transient_policy() {
        let policy = RetryPolicy::transient(3);
        assert!(policy.should_retry(None, Some(&status_error(502)), 0));
        assert!(!policy.should_retry(None, Some(&status_error(404)), 0));
        assert!(!policy.should_retry(None, Some(&status_error(502)), 3));
    }

    #[test]
    fn test_transient_or_status() {
        let policy = RetryPolicy::transient_or_status(1, vec![429]);
        assert!(policy.should_retry(None, Some(&status_error(429)), 0));
        assert!(policy.should_retry(None, Some(&transport_error()), 0));
        assert!(!policy.should_retry(None, Some(&status_error(404)), 0));
        assert!(!policy.should_retry(None, Some(&status_error(429)), 1));
    }

    #[test]
    fn test_never() {
        assert!(!RetryPolicy::never().should_retry(None, Some(&transport_error()), 0));
    }

    #[test]
    fn test_decide_task_policy_short_circuits() {
        let session_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&session_calls);
        let session = RetryPolicy::from_fn(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        });
        let task = RetryPolicy::from_fn(|_, _, _| true);

        assert!(decide(Some(&task), Some(&session), None, None, 0));
        assert_eq!(session_calls.load(Ordering::SeqCst), 0);

        let task = RetryPolicy::never();
        assert!(!decide(Some(&task), Some(&session), None, None, 0));
        assert_eq!(session_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decide_falls_back_to_session_policy() {
        let session = RetryPolicy::from_fn(|_, _, retries| retries == 4);
        assert!(decide(None, Some(&session), None, None, 4));
        assert!(!decide(None, Some(&session), None, None, 3));
    }

    #[test]
    fn test_decide_absent_policies_do_not_retry() {
        assert!(!decide(None, None, None, Some(&transport_error()), 0));
    }
}
