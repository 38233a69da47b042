//! Test doubles for the transport layer.

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::TransportError;
use crate::http::{CachePolicy, RawResponse, TransportRequest};
use crate::transport::{AttemptHandle, AttemptObserver, Progress, TransferMetrics, Transport};

/// Scripted outcome of one attempt.
#[derive(Debug, Clone)]
pub enum Step {
    Respond {
        status: u16,
        headers: HeaderMap,
        body: String,
    },
    Fail(TransportError),
    /// Never completes on its own; only `cancel` finishes it.
    Hang,
}

impl Step {
    pub fn respond(status: u16, body: &str) -> Self {
        Step::Respond {
            status,
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    pub fn respond_json(status: u16, body: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Step::Respond {
            status,
            headers,
            body: body.to_string(),
        }
    }

    pub fn fail(error: TransportError) -> Self {
        Step::Fail(error)
    }
}

/// Attempt handle that does nothing; for mocks that never complete.
pub struct IdleHandle;

impl AttemptHandle for IdleHandle {
    fn resume(&self) {}
    fn cancel(&self) {}
}

/// Transport that replays a fixed list of outcomes, one per attempt.
///
/// Unthreaded transports complete synchronously inside `resume`; threaded
/// ones complete from a fresh thread, like a real callback queue would.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<TransportRequest>>,
    observers: Mutex<Vec<AttemptObserver>>,
    resumed: Arc<AtomicUsize>,
    invalidations: AtomicUsize,
    threaded: bool,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::build(steps, false)
    }

    pub fn threaded(steps: Vec<Step>) -> Self {
        Self::build(steps, true)
    }

    fn build(steps: Vec<Step>, threaded: bool) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            resumed: Arc::new(AtomicUsize::new(0)),
            invalidations: AtomicUsize::new(0),
            threaded,
        }
    }

    /// Requests handed over so far, in creation order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of attempts that were actually started.
    pub fn resumed(&self) -> usize {
        self.resumed.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Observer of the `index`-th created attempt.
    pub fn observer(&self, index: usize) -> AttemptObserver {
        self.observers.lock().unwrap()[index].clone()
    }
}

impl Transport for ScriptedTransport {
    fn create_attempt(
        &self,
        request: TransportRequest,
        observer: AttemptObserver,
    ) -> Arc<dyn AttemptHandle> {
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::respond(200, ""));
        let url = request.url().to_string();
        self.requests.lock().unwrap().push(request);
        self.observers.lock().unwrap().push(observer.clone());
        Arc::new(ScriptedAttempt {
            state: Mutex::new(AttemptState::Pending(step)),
            url,
            observer,
            resumed: Arc::clone(&self.resumed),
            threaded: self.threaded,
        })
    }

    fn default_cache_policy(&self) -> CachePolicy {
        CachePolicy::UseProtocolCachePolicy
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

enum AttemptState {
    Pending(Step),
    Hanging,
    Done,
}

struct ScriptedAttempt {
    state: Mutex<AttemptState>,
    url: String,
    observer: AttemptObserver,
    resumed: Arc<AtomicUsize>,
    threaded: bool,
}

impl AttemptHandle for ScriptedAttempt {
    fn resume(&self) {
        let step = {
            let mut state = self.state.lock().unwrap();
            match mem::replace(&mut *state, AttemptState::Done) {
                AttemptState::Pending(Step::Hang) => {
                    *state = AttemptState::Hanging;
                    self.resumed.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                AttemptState::Pending(step) => step,
                other => {
                    *state = other;
                    return;
                }
            }
        };
        self.resumed.fetch_add(1, Ordering::SeqCst);

        let observer = self.observer.clone();
        let url = self.url.clone();
        if self.threaded {
            thread::spawn(move || play(step, &url, &observer));
        } else {
            play(step, &url, &observer);
        }
    }

    fn cancel(&self) {
        let finish = {
            let mut state = self.state.lock().unwrap();
            !matches!(mem::replace(&mut *state, AttemptState::Done), AttemptState::Done)
        };
        if finish {
            self.observer
                .complete(None, Some(TransportError::cancelled()));
        }
    }
}

fn play(step: Step, url: &str, observer: &AttemptObserver) {
    match step {
        Step::Respond {
            status,
            headers,
            body,
        } => {
            let total = body.len() as u64;
            if total > 0 {
                observer.progress(Progress::new(total / 2, Some(total)));
                observer.progress(Progress::new(total, Some(total)));
            }
            observer.metrics(TransferMetrics {
                duration: Duration::from_millis(1),
                bytes_sent: 0,
                bytes_received: total,
                status: Some(status),
            });
            let status = StatusCode::from_u16(status).unwrap();
            observer.complete(Some(RawResponse::http(url, status, headers, body)), None);
        }
        Step::Fail(error) => observer.complete(None, Some(error)),
        Step::Hang => {}
    }
}
