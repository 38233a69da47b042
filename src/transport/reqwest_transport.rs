//! Transport backed by a `reqwest::Client` on a tokio runtime.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use reqwest::header::CACHE_CONTROL;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::{AttemptHandle, AttemptObserver, Progress, TransferMetrics, Transport};
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::http::{CachePolicy, RawResponse, TransportRequest};

pub struct ReqwestTransport {
    client: Client,
    runtime: Handle,
    cache_policy: CachePolicy,
    timeout: Duration,
    attempts: Mutex<Vec<Weak<ReqwestAttempt>>>,
    invalidated: Arc<watch::Sender<bool>>,
}

impl ReqwestTransport {
    pub fn new(
        client: Client,
        runtime: Handle,
        cache_policy: CachePolicy,
        timeout: Duration,
    ) -> Self {
        let (invalidated, _) = watch::channel(false);
        Self {
            client,
            runtime,
            cache_policy,
            timeout,
            attempts: Mutex::new(Vec::new()),
            invalidated: Arc::new(invalidated),
        }
    }

    /// Build a transport from configuration, on the current tokio runtime.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let runtime = Handle::try_current().context("ReqwestTransport needs a tokio runtime")?;
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(
            client,
            runtime,
            config.cache_policy,
            config.timeout(),
        ))
    }

    fn is_invalidated(&self) -> bool {
        *self.invalidated.borrow()
    }
}

impl Transport for ReqwestTransport {
    fn create_attempt(
        &self,
        request: TransportRequest,
        observer: AttemptObserver,
    ) -> Arc<dyn AttemptHandle> {
        let (cancel, _) = watch::channel(false);
        let attempt = Arc::new(ReqwestAttempt {
            state: Mutex::new(AttemptState::Suspended(Box::new(Pending {
                client: self.client.clone(),
                runtime: self.runtime.clone(),
                request,
                invalidated: Arc::clone(&self.invalidated),
            }))),
            observer,
            cancel,
        });

        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        attempts.retain(|a| a.strong_count() > 0);
        attempts.push(Arc::downgrade(&attempt));
        if self.is_invalidated() {
            debug!("Creating attempt on an invalidated transport; it will cancel on resume");
        }
        attempt
    }

    fn default_cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    fn invalidate(&self) {
        self.invalidated.send_replace(true);
        let attempts =
            mem::take(&mut *self.attempts.lock().unwrap_or_else(PoisonError::into_inner));
        debug!("Invalidating transport, cancelling {} attempt(s)", attempts.len());
        for attempt in attempts.iter().filter_map(Weak::upgrade) {
            attempt.cancel();
        }
    }
}

struct Pending {
    client: Client,
    runtime: Handle,
    request: TransportRequest,
    invalidated: Arc<watch::Sender<bool>>,
}

enum AttemptState {
    Suspended(Box<Pending>),
    Started,
    Finished,
}

struct ReqwestAttempt {
    state: Mutex<AttemptState>,
    observer: AttemptObserver,
    cancel: watch::Sender<bool>,
}

impl AttemptHandle for ReqwestAttempt {
    fn resume(&self) {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match mem::replace(&mut *state, AttemptState::Started) {
                AttemptState::Suspended(pending) => pending,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let Pending {
            client,
            runtime,
            request,
            invalidated,
        } = *pending;
        let observer = self.observer.clone();
        let mut cancelled = self.cancel.subscribe();
        let mut invalidated = invalidated.subscribe();
        runtime.spawn(async move {
            let started = Instant::now();
            let outcome = tokio::select! {
                outcome = perform(&client, &request, &observer) => outcome,
                Ok(_) = cancelled.wait_for(|c| *c) => Err(TransportError::cancelled()),
                Ok(_) = invalidated.wait_for(|i| *i) => Err(TransportError::cancelled()),
            };
            let mut metrics = TransferMetrics {
                duration: started.elapsed(),
                bytes_sent: request.body().map_or(0, |b| b.len() as u64),
                ..Default::default()
            };
            match outcome {
                Ok(raw) => {
                    metrics.bytes_received = raw.body().len() as u64;
                    metrics.status = raw.as_http().map(|http| http.status.as_u16());
                    observer.metrics(metrics);
                    observer.complete(Some(raw), None);
                }
                Err(error) => {
                    observer.metrics(metrics);
                    observer.complete(None, Some(error));
                }
            }
        });
    }

    fn cancel(&self) {
        let report_now = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match mem::replace(&mut *state, AttemptState::Finished) {
                AttemptState::Suspended(_) => true,
                AttemptState::Started => {
                    self.cancel.send_replace(true);
                    false
                }
                AttemptState::Finished => false,
            }
        };
        // Never started, so no task will report for it
        if report_now {
            self.observer.complete(None, Some(TransportError::cancelled()));
        }
    }
}

/// Run one request to completion, reporting download progress.
async fn perform(
    client: &Client,
    request: &TransportRequest,
    observer: &AttemptObserver,
) -> Result<RawResponse, TransportError> {
    debug!("{} {}", request.method(), request.url());

    let mut builder = client
        .request(request.method().clone(), request.url())
        .headers(request.headers().clone())
        .timeout(request.timeout());
    if let Some(directive) = request.cache_policy().cache_control()
        && !request.headers().contains_key(CACHE_CONTROL)
    {
        builder = builder.header(CACHE_CONTROL, directive);
    }
    if let Some(body) = request.body() {
        builder = builder.body(body.to_vec());
    }

    let mut response = builder.send().await.map_err(map_reqwest_error)?;
    let status = response.status();
    let headers = response.headers().clone();
    let url = response.url().to_string();
    let total = response.content_length();

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
        body.extend_from_slice(&chunk);
        observer.progress(Progress::new(body.len() as u64, total));
    }

    debug!("{} {} -> {} ({} bytes)", request.method(), url, status, body.len());
    Ok(RawResponse::http(url, status, headers, body))
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    let code = if error.is_timeout() {
        TransportError::TIMED_OUT
    } else if error.is_connect() {
        TransportError::CANNOT_CONNECT
    } else if error.is_builder() {
        TransportError::BAD_URL
    } else if error.is_body() || error.is_decode() {
        TransportError::NETWORK_LOST
    } else {
        TransportError::UNKNOWN
    };
    warn!("Transport failure ({}): {}", code, error);
    TransportError::new(code, error.to_string())
}
