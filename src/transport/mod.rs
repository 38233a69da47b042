//! Transport abstraction.
//!
//! The transport performs the actual I/O. It is handed a finalized
//! [`TransportRequest`] plus an [`AttemptObserver`] and reports progress,
//! metrics and completion through the observer from whatever thread it likes.
//!
//! # Contract
//!
//! - `create_attempt` returns a suspended attempt; nothing is sent before
//!   [`AttemptHandle::resume`].
//! - `resume` and `cancel` are idempotent.
//! - Every attempt reports completion exactly once, including after `cancel`
//!   (typically with [`TransportError::cancelled`](crate::error::TransportError::cancelled)).
//! - Metrics, when reported, arrive before completion.

mod reqwest_transport;

use std::sync::Arc;
use std::time::Duration;

use crate::http::{CachePolicy, TransportRequest};

pub use crate::engine::AttemptObserver;
pub use reqwest_transport::ReqwestTransport;

/// Transfer progress of the active attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed_bytes: u64,
    pub total_bytes: Option<u64>,
}

impl Progress {
    pub fn new(completed_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            completed_bytes,
            total_bytes,
        }
    }

    /// Completed fraction in `0.0..=1.0`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed_bytes as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Measurements for one finished attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferMetrics {
    pub duration: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub status: Option<u16>,
}

/// One in-flight transport attempt.
pub trait AttemptHandle: Send + Sync {
    fn resume(&self);
    fn cancel(&self);
}

#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Create a suspended attempt for `request`.
    fn create_attempt(
        &self,
        request: TransportRequest,
        observer: AttemptObserver,
    ) -> Arc<dyn AttemptHandle>;

    fn default_cache_policy(&self) -> CachePolicy;

    fn default_timeout(&self) -> Duration;

    /// Tear the transport down, cancelling whatever is still running.
    fn invalidate(&self);
}
