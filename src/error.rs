//! Domain errors and outcome classification.

use reqwest::header::HeaderMap;
use std::fmt;
use std::sync::Arc;

use crate::http::{AcceptableStatusSet, RawResponse, reason_phrase};

/// Failure reported by the transport itself (no usable exchange happened).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    code: i64,
    message: String,
}

impl TransportError {
    pub const UNKNOWN: i64 = -1;
    pub const CANCELLED: i64 = -999;
    pub const BAD_URL: i64 = -1000;
    pub const TIMED_OUT: i64 = -1001;
    pub const CANNOT_CONNECT: i64 = -1004;
    pub const NETWORK_LOST: i64 = -1005;
    pub const INVALIDATED: i64 = -1012;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(Self::CANCELLED, "cancelled")
    }

    pub fn invalidated() -> Self {
        Self::new(Self::INVALIDATED, "session was invalidated")
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == Self::CANCELLED
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network/transport-layer failure.
    Transport,
    /// A response arrived but its status is not acceptable.
    UnacceptableStatus,
    /// The task was cancelled.
    Cancelled,
}

/// Error delivered to completion handlers.
#[derive(Debug, Clone)]
pub struct DomainError {
    kind: ErrorKind,
    code: i64,
    message: String,
    headers: Option<HeaderMap>,
    response: Option<Arc<RawResponse>>,
    decoded: Option<serde_json::Value>,
    source: Option<TransportError>,
}

impl DomainError {
    pub fn from_transport(
        error: TransportError,
        response: Option<Arc<RawResponse>>,
        decoded: Option<serde_json::Value>,
    ) -> Self {
        let kind = if error.is_cancelled() {
            ErrorKind::Cancelled
        } else {
            ErrorKind::Transport
        };
        let headers = response
            .as_deref()
            .and_then(RawResponse::as_http)
            .map(|http| http.headers.clone());
        Self {
            kind,
            code: error.code(),
            message: error.message().to_string(),
            headers,
            response,
            decoded,
            source: Some(error),
        }
    }

    pub fn unacceptable_status(
        status: u16,
        response: Arc<RawResponse>,
        decoded: Option<serde_json::Value>,
    ) -> Self {
        let headers = response.as_http().map(|http| http.headers.clone());
        Self {
            kind: ErrorKind::UnacceptableStatus,
            code: i64::from(status),
            message: reason_phrase(status).to_string(),
            headers,
            response: Some(response),
            decoded,
            source: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::from_transport(TransportError::cancelled(), None, None)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    pub fn response(&self) -> Option<&RawResponse> {
        self.response.as_deref()
    }

    pub fn decoded(&self) -> Option<&serde_json::Value> {
        self.decoded.as_ref()
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        self.source.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Transport => write!(f, "Transport error: {}", self.message),
            ErrorKind::UnacceptableStatus => {
                write!(f, "Unacceptable status: HTTP {} {}", self.code, self.message)
            }
            ErrorKind::Cancelled => write!(f, "Request cancelled"),
        }
    }
}

impl std::error::Error for DomainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Turns one attempt's outcome into a domain error, or `None` on success.
///
/// A transport error always wins over status inspection.
pub fn classify(
    transport_error: Option<&TransportError>,
    decoded: Option<&serde_json::Value>,
    response: Option<&Arc<RawResponse>>,
    acceptable: &AcceptableStatusSet,
) -> Option<DomainError> {
    if let Some(error) = transport_error {
        return Some(DomainError::from_transport(
            error.clone(),
            response.cloned(),
            decoded.cloned(),
        ));
    }

    let response = response?;
    let status = response.as_http()?.status.as_u16();
    if acceptable.contains(status) {
        return None;
    }
    Some(DomainError::unacceptable_status(
        status,
        Arc::clone(response),
        decoded.cloned(),
    ))
}
