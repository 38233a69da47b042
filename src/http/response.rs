//! Incoming response types.

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::task::TaskId;

/// Response as reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    /// An HTTP exchange with status and headers.
    Http(HttpResponse),
    /// A non-HTTP payload (e.g. a `file:` or `data:` load).
    Generic(GenericResponse),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericResponse {
    pub url: String,
    pub mime_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn http(
        url: impl Into<String>,
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        RawResponse::Http(HttpResponse {
            url: url.into(),
            status,
            headers,
            body: body.into(),
        })
    }

    pub fn as_http(&self) -> Option<&HttpResponse> {
        match self {
            RawResponse::Http(http) => Some(http),
            RawResponse::Generic(_) => None,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            RawResponse::Http(http) => &http.url,
            RawResponse::Generic(generic) => &generic.url,
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            RawResponse::Http(http) => &http.body,
            RawResponse::Generic(generic) => &generic.body,
        }
    }

    /// Whether the payload declares itself as JSON.
    pub fn is_json(&self) -> bool {
        let mime = match self {
            RawResponse::Http(http) => http
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            RawResponse::Generic(generic) => generic.mime_type.as_deref(),
        };
        mime.is_some_and(|m| m.contains("json"))
    }
}

/// Snapshot of one completed attempt, after response interceptors ran.
#[derive(Debug, Clone)]
pub struct LogicalResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    decoded: Option<serde_json::Value>,
    task: Option<TaskId>,
    raw: Arc<RawResponse>,
}

impl LogicalResponse {
    pub fn new(
        raw: Arc<RawResponse>,
        task: Option<TaskId>,
        decoded: Option<serde_json::Value>,
    ) -> Self {
        let (status, headers) = match raw.as_http() {
            Some(http) => (Some(http.status), http.headers.clone()),
            None => (None, HeaderMap::new()),
        };
        Self {
            status,
            headers,
            body: raw.body().to_vec(),
            decoded,
            task,
            raw,
        }
    }

    /// HTTP status, `None` for generic responses.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn decoded(&self) -> Option<&serde_json::Value> {
        self.decoded.as_ref()
    }

    /// Deserialize the payload, preferring the decoded object when present.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.decoded {
            Some(value) => serde_json::from_value(value.clone()),
            None => serde_json::from_slice(&self.body),
        }
    }

    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    pub fn raw(&self) -> &RawResponse {
        &self.raw
    }

    pub fn to_builder(&self) -> ResponseBuilder {
        ResponseBuilder {
            response: self.clone(),
        }
    }
}

/// Builder handed to response interceptors.
///
/// There is no way to reach the raw transport response mutably from here.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    response: LogicalResponse,
}

impl ResponseBuilder {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.response.status = Some(status);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.response.headers.insert(name, value);
        self
    }

    pub fn remove_header(mut self, name: &HeaderName) -> Self {
        self.response.headers.remove(name);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn decoded(mut self, value: serde_json::Value) -> Self {
        self.response.decoded = Some(value);
        self
    }

    pub fn current(&self) -> &LogicalResponse {
        &self.response
    }

    pub fn build(self) -> LogicalResponse {
        self.response
    }
}
