//! Outgoing request types.
//!
//! A [`LogicalRequest`] is what callers submit. Each attempt turns it into a
//! [`RequestBuilder`], lets the request interceptors rewrite the builder, and
//! finalizes it into an immutable [`TransportRequest`].

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Cache behaviour requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Follow whatever the protocol headers say.
    #[default]
    UseProtocolCachePolicy,
    /// Always go to the origin.
    ReloadIgnoringLocalCacheData,
    /// Use a cached copy of any age, loading only when nothing is cached.
    ReturnCacheDataElseLoad,
    /// Use a cached copy or fail; never load.
    ReturnCacheDataDontLoad,
}

impl CachePolicy {
    /// The `Cache-Control` request directive this policy maps to, if any.
    pub fn cache_control(self) -> Option<&'static str> {
        match self {
            CachePolicy::UseProtocolCachePolicy => None,
            CachePolicy::ReloadIgnoringLocalCacheData => Some("no-cache"),
            CachePolicy::ReturnCacheDataElseLoad => Some("max-stale"),
            CachePolicy::ReturnCacheDataDontLoad => Some("only-if-cached"),
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CachePolicy::UseProtocolCachePolicy => "use_protocol_cache_policy",
            CachePolicy::ReloadIgnoringLocalCacheData => "reload_ignoring_local_cache_data",
            CachePolicy::ReturnCacheDataElseLoad => "return_cache_data_else_load",
            CachePolicy::ReturnCacheDataDontLoad => "return_cache_data_dont_load",
        };
        f.write_str(name)
    }
}

impl FromStr for CachePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "use_protocol_cache_policy" | "protocol" => Ok(CachePolicy::UseProtocolCachePolicy),
            "reload_ignoring_local_cache_data" | "reload" => {
                Ok(CachePolicy::ReloadIgnoringLocalCacheData)
            }
            "return_cache_data_else_load" | "prefer_cache" => {
                Ok(CachePolicy::ReturnCacheDataElseLoad)
            }
            "return_cache_data_dont_load" | "cache_only" => {
                Ok(CachePolicy::ReturnCacheDataDontLoad)
            }
            _ => anyhow::bail!(
                "Unknown cache policy: {}. Expected protocol, reload, prefer-cache, or cache-only.",
                s
            ),
        }
    }
}

/// Description of an outgoing call, as submitted by the caller.
///
/// Cache policy and timeout are optional; when absent the session falls back
/// to the transport defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    cache_policy: Option<CachePolicy>,
    timeout: Option<Duration>,
}

impl LogicalRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            cache_policy: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::POST, url).body(body)
    }

    /// Add a header, replacing any previous value for the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn requested_cache_policy(&self) -> Option<CachePolicy> {
        self.cache_policy
    }

    pub fn requested_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Mutable builder that request interceptors receive and return.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    cache_policy: CachePolicy,
    timeout: Duration,
}

impl RequestBuilder {
    /// Seed a builder from a logical request and the already-resolved
    /// cache policy and timeout.
    pub fn from_request(
        request: &LogicalRequest,
        cache_policy: CachePolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            cache_policy,
            timeout,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn remove_header(mut self, name: &HeaderName) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn current_url(&self) -> &str {
        &self.url
    }

    pub fn build(self) -> TransportRequest {
        TransportRequest {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            cache_policy: self.cache_policy,
            timeout: self.timeout,
        }
    }
}

/// Finalized request handed to the transport. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    cache_policy: CachePolicy,
    timeout: Duration,
}

impl TransportRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
