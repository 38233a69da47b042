//! Request and response interceptors.
//!
//! An interceptor is a pure transform over a builder. Request interceptors run
//! on every transport attempt (retries included); response interceptors run on
//! every completed attempt.

mod registry;

use reqwest::header::{HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::http::{RequestBuilder, ResponseBuilder};

pub use registry::InterceptorRegistry;

pub type RequestInterceptor = Arc<dyn Fn(RequestBuilder) -> RequestBuilder + Send + Sync>;
pub type ResponseInterceptor = Arc<dyn Fn(ResponseBuilder) -> ResponseBuilder + Send + Sync>;

/// Opaque key for removing a registered interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl InterceptorToken {
    fn next() -> Self {
        InterceptorToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InterceptorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An interceptor of either kind, ready to be registered.
#[derive(Clone)]
pub enum Interceptor {
    Request(RequestInterceptor),
    Response(ResponseInterceptor),
}

impl Interceptor {
    pub fn request<F>(f: F) -> Self
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync + 'static,
    {
        Interceptor::Request(Arc::new(f))
    }

    pub fn response<F>(f: F) -> Self
    where
        F: Fn(ResponseBuilder) -> ResponseBuilder + Send + Sync + 'static,
    {
        Interceptor::Response(Arc::new(f))
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interceptor::Request(_) => f.write_str("Interceptor::Request"),
            Interceptor::Response(_) => f.write_str("Interceptor::Response"),
        }
    }
}

/// Request interceptor that sets one header on every attempt.
pub fn set_header(name: HeaderName, value: HeaderValue) -> Interceptor {
    Interceptor::request(move |builder| builder.header(name.clone(), value.clone()))
}

/// Parse a `Name: value` line into a header interceptor.
pub fn parse_header_line(line: &str) -> anyhow::Result<Interceptor> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid header '{}'. Expected 'Name: value'.", line))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid header name '{}': {}", name.trim(), e))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|e| anyhow::anyhow!("Invalid header value for '{}': {}", name, e))?;
    Ok(set_header(name, value))
}
