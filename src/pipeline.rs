//! Request and response pipelines.
//!
//! Both pipelines run the registered interceptors in registration order. They
//! never decide anything about retries or cancellation.

use log::debug;
use std::sync::Arc;
use std::time::Duration;

use crate::http::{
    CachePolicy, LogicalRequest, LogicalResponse, RawResponse, RequestBuilder, TransportRequest,
};
use crate::interceptor::InterceptorRegistry;
use crate::task::TaskId;

pub struct RequestPipeline<'a> {
    registry: &'a InterceptorRegistry,
}

impl<'a> RequestPipeline<'a> {
    pub fn new(registry: &'a InterceptorRegistry) -> Self {
        Self { registry }
    }

    /// Build the transport request for one attempt.
    pub fn build(
        &self,
        request: &LogicalRequest,
        cache_policy: CachePolicy,
        timeout: Duration,
    ) -> TransportRequest {
        let interceptors = self.registry.request_interceptors();
        debug!(
            "Building {} {} through {} request interceptor(s)",
            request.method(),
            request.url(),
            interceptors.len()
        );
        interceptors
            .iter()
            .fold(
                RequestBuilder::from_request(request, cache_policy, timeout),
                |builder, f| f(builder),
            )
            .build()
    }
}

pub struct ResponsePipeline<'a> {
    registry: &'a InterceptorRegistry,
}

impl<'a> ResponsePipeline<'a> {
    pub fn new(registry: &'a InterceptorRegistry) -> Self {
        Self { registry }
    }

    /// Build the logical response for one attempt; `None` when the transport
    /// produced no response at all.
    pub fn build(
        &self,
        raw: Option<Arc<RawResponse>>,
        task: Option<TaskId>,
        decoded: Option<serde_json::Value>,
    ) -> Option<LogicalResponse> {
        let raw = raw?;
        let interceptors = self.registry.response_interceptors();
        let builder = LogicalResponse::new(raw, task, decoded).to_builder();
        Some(interceptors.iter().fold(builder, |builder, f| f(builder)).build())
    }
}

/// Decode a JSON payload, if the response declares one.
pub fn decode_json(raw: Option<&RawResponse>) -> Option<serde_json::Value> {
    let raw = raw?;
    if !raw.is_json() || raw.body().is_empty() {
        return None;
    }
    match serde_json::from_slice(raw.body()) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Response from {} is not valid JSON: {}", raw.url(), e);
            None
        }
    }
}
