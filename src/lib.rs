pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod pipeline;
pub mod retry;
pub mod task;
pub mod transport;

#[cfg(test)]
pub mod test_utils;

pub use config::SessionConfig;
pub use engine::Session;
pub use error::{DomainError, ErrorKind, TransportError};
pub use http::{AcceptableStatusSet, CachePolicy, LogicalRequest, LogicalResponse};
pub use interceptor::{Interceptor, InterceptorToken};
pub use retry::RetryPolicy;
pub use task::{LogicalTask, TaskId, TaskState};
