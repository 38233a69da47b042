//! Ordered, token-addressable interceptor storage.

use log::debug;
use std::sync::{PoisonError, RwLock};

use super::{Interceptor, InterceptorToken, RequestInterceptor, ResponseInterceptor};

/// Registry of request and response interceptors.
///
/// Entries are kept as `(token, interceptor)` pairs in registration order, so
/// pipelines always apply them in the order they were added. Reads take a
/// snapshot, so interceptors run without any lock held.
#[derive(Default)]
pub struct InterceptorRegistry {
    request: RwLock<Vec<(InterceptorToken, RequestInterceptor)>>,
    response: RwLock<Vec<(InterceptorToken, ResponseInterceptor)>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interceptor and return the token that removes it.
    pub fn add(&self, interceptor: Interceptor) -> InterceptorToken {
        let token = InterceptorToken::next();
        match interceptor {
            Interceptor::Request(f) => {
                debug!("Registering request interceptor {}", token);
                self.request
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((token, f));
            }
            Interceptor::Response(f) => {
                debug!("Registering response interceptor {}", token);
                self.response
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((token, f));
            }
        }
        token
    }

    /// Remove the interceptor registered under `token`.
    ///
    /// Request interceptors are searched first, then response interceptors.
    /// Returns `false` and changes nothing when the token is unknown.
    pub fn remove(&self, token: InterceptorToken) -> bool {
        {
            let mut request = self.request.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(index) = request.iter().position(|(t, _)| *t == token) {
                request.remove(index);
                debug!("Removed request interceptor {}", token);
                return true;
            }
        }

        let mut response = self.response.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = response.iter().position(|(t, _)| *t == token) {
            response.remove(index);
            debug!("Removed response interceptor {}", token);
            return true;
        }

        false
    }

    /// Request interceptors in registration order.
    pub fn request_interceptors(&self) -> Vec<RequestInterceptor> {
        self.request
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Response interceptors in registration order.
    pub fn response_interceptors(&self) -> Vec<ResponseInterceptor> {
        self.response
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.request.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn response_count(&self) -> usize {
        self.response.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every registered interceptor.
    pub fn clear(&self) {
        self.request.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.response.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
