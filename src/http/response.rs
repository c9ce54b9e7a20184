//! Response interception before relay.
//!
//! # Responsibilities
//! - Mark every forwarded response with the diagnostic header
//! - Refuse a response by returning an error, which sends the request
//!   down the error path instead of relaying a partial response

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response};
use thiserror::Error;

/// Header added to every successfully forwarded response.
pub const X_REVERSE_PROXY: HeaderName = HeaderName::from_static("x-reverse-proxy");

/// A response the interceptor refused to relay.
#[derive(Debug, Error)]
#[error("response interceptor failed: {reason}")]
pub struct InterceptorError {
    reason: String,
}

impl InterceptorError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Mutates an upstream response before it reaches the client.
pub trait ResponseInterceptor: Send + Sync {
    fn modify(&self, response: &mut Response<Body>) -> Result<(), InterceptorError>;
}

/// Sets `X-Reverse-Proxy: true`, replacing any value from the upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticHeader;

impl ResponseInterceptor for DiagnosticHeader {
    fn modify(&self, response: &mut Response<Body>) -> Result<(), InterceptorError> {
        response
            .headers_mut()
            .insert(X_REVERSE_PROXY, HeaderValue::from_static("true"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_set_exactly_once() {
        let mut response = Response::builder()
            .header("x-reverse-proxy", "upstream-said-so")
            .header("x-reverse-proxy", "twice")
            .header("etag", "\"v1\"")
            .body(Body::empty())
            .unwrap();

        DiagnosticHeader.modify(&mut response).unwrap();

        let values: Vec<_> = response.headers().get_all(&X_REVERSE_PROXY).iter().collect();
        assert_eq!(values, vec!["true"]);
        assert_eq!(response.headers()["etag"], "\"v1\"");
    }
}
