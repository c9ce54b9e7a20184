//! Client-facing failure responses.
//!
//! # Responsibilities
//! - Log the complete cause chain for operators
//! - Answer the client with a fixed, information-free 500
//!
//! # Design Decisions
//! - The body never carries upstream addresses or error text
//! - Only reachable before the response head is handed to the server,
//!   so a request is answered at most once

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Response, StatusCode, Uri};

use crate::http::forward::ForwardError;

/// Body sent for every failed forward.
pub const GENERIC_ERROR_BODY: &str = "Internal Server Error\n";

/// What the error handler may know about the failed request.
#[derive(Debug, Clone)]
pub struct FailedRequest<'a> {
    pub request_id: &'a str,
    pub method: &'a Method,
    pub uri: &'a Uri,
}

/// Turns a forwarding failure into the response the client sees.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, request: &FailedRequest<'_>, error: &ForwardError) -> Response<Body>;
}

/// Logs the cause and replies with a plain 500.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericErrorHandler;

impl ErrorHandler for GenericErrorHandler {
    fn handle(&self, request: &FailedRequest<'_>, error: &ForwardError) -> Response<Body> {
        tracing::error!(
            request_id = %request.request_id,
            method = %request.method,
            uri = %request.uri,
            kind = error.kind(),
            error = %crate::error_chain(error),
            "Forwarding failed"
        );
        generic_error_response()
    }
}

/// The fixed failure response.
pub fn generic_error_response() -> Response<Body> {
    let mut response = Response::new(Body::from(GENERIC_ERROR_BODY));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}
