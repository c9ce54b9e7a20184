//! Forwarding engine.
//!
//! # States
//! ```text
//! Received → Rewritten → Dispatched → Succeeded → Closed
//!                                  ↘           ↘
//!                                    Failed ──────→ Closed
//! ```
//! - Rewritten: hop-by-hop headers stripped (`TE: trailers` and upgrade
//!   requests re-sent), X-Forwarded-For appended, director applied
//! - Dispatched: transport send started, request body copied through a
//!   pooled buffer; the request timeout runs once that body is exhausted
//! - Succeeded: upstream head received, response body wrapped in a pooled
//!   copy (or a 101 turned into a tunnel), interceptor applied
//! - Failed: transport error, timeout, refused upgrade or interceptor
//!   refusal; the error handler answers
//! - Closed: the engine hands off; any remaining body streaming belongs to
//!   the server and releases its buffer when done or dropped
//!
//! A single attempt per request. Nothing is retried.

use axum::body::{Body, HttpBody};
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode, Uri};
use futures_util::{StreamExt, TryStreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::buffer::{copy_stream, BufferPool, Leg};
use crate::http::director::Director;
use crate::http::error::{ErrorHandler, FailedRequest, GenericErrorHandler};
use crate::http::headers::{
    accepts_trailers, append_forwarded_for, set_upgrade, strip_hop_by_hop, upgrade_protocol,
};
use crate::http::request::request_id;
use crate::http::response::{DiagnosticHeader, InterceptorError, ResponseInterceptor};
use crate::http::upgrade::{switch_protocols, UpgradeError};
use crate::observability::metrics;
use crate::upstream::{
    ByteStream, TransportError, UpstreamRequest, UpstreamResponse, UpstreamTransport,
};

/// Per-request failures handed to the error handler.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Interceptor(#[from] InterceptorError),

    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
}

impl ForwardError {
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::Transport(e) => e.kind(),
            ForwardError::Interceptor(_) => "interceptor",
            ForwardError::Upgrade(_) => "upgrade",
        }
    }
}

/// Lifecycle of one forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardState {
    Received,
    Rewritten,
    Dispatched,
    Succeeded,
    Failed,
    Closed,
}

impl ForwardState {
    pub fn can_advance_to(self, next: ForwardState) -> bool {
        use ForwardState::*;
        matches!(
            (self, next),
            (Received, Rewritten)
                | (Rewritten, Dispatched)
                | (Dispatched, Succeeded)
                | (Dispatched, Failed)
                | (Succeeded, Failed)
                | (Succeeded, Closed)
                | (Failed, Closed)
        )
    }
}

/// What the engine remembers about a request while forwarding it.
#[derive(Debug)]
struct ForwardingContext {
    request_id: String,
    method: Method,
    uri: Uri,
    state: ForwardState,
}

impl ForwardingContext {
    fn new(request_id: String, method: Method, uri: Uri) -> Self {
        Self {
            request_id,
            method,
            uri,
            state: ForwardState::Received,
        }
    }

    fn advance(&mut self, next: ForwardState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid forward transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(
            request_id = %self.request_id,
            from = ?self.state,
            to = ?next,
            "Forward state"
        );
        self.state = next;
    }

    fn failed_request(&self) -> FailedRequest<'_> {
        FailedRequest {
            request_id: &self.request_id,
            method: &self.method,
            uri: &self.uri,
        }
    }
}

/// Ties director, transport, interceptor and error handler together.
///
/// Every hook is an injected trait object, so tests can swap any of them.
#[derive(Clone)]
pub struct ForwardingEngine {
    director: Arc<dyn Director>,
    transport: Arc<dyn UpstreamTransport>,
    interceptor: Arc<dyn ResponseInterceptor>,
    error_handler: Arc<dyn ErrorHandler>,
    buffers: BufferPool,
    request_timeout: Option<Duration>,
}

impl ForwardingEngine {
    /// Engine with the diagnostic-header interceptor, the generic error
    /// handler and no request timeout.
    pub fn new(
        director: Arc<dyn Director>,
        transport: Arc<dyn UpstreamTransport>,
        buffers: BufferPool,
    ) -> Self {
        Self {
            director,
            transport,
            interceptor: Arc::new(DiagnosticHeader),
            error_handler: Arc::new(GenericErrorHandler),
            buffers,
            request_timeout: None,
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Bound the wait for upstream response headers, counted from the end
    /// of the request body.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    /// Forward one request and produce the response for the client.
    pub async fn forward(&self, mut request: Request<Body>) -> Response<Body> {
        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        let mut ctx = ForwardingContext::new(
            request_id(&request),
            request.method().clone(),
            request.uri().clone(),
        );

        let upgrade = upgrade_protocol(request.headers());
        let client_upgrade = upgrade.as_ref().map(|_| hyper::upgrade::on(&mut request));

        let (mut parts, body) = request.into_parts();
        let trailers = accepts_trailers(&parts.headers);
        strip_hop_by_hop(&mut parts.headers);
        if trailers {
            parts
                .headers
                .insert(header::TE, HeaderValue::from_static("trailers"));
        }
        if let Some(protocol) = &upgrade {
            set_upgrade(&mut parts.headers, protocol.clone());
        }
        if let Some(ip) = client_ip {
            append_forwarded_for(&mut parts.headers, ip);
        }
        self.director.rewrite(&mut parts);
        ctx.advance(ForwardState::Rewritten);

        let (body, body_sent) = if body.is_end_stream() {
            (None, None)
        } else {
            let inbound = body.into_data_stream().map_err(io::Error::other).boxed();
            let (body, sent) = signal_on_end(copy_stream(inbound, &self.buffers, Leg::Request));
            (Some(body), Some(sent))
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            method = %parts.method,
            upstream = %parts.uri,
            "Dispatching upstream"
        );
        ctx.advance(ForwardState::Dispatched);

        let request = Request::from_parts(parts, body);
        let upstream = match self.dispatch(request, body_sent).await {
            Ok(upstream) => upstream,
            Err(err) => return self.fail(ctx, err.into()),
        };
        ctx.advance(ForwardState::Succeeded);

        let (mut response, tunnel) = if upstream.status() == StatusCode::SWITCHING_PROTOCOLS {
            match switch_protocols(upstream, upgrade, client_upgrade) {
                Ok((response, tunnel)) => (response, Some(tunnel)),
                Err(err) => return self.fail(ctx, err.into()),
            }
        } else {
            (self.relay(upstream), None)
        };

        if let Err(err) = self.interceptor.modify(&mut response) {
            // Dropping the response closes the upstream body unread.
            drop(response);
            drop(tunnel);
            return self.fail(ctx, err.into());
        }

        if let Some(tunnel) = tunnel {
            tunnel.spawn(ctx.request_id.clone());
        }
        ctx.advance(ForwardState::Closed);
        response
    }

    async fn dispatch(
        &self,
        request: UpstreamRequest,
        body_sent: Option<oneshot::Receiver<()>>,
    ) -> Result<UpstreamResponse, TransportError> {
        let send = self.transport.send(request);
        let Some(limit) = self.request_timeout else {
            return send.await;
        };

        // The clock starts once the request body has been handed over.
        let deadline = async move {
            if let Some(sent) = body_sent {
                let _ = sent.await;
            }
            tokio::time::sleep(limit).await;
        };

        tokio::select! {
            response = send => response,
            _ = deadline => Err(TransportError::Timeout(limit)),
        }
    }

    fn relay(&self, upstream: UpstreamResponse) -> Response<Body> {
        let (mut parts, body) = upstream.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        let body = copy_stream(body, &self.buffers, Leg::Response);
        Response::from_parts(parts, Body::from_stream(body))
    }

    fn fail(&self, mut ctx: ForwardingContext, error: ForwardError) -> Response<Body> {
        ctx.advance(ForwardState::Failed);
        metrics::record_upstream_error(error.kind());
        let response = self.error_handler.handle(&ctx.failed_request(), &error);
        ctx.advance(ForwardState::Closed);
        response
    }
}

/// Wrap `body` so the receiver resolves once it is exhausted or dropped.
fn signal_on_end(mut body: ByteStream) -> (ByteStream, oneshot::Receiver<()>) {
    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    let stream = futures_util::stream::poll_fn(move |cx| {
        let next = body.poll_next_unpin(cx);
        if let Poll::Ready(None) = next {
            if let Some(tx) = tx.take() {
                let _ = tx.send(());
            }
        }
        next
    });
    (stream.boxed(), rx)
}
