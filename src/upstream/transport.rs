//! Sending rewritten requests to the upstream.

use axum::http::{Request, Response, StatusCode};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::upstream::policy::TransportPolicy;

/// Body bytes flowing through the proxy in either direction.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A forwarded request. `None` means the request carries no body.
pub type UpstreamRequest = Request<Option<ByteStream>>;

/// A response from the upstream, body not yet consumed.
pub type UpstreamResponse = Response<ByteStream>;

/// An upstream connection taken over after `101 Switching Protocols`.
pub trait UpgradedStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> UpgradedStream for T {}

pub type UpgradedIo = Box<dyn UpgradedStream>;

type PendingUpgrade = BoxFuture<'static, io::Result<UpgradedIo>>;

/// Extension on a 101 response: the upstream connection, once released by
/// the client library. Can be taken once.
#[derive(Clone)]
pub struct UpstreamUpgrade(Arc<Mutex<Option<PendingUpgrade>>>);

impl UpstreamUpgrade {
    pub fn new(pending: PendingUpgrade) -> Self {
        Self(Arc::new(Mutex::new(Some(pending))))
    }

    pub fn take(&self) -> Option<PendingUpgrade> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Any failure reaching the upstream or reading its response head.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid outbound url '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("upstream connection failed")]
    Connect(#[source] reqwest::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed")]
    Request(#[source] reqwest::Error),
}

impl TransportError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::InvalidUrl { .. } => "invalid_url",
            TransportError::Connect(_) => "connect",
            TransportError::Timeout(_) => "timeout",
            TransportError::Request(_) => "request",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(err)
        } else {
            TransportError::Request(err)
        }
    }
}

/// Issues one request to the upstream. Implementations never retry.
pub trait UpstreamTransport: Send + Sync {
    fn send(&self, request: UpstreamRequest)
        -> BoxFuture<'_, Result<UpstreamResponse, TransportError>>;
}

/// Transport backed by a shared `reqwest` client built from a [`TransportPolicy`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(policy: &TransportPolicy) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: policy.build_client()?,
        })
    }
}

impl UpstreamTransport for HttpTransport {
    fn send(
        &self,
        request: UpstreamRequest,
    ) -> BoxFuture<'_, Result<UpstreamResponse, TransportError>> {
        Box::pin(async move {
            let (parts, body) = request.into_parts();

            let raw = parts.uri.to_string();
            let url = reqwest::Url::parse(&raw)
                .map_err(|source| TransportError::InvalidUrl { url: raw, source })?;

            let mut outbound = reqwest::Request::new(parts.method, url);
            *outbound.headers_mut() = parts.headers;
            if let Some(stream) = body {
                *outbound.body_mut() = Some(reqwest::Body::wrap_stream(stream));
            }

            let upstream = self.client.execute(outbound).await?;

            let status = upstream.status();
            let headers = upstream.headers().clone();

            let mut response = if status == StatusCode::SWITCHING_PROTOCOLS {
                let pending = async move {
                    let io = upstream.upgrade().await.map_err(io::Error::other)?;
                    Ok::<_, io::Error>(Box::new(io) as UpgradedIo)
                }
                .boxed();
                let mut response = Response::new(futures_util::stream::empty().boxed());
                response
                    .extensions_mut()
                    .insert(UpstreamUpgrade::new(pending));
                response
            } else {
                Response::new(upstream.bytes_stream().map_err(io::Error::other).boxed())
            };
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            Ok(response)
        })
    }
}
