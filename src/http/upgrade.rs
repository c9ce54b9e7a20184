//! Protocol switches (`101 Switching Protocols`).
//!
//! # Responsibilities
//! - Accept an upstream 101 only for the protocol the client asked for
//! - Relay the 101 head, then splice client and upstream connections
//!
//! # Design Decisions
//! - The splice runs in its own task; it starts only after the 101 head
//!   has passed the interceptor, and its failures are logged, never answered

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::Response;
use futures_util::future::BoxFuture;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::io;
use thiserror::Error;

use crate::http::headers::{set_upgrade, strip_hop_by_hop};
use crate::upstream::{UpgradedIo, UpstreamResponse, UpstreamUpgrade};

/// An upstream 101 the proxy refuses to relay.
#[derive(Debug, Error, PartialEq)]
pub enum UpgradeError {
    #[error("upstream switched protocols but the client did not ask to")]
    Unrequested,

    #[error("client asked for '{requested}' but upstream switched to '{offered}'")]
    Mismatch { requested: String, offered: String },

    #[error("upstream connection cannot be taken over")]
    Unavailable,
}

/// Failures once the tunnel is running.
#[derive(Debug, Error)]
enum TunnelError {
    #[error("client connection upgrade failed")]
    Client(#[source] hyper::Error),

    #[error("upstream connection upgrade failed")]
    Upstream(#[source] io::Error),

    #[error("tunnel copy failed")]
    Copy(#[source] io::Error),
}

/// Both halves of an agreed protocol switch.
pub struct Tunnel {
    client: OnUpgrade,
    upstream: BoxFuture<'static, io::Result<UpgradedIo>>,
}

impl Tunnel {
    /// Splice the two connections in a background task.
    pub fn spawn(self, request_id: String) {
        tokio::spawn(async move {
            match self.run().await {
                Ok((to_upstream, to_client)) => tracing::debug!(
                    request_id = %request_id,
                    to_upstream,
                    to_client,
                    "Tunnel closed"
                ),
                Err(e) => tracing::warn!(
                    request_id = %request_id,
                    error = %crate::error_chain(&e),
                    "Tunnel failed"
                ),
            }
        });
    }

    async fn run(self) -> Result<(u64, u64), TunnelError> {
        let (client, upstream) = tokio::join!(self.client, self.upstream);
        let mut client = TokioIo::new(client.map_err(TunnelError::Client)?);
        let mut upstream = upstream.map_err(TunnelError::Upstream)?;
        tokio::io::copy_bidirectional(&mut client, &mut upstream)
            .await
            .map_err(TunnelError::Copy)
    }
}

/// Turn an upstream 101 into the client response plus the pending tunnel.
///
/// `requested` and `client` come from the inbound request: the protocol it
/// asked for and its connection's upgrade handle.
pub fn switch_protocols(
    upstream: UpstreamResponse,
    requested: Option<HeaderValue>,
    client: Option<OnUpgrade>,
) -> Result<(Response<Body>, Tunnel), UpgradeError> {
    let (mut parts, _) = upstream.into_parts();
    let (Some(requested), Some(client)) = (requested, client) else {
        return Err(UpgradeError::Unrequested);
    };

    let offered = parts
        .headers
        .get(header::UPGRADE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(""));
    if !offered.as_bytes().eq_ignore_ascii_case(requested.as_bytes()) {
        return Err(UpgradeError::Mismatch {
            requested: lossy(&requested),
            offered: lossy(&offered),
        });
    }

    let upstream = parts
        .extensions
        .remove::<UpstreamUpgrade>()
        .and_then(|pending| pending.take())
        .ok_or(UpgradeError::Unavailable)?;

    strip_hop_by_hop(&mut parts.headers);
    set_upgrade(&mut parts.headers, offered);

    let response = Response::from_parts(parts, Body::empty());
    Ok((response, Tunnel { client, upstream }))
}

fn lossy(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
