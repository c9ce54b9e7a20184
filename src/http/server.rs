//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the forwarding engine from configuration
//! - Create the Axum router with a catch-all proxy handler
//! - Wire up middleware (request ID, tracing)
//! - Serve plain HTTP or terminate TLS
//! - Drain connections on shutdown

use axum::{body::Body, extract::State, http::Request, response::Response, Router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::buffer::BufferPool;
use crate::config::ProxyConfig;
use crate::http::director::UpstreamDirector;
use crate::http::forward::ForwardingEngine;
use crate::http::request::{request_id, request_id_layer};
use crate::lifecycle::shutdown;
use crate::net::{load_tls_config, TlsError};
use crate::observability::metrics;
use crate::upstream::{HttpTransport, ProxyUrlError, TargetError, TransportPolicy, UpstreamTarget};

/// Grace period for in-flight TLS connections after shutdown.
const TLS_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Errors building or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("upstream target is invalid")]
    Target(#[from] TargetError),

    #[error("secondary proxy is invalid")]
    Proxy(#[from] ProxyUrlError),

    #[error("failed to build upstream client")]
    Client(#[source] reqwest::Error),

    #[error("failed to load TLS configuration")]
    Tls(#[from] TlsError),

    #[error("server i/o error")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: ForwardingEngine,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a server forwarding to the configured upstream.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let target = UpstreamTarget::parse(&config.upstream.target)?;
        if target.has_path() {
            tracing::warn!(
                target = %config.upstream.target,
                "Upstream target path is ignored; only scheme and authority are used"
            );
        }

        let policy = TransportPolicy::from_config(&config.upstream, &config.timeouts)?;
        let transport = HttpTransport::new(&policy).map_err(ServerError::Client)?;
        if policy.skip_verify {
            tracing::warn!("Upstream TLS verification disabled");
        }
        tracing::info!(upstream = %target, transport = %policy, "Upstream configured");

        let request_timeout = match config.timeouts.request_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let engine = ForwardingEngine::new(
            Arc::new(UpstreamDirector::new(target)),
            Arc::new(transport),
            BufferPool::new(config.buffers.max_idle),
        )
        .with_request_timeout(request_timeout);

        Ok(Self::with_engine(config, engine))
    }

    /// Create a server around an already assembled engine.
    pub fn with_engine(config: ProxyConfig, engine: ForwardingEngine) -> Self {
        let router = Self::build_router(AppState { engine });
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                request_id = %request_id(request),
                method = %request.method(),
                uri = %request.uri(),
            )
        });

        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(ServiceBuilder::new().layer(request_id_layer()).layer(trace))
    }

    /// The router, for serving it some other way.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve connections from `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        match &self.config.listener.tls {
            Some(tls) => {
                let rustls =
                    load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                tracing::info!(address = %addr, "HTTPS server starting");

                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    shutdown::wait(shutdown).await;
                    drain.graceful_shutdown(Some(TLS_DRAIN_GRACE));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown::wait(shutdown))
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: every request is forwarded.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    let response = state.engine.forward(request).await;

    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}
