//! Ordered startup of the proxy.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::{validated, ConfigError, ProxyConfig};
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::{signals, Shutdown};
use crate::net::{self, ListenerError};
use crate::observability::metrics;

/// Anything that stops the proxy from coming up or keeps it from serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration rejected")]
    Config(#[from] ConfigError),

    #[error("listener unavailable")]
    Listener(#[from] ListenerError),

    #[error("server failed")]
    Server(#[from] ServerError),

    #[error("metrics exporter failed to start")]
    Metrics(#[source] metrics_exporter_prometheus::BuildError),
}

/// Start the proxy and serve until a shutdown signal arrives.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let config = validated(config)?;

    if config.observability.metrics_enabled {
        // Already checked by validation.
        if let Ok(addr) = config.observability.metrics_address.parse::<SocketAddr>() {
            metrics::init_metrics(addr).map_err(StartupError::Metrics)?;
        }
    }

    let server = HttpServer::new(config.clone())?;
    let listener = net::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        signals::shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(listener, rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
