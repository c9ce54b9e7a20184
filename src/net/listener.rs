//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve and bind the configured listen address
//! - Report bind failures as fatal startup errors

use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The address is not `host:port`.
    Address(String),
    /// Failed to bind to address.
    Bind(String, std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Address(addr) => write!(f, "Invalid listen address: {}", addr),
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Address(_) => None,
            ListenerError::Bind(_, e) => Some(e),
        }
    }
}

/// Normalize a listen address. An empty host (":8082") means all interfaces.
pub fn normalize_address(address: &str) -> Result<String, ListenerError> {
    let address = address.trim();
    let normalized = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };

    if normalized.parse::<SocketAddr>().is_ok() {
        return Ok(normalized);
    }

    match normalized.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(normalized),
        _ => Err(ListenerError::Address(address.to_string())),
    }
}

/// Bind the listen address.
pub async fn bind(address: &str) -> Result<TcpListener, ListenerError> {
    let address = normalize_address(address)?;

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| ListenerError::Bind(address.clone(), e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| ListenerError::Bind(address.clone(), e))?;

    tracing::info!(address = %local_addr, "Listener bound");
    Ok(listener)
}
