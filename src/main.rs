//! relay-proxy binary.
//!
//! ```text
//!     Client ──▶ listener (plain or TLS) ──▶ forwarding engine
//!                                                   │
//!                                                   ▼
//!     Origin ◀── (direct, HTTP or SOCKS5 proxy) ◀── upstream transport
//! ```

use clap::Parser;
use std::process::ExitCode;

use relay_proxy::cli::Cli;
use relay_proxy::config::ObservabilityConfig;
use relay_proxy::observability::logging::init_logging;
use relay_proxy::{error_chain, lifecycle};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %error_chain(&e), "Configuration error");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "relay-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.target,
        tls = config.listener.tls.is_some(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if let Err(e) = lifecycle::run(config).await {
        tracing::error!(error = %error_chain(&e), "Fatal error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
