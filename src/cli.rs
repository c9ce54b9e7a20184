//! Command-line interface.
//!
//! Flags override values from the optional config file, which in turn
//! override the built-in defaults.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{parse_config, validated, ConfigError, LogFormat, ProxyConfig, TlsConfig};

#[derive(Debug, Parser)]
#[command(name = "relay-proxy")]
#[command(about = "Single-upstream HTTP/HTTPS reverse proxy", long_about = None)]
#[command(version)]
pub struct Cli {
    /// TOML config file; flags take precedence over its values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to accept client connections on [default: 127.0.0.1:8082]
    #[arg(long, value_name = "HOST:PORT")]
    pub reverse_listen: Option<String>,

    /// Upstream origin every request is forwarded to [default: http://127.0.0.1:8080]
    #[arg(long, value_name = "URL")]
    pub forward_listen: Option<String>,

    /// Secondary proxy for upstream connections, empty to connect directly
    /// [default: http://127.0.0.1:8088]
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Skip certificate verification for HTTPS upstreams
    #[arg(long)]
    pub allow_insecure: bool,

    /// Serve HTTPS using --cert and --key
    #[arg(long)]
    pub https: bool,

    /// PEM certificate chain for --https [default: server.crt]
    #[arg(long, value_name = "FILE")]
    pub cert: Option<String>,

    /// PEM private key for --https [default: server.key]
    #[arg(long, value_name = "FILE")]
    pub key: Option<String>,

    /// Seconds to wait for upstream response headers, 0 for no limit
    #[arg(long, value_name = "SECS")]
    pub request_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, value_name = "HOST:PORT")]
    pub metrics_address: Option<String>,
}

impl Cli {
    /// Assemble and validate the effective configuration.
    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => parse_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(addr) = self.reverse_listen {
            config.listener.bind_address = addr;
        }
        if let Some(target) = self.forward_listen {
            config.upstream.target = target;
        }
        if let Some(proxy) = self.proxy {
            config.upstream.proxy = Some(proxy).filter(|p| !p.trim().is_empty());
        }
        if self.allow_insecure {
            config.upstream.allow_insecure = true;
        }

        if self.https && config.listener.tls.is_none() {
            config.listener.tls = Some(TlsConfig::default());
        }
        if let Some(tls) = config.listener.tls.as_mut() {
            if let Some(cert) = self.cert {
                tls.cert_path = cert;
            }
            if let Some(key) = self.key {
                tls.key_path = key;
            }
        }

        if let Some(secs) = self.request_timeout {
            config.timeouts.request_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if self.log_json {
            config.observability.log_format = LogFormat::Json;
        }
        if let Some(addr) = self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr;
        }

        validated(config)
    }
}
