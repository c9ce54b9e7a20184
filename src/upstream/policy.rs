//! Upstream transport policy.
//!
//! The secondary proxy and TLS verification bypass are independent fields of
//! one policy, consumed by a single client constructor. Both may be active at
//! once: connections are tunnelled through the proxy and upstream TLS is not
//! verified.

use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::schema::{TimeoutConfig, UpstreamConfig};

/// Errors parsing the secondary proxy URL.
#[derive(Debug, Error, PartialEq)]
pub enum ProxyUrlError {
    #[error("invalid proxy url '{url}': {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported proxy scheme '{0}' (expected http, https, socks5 or socks5h)")]
    UnsupportedScheme(String),

    #[error("proxy url '{0}' has no host")]
    MissingHost(String),
}

/// Protocol spoken to the secondary proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// Absolute-form requests for http, CONNECT tunnels for https.
    Http,
    /// SOCKS5 (`socks5h` resolves names at the proxy).
    Socks5,
}

/// An intermediary all outbound connections are routed through.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryProxy {
    url: Url,
    kind: ProxyKind,
}

impl SecondaryProxy {
    pub fn parse(raw: &str) -> Result<Self, ProxyUrlError> {
        let url = Url::parse(raw).map_err(|source| ProxyUrlError::Parse {
            url: raw.to_string(),
            source,
        })?;

        let kind = match url.scheme() {
            "http" | "https" => ProxyKind::Http,
            "socks5" | "socks5h" => ProxyKind::Socks5,
            other => return Err(ProxyUrlError::UnsupportedScheme(other.to_string())),
        };

        if url.host_str().map_or(true, str::is_empty) {
            return Err(ProxyUrlError::MissingHost(raw.to_string()));
        }

        Ok(Self { url, kind })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }
}

/// How outbound connections reach the upstream. Derived once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportPolicy {
    pub proxy: Option<SecondaryProxy>,
    pub skip_verify: bool,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            proxy: None,
            skip_verify: false,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl TransportPolicy {
    pub fn from_config(
        upstream: &UpstreamConfig,
        timeouts: &TimeoutConfig,
    ) -> Result<Self, ProxyUrlError> {
        let proxy = match upstream.proxy.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(SecondaryProxy::parse(raw)?),
            _ => None,
        };

        Ok(Self {
            proxy,
            skip_verify: upstream.allow_insecure,
            connect_timeout: Duration::from_secs(timeouts.connect_secs),
            idle_timeout: Duration::from_secs(timeouts.idle_secs),
        })
    }

    /// Build the one HTTP client every forwarded request shares.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(self.idle_timeout)
            .use_rustls_tls();

        builder = match &self.proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.url().as_str())?),
            // Ignore HTTP_PROXY and friends: no proxy configured means direct.
            None => builder.no_proxy(),
        };

        if self.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build()
    }
}

impl std::fmt::Display for TransportPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.proxy {
            Some(proxy) => write!(f, "via {}", proxy.url())?,
            None => write!(f, "direct")?,
        }
        if self.skip_verify {
            write!(f, ", tls verification disabled")?;
        }
        Ok(())
    }
}
