//! The fixed upstream origin.

use axum::http::uri::{Authority, Scheme};
use axum::http::HeaderValue;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Errors parsing the upstream origin URL.
#[derive(Debug, Error, PartialEq)]
pub enum TargetError {
    #[error("invalid upstream url '{url}': {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported upstream scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("upstream url '{0}' has no host")]
    MissingHost(String),

    #[error("upstream authority '{0}' is not a valid authority")]
    InvalidAuthority(String),
}

/// Scheme and authority every request is rewritten to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    scheme: Scheme,
    authority: Authority,
    host_header: HeaderValue,
    path: String,
}

impl UpstreamTarget {
    /// Parse an origin such as `http://127.0.0.1:8080`.
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let url = Url::parse(raw).map_err(|source| TargetError::Parse {
            url: raw.to_string(),
            source,
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };

        // host_str keeps the brackets around IPv6 literals.
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TargetError::MissingHost(raw.to_string()))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let parsed = Authority::from_str(&authority)
            .map_err(|_| TargetError::InvalidAuthority(authority.clone()))?;
        let host_header = HeaderValue::from_str(parsed.as_str())
            .map_err(|_| TargetError::InvalidAuthority(authority.clone()))?;

        Ok(Self {
            scheme,
            authority: parsed,
            host_header,
            path: url.path().to_string(),
        })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Value for the outbound `Host` header.
    pub fn host_header(&self) -> &HeaderValue {
        &self.host_header
    }

    /// Whether the configured URL carried a path. Only scheme and authority
    /// take part in the rewrite, so a path here is ignored.
    pub fn has_path(&self) -> bool {
        !self.path.is_empty() && self.path != "/"
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }
}

impl std::fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}
