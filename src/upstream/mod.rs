//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyConfig.upstream
//!     → target.rs (origin the director rewrites to)
//!     → policy.rs (secondary proxy + TLS verification, composed)
//!     → transport.rs (one shared client, send per request)
//! ```
//!
//! # Design Decisions
//! - Policy derived once at startup and shared read-only
//! - A single attempt per request; failures surface as `TransportError`
//! - Redirects relayed to the client, never followed
//! - A 101 response carries the upstream connection as an `UpstreamUpgrade`

pub mod policy;
pub mod target;
pub mod transport;

pub use policy::{ProxyKind, ProxyUrlError, SecondaryProxy, TransportPolicy};
pub use target::{TargetError, UpstreamTarget};
pub use transport::{
    ByteStream, HttpTransport, TransportError, UpgradedIo, UpgradedStream, UpstreamRequest,
    UpstreamResponse, UpstreamTransport, UpstreamUpgrade,
};
