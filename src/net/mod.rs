//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured listen address
//!     → listener.rs (normalize, bind)
//!     → tls.rs (optional: load PEM chain + key for termination)
//!     → Hand off to HTTP layer (plain axum::serve or axum-server rustls)
//! ```
//!
//! # Design Decisions
//! - Bind and TLS failures are fatal before any connection is served
//! - TLS is optional and handled transparently

pub mod listener;
pub mod tls;

pub use listener::{bind, ListenerError};
pub use tls::{install_crypto_provider, load_tls_config, TlsError};
