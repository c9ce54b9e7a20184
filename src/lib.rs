//! Single-upstream HTTP/HTTPS reverse proxy library.

pub mod buffer;
pub mod cli;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod upstream;

pub use buffer::BufferPool;
pub use config::schema::ProxyConfig;
pub use http::{ForwardingEngine, HttpServer};
pub use lifecycle::Shutdown;

/// Render an error and all of its sources as `outer: inner: root`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
