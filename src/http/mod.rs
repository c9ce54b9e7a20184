//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, catch-all handler)
//!     → request.rs (request ID)
//!     → forward.rs (engine)
//!         → headers.rs (hop-by-hop strip, X-Forwarded-For)
//!         → director.rs (rewrite to upstream)
//!         → upstream transport
//!         → upgrade.rs (101: relay head, splice connections)
//!         → response.rs (diagnostic header) or error.rs (generic 500)
//!     → Send to client
//! ```

pub mod director;
pub mod error;
pub mod forward;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;
pub mod upgrade;

pub use director::{Director, UpstreamDirector};
pub use error::{ErrorHandler, FailedRequest, GenericErrorHandler, GENERIC_ERROR_BODY};
pub use forward::{ForwardError, ForwardState, ForwardingEngine};
pub use request::{request_id_layer, UuidRequestId, X_REQUEST_ID};
pub use response::{DiagnosticHeader, InterceptorError, ResponseInterceptor, X_REVERSE_PROXY};
pub use server::{HttpServer, ServerError};
pub use upgrade::{Tunnel, UpgradeError};
