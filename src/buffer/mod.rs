//! Body streaming subsystem.
//!
//! # Data Flow
//! ```text
//! body stream (client or upstream)
//!     → copy.rs (AsyncRead over the stream, read into a pooled buffer)
//!     → pool.rs (acquire on first read, release at end / error / drop)
//!     → chunks re-emitted to the other side
//! ```
//!
//! # Design Decisions
//! - The pool is an injected handle, not process-global state
//! - Buffers are scratch space: only freshly read bytes leave a copy

pub mod copy;
pub mod pool;

pub use copy::{copy_stream, pooled_stream, Leg, StreamError};
pub use pool::{BufferPool, PooledBuffer, BUFFER_SIZE};
