//! Streaming body copy through a pooled buffer.
//!
//! Each copy acquires one buffer on its first read and keeps it until the
//! source is exhausted, fails, or the consumer drops the stream. Only the
//! bytes produced by the current read are emitted, so whatever a previous
//! owner left in the buffer is never observable.

use bytes::Bytes;
use futures_util::StreamExt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::buffer::pool::{BufferPool, PooledBuffer};
use crate::upstream::transport::ByteStream;

/// Which half of the exchange a copy serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// Client request body → upstream.
    Request,
    /// Upstream response body → client.
    Response,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Request => write!(f, "request"),
            Leg::Response => write!(f, "response"),
        }
    }
}

/// Failures after a body copy has started. These are logged, never sent to
/// the client: the response head is already on its way, or the peer is gone.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{leg} body copy abandoned after {bytes} bytes")]
    Abandoned { leg: Leg, bytes: u64 },

    #[error("{leg} body read failed after {bytes} bytes")]
    Read {
        leg: Leg,
        bytes: u64,
        #[source]
        source: io::Error,
    },
}

struct CopyState<R> {
    reader: R,
    pool: BufferPool,
    buf: Option<PooledBuffer>,
    leg: Leg,
    bytes: u64,
    done: bool,
}

impl<R> CopyState<R> {
    fn finish(&mut self) {
        self.done = true;
        self.buf = None;
    }
}

impl<R> Drop for CopyState<R> {
    fn drop(&mut self) {
        if !self.done {
            let err = StreamError::Abandoned {
                leg: self.leg,
                bytes: self.bytes,
            };
            tracing::debug!(error = %err, "Body copy cancelled");
        }
    }
}

/// Stream the contents of `reader`, reading through one pooled buffer.
pub fn pooled_stream<R>(reader: R, pool: &BufferPool, leg: Leg) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let state = CopyState {
        reader,
        pool: pool.clone(),
        buf: None,
        leg,
        bytes: 0,
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        let pool = &state.pool;
        let buf = state.buf.get_or_insert_with(|| pool.acquire());

        match state.reader.read(&mut buf[..]).await {
            Ok(0) => {
                tracing::trace!(leg = %state.leg, bytes = state.bytes, "Body copy complete");
                state.finish();
                None
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                state.bytes += n as u64;
                Some((Ok(chunk), state))
            }
            Err(source) => {
                let kind = source.kind();
                let err = StreamError::Read {
                    leg: state.leg,
                    bytes: state.bytes,
                    source,
                };
                tracing::warn!(error = %crate::error_chain(&err), "Body copy failed");
                state.finish();
                Some((Err(io::Error::new(kind, err)), state))
            }
        }
    })
    .boxed()
}

/// Re-stream `source` through a pooled buffer.
pub fn copy_stream(source: ByteStream, pool: &BufferPool, leg: Leg) -> ByteStream {
    pooled_stream(StreamReader::new(source), pool, leg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        let items: Vec<io::Result<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        futures_util::stream::iter(items).boxed()
    }

    async fn collect(stream: ByteStream) -> io::Result<Vec<u8>> {
        let parts: Vec<Bytes> = stream.try_collect().await?;
        Ok(parts.concat())
    }

    #[tokio::test]
    async fn copies_all_bytes_in_order() {
        let pool = BufferPool::with_buffer_size(4, 2);
        let out = collect(copy_stream(
            chunks(&[b"hello ", b"pooled ", b"world"]),
            &pool,
            Leg::Response,
        ))
        .await
        .unwrap();
        assert_eq!(out, b"hello pooled world");
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn reused_buffer_leaks_nothing() {
        let pool = BufferPool::with_buffer_size(32, 1);
        {
            let mut dirty = pool.acquire();
            dirty.fill(0xAA);
        }
        assert_eq!(pool.idle_count(), 1);

        let out = collect(copy_stream(chunks(&[b"hi"]), &pool, Leg::Request))
            .await
            .unwrap();
        assert_eq!(out, b"hi");
        assert_eq!(pool.allocated(), 1);
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        let pool = BufferPool::with_buffer_size(8, 1);
        let out = collect(copy_stream(chunks(&[]), &pool, Leg::Response))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn read_error_ends_stream_and_releases_buffer() {
        let pool = BufferPool::with_buffer_size(8, 1);
        let source: ByteStream = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"never")),
        ])
        .boxed();

        let mut stream = copy_stream(source, &pool, Leg::Response);
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"part"));
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(stream.next().await.is_none());
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn dropping_mid_copy_releases_buffer() {
        let pool = BufferPool::with_buffer_size(8, 1);
        let mut stream = copy_stream(
            chunks(&[b"first", b"second"]),
            &pool,
            Leg::Response,
        );
        assert!(stream.next().await.is_some());
        assert_eq!(pool.idle_count(), 0);

        drop(stream);
        assert_eq!(pool.idle_count(), 1);
    }
}
