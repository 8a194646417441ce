//! Bounded chunk reader
//!
//! Exposes a capped view over a borrowed byte source so that one source can
//! be split into consecutive chunks without losing its read position.
//!
//! # Example
//!
//! ```
//! use dropstream::upload::chunk::{BoundedReader, ChunkState};
//! use tokio::io::AsyncReadExt;
//!
//! # #[tokio::main]
//! # async fn main() -> std::io::Result<()> {
//! let mut source: &[u8] = b"hello world";
//! let mut chunk = BoundedReader::new(&mut source, 5);
//!
//! let mut buf = Vec::new();
//! chunk.read_to_end(&mut buf).await?;
//! assert_eq!(buf, b"hello");
//! assert_eq!(chunk.state(), ChunkState::Full);
//!
//! chunk.reset(5);
//! buf.clear();
//! chunk.read_to_end(&mut buf).await?;
//! assert_eq!(buf, b" worl");
//! # Ok(())
//! # }
//! ```

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// How much of its budget a chunk delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// The chunk delivered exactly `limit` bytes; the source may hold more.
    Full,
    /// The source ended after delivering some bytes but fewer than `limit`.
    Partial,
    /// No bytes were delivered.
    Empty,
}

/// A sub-stream yielding at most `limit` bytes of the wrapped source.
///
/// The source is borrowed, never owned: the caller keeps it and can keep
/// reading from it once the reader is dropped.
#[derive(Debug)]
pub struct BoundedReader<'a, R: ?Sized> {
    inner: &'a mut R,
    limit: u64,
    remaining: u64,
    source_exhausted: bool,
    source_failed: bool,
}

impl<'a, R> BoundedReader<'a, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    /// Wrap `inner`, allowing `limit` bytes for the first chunk.
    pub fn new(inner: &'a mut R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
            source_exhausted: false,
            source_failed: false,
        }
    }

    /// Begin a new chunk of `limit` bytes.
    ///
    /// The wrapped source keeps its position.
    pub fn reset(&mut self, limit: u64) {
        self.limit = limit;
        self.remaining = limit;
    }

    /// Budget of the current chunk.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Bytes that may still be read before the current chunk is exhausted.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Bytes delivered since the last reset.
    pub fn consumed(&self) -> u64 {
        self.limit - self.remaining
    }

    /// Classify the current chunk.
    pub fn state(&self) -> ChunkState {
        match self.consumed() {
            0 => ChunkState::Empty,
            n if n == self.limit => ChunkState::Full,
            _ => ChunkState::Partial,
        }
    }

    /// Whether the wrapped source reported end-of-stream while budget remained.
    ///
    /// A `Full` chunk never sets this: the limit was hit first.
    pub fn source_exhausted(&self) -> bool {
        self.source_exhausted
    }

    /// Whether a read from the wrapped source has failed.
    ///
    /// Lets callers tell a broken source apart from a failing consumer when
    /// both surface as I/O errors.
    pub fn source_failed(&self) -> bool {
        self.source_failed
    }

    /// Release the borrowed source.
    pub fn into_inner(self) -> &'a mut R {
        self.inner
    }
}

impl<R> AsyncRead for BoundedReader<'_, R>
where
    R: AsyncRead + Unpin + ?Sized,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let max = usize::try_from(this.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.remaining());

        let dst = buf.initialize_unfilled_to(max);
        let mut sub = ReadBuf::new(dst);
        if let Err(e) = ready!(Pin::new(&mut *this.inner).poll_read(cx, &mut sub)) {
            this.source_failed = true;
            return Poll::Ready(Err(e));
        }
        let n = sub.filled().len();
        buf.advance(n);

        if n == 0 {
            this.source_exhausted = true;
        }
        this.remaining -= n as u64;

        Poll::Ready(Ok(()))
    }
}
