//! Streaming remote writer
//!
//! Adapts push-style writes to the pull-style upload driver through an
//! in-memory pipe. The read half is consumed by an upload task; the write
//! half is what callers see.

use super::{Client, ClientError, FileInfo};
use crate::upload::UploadPlan;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// Writes bytes to a remote file
///
/// Nothing is committed until [`RemoteWriter::finish`] returns. Dropping the
/// writer without finishing aborts the upload. If the upload fails while
/// writing, further writes return `BrokenPipe`; `finish` reports the cause.
pub struct RemoteWriter {
    path: String,
    pipe: DuplexStream,
    task: Option<JoinHandle<Result<FileInfo, ClientError>>>,
}

impl RemoteWriter {
    pub(super) fn spawn(client: Client, plan: UploadPlan, buffer_size: usize) -> Self {
        let path = plan.commit.path.clone();
        let (pipe, reader) = tokio::io::duplex(buffer_size);

        let task = tokio::spawn(async move {
            let mut reader = reader;
            client.upload_with(&plan, &mut reader).await
        });

        Self {
            path,
            pipe,
            task: Some(task),
        }
    }

    /// Destination path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the stream and wait for the upload to commit.
    pub async fn finish(mut self) -> Result<FileInfo, ClientError> {
        // A failed upload has already closed the read half.
        if let Err(e) = self.pipe.shutdown().await {
            tracing::debug!(path = %self.path, error = %e, "Pipe already closed");
        }

        let task = self
            .task
            .take()
            .ok_or_else(|| ClientError::Io(io::Error::other("writer already finished")))?;

        match task.await {
            Ok(result) => result,
            Err(e) => Err(ClientError::Io(io::Error::other(e))),
        }
    }
}

impl Drop for RemoteWriter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::warn!(path = %self.path, "Remote writer dropped before finish, aborting upload");
            task.abort();
        }
    }
}

impl AsyncWrite for RemoteWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.pipe).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_shutdown(cx)
    }
}
