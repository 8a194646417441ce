//! Upload session driver
//!
//! Drives the start / append* / finish sequence for payloads that do not fit
//! a single request.
//!
//! # State machine
//!
//! ```text
//! NotStarted ──start──▶ Started ──append──▶ Appending ─┐
//!                          │                    ▲      │ append
//!                          │                    └──────┘
//!                          └────────finish──────────────▶ Finished
//!
//! any failed call ─────────────────────────────────────▶ Failed
//! ```
//!
//! Appending continues only while the previous chunk came back
//! [`ChunkState::Full`]. When the total size is known, the append that would
//! reach it is skipped and its bytes travel with the finish call instead.

use super::chunk::{BoundedReader, ChunkState};
use super::UploadError;
use crate::metrics;
use crate::transport::{CommitInfo, Metadata, Transport};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Position within a remote upload session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCursor {
    pub session_id: String,
    pub offset: u64,
}

impl SessionCursor {
    pub fn new(session_id: impl Into<String>, offset: u64) -> Self {
        Self {
            session_id: session_id.into(),
            offset,
        }
    }

    /// Account for bytes the remote side accepted.
    pub fn advance(&mut self, consumed: u64) {
        self.offset += consumed;
    }
}

/// Driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Started,
    Appending,
    Finished,
    Failed,
}

/// What a completed session did
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub metadata: Metadata,
    /// Total bytes committed, equal to the final cursor offset
    pub bytes_uploaded: u64,
    pub append_calls: usize,
}

/// Drives one upload session to completion
///
/// A driver handles exactly one session; it owns its cursor and chunk reader
/// for the duration of [`SessionDriver::run`].
pub struct SessionDriver<'t, T: ?Sized> {
    transport: &'t T,
    chunk_size: u64,
    total_size: Option<u64>,
    state: SessionState,
}

impl<'t, T> SessionDriver<'t, T>
where
    T: Transport + ?Sized,
{
    /// Create a driver sending chunks of `chunk_size` bytes.
    ///
    /// `total_size` enables skipping the last append; `None` or `Some(0)`
    /// mean unknown.
    pub fn new(transport: &'t T, chunk_size: u64, total_size: Option<u64>) -> Self {
        Self {
            transport,
            chunk_size,
            total_size: total_size.filter(|size| *size > 0),
            state: SessionState::NotStarted,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Upload everything `source` yields and commit it.
    ///
    /// Fails fast on the first failing call; the remote session is left to
    /// expire on its own.
    #[tracing::instrument(
        name = "upload.session",
        skip(self, source, commit),
        fields(
            upload.path = %commit.path,
            upload.chunk_size = self.chunk_size,
            upload.total_size = ?self.total_size,
            upload.session_id = tracing::field::Empty,
            upload.bytes = tracing::field::Empty
        ),
        err
    )]
    pub async fn run<R>(
        &mut self,
        source: &mut R,
        commit: &CommitInfo,
    ) -> Result<SessionSummary, UploadError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        if self.state != SessionState::NotStarted {
            return Err(UploadError::Configuration(
                "upload session driver already used".into(),
            ));
        }
        if self.chunk_size == 0 {
            self.state = SessionState::Failed;
            return Err(UploadError::Configuration("chunk size must be positive".into()));
        }

        let result = self.drive(source, commit).await;
        match &result {
            Ok(summary) => {
                self.state = SessionState::Finished;
                let span = tracing::Span::current();
                span.record("upload.bytes", summary.bytes_uploaded);
                metrics::record_session_requests(summary.append_calls + 2);
            }
            Err(e) => {
                tracing::error!(state = ?self.state, error = %e, "Upload session failed");
                self.state = SessionState::Failed;
            }
        }
        result
    }

    async fn drive<R>(
        &mut self,
        source: &mut R,
        commit: &CommitInfo,
    ) -> Result<SessionSummary, UploadError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut chunk = BoundedReader::new(source, self.chunk_size);

        let session_id = self
            .transport
            .upload_session_start(&mut chunk)
            .await
            .map_err(|e| UploadError::from_call(e, &chunk))?;
        let mut cursor = SessionCursor::new(session_id, chunk.consumed());
        self.state = SessionState::Started;

        tracing::Span::current().record("upload.session_id", cursor.session_id.as_str());
        tracing::debug!(
            session_id = %cursor.session_id,
            offset = cursor.offset,
            "Upload session started"
        );

        let mut append_calls = 0;
        while chunk.state() == ChunkState::Full {
            if self.final_chunk_pending(&cursor) {
                tracing::debug!(
                    offset = cursor.offset,
                    "Remaining bytes fit the finish call, skipping append"
                );
                break;
            }

            chunk.reset(self.chunk_size);
            self.transport
                .upload_session_append(&cursor, &mut chunk)
                .await
                .map_err(|e| UploadError::from_call(e, &chunk))?;
            cursor.advance(chunk.consumed());
            append_calls += 1;
            self.state = SessionState::Appending;

            tracing::debug!(
                offset = cursor.offset,
                chunk = ?chunk.state(),
                "Appended chunk"
            );
        }

        // Whatever is left is at most one chunk; hold it back until the
        // stream is known to agree with the declared size.
        chunk.reset(self.chunk_size);
        let mut last = Vec::new();
        chunk.read_to_end(&mut last).await?;
        if let Some(total) = self.total_size {
            self.check_declared_size(&mut chunk, cursor.offset + last.len() as u64, total)
                .await?;
        }

        let mut body = last.as_slice();
        let metadata = self
            .transport
            .upload_session_finish(&cursor, commit, &mut body)
            .await?;
        cursor.advance(last.len() as u64);

        tracing::info!(
            session_id = %cursor.session_id,
            bytes = cursor.offset,
            append_calls,
            "Upload session finished"
        );

        Ok(SessionSummary {
            metadata,
            bytes_uploaded: cursor.offset,
            append_calls,
        })
    }

    /// Fail unless the stream ends exactly at the declared size.
    ///
    /// Runs before finish, so a mismatch never commits anything.
    async fn check_declared_size<R>(
        &self,
        chunk: &mut BoundedReader<'_, R>,
        committed: u64,
        total: u64,
    ) -> Result<(), UploadError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        chunk.reset(1);
        let mut extra = [0u8; 1];
        if chunk.read(&mut extra).await? > 0 {
            return Err(UploadError::Configuration(format!(
                "stream is longer than the declared size of {total} bytes"
            )));
        }
        if committed != total {
            return Err(UploadError::Configuration(format!(
                "stream ended after {committed} of {total} declared bytes"
            )));
        }
        Ok(())
    }

    /// True when one more chunk would reach the declared total size.
    fn final_chunk_pending(&self, cursor: &SessionCursor) -> bool {
        match self.total_size {
            Some(total) => cursor.offset.saturating_add(self.chunk_size) >= total,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryTransport, Operation};

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn run_session(
        transport: &MemoryTransport,
        data: &[u8],
        chunk_size: u64,
        total_size: Option<u64>,
    ) -> Result<SessionSummary, UploadError> {
        let mut source = data;
        let mut driver = SessionDriver::new(transport, chunk_size, total_size);
        driver.run(&mut source, &CommitInfo::new("/out.bin")).await
    }

    #[test]
    fn test_cursor_advance() {
        let mut cursor = SessionCursor::new("abc", 10);
        cursor.advance(5);
        cursor.advance(0);
        assert_eq!(cursor.offset, 15);
        assert_eq!(cursor.session_id, "abc");
    }

    #[tokio::test]
    async fn test_known_size_skips_last_append() {
        let transport = MemoryTransport::new();
        let data = payload(30);

        let summary = run_session(&transport, &data, 12, Some(30)).await.unwrap();

        // start 12, append 12 (24), 24 + 12 >= 30 -> finish carries 6
        assert_eq!(summary.append_calls, 1);
        assert_eq!(summary.bytes_uploaded, 30);
        assert_eq!(transport.count(Operation::SessionStart), 1);
        assert_eq!(transport.count(Operation::SessionAppend), 1);
        assert_eq!(transport.count(Operation::SessionFinish), 1);
        assert_eq!(transport.content("/out.bin").unwrap(), data);

        let finish = transport.calls().into_iter().last().unwrap();
        assert_eq!(finish.bytes, 6);
        assert_eq!(finish.offset, Some(24));
    }

    #[tokio::test]
    async fn test_unknown_size_appends_until_partial_chunk() {
        let transport = MemoryTransport::new();
        let data = payload(30);

        let summary = run_session(&transport, &data, 12, None).await.unwrap();

        // start 12, append 12, append 6 (partial), finish 0
        assert_eq!(summary.append_calls, 2);
        assert_eq!(summary.bytes_uploaded, 30);
        assert_eq!(transport.content("/out.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_unknown_size_exact_multiple_sends_empty_append() {
        let transport = MemoryTransport::new();
        let data = payload(24);

        let summary = run_session(&transport, &data, 12, None).await.unwrap();

        // the second chunk is Full, so one more append observes the end
        assert_eq!(summary.append_calls, 2);
        let appends: Vec<u64> = transport
            .calls()
            .into_iter()
            .filter(|c| c.op == Operation::SessionAppend)
            .map(|c| c.bytes)
            .collect();
        assert_eq!(appends, vec![12, 0]);
        assert_eq!(transport.content("/out.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_known_exact_multiple_finish_carries_full_chunk() {
        let transport = MemoryTransport::new();
        let data = payload(24);

        let summary = run_session(&transport, &data, 12, Some(24)).await.unwrap();

        assert_eq!(summary.append_calls, 0);
        let finish = transport.calls().into_iter().last().unwrap();
        assert_eq!(finish.op, Operation::SessionFinish);
        assert_eq!(finish.bytes, 12);
        assert_eq!(transport.content("/out.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_source_shorter_than_one_chunk() {
        let transport = MemoryTransport::new();
        let data = payload(5);

        let summary = run_session(&transport, &data, 12, None).await.unwrap();

        assert_eq!(summary.append_calls, 0);
        assert_eq!(summary.bytes_uploaded, 5);
        assert_eq!(transport.content("/out.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_source_commits_empty_file() {
        let transport = MemoryTransport::new();

        let summary = run_session(&transport, &[], 12, None).await.unwrap();

        assert_eq!(summary.bytes_uploaded, 0);
        assert_eq!(summary.metadata.size, 0);
    }

    #[tokio::test]
    async fn test_start_failure_stops_session() {
        let transport = MemoryTransport::new();
        transport.fail_next(Operation::SessionStart, 503, "too_many_requests");

        let mut source: &[u8] = &[1, 2, 3];
        let mut driver = SessionDriver::new(&transport, 2, None);
        let err = driver
            .run(&mut source, &CommitInfo::new("/out.bin"))
            .await
            .unwrap_err();

        assert_eq!(driver.state(), SessionState::Failed);
        assert!(matches!(
            err,
            UploadError::Transport(crate::transport::TransportError::Api { status: 503, .. })
        ));
        assert_eq!(transport.count(Operation::SessionAppend), 0);
        assert_eq!(transport.count(Operation::SessionFinish), 0);
    }

    #[tokio::test]
    async fn test_append_failure_stops_session() {
        let transport = MemoryTransport::new();
        transport.fail_next(Operation::SessionAppend, 500, "internal_error");

        let data = payload(40);
        let err = run_session(&transport, &data, 10, None).await.unwrap_err();

        assert!(matches!(err, UploadError::Transport(_)));
        assert_eq!(transport.count(Operation::SessionAppend), 1);
        assert_eq!(transport.count(Operation::SessionFinish), 0);
        assert!(transport.content("/out.bin").is_none());
    }

    #[tokio::test]
    async fn test_finish_failure_commits_nothing() {
        let transport = MemoryTransport::new();
        transport.fail_next(Operation::SessionFinish, 409, "lookup_failed/incorrect_offset/");

        let data = payload(25);
        let mut source: &[u8] = &data;
        let mut driver = SessionDriver::new(&transport, 10, Some(25));
        let err = driver
            .run(&mut source, &CommitInfo::new("/out.bin"))
            .await
            .unwrap_err();

        assert_eq!(driver.state(), SessionState::Failed);
        assert!(matches!(
            err,
            UploadError::Transport(crate::transport::TransportError::Api { status: 409, .. })
        ));
        assert_eq!(transport.count(Operation::SessionFinish), 1);
        assert!(!transport.exists("/out.bin"));
    }

    #[tokio::test]
    async fn test_stream_longer_than_declared_size_fails() {
        let transport = MemoryTransport::new();
        let data = payload(100);
        let mut source: &[u8] = &data;
        let mut driver = SessionDriver::new(&transport, 10, Some(25));

        let err = driver
            .run(&mut source, &CommitInfo::new("/out.bin"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Configuration(ref msg) if msg.contains("longer")));
        assert_eq!(driver.state(), SessionState::Failed);
        assert_eq!(transport.count(Operation::SessionFinish), 0);
        assert!(!transport.exists("/out.bin"));
    }

    #[tokio::test]
    async fn test_stream_reaching_declared_size_early_but_continuing_fails() {
        // the final chunk lands exactly on the declared size, more data follows
        let transport = MemoryTransport::new();
        let data = payload(31);

        let err = run_session(&transport, &data, 10, Some(30)).await.unwrap_err();

        assert!(matches!(err, UploadError::Configuration(_)));
        assert_eq!(transport.count(Operation::SessionFinish), 0);
    }

    #[tokio::test]
    async fn test_stream_shorter_than_declared_size_fails() {
        let transport = MemoryTransport::new();
        let data = payload(30);

        let err = run_session(&transport, &data, 12, Some(40)).await.unwrap_err();

        match err {
            UploadError::Configuration(msg) => assert!(msg.contains("30 of 40")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.count(Operation::SessionFinish), 0);
        assert!(!transport.exists("/out.bin"));
    }

    #[tokio::test]
    async fn test_source_failure_mid_session_is_io_error() {
        let transport = MemoryTransport::new();
        let data = payload(15);
        let mut source = tokio::io::AsyncReadExt::chain(&data[..], broken_source());
        let mut driver = SessionDriver::new(&transport, 10, None);

        let err = driver
            .run(&mut source, &CommitInfo::new("/out.bin"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Io(ref e) if e.to_string() == "disk gone"));
        assert_eq!(err.kind(), "io");
        assert_eq!(driver.state(), SessionState::Failed);
        assert_eq!(transport.count(Operation::SessionFinish), 0);
        assert!(!transport.exists("/out.bin"));
    }

    fn broken_source() -> impl AsyncRead + Unpin + Send {
        use std::pin::Pin;
        use std::task::{Context, Poll};
        use tokio::io::ReadBuf;

        struct Broken;
        impl AsyncRead for Broken {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<std::io::Result<()>> {
                Poll::Ready(Err(std::io::Error::other("disk gone")))
            }
        }
        Broken
    }

    #[tokio::test]
    async fn test_driver_is_single_use() {
        let transport = MemoryTransport::new();
        let mut source: &[u8] = &[1, 2, 3];
        let mut driver = SessionDriver::new(&transport, 8, None);
        driver
            .run(&mut source, &CommitInfo::new("/a"))
            .await
            .unwrap();
        assert_eq!(driver.state(), SessionState::Finished);

        let mut again: &[u8] = &[4];
        let result = driver.run(&mut again, &CommitInfo::new("/a")).await;
        assert!(matches!(result, Err(UploadError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_append_count_matches_chunk_arithmetic() {
        // known size: ceil(S/C) - 2 appends once S > C
        for (size, chunk) in [(25usize, 10u64), (30, 10), (31, 10), (100, 7), (11, 10), (20, 10)] {
            let transport = MemoryTransport::new();
            let data = payload(size);
            let summary = run_session(&transport, &data, chunk, Some(size as u64))
                .await
                .unwrap();

            let chunks = (size as u64).div_ceil(chunk) as usize;
            assert_eq!(summary.append_calls, chunks.saturating_sub(2), "size {size} chunk {chunk}");
            assert_eq!(summary.bytes_uploaded, size as u64);
            assert_eq!(transport.content("/out.bin").unwrap(), data);
        }
    }
}
