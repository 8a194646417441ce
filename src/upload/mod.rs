//! Upload module
//!
//! Chunked upload-session protocol and single-shot uploads.
//!
//! [`upload`] is the entry point: it asks the [`strategy`] selector how to
//! send the payload, then runs either [`single::upload_single`] or a
//! [`session::SessionDriver`].

use crate::metrics;
use crate::transport::{CommitInfo, Metadata, Transport, TransportError};
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod chunk;
pub mod session;
pub mod single;
pub mod strategy;

pub use chunk::{BoundedReader, ChunkState};
pub use session::{SessionCursor, SessionDriver, SessionState, SessionSummary};
pub use strategy::{UploadLimits, UploadMode, DEFAULT_CHUNK_SIZE, MAX_REQUEST_SIZE};

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    /// A start, append, finish or upload call failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid upload configuration: {0}")]
    Configuration(String),

    /// Reading the caller's source failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Transport(e) => e.kind(),
            UploadError::Configuration(_) => "configuration",
            UploadError::Io(_) => "io",
        }
    }

    /// Classify a failed call whose request body was read through `body`.
    ///
    /// An I/O error raised by the caller's source is an [`UploadError::Io`];
    /// anything else stays a transport failure.
    pub(crate) fn from_call<R>(err: TransportError, body: &BoundedReader<'_, R>) -> Self
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match err {
            TransportError::Io(e) if body.source_failed() => UploadError::Io(e),
            other => UploadError::Transport(other),
        }
    }
}

/// Everything needed for one upload attempt except the source itself
#[derive(Debug, Clone)]
pub struct UploadPlan {
    /// Total payload size, if known. `None` and `Some(0)` both mean unknown.
    pub size: Option<u64>,
    /// Requested chunk size. `None` and `Some(0)` both mean the default.
    pub chunk_size: Option<u64>,
    pub commit: CommitInfo,
}

impl UploadPlan {
    /// Plan an upload of unknown size to `path` with default commit settings.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            size: None,
            chunk_size: None,
            commit: CommitInfo::new(path),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_commit(mut self, commit: CommitInfo) -> Self {
        self.commit = commit;
        self
    }
}

/// Upload `source` according to `plan`.
///
/// The source is borrowed for the duration of the call; on return it is
/// positioned after the last byte sent. No retries are attempted: the first
/// failing call's error is returned.
#[tracing::instrument(
    name = "upload",
    skip(transport, plan, source, limits),
    fields(
        upload.path = %plan.commit.path,
        upload.size = ?plan.size,
        upload.mode = tracing::field::Empty
    ),
    err
)]
pub async fn upload<T, R>(
    transport: &T,
    plan: &UploadPlan,
    source: &mut R,
    limits: &UploadLimits,
) -> Result<Metadata, UploadError>
where
    T: Transport + ?Sized,
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let strategy = strategy::select(plan.size, plan.chunk_size, limits)?;
    let mode = strategy.mode.as_str();
    tracing::Span::current().record("upload.mode", mode);

    let start_time = Instant::now();
    let result = match strategy.mode {
        UploadMode::SingleShot => single::upload_single(transport, &plan.commit, source).await,
        UploadMode::Session => {
            let mut driver = SessionDriver::new(transport, strategy.chunk_size, plan.size);
            driver
                .run(source, &plan.commit)
                .await
                .map(|summary| summary.metadata)
        }
    };

    let duration = start_time.elapsed();
    metrics::record_upload_duration(mode, duration.as_secs_f64());

    match &result {
        Ok(metadata) => {
            metrics::record_upload_success(mode, metadata.size);
            tracing::info!(
                mode,
                size = metadata.size,
                duration_ms = duration.as_millis(),
                "Upload committed"
            );
        }
        Err(e) => {
            metrics::record_upload_failure(mode);
            metrics::record_error(e.kind());
            tracing::error!(
                mode,
                error = %e,
                duration_ms = duration.as_millis(),
                "Upload failed"
            );
        }
    }

    result
}
