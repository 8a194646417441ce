//! Single-shot upload
//!
//! Sends a whole payload with one upload request. Only valid for payloads
//! below the per-request maximum; the strategy selector enforces that.

use super::chunk::BoundedReader;
use super::UploadError;
use crate::transport::{CommitInfo, Metadata, Transport};
use tokio::io::AsyncRead;

/// Upload everything `source` yields in a single request.
#[tracing::instrument(
    name = "upload.single_shot",
    skip(transport, commit, source),
    fields(
        upload.path = %commit.path,
        upload.mode = ?commit.mode,
        upload.bytes = tracing::field::Empty
    ),
    err
)]
pub async fn upload_single<T, R>(
    transport: &T,
    commit: &CommitInfo,
    source: &mut R,
) -> Result<Metadata, UploadError>
where
    T: Transport + ?Sized,
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut body = BoundedReader::new(source, u64::MAX);
    let metadata = transport
        .upload(commit, &mut body)
        .await
        .map_err(|e| UploadError::from_call(e, &body))?;

    tracing::Span::current().record("upload.bytes", metadata.size);
    tracing::info!(
        path = %commit.path,
        size = metadata.size,
        "Single-shot upload completed"
    );

    Ok(metadata)
}
