//! High-level client
//!
//! Filesystem-style operations over a [`Transport`]: stat, list, search,
//! read, write, copy, move and delete.
//!
//! # Example
//!
//! ```no_run
//! use dropstream::{Client, Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::from_config(&Config::from_token("sl.example-token"))?;
//!
//! let mut source: &[u8] = b"Hello World";
//! client.upload("/demo.txt", &mut source).await?;
//!
//! let contents = client.read("/demo.txt").await?;
//! assert_eq!(&contents[..], b"Hello World");
//!
//! for entry in client.list_files("/").await? {
//!     println!("{entry}");
//! }
//! # Ok(())
//! # }
//! ```

mod info;
mod writer;

pub use info::FileInfo;
pub use writer::RemoteWriter;

use crate::config::Config;
use crate::metrics;
use crate::transport::http::HttpTransport;
use crate::transport::{CommitInfo, DownloadBody, ListPage, Transport, TransportError};
use crate::upload::{self, single, UploadError, UploadLimits, UploadPlan};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default buffer between a [`RemoteWriter`] and its upload task (1MB)
pub const DEFAULT_PIPE_BUFFER_SIZE: usize = 1024 * 1024;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    /// A bounded listing produced no entries
    #[error("No entries found in '{path}'")]
    ExhaustedInput { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem-style client
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    limits: UploadLimits,
    pipe_buffer_size: usize,
}

impl Client {
    /// Wrap a transport, using the default upload limits
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    /// Wrap a shared transport
    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            limits: UploadLimits::default(),
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
        }
    }

    /// HTTP client for the configured API
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.api)?;
        Ok(Self::new(transport)
            .with_limits(config.upload.limits())
            .with_pipe_buffer_size(config.upload.pipe_buffer_size))
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_pipe_buffer_size(mut self, size: usize) -> Self {
        self.pipe_buffer_size = size.max(1);
        self
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // ------------------------------------------------------------------------
    // Metadata and listing
    // ------------------------------------------------------------------------

    /// Metadata for `path`
    pub async fn stat(&self, path: &str) -> Result<FileInfo, ClientError> {
        Ok(self.transport.get_metadata(path).await?.into())
    }

    /// Entries of folder `path`, at most `limit` of them; `0` means all.
    ///
    /// A bounded request (`limit > 0`) that finds nothing fails with
    /// [`ClientError::ExhaustedInput`].
    #[tracing::instrument(name = "client.list", skip(self), fields(entries = tracing::field::Empty), err)]
    pub async fn list_n(&self, path: &str, limit: usize) -> Result<Vec<FileInfo>, ClientError> {
        let mut list = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let ListPage {
                entries,
                cursor: next,
                has_more,
            } = self.transport.list_page(path, cursor.as_deref()).await?;
            metrics::record_list_page("list");

            list.extend(entries.into_iter().map(FileInfo::from));

            if limit > 0 && list.len() >= limit {
                list.truncate(limit);
                break;
            }
            if !has_more {
                break;
            }
            cursor = Some(next);
        }

        tracing::Span::current().record("entries", list.len());

        if limit > 0 && list.is_empty() {
            return Err(ClientError::ExhaustedInput {
                path: path.to_string(),
            });
        }

        Ok(list)
    }

    /// All entries of folder `path`
    pub async fn list(&self, path: &str) -> Result<Vec<FileInfo>, ClientError> {
        self.list_n(path, 0).await
    }

    /// All entries of folder `path` accepted by `filter`
    pub async fn list_filter<F>(&self, path: &str, filter: F) -> Result<Vec<FileInfo>, ClientError>
    where
        F: Fn(&FileInfo) -> bool,
    {
        let entries = self.list(path).await?;
        Ok(entries.into_iter().filter(|e| filter(e)).collect())
    }

    /// Sub-folders of `path`
    pub async fn list_folders(&self, path: &str) -> Result<Vec<FileInfo>, ClientError> {
        self.list_filter(path, FileInfo::is_dir).await
    }

    /// Files directly in `path`
    pub async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>, ClientError> {
        self.list_filter(path, |e| !e.is_dir()).await
    }

    /// Filename search below `path`.
    ///
    /// Results are fetched page by page as the stream is polled. The stream
    /// ends after the last page or after the first error.
    pub fn search(
        &self,
        path: &str,
        query: &str,
    ) -> impl Stream<Item = Result<FileInfo, ClientError>> + Send + 'static {
        let state = SearchState {
            transport: self.transport.clone(),
            path: path.to_string(),
            query: query.to_string(),
            start: 0,
            pending: VecDeque::new(),
            more: true,
        };
        futures::stream::try_unfold(state, next_search_match)
    }

    /// Every search result, collected
    pub async fn search_all(&self, path: &str, query: &str) -> Result<Vec<FileInfo>, ClientError> {
        self.search(path, query).try_collect().await
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Streaming contents of `path`
    pub async fn download(&self, path: &str) -> Result<DownloadBody, ClientError> {
        Ok(self.transport.download(path).await?)
    }

    /// Full contents of `path`
    pub async fn read(&self, path: &str) -> Result<Bytes, ClientError> {
        let mut body = self.transport.download(path).await?;
        let mut contents = Vec::new();
        body.read_to_end(&mut contents).await?;
        Ok(Bytes::from(contents))
    }

    /// PDF preview of `path`
    pub async fn preview(&self, path: &str) -> Result<DownloadBody, ClientError> {
        Ok(self.transport.get_preview(path).await?)
    }

    // ------------------------------------------------------------------------
    // Namespace operations
    // ------------------------------------------------------------------------

    /// Create folder `path`
    pub async fn mkdir(&self, path: &str) -> Result<FileInfo, ClientError> {
        Ok(self.transport.create_folder(path).await?.into())
    }

    /// Delete the file or folder at `path`
    pub async fn delete(&self, path: &str) -> Result<FileInfo, ClientError> {
        Ok(self.transport.delete(path).await?.into())
    }

    /// Copy `src` to `dst`
    pub async fn copy(&self, src: &str, dst: &str) -> Result<FileInfo, ClientError> {
        Ok(self.transport.copy(src, dst).await?.into())
    }

    /// Move `src` to `dst`
    pub async fn rename(&self, src: &str, dst: &str) -> Result<FileInfo, ClientError> {
        Ok(self.transport.move_entry(src, dst).await?.into())
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// Upload `source` to `path` in one request, overwriting and muted.
    ///
    /// The payload must be smaller than the per-request maximum; use
    /// [`Client::upload_session`] for anything larger or of unknown size.
    pub async fn upload<R>(&self, path: &str, source: &mut R) -> Result<FileInfo, ClientError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let commit = CommitInfo::new(path);
        let metadata = single::upload_single(self.transport.as_ref(), &commit, source).await?;
        Ok(metadata.into())
    }

    /// Upload `source` to `path` through an upload session with default
    /// chunking, overwriting and muted, stamped with the current time.
    pub async fn upload_session<R>(&self, path: &str, source: &mut R) -> Result<FileInfo, ClientError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let plan = UploadPlan::new(path).with_commit(CommitInfo::new(path).with_client_modified(now()));
        self.upload_with(&plan, source).await
    }

    /// Upload `source` according to `plan`, choosing single-shot or session.
    pub async fn upload_with<R>(&self, plan: &UploadPlan, source: &mut R) -> Result<FileInfo, ClientError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let metadata = upload::upload(self.transport.as_ref(), plan, source, &self.limits).await?;
        Ok(metadata.into())
    }

    /// Upload a local file, declaring its size so the last append can be
    /// folded into the finish call.
    #[tracing::instrument(name = "client.upload_file", skip(self, local), fields(local = %local.as_ref().display()), err)]
    pub async fn upload_file(
        &self,
        local: impl AsRef<Path> + Send,
        remote: &str,
    ) -> Result<FileInfo, ClientError> {
        let mut file = tokio::fs::File::open(local.as_ref()).await?;
        let meta = file.metadata().await?;

        let mut commit = CommitInfo::new(remote);
        if let Ok(modified) = meta.modified() {
            commit = commit.with_client_modified(DateTime::<Utc>::from(modified));
        }

        let plan = UploadPlan::new(remote)
            .with_size(meta.len())
            .with_commit(commit);
        self.upload_with(&plan, &mut file).await
    }

    /// Open a streaming writer committing to `path` on finish.
    pub fn create(&self, path: &str) -> RemoteWriter {
        let plan = UploadPlan::new(path).with_commit(CommitInfo::new(path).with_client_modified(now()));
        self.create_with(plan)
    }

    /// Open a streaming writer for a custom plan.
    pub fn create_with(&self, plan: UploadPlan) -> RemoteWriter {
        RemoteWriter::spawn(self.clone(), plan, self.pipe_buffer_size)
    }
}

/// Timestamps sent to the API carry whole seconds.
fn now() -> DateTime<Utc> {
    use chrono::SubsecRound;
    Utc::now().trunc_subsecs(0)
}

struct SearchState {
    transport: Arc<dyn Transport>,
    path: String,
    query: String,
    start: u64,
    pending: VecDeque<FileInfo>,
    more: bool,
}

async fn next_search_match(
    mut state: SearchState,
) -> Result<Option<(FileInfo, SearchState)>, ClientError> {
    loop {
        if let Some(info) = state.pending.pop_front() {
            return Ok(Some((info, state)));
        }
        if !state.more {
            return Ok(None);
        }

        let page = state
            .transport
            .search(&state.path, &state.query, state.start)
            .await?;
        metrics::record_list_page("search");

        state.more = page.more;
        state.start = page.start;
        state
            .pending
            .extend(page.matches.into_iter().map(FileInfo::from));
    }
}
