//! Transport module
//!
//! The seam between the high-level client and the remote file-storage API.
//! Every network call goes through the [`Transport`] trait; the upload core
//! and the listing facade only ever see this interface.
//!
//! # Implementations
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`http::HttpTransport`] | reqwest-based client for the v2 RPC and content endpoints |
//! | [`memory::MemoryTransport`] | In-process store, used for tests and offline runs |
//!
//! Request bodies are passed as borrowed readers. The transport reads what it
//! is given; the caller measures how many bytes were consumed.

use crate::upload::SessionCursor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod http;
pub mod memory;

/// Request body handed to a content call
pub type Body<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Response body of a download
pub type DownloadBody = Box<dyn AsyncRead + Send + Unpin>;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {summary}")]
    Api { status: u16, summary: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Configuration(_) => "configuration",
            TransportError::Http(_) => "http",
            TransportError::Api { .. } => "api",
            TransportError::Decode(_) => "decode",
            TransportError::Io(_) => "io",
        }
    }
}

/// Kind of a remote entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    #[default]
    File,
    Folder,
    Deleted,
}

/// Remote entry metadata as returned by the API
///
/// Upload responses omit the `.tag` discriminator and describe a file, hence
/// the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = ".tag", default)]
    pub kind: EntryKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_lower: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_display: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// One page of a folder listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

/// One page of search results
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub matches: Vec<Metadata>,
    pub more: bool,
    pub start: u64,
}

/// Overwrite policy applied when committing a file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Never overwrite; conflicting paths fail (or are renamed with `autorename`)
    Add,
    /// Replace whatever is at the path
    #[default]
    Overwrite,
}

/// Commit metadata for a finished upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitInfo {
    pub path: String,
    pub mode: WriteMode,
    pub autorename: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "timestamp::serialize"
    )]
    pub client_modified: Option<DateTime<Utc>>,
    pub mute: bool,
}

impl CommitInfo {
    /// Overwrite `path`, muted, without a client timestamp
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: WriteMode::Overwrite,
            autorename: false,
            client_modified: None,
            mute: true,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_client_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.client_modified = Some(modified);
        self
    }

    pub fn with_mute(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    pub fn with_autorename(mut self, autorename: bool) -> Self {
        self.autorename = autorename;
        self
    }
}

/// The API rejects fractional seconds in timestamps.
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            None => serializer.serialize_none(),
        }
    }
}

/// Remote file-storage API
///
/// Each method is one network call. Implementations never retry; failures
/// are returned as-is so callers can tell which call failed.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an upload session, sending the first chunk. Returns the session id.
    async fn upload_session_start(&self, body: Body<'_>) -> Result<String, TransportError>;

    /// Append a chunk at `cursor.offset`.
    async fn upload_session_append(
        &self,
        cursor: &SessionCursor,
        body: Body<'_>,
    ) -> Result<(), TransportError>;

    /// Send the remaining bytes and commit the session to `commit.path`.
    async fn upload_session_finish(
        &self,
        cursor: &SessionCursor,
        commit: &CommitInfo,
        body: Body<'_>,
    ) -> Result<Metadata, TransportError>;

    /// Upload a whole file in one request.
    async fn upload(&self, commit: &CommitInfo, body: Body<'_>) -> Result<Metadata, TransportError>;

    /// Fetch one page of the listing of `path`, or the page after `cursor`.
    async fn list_page(&self, path: &str, cursor: Option<&str>) -> Result<ListPage, TransportError>;

    async fn get_metadata(&self, path: &str) -> Result<Metadata, TransportError>;

    /// Filename search under `path`, starting at result index `start`.
    async fn search(&self, path: &str, query: &str, start: u64) -> Result<SearchPage, TransportError>;

    async fn download(&self, path: &str) -> Result<DownloadBody, TransportError>;

    async fn get_preview(&self, path: &str) -> Result<DownloadBody, TransportError>;

    async fn create_folder(&self, path: &str) -> Result<Metadata, TransportError>;

    async fn delete(&self, path: &str) -> Result<Metadata, TransportError>;

    async fn copy(&self, from: &str, to: &str) -> Result<Metadata, TransportError>;

    async fn move_entry(&self, from: &str, to: &str) -> Result<Metadata, TransportError>;
}
