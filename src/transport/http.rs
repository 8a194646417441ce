//! HTTP transport
//!
//! reqwest-based client for the v2 file API.
//!
//! Two endpoint families are used:
//!
//! | Family | URL | Argument | Body |
//! |--------|-----|----------|------|
//! | RPC | `{api_url}/2/files/<op>` | JSON request body | JSON response |
//! | Content | `{content_url}/2/files/<op>` | JSON in the `Dropbox-API-Arg` header | raw bytes |
//!
//! # Example
//!
//! ```no_run
//! use dropstream::config::ApiConfig;
//! use dropstream::transport::http::HttpTransport;
//! use dropstream::transport::Transport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new(&ApiConfig::with_token("sl.example-token"))?;
//! let meta = transport.get_metadata("/Homework/math").await?;
//! println!("{} bytes", meta.size);
//! # Ok(())
//! # }
//! ```

use super::{
    Body, CommitInfo, DownloadBody, EntryKind, ListPage, Metadata, SearchPage, Transport,
    TransportError,
};
use crate::config::ApiConfig;
use crate::upload::SessionCursor;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

/// Header carrying the JSON argument of content endpoints
pub const API_ARG_HEADER: &str = "Dropbox-API-Arg";

#[derive(Serialize)]
struct PathArg<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct CursorArg<'a> {
    cursor: &'a str,
}

#[derive(Serialize)]
struct RelocationArg<'a> {
    from_path: &'a str,
    to_path: &'a str,
}

#[derive(Serialize)]
struct CreateFolderArg<'a> {
    path: &'a str,
    autorename: bool,
}

#[derive(Serialize)]
struct SearchArg<'a> {
    path: &'a str,
    query: &'a str,
    start: u64,
    mode: &'static str,
}

#[derive(Serialize)]
struct SessionStartArg {
    close: bool,
}

#[derive(Serialize)]
struct SessionAppendArg<'a> {
    cursor: &'a SessionCursor,
    close: bool,
}

#[derive(Serialize)]
struct SessionFinishArg<'a> {
    cursor: &'a SessionCursor,
    commit: &'a CommitInfo,
}

#[derive(Deserialize)]
struct SessionStartResult {
    session_id: String,
}

#[derive(Deserialize)]
struct MetadataResult {
    metadata: Metadata,
}

#[derive(Deserialize)]
struct SearchMatch {
    metadata: Metadata,
}

#[derive(Deserialize)]
struct SearchResult {
    matches: Vec<SearchMatch>,
    more: bool,
    start: u64,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error_summary: String,
}

/// HTTP transport
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
    content_url: String,
}

impl HttpTransport {
    /// Build a transport with bearer auth and the configured timeout
    pub fn new(config: &ApiConfig) -> Result<Self, TransportError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|e| TransportError::Configuration(format!("invalid access token: {e}")))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            content_url: config.content_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL of the RPC endpoints
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Base URL of the content endpoints
    pub fn content_url(&self) -> &str {
        &self.content_url
    }

    async fn rpc<A, T>(&self, endpoint: &str, arg: &A) -> Result<T, TransportError>
    where
        A: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}/2/{}", self.api_url, endpoint);
        let response = self.client.post(&url).json(arg).send().await?;
        let response = check_status(response).await?;
        decode(&response.bytes().await?)
    }

    async fn upload_content<A, T>(
        &self,
        endpoint: &str,
        arg: &A,
        body: Body<'_>,
    ) -> Result<T, TransportError>
    where
        A: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        // Chunks are bounded by the per-request maximum, so buffering is fine.
        let mut payload = Vec::new();
        body.read_to_end(&mut payload).await?;
        tracing::Span::current().record("upload.bytes", payload.len());

        let url = format!("{}/2/{}", self.content_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header(API_ARG_HEADER, header_arg(arg)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await?;
        let response = check_status(response).await?;
        decode(&response.bytes().await?)
    }

    async fn download_content<A>(&self, endpoint: &str, arg: &A) -> Result<DownloadBody, TransportError>
    where
        A: Serialize + ?Sized + Sync,
    {
        let url = format!("{}/2/{}", self.content_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header(API_ARG_HEADER, header_arg(arg)?)
            .send()
            .await?;
        let response = check_status(response).await?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(
        name = "api.upload_session_start",
        skip(self, body),
        fields(
            http.method = "POST",
            upload.bytes = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_session_start(&self, body: Body<'_>) -> Result<String, TransportError> {
        let result: SessionStartResult = self
            .upload_content("files/upload_session/start", &SessionStartArg { close: false }, body)
            .await?;
        Ok(result.session_id)
    }

    #[tracing::instrument(
        name = "api.upload_session_append",
        skip(self, cursor, body),
        fields(
            http.method = "POST",
            upload.session_id = %cursor.session_id,
            upload.offset = cursor.offset,
            upload.bytes = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_session_append(
        &self,
        cursor: &SessionCursor,
        body: Body<'_>,
    ) -> Result<(), TransportError> {
        let arg = SessionAppendArg {
            cursor,
            close: false,
        };
        self.upload_content("files/upload_session/append_v2", &arg, body)
            .await
    }

    #[tracing::instrument(
        name = "api.upload_session_finish",
        skip(self, cursor, commit, body),
        fields(
            http.method = "POST",
            upload.session_id = %cursor.session_id,
            upload.offset = cursor.offset,
            upload.path = %commit.path,
            upload.bytes = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_session_finish(
        &self,
        cursor: &SessionCursor,
        commit: &CommitInfo,
        body: Body<'_>,
    ) -> Result<Metadata, TransportError> {
        let arg = SessionFinishArg { cursor, commit };
        self.upload_content("files/upload_session/finish", &arg, body)
            .await
    }

    #[tracing::instrument(
        name = "api.upload",
        skip(self, commit, body),
        fields(
            http.method = "POST",
            upload.path = %commit.path,
            upload.bytes = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload(&self, commit: &CommitInfo, body: Body<'_>) -> Result<Metadata, TransportError> {
        self.upload_content("files/upload", commit, body).await
    }

    #[tracing::instrument(name = "api.list_page", skip(self, cursor), fields(has_cursor = cursor.is_some()), err)]
    async fn list_page(&self, path: &str, cursor: Option<&str>) -> Result<ListPage, TransportError> {
        match cursor {
            Some(cursor) => {
                self.rpc("files/list_folder/continue", &CursorArg { cursor })
                    .await
            }
            None => {
                self.rpc("files/list_folder", &PathArg { path: api_path(path) })
                    .await
            }
        }
    }

    #[tracing::instrument(name = "api.get_metadata", skip(self), err)]
    async fn get_metadata(&self, path: &str) -> Result<Metadata, TransportError> {
        self.rpc("files/get_metadata", &PathArg { path: api_path(path) })
            .await
    }

    #[tracing::instrument(name = "api.search", skip(self), err)]
    async fn search(&self, path: &str, query: &str, start: u64) -> Result<SearchPage, TransportError> {
        let arg = SearchArg {
            path: api_path(path),
            query,
            start,
            mode: "filename",
        };
        let result: SearchResult = self.rpc("files/search", &arg).await?;
        Ok(SearchPage {
            matches: result.matches.into_iter().map(|m| m.metadata).collect(),
            more: result.more,
            start: result.start,
        })
    }

    #[tracing::instrument(name = "api.download", skip(self), err)]
    async fn download(&self, path: &str) -> Result<DownloadBody, TransportError> {
        self.download_content("files/download", &PathArg { path })
            .await
    }

    #[tracing::instrument(name = "api.get_preview", skip(self), err)]
    async fn get_preview(&self, path: &str) -> Result<DownloadBody, TransportError> {
        self.download_content("files/get_preview", &PathArg { path })
            .await
    }

    #[tracing::instrument(name = "api.create_folder", skip(self), err)]
    async fn create_folder(&self, path: &str) -> Result<Metadata, TransportError> {
        let arg = CreateFolderArg {
            path,
            autorename: false,
        };
        let result: MetadataResult = self.rpc("files/create_folder_v2", &arg).await?;
        // folder metadata comes back without its tag
        Ok(Metadata {
            kind: EntryKind::Folder,
            ..result.metadata
        })
    }

    #[tracing::instrument(name = "api.delete", skip(self), err)]
    async fn delete(&self, path: &str) -> Result<Metadata, TransportError> {
        let result: MetadataResult = self.rpc("files/delete_v2", &PathArg { path }).await?;
        Ok(result.metadata)
    }

    #[tracing::instrument(name = "api.copy", skip(self), err)]
    async fn copy(&self, from: &str, to: &str) -> Result<Metadata, TransportError> {
        let arg = RelocationArg {
            from_path: from,
            to_path: to,
        };
        let result: MetadataResult = self.rpc("files/copy_v2", &arg).await?;
        Ok(result.metadata)
    }

    #[tracing::instrument(name = "api.move", skip(self), err)]
    async fn move_entry(&self, from: &str, to: &str) -> Result<Metadata, TransportError> {
        let arg = RelocationArg {
            from_path: from,
            to_path: to,
        };
        let result: MetadataResult = self.rpc("files/move_v2", &arg).await?;
        Ok(result.metadata)
    }
}

/// The API names the root folder `""`, not `"/"`.
fn api_path(path: &str) -> &str {
    if path == "/" {
        ""
    } else {
        path
    }
}

/// Serialize a header argument, escaping non-ASCII characters.
///
/// HTTP header values must be ASCII; the API accepts `\uXXXX` escapes.
fn header_arg<A: Serialize + ?Sized>(arg: &A) -> Result<HeaderValue, TransportError> {
    let json = serde_json::to_string(arg)?;
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    HeaderValue::from_str(&escaped)
        .map_err(|e| TransportError::Configuration(format!("invalid header argument: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
    if bytes.is_empty() {
        return Ok(serde_json::from_slice(b"null")?);
    }
    Ok(serde_json::from_slice(bytes)?)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    tracing::Span::current().record("http.status_code", status.as_u16());
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let summary = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error_summary)
        .unwrap_or(text);

    tracing::warn!(status = status.as_u16(), summary = %summary, "API request failed");
    Err(TransportError::Api {
        status: status.as_u16(),
        summary,
    })
}
