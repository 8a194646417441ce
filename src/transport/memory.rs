//! In-memory transport
//!
//! A self-contained [`Transport`] holding files and folders in a map. It
//! keeps a log of every call, which makes it the backbone of the upload and
//! listing tests, and it can be told to fail a given operation once.
//!
//! # Example
//!
//! ```
//! use dropstream::transport::memory::{MemoryTransport, Operation};
//! use dropstream::Client;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = MemoryTransport::new().with_page_size(2);
//! transport.insert_file("/docs/a.txt", "alpha");
//! transport.insert_file("/docs/b.txt", "beta");
//! transport.insert_file("/docs/c.txt", "gamma");
//!
//! let client = Client::new(transport);
//! let entries = client.list("/docs").await?;
//! assert_eq!(entries.len(), 3);
//! # Ok(())
//! # }
//! ```

use super::{
    Body, CommitInfo, DownloadBody, EntryKind, ListPage, Metadata, SearchPage, Transport,
    TransportError, WriteMode,
};
use crate::upload::SessionCursor;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tokio::io::AsyncReadExt;

/// Default number of entries per listing or search page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Remote call kinds, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SessionStart,
    SessionAppend,
    SessionFinish,
    Upload,
    ListPage,
    GetMetadata,
    Search,
    Download,
    Preview,
    CreateFolder,
    Delete,
    Copy,
    Move,
}

/// One logged call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: Operation,
    pub path: Option<String>,
    /// Session offset carried by append and finish
    pub offset: Option<u64>,
    /// Request body bytes read by the call
    pub bytes: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    metadata: Metadata,
    content: Bytes,
}

#[derive(Debug, Default)]
struct Session {
    len: u64,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by lower-cased path; the root is the empty string
    entries: BTreeMap<String, Entry>,
    sessions: HashMap<String, Session>,
    calls: Vec<CallRecord>,
    failures: HashMap<Operation, (u16, String)>,
    next_id: u64,
}

/// In-process remote store
pub struct MemoryTransport {
    state: Mutex<State>,
    page_size: usize,
    retain_content: bool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
            retain_content: true,
        }
    }

    /// Entries returned per listing or search page (minimum 1)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Count uploaded bytes without keeping them, for very large payloads.
    pub fn discard_content(mut self) -> Self {
        self.retain_content = false;
        self
    }

    /// Seed a file, creating parent folders as needed.
    pub fn insert_file(&self, path: &str, content: impl Into<Bytes>) -> Metadata {
        let content = content.into();
        let mut state = self.state.lock();
        let commit = CommitInfo::new(path);
        state.put_file(&commit, content.len() as u64, content)
    }

    /// Seed a folder, creating parent folders as needed.
    pub fn insert_folder(&self, path: &str) -> Metadata {
        let mut state = self.state.lock();
        state.ensure_parents(path);
        state.put_folder(path)
    }

    /// Stored bytes of the file at `path`
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .entries
            .get(&normalize(path))
            .filter(|e| e.metadata.kind == EntryKind::File)
            .map(|e| e.content.to_vec())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().entries.contains_key(&normalize(path))
    }

    /// Make the next call of `op` fail with an API error.
    pub fn fail_next(&self, op: Operation, status: u16, summary: &str) {
        self.state
            .lock()
            .failures
            .insert(op, (status, summary.to_string()));
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().calls.clone()
    }

    /// Number of calls made of kind `op`
    pub fn count(&self, op: Operation) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Log a call and apply any pending failure for it.
    fn begin(
        &self,
        op: Operation,
        path: Option<&str>,
        offset: Option<u64>,
    ) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        state.calls.push(CallRecord {
            op,
            path: path.map(str::to_string),
            offset,
            bytes: 0,
        });
        let index = state.calls.len() - 1;

        if let Some((status, summary)) = state.failures.remove(&op) {
            tracing::debug!(?op, status, "Injected transport failure");
            return Err(TransportError::Api { status, summary });
        }
        Ok(index)
    }

    async fn read_body(&self, index: usize, body: Body<'_>) -> Result<Vec<u8>, TransportError> {
        let mut content = Vec::new();
        let len = if self.retain_content {
            body.read_to_end(&mut content).await? as u64
        } else {
            tokio::io::copy(body, &mut tokio::io::sink()).await?
        };
        self.state.lock().calls[index].bytes = len;
        Ok(content)
    }

    fn page<T: Clone>(&self, items: &[T], start: usize) -> (Vec<T>, usize) {
        let start = start.min(items.len());
        let end = (start + self.page_size).min(items.len());
        (items[start..end].to_vec(), end)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn upload_session_start(&self, body: Body<'_>) -> Result<String, TransportError> {
        let index = self.begin(Operation::SessionStart, None, None)?;
        let content = self.read_body(index, body).await?;
        let len = self.state.lock().calls[index].bytes;

        let mut state = self.state.lock();
        state.next_id += 1;
        let session_id = format!("session-{}", state.next_id);
        state
            .sessions
            .insert(session_id.clone(), Session { len, content });
        Ok(session_id)
    }

    async fn upload_session_append(
        &self,
        cursor: &SessionCursor,
        body: Body<'_>,
    ) -> Result<(), TransportError> {
        let index = self.begin(Operation::SessionAppend, None, Some(cursor.offset))?;
        self.state.lock().check_cursor(cursor)?;

        let content = self.read_body(index, body).await?;
        let mut state = self.state.lock();
        let len = state.calls[index].bytes;
        let session = state.session_mut(cursor)?;
        session.len += len;
        session.content.extend_from_slice(&content);
        Ok(())
    }

    async fn upload_session_finish(
        &self,
        cursor: &SessionCursor,
        commit: &CommitInfo,
        body: Body<'_>,
    ) -> Result<Metadata, TransportError> {
        let index = self.begin(
            Operation::SessionFinish,
            Some(&commit.path),
            Some(cursor.offset),
        )?;
        self.state.lock().check_cursor(cursor)?;

        let content = self.read_body(index, body).await?;
        let mut state = self.state.lock();
        let len = state.calls[index].bytes;
        let mut session = state
            .sessions
            .remove(&cursor.session_id)
            .ok_or_else(|| endpoint_error("upload_session/lookup_failed/not_found/"))?;
        session.len += len;
        session.content.extend_from_slice(&content);

        state.commit(commit, session.len, Bytes::from(session.content))
    }

    async fn upload(&self, commit: &CommitInfo, body: Body<'_>) -> Result<Metadata, TransportError> {
        let index = self.begin(Operation::Upload, Some(&commit.path), None)?;
        let content = self.read_body(index, body).await?;
        let mut state = self.state.lock();
        let len = state.calls[index].bytes;
        state.commit(commit, len, Bytes::from(content))
    }

    async fn list_page(&self, path: &str, cursor: Option<&str>) -> Result<ListPage, TransportError> {
        self.begin(Operation::ListPage, Some(path), None)?;

        let (folder, start) = match cursor {
            Some(cursor) => parse_cursor(cursor)?,
            None => (normalize(path), 0),
        };

        let state = self.state.lock();
        if !folder.is_empty() {
            match state.entries.get(&folder) {
                Some(e) if e.metadata.kind == EntryKind::Folder => {}
                Some(_) => return Err(endpoint_error("path/not_folder/")),
                None => return Err(endpoint_error("path/not_found/")),
            }
        }

        let children: Vec<Metadata> = state
            .entries
            .iter()
            .filter(|(key, _)| parent(key) == folder && !key.is_empty())
            .map(|(_, e)| e.metadata.clone())
            .collect();

        let (entries, end) = self.page(&children, start);
        Ok(ListPage {
            entries,
            cursor: format!("{end}|{folder}"),
            has_more: end < children.len(),
        })
    }

    async fn get_metadata(&self, path: &str) -> Result<Metadata, TransportError> {
        self.begin(Operation::GetMetadata, Some(path), None)?;
        let state = self.state.lock();
        state
            .entries
            .get(&normalize(path))
            .map(|e| e.metadata.clone())
            .ok_or_else(|| endpoint_error("path/not_found/"))
    }

    async fn search(&self, path: &str, query: &str, start: u64) -> Result<SearchPage, TransportError> {
        self.begin(Operation::Search, Some(path), None)?;

        let scope = normalize(path);
        let query = query.to_lowercase();
        let state = self.state.lock();
        let matches: Vec<Metadata> = state
            .entries
            .iter()
            .filter(|(key, _)| is_descendant(key, &scope))
            .filter(|(_, e)| e.metadata.name.to_lowercase().contains(&query))
            .map(|(_, e)| e.metadata.clone())
            .collect();

        let start = usize::try_from(start).unwrap_or(usize::MAX);
        let (page, end) = self.page(&matches, start);
        Ok(SearchPage {
            matches: page,
            more: end < matches.len(),
            start: end as u64,
        })
    }

    async fn download(&self, path: &str) -> Result<DownloadBody, TransportError> {
        self.begin(Operation::Download, Some(path), None)?;
        let content = self.state.lock().file_content(path)?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn get_preview(&self, path: &str) -> Result<DownloadBody, TransportError> {
        self.begin(Operation::Preview, Some(path), None)?;
        let content = self.state.lock().file_content(path)?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn create_folder(&self, path: &str) -> Result<Metadata, TransportError> {
        self.begin(Operation::CreateFolder, Some(path), None)?;
        let mut state = self.state.lock();
        if state.entries.contains_key(&normalize(path)) {
            return Err(endpoint_error("path/conflict/folder/"));
        }
        state.ensure_parents(path);
        Ok(state.put_folder(path))
    }

    async fn delete(&self, path: &str) -> Result<Metadata, TransportError> {
        self.begin(Operation::Delete, Some(path), None)?;
        let key = normalize(path);
        let mut state = self.state.lock();
        let removed = state
            .entries
            .remove(&key)
            .ok_or_else(|| endpoint_error("path_lookup/not_found/"))?;
        state.entries.retain(|k, _| !is_descendant(k, &key));
        Ok(removed.metadata)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<Metadata, TransportError> {
        self.begin(Operation::Copy, Some(from), None)?;
        self.state.lock().relocate(from, to, false)
    }

    async fn move_entry(&self, from: &str, to: &str) -> Result<Metadata, TransportError> {
        self.begin(Operation::Move, Some(from), None)?;
        self.state.lock().relocate(from, to, true)
    }
}

impl State {
    fn check_cursor(&self, cursor: &SessionCursor) -> Result<(), TransportError> {
        let session = self
            .sessions
            .get(&cursor.session_id)
            .ok_or_else(|| endpoint_error("lookup_failed/not_found/"))?;
        if session.len != cursor.offset {
            return Err(endpoint_error(&format!(
                "lookup_failed/incorrect_offset/{}",
                session.len
            )));
        }
        Ok(())
    }

    fn session_mut(&mut self, cursor: &SessionCursor) -> Result<&mut Session, TransportError> {
        self.sessions
            .get_mut(&cursor.session_id)
            .ok_or_else(|| endpoint_error("lookup_failed/not_found/"))
    }

    fn file_content(&self, path: &str) -> Result<Bytes, TransportError> {
        match self.entries.get(&normalize(path)) {
            Some(e) if e.metadata.kind == EntryKind::File => Ok(e.content.clone()),
            Some(_) => Err(endpoint_error("path/not_file/")),
            None => Err(endpoint_error("path/not_found/")),
        }
    }

    fn commit(
        &mut self,
        commit: &CommitInfo,
        len: u64,
        content: Bytes,
    ) -> Result<Metadata, TransportError> {
        let mut target = commit.clone();
        if let Some(existing) = self.entries.get(&normalize(&commit.path)) {
            if existing.metadata.kind == EntryKind::Folder {
                return Err(endpoint_error("path/conflict/folder/"));
            }
            if commit.mode == WriteMode::Add {
                if !commit.autorename {
                    return Err(endpoint_error("path/conflict/file/"));
                }
                target.path = self.free_name(&commit.path);
            }
        }
        Ok(self.put_file(&target, len, content))
    }

    fn free_name(&self, path: &str) -> String {
        let (stem, ext) = match path.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => {
                (stem.to_string(), format!(".{ext}"))
            }
            _ => (path.to_string(), String::new()),
        };
        (1..)
            .map(|n| format!("{stem} ({n}){ext}"))
            .find(|candidate| !self.entries.contains_key(&normalize(candidate)))
            .unwrap_or_else(|| path.to_string())
    }

    fn put_file(&mut self, commit: &CommitInfo, len: u64, content: Bytes) -> Metadata {
        self.ensure_parents(&commit.path);
        self.next_id += 1;
        let now = now();
        let metadata = Metadata {
            kind: EntryKind::File,
            name: base_name(&commit.path).to_string(),
            id: Some(format!("id:{}", self.next_id)),
            path_lower: Some(normalize(&commit.path)),
            path_display: Some(display(&commit.path)),
            size: len,
            client_modified: Some(commit.client_modified.unwrap_or(now)),
            server_modified: Some(now),
            rev: Some(format!("{:012x}", self.next_id)),
            content_hash: None,
        };
        self.entries.insert(
            normalize(&commit.path),
            Entry {
                metadata: metadata.clone(),
                content,
            },
        );
        metadata
    }

    fn put_folder(&mut self, path: &str) -> Metadata {
        self.next_id += 1;
        let metadata = Metadata {
            kind: EntryKind::Folder,
            name: base_name(path).to_string(),
            id: Some(format!("id:{}", self.next_id)),
            path_lower: Some(normalize(path)),
            path_display: Some(display(path)),
            size: 0,
            client_modified: None,
            server_modified: None,
            rev: None,
            content_hash: None,
        };
        self.entries.insert(
            normalize(path),
            Entry {
                metadata: metadata.clone(),
                content: Bytes::new(),
            },
        );
        metadata
    }

    fn ensure_parents(&mut self, path: &str) {
        let display = display(path);
        let mut ancestor = String::new();
        let components: Vec<&str> = display.split('/').filter(|c| !c.is_empty()).collect();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            ancestor.push('/');
            ancestor.push_str(component);
            if !self.entries.contains_key(&normalize(&ancestor)) {
                self.put_folder(&ancestor);
            }
        }
    }

    fn relocate(&mut self, from: &str, to: &str, remove: bool) -> Result<Metadata, TransportError> {
        let src = normalize(from);
        let dst = normalize(to);
        if !self.entries.contains_key(&src) {
            return Err(endpoint_error("from_lookup/not_found/"));
        }
        if self.entries.contains_key(&dst) {
            return Err(endpoint_error("to/conflict/"));
        }
        if is_descendant(&dst, &src) {
            return Err(endpoint_error("duplicated_or_nested_paths/"));
        }

        let moved: Vec<(String, Entry)> = self
            .entries
            .iter()
            .filter(|(k, _)| **k == src || is_descendant(k, &src))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        if remove {
            for (key, _) in &moved {
                self.entries.remove(key);
            }
        }

        self.ensure_parents(to);
        let to_display = display(to);
        let mut root = None;
        for (key, mut entry) in moved {
            let suffix = &key[src.len()..];
            let display_suffix = entry
                .metadata
                .path_display
                .as_deref()
                .and_then(|p| p.get(p.len().saturating_sub(suffix.len())..))
                .unwrap_or(suffix)
                .to_string();
            let new_display = format!("{to_display}{display_suffix}");

            self.next_id += 1;
            entry.metadata.name = base_name(&new_display).to_string();
            entry.metadata.path_lower = Some(normalize(&new_display));
            entry.metadata.path_display = Some(new_display.clone());
            if !remove {
                entry.metadata.id = Some(format!("id:{}", self.next_id));
            }
            if key == src {
                root = Some(entry.metadata.clone());
            }
            self.entries.insert(normalize(&new_display), entry);
        }

        root.ok_or_else(|| endpoint_error("from_lookup/not_found/"))
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn normalize(path: &str) -> String {
    display(path).to_lowercase()
}

fn display(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent(key: &str) -> &str {
    key.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit_once('/').map(|(_, n)| n).unwrap_or(trimmed)
}

fn is_descendant(key: &str, ancestor: &str) -> bool {
    key.len() > ancestor.len()
        && key.starts_with(ancestor)
        && key.as_bytes()[ancestor.len()] == b'/'
}

fn parse_cursor(cursor: &str) -> Result<(String, usize), TransportError> {
    cursor
        .split_once('|')
        .and_then(|(offset, folder)| Some((folder.to_string(), offset.parse().ok()?)))
        .ok_or_else(|| endpoint_error("reset/"))
}

/// Endpoint-specific errors are reported with HTTP 409.
fn endpoint_error(summary: &str) -> TransportError {
    TransportError::Api {
        status: 409,
        summary: summary.to_string(),
    }
}
