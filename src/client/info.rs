//! Normalized file metadata

use crate::transport::{EntryKind, Metadata};
use chrono::{DateTime, Utc};
use std::fmt;

/// Immutable view of a remote file or folder
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    name: String,
    path: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
    is_dir: bool,
    id: Option<String>,
    rev: Option<String>,
    content_hash: Option<String>,
}

impl FileInfo {
    /// Base name of the entry
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display path, falling back to the name when the API omits it
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Size in bytes; always zero for folders
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Client-side modification time if set, otherwise the server's
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn rev(&self) -> Option<&str> {
        self.rev.as_deref()
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }
}

impl From<Metadata> for FileInfo {
    fn from(meta: Metadata) -> Self {
        let path = meta.path_display.unwrap_or_else(|| meta.name.clone());
        Self {
            is_dir: meta.kind == EntryKind::Folder,
            modified: meta.client_modified.or(meta.server_modified),
            name: meta.name,
            path,
            size: meta.size,
            id: meta.id,
            rev: meta.rev,
            content_hash: meta.content_hash,
        }
    }
}

impl fmt::Display for FileInfo {
    /// `ls -l` style line: kind, size, modification time, path
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_dir { 'd' } else { '-' };
        let modified = self
            .modified
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".repeat(16));
        write!(f, "{kind} {:>12} {modified} {}", self.size, self.path)
    }
}
