//! Dropstream Library
//!
//! Filesystem-style client for a Dropbox-like HTTP file-storage API with
//! resumable, chunked upload sessions.
//!
//! # Features
//!
//! - **Chunked Sessions**: Streams of any length, one bounded chunk at a time
//! - **Automatic Strategy**: Small payloads of known size go in one request
//! - **Lazy Search**: Paged search results exposed as a `Stream`
//! - **Streaming Writer**: `AsyncWrite` handle that commits on finish
//! - **Pluggable Transport**: HTTP for production, in-memory for tests
//!
//! # Example
//!
//! ```no_run
//! use dropstream::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("dropstream.yaml")?;
//!     let client = Client::from_config(&config)?;
//!
//!     let info = client.upload_file("backup.tar", "/backups/backup.tar").await?;
//!     println!("{info}");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod metrics;
pub mod transport;
pub mod upload;

// Re-export commonly used types
pub use client::{Client, ClientError, FileInfo, RemoteWriter};
pub use config::Config;
pub use transport::{Transport, TransportError};
pub use upload::{UploadError, UploadPlan};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
