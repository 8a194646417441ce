//! Upload strategy selection
//!
//! Pure decision logic: resolves the chunk size against the protocol limits
//! and picks between a single request and an upload session. Nothing here
//! touches the network.

use super::UploadError;

/// Chunk size used when the caller does not ask for one (125MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 125_000_000;

/// Largest payload the remote API accepts in one request (150MB)
pub const MAX_REQUEST_SIZE: u64 = 150_000_000;

/// Protocol limits injected into the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub default_chunk_size: u64,
    pub max_request_size: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            max_request_size: MAX_REQUEST_SIZE,
        }
    }
}

/// How a payload will be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// One upload request carrying the whole payload
    SingleShot,
    /// start / append / finish session
    Session,
}

impl UploadMode {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMode::SingleShot => "single_shot",
            UploadMode::Session => "session",
        }
    }
}

/// Outcome of strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub mode: UploadMode,
    pub chunk_size: u64,
}

/// Resolve the effective chunk size.
///
/// Zero or unset falls back to `limits.default_chunk_size`; anything above
/// `limits.max_request_size` is capped to it. A result of zero means the
/// limits themselves are unusable.
pub fn resolve_chunk_size(requested: Option<u64>, limits: &UploadLimits) -> Result<u64, UploadError> {
    let chunk_size = match requested {
        Some(size) if size > 0 => size,
        _ => limits.default_chunk_size,
    }
    .min(limits.max_request_size);

    if chunk_size == 0 {
        return Err(UploadError::Configuration(format!(
            "chunk size resolves to zero (default {}, max {})",
            limits.default_chunk_size, limits.max_request_size
        )));
    }

    Ok(chunk_size)
}

/// Choose between a single-shot upload and a session.
///
/// Single-shot is used only when `size` is known and is strictly below both
/// the per-request maximum and the resolved chunk size. An unknown size
/// (`None` or `Some(0)`) always selects the session protocol.
pub fn select(
    size: Option<u64>,
    requested_chunk_size: Option<u64>,
    limits: &UploadLimits,
) -> Result<Strategy, UploadError> {
    let chunk_size = resolve_chunk_size(requested_chunk_size, limits)?;

    let mode = match size {
        Some(size) if size > 0 && size < limits.max_request_size && size < chunk_size => {
            UploadMode::SingleShot
        }
        _ => UploadMode::Session,
    };

    Ok(Strategy { mode, chunk_size })
}
