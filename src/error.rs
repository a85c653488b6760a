use std::path::PathBuf;

use thiserror::Error;

/// Unified error taxonomy for the whole crate (spec.md §7).
///
/// Transport errors are classified into retryable/fatal at the primitive
/// boundary (see `transport::classify`); only the terminal decision ends up
/// here.
#[derive(Debug, Error)]
pub enum NetChunkError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("file access error on {path}: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("ftp error on server {server_id}: {message}")]
    Ftp {
        server_id: String,
        message: String,
        /// Whether `transport::classify` should retry this primitive, decided
        /// at the point the underlying `suppaftp::FtpError` was observed
        /// (reply status code, or connection-level vs. protocol-level error;
        /// spec.md §4.2/§7).
        retryable: bool,
    },

    #[error("config parse error: {0}")]
    ConfigParse(String),

    #[error("config validation error in [{section}] {key}: {reason}")]
    ConfigValidation {
        section: String,
        key: String,
        reason: String,
    },

    #[error("chunk integrity error: chunk {chunk_id} expected hash {expected}, got {actual}")]
    ChunkIntegrity {
        chunk_id: String,
        expected: String,
        actual: String,
    },

    #[error("manifest corrupt: {0}")]
    ManifestCorrupt(String),

    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("insufficient servers: needed {needed}, found {found}")]
    InsufficientServers { needed: usize, found: usize },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, NetChunkError>;
