use std::path::PathBuf;

/// Errors from tier storage operations.
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A record could not be decoded.
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// CRC integrity check failed for a framed record.
    #[error("CRC mismatch for {key}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        key: String,
        expected: u32,
        actual: u32,
    },

    /// Ghost record decoded but its recovery signature does not match.
    #[error("ghost record {0} failed recovery signature check")]
    RecoverySignature(String),

    /// Record key contains characters outside `[A-Za-z0-9_-]`.
    #[error("invalid record key: {0:?}")]
    InvalidKey(String),

    /// Storage root could not be used.
    #[error("storage location unavailable: {0}")]
    Unavailable(PathBuf),

    /// Backend is read-only or otherwise refusing writes.
    #[error("backend is read-only")]
    ReadOnly,

    /// A tier lock was poisoned by a panicking writer.
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

/// Result alias for tier operations.
pub type TierResult<T> = Result<T, TierError>;
