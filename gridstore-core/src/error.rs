use thiserror::Error;

pub type Result<T> = std::result::Result<T, GridError>;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("invalid chunk size: {0} (must be between 1 and 14999999 bytes)")]
    InvalidChunkSize(u64),

    #[error("content hash computation failed: {0}")]
    HashComputation(String),

    /// `start` is negative, or `end` does not lie past `start`.
    #[error("negative byte range requested: start={start} end={end:?}")]
    NegativeByteRange { start: i64, end: Option<i64> },

    #[error("excessive range requested: {0}")]
    ExcessiveRangeRequested(String),

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("chunk {n} of file {files_id} not found")]
    ChunkNotFound { files_id: String, n: i64 },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("index conflict: {0}")]
    IndexConflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
