//! Gridstore Core - chunked binary object storage over document collections
//!
//! Files are split into fixed-size chunks stored in a `{bucket}.chunks`
//! collection, with one metadata document per file in `{bucket}.files`:
//! - MD5 content digest computed while chunks are written
//! - partial chunks removed when an upload fails
//! - range reads that fetch only the chunks covering the requested bytes
//! - in-memory and SQLite document stores

pub mod bucket;
pub mod chunk;
pub mod config;
pub mod document;
pub mod error;
pub mod file_record;
pub mod hash;
pub mod operations;
pub mod storage;

pub use bucket::{Bucket, BucketOptions, DEFAULT_BUCKET_NAME};
pub use chunk::{Chunk, ChunkCursor};
pub use config::{GridConfig, StoreBackend, StoreConfig};
pub use document::{Document, ObjectId, Value};
pub use error::{GridError, Result};
pub use file_record::{FileCursor, FileRecord, GridFile};
pub use hash::{ContentHasher, compute_md5};
pub use operations::{
    DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, RangePlan, ReadByteRange, UploadRequest,
};
pub use storage::{
    Collection, DocumentCursor, DocumentStore, Filter, FindOptions, IndexModel, MemoryStore,
    SortOrder, SqliteStore,
};
