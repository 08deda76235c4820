use crate::document::{Document, ObjectId, Value};
use crate::error::Result;
use crate::storage::DocumentCursor;
use bytes::Bytes;

/// One slice of a stored file's bytes, addressed by `(files_id, n)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: Value,
    pub files_id: ObjectId,
    pub n: i64,
    pub data: Bytes,
}

impl Chunk {
    /// Decode a chunks collection document. Returns `None` when `_id`,
    /// `files_id` or `data` is missing or has the wrong type.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let id = doc.get("_id")?.clone();
        let files_id = doc.get_object_id("files_id")?;
        let data = doc.get_binary("data")?.clone();
        let n = doc.get_i64("n").unwrap_or(0);

        Some(Self {
            id,
            files_id,
            n,
            data,
        })
    }

    /// Document written for chunk `n` of `files_id`; the store assigns `_id`.
    pub(crate) fn new_document(files_id: ObjectId, n: i32, data: Bytes) -> Document {
        Document::new()
            .with("files_id", files_id)
            .with("n", n)
            .with("data", data)
    }
}

/// Lazy sequence of a file's chunks in ascending `n` order.
pub struct ChunkCursor {
    inner: Box<dyn DocumentCursor>,
}

impl ChunkCursor {
    pub(crate) fn new(inner: Box<dyn DocumentCursor>) -> Self {
        Self { inner }
    }

    /// Next decodable chunk. Undecodable documents are skipped.
    pub async fn next(&mut self) -> Result<Option<Chunk>> {
        while let Some(doc) = self.inner.next().await? {
            match Chunk::from_document(&doc) {
                Some(chunk) => return Ok(Some(chunk)),
                None => {
                    tracing::debug!("Skipping undecodable chunk document {:?}", doc.get("_id"));
                }
            }
        }
        Ok(None)
    }

    pub async fn collect(mut self) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}
