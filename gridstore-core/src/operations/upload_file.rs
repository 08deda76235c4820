use crate::chunk::Chunk;
use crate::document::{ObjectId, Value};
use crate::error::{GridError, Result};
use crate::file_record::FileRecord;
use crate::hash::ContentHasher;
use crate::storage::{Collection, Filter};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;

/// Chunk sizes at or above this are rejected before any write.
pub const MAX_CHUNK_SIZE: u64 = 15_000_000;
pub const DEFAULT_CHUNK_SIZE: u32 = 255_000;

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub data: Bytes,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// Opaque value stored as the file's `metadata` field.
    pub metadata: Option<Value>,
    pub aliases: Vec<String>,
    pub chunk_size: Option<u64>,
}

impl UploadRequest {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn metadata(mut self, metadata: impl Into<Value>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

#[derive(Debug, Clone)]
pub struct UploadFileOperationResult {
    pub file: FileRecord,
    pub chunks_written: u32,
}

#[derive(Clone)]
pub struct UploadFileOperation {
    files: Arc<dyn Collection>,
    chunks: Arc<dyn Collection>,
    default_chunk_size: u64,
}

pub(crate) fn validate_chunk_size(chunk_size: u64) -> Result<i32> {
    if chunk_size == 0 || chunk_size >= MAX_CHUNK_SIZE {
        return Err(GridError::InvalidChunkSize(chunk_size));
    }
    i32::try_from(chunk_size).map_err(|_| GridError::InvalidChunkSize(chunk_size))
}

impl UploadFileOperation {
    pub fn new(
        files: Arc<dyn Collection>,
        chunks: Arc<dyn Collection>,
        default_chunk_size: u64,
    ) -> Self {
        Self {
            files,
            chunks,
            default_chunk_size,
        }
    }

    /// Split `request.data` into chunks, write them in order while hashing,
    /// then write the file document. On failure every chunk already written
    /// for the new id is deleted and the original error is returned.
    pub async fn run(&self, request: UploadRequest) -> Result<UploadFileOperationResult> {
        let chunk_size =
            validate_chunk_size(request.chunk_size.unwrap_or(self.default_chunk_size))?;
        let id = ObjectId::new();

        match self.write_file(id, chunk_size, request).await {
            Ok(result) => {
                tracing::info!(
                    "Stored file {} ({} bytes, {} chunks)",
                    id,
                    result.file.length,
                    result.chunks_written
                );
                Ok(result)
            }
            Err(error) => {
                tracing::warn!(
                    "Upload of file {} failed, removing partial chunks: {}",
                    id,
                    error
                );
                if let Err(cleanup_error) = self.chunks.delete_many(Filter::eq("files_id", id)).await
                {
                    tracing::error!(
                        "Failed to remove partial chunks of file {}: {}",
                        id,
                        cleanup_error
                    );
                }
                Err(error)
            }
        }
    }

    async fn write_file(
        &self,
        id: ObjectId,
        chunk_size: i32,
        request: UploadRequest,
    ) -> Result<UploadFileOperationResult> {
        let UploadRequest {
            data,
            filename,
            content_type,
            metadata,
            aliases,
            ..
        } = request;

        let mut hasher = ContentHasher::new();
        let mut n: i32 = 0;
        let mut offset = 0usize;
        let window = chunk_size as usize;

        while offset < data.len() {
            let end = (offset + window).min(data.len());
            let slice = data.slice(offset..end);

            hasher.update(&slice)?;
            self.chunks
                .insert_one(Chunk::new_document(id, n, slice))
                .await?;
            tracing::debug!("Stored chunk {} of file {} ({} bytes)", n, id, end - offset);

            offset = end;
            n = n.checked_add(1).ok_or_else(|| {
                GridError::InternalInconsistency(format!("chunk index overflow for file {}", id))
            })?;
        }

        let md5 = hasher.finalize(data.len() as u64)?;

        let record = FileRecord {
            id,
            length: data.len() as i64,
            chunk_size,
            upload_date: Utc::now(),
            md5,
            filename,
            content_type,
            aliases: if aliases.is_empty() {
                None
            } else {
                Some(aliases)
            },
            metadata,
        };

        self.files.insert_one(record.to_document()).await?;

        Ok(UploadFileOperationResult {
            file: record,
            chunks_written: n as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocumentStore, FindOptions, MemoryStore, SortOrder};

    fn operation(store: &MemoryStore) -> UploadFileOperation {
        UploadFileOperation::new(
            store.collection("fs.files"),
            store.collection("fs.chunks"),
            u64::from(DEFAULT_CHUNK_SIZE),
        )
    }

    #[tokio::test]
    async fn test_chunk_shape() {
        let store = MemoryStore::new();
        let data: Vec<u8> = (0..10u8).collect();

        let result = operation(&store)
            .run(UploadRequest::new(data).chunk_size(4))
            .await
            .unwrap();
        assert_eq!(result.chunks_written, 3);
        assert_eq!(result.file.length, 10);

        let mut cursor = store
            .collection("fs.chunks")
            .find(
                Filter::eq("files_id", result.file.id),
                FindOptions::new().sort("n", SortOrder::Ascending),
            )
            .await
            .unwrap();
        let mut lengths = Vec::new();
        while let Some(doc) = cursor.next().await.unwrap() {
            let chunk = Chunk::from_document(&doc).unwrap();
            assert_eq!(chunk.n, lengths.len() as i64);
            lengths.push(chunk.data.len());
        }
        assert_eq!(lengths, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_empty_payload_writes_no_chunks() {
        let store = MemoryStore::new();
        let result = operation(&store)
            .run(UploadRequest::new(Bytes::new()))
            .await
            .unwrap();
        assert_eq!(result.chunks_written, 0);
        assert_eq!(result.file.md5, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_metadata_stored_as_given() {
        let store = MemoryStore::new();
        let tags = Value::Array(vec![Value::from("raw"), Value::Int32(2)]);
        let result = operation(&store)
            .run(UploadRequest::new(vec![7u8; 3]).metadata(tags.clone()))
            .await
            .unwrap();

        let mut cursor = store
            .collection("fs.files")
            .find(Filter::eq("_id", result.file.id), FindOptions::new())
            .await
            .unwrap();
        let doc = cursor.next().await.unwrap().unwrap();
        assert_eq!(doc.get("metadata"), Some(&tags));
        assert_eq!(result.file.metadata, Some(tags));
    }

    #[tokio::test]
    async fn test_rejects_invalid_chunk_size() {
        let store = MemoryStore::new();
        for size in [0, MAX_CHUNK_SIZE, MAX_CHUNK_SIZE + 1] {
            let err = operation(&store)
                .run(UploadRequest::new(vec![1u8; 8]).chunk_size(size))
                .await
                .unwrap_err();
            assert!(matches!(err, GridError::InvalidChunkSize(_)));
        }
        assert!(store.collection_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_file_write_failure_cleans_chunks() {
        let store = MemoryStore::new();
        let files = store.collection("fs.files");
        let op = operation(&store);

        let first = op
            .run(UploadRequest::new(vec![1u8; 8]).chunk_size(4))
            .await
            .unwrap();

        // Identical payload + unique md5 index: the second file insert fails.
        files
            .create_index(
                crate::storage::IndexModel::new("md5_1", vec![("md5", SortOrder::Ascending)])
                    .unique(true),
            )
            .await
            .unwrap();

        let err = op
            .run(UploadRequest::new(vec![1u8; 8]).chunk_size(4))
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::DuplicateKey(_)));

        let mut cursor = store
            .collection("fs.chunks")
            .find(Filter::all(), FindOptions::new())
            .await
            .unwrap();
        let mut owners = Vec::new();
        while let Some(doc) = cursor.next().await.unwrap() {
            owners.push(doc.get_object_id("files_id").unwrap());
        }
        assert_eq!(owners, vec![first.file.id, first.file.id]);
    }
}
