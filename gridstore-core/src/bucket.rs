use crate::chunk::ChunkCursor;
use crate::document::ObjectId;
use crate::error::{GridError, Result};
use crate::file_record::{FileCursor, GridFile};
use crate::hash::ContentHasher;
use crate::operations::upload_file::validate_chunk_size;
use crate::operations::{DEFAULT_CHUNK_SIZE, UploadFileOperation, UploadRequest};
use crate::storage::{Collection, DocumentStore, Filter, FindOptions, IndexModel, SortOrder};
use bytes::Bytes;
use std::sync::Arc;

pub const DEFAULT_BUCKET_NAME: &str = "fs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketOptions {
    pub bucket_name: String,
    pub chunk_size_bytes: u64,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            bucket_name: DEFAULT_BUCKET_NAME.to_string(),
            chunk_size_bytes: u64::from(DEFAULT_CHUNK_SIZE),
        }
    }
}

impl BucketOptions {
    pub fn bucket_name(mut self, bucket_name: impl Into<String>) -> Self {
        self.bucket_name = bucket_name.into();
        self
    }

    pub fn chunk_size_bytes(mut self, chunk_size_bytes: u64) -> Self {
        self.chunk_size_bytes = chunk_size_bytes;
        self
    }

    pub fn files_collection(&self) -> String {
        format!("{}.files", self.bucket_name)
    }

    pub fn chunks_collection(&self) -> String {
        format!("{}.chunks", self.bucket_name)
    }
}

/// Chunked file storage over a `{name}.files` / `{name}.chunks` collection pair.
#[derive(Clone)]
pub struct Bucket {
    options: BucketOptions,
    files: Arc<dyn Collection>,
    chunks: Arc<dyn Collection>,
}

impl Bucket {
    /// Open the bucket and make sure its indexes exist.
    pub async fn new(store: &dyn DocumentStore, options: BucketOptions) -> Result<Self> {
        validate_chunk_size(options.chunk_size_bytes)?;

        let files = store.collection(&options.files_collection());
        let chunks = store.collection(&options.chunks_collection());

        chunks
            .create_index(
                IndexModel::new(
                    "files_id_1_n_1",
                    vec![("files_id", SortOrder::Ascending), ("n", SortOrder::Ascending)],
                )
                .unique(true)
                .background(true),
            )
            .await?;

        files
            .create_index(IndexModel::new(
                "uploadDate_1_filename_1",
                vec![
                    ("uploadDate", SortOrder::Ascending),
                    ("filename", SortOrder::Ascending),
                ],
            ))
            .await?;

        tracing::info!(
            "Opened bucket {} (collections {} / {})",
            options.bucket_name,
            files.name(),
            chunks.name()
        );

        Ok(Self {
            options,
            files,
            chunks,
        })
    }

    pub async fn with_defaults(store: &dyn DocumentStore) -> Result<Self> {
        Self::new(store, BucketOptions::default()).await
    }

    pub fn options(&self) -> &BucketOptions {
        &self.options
    }

    pub fn files(&self) -> &Arc<dyn Collection> {
        &self.files
    }

    pub fn chunks(&self) -> &Arc<dyn Collection> {
        &self.chunks
    }

    /// Delete both backing collections. A failure on the second leaves the
    /// first dropped.
    pub async fn drop(&self) -> Result<()> {
        self.files.drop_collection().await?;
        self.chunks.drop_collection().await?;
        tracing::info!("Dropped bucket {}", self.options.bucket_name);
        Ok(())
    }

    pub async fn find_one(&self, id: ObjectId) -> Result<Option<GridFile>> {
        let mut cursor = self
            .find_with(Filter::eq("_id", id), FindOptions::new().limit(1))
            .await?;
        cursor.next().await
    }

    /// Files matching `filter`; `None` yields every file.
    pub async fn find(&self, filter: Option<Filter>) -> Result<FileCursor> {
        self.find_with(filter.unwrap_or_default(), FindOptions::new())
            .await
    }

    pub async fn find_with(&self, filter: Filter, options: FindOptions) -> Result<FileCursor> {
        let cursor = self.files.find(filter, options).await?;
        Ok(FileCursor::new(cursor, self.chunks.clone()))
    }

    /// Newest file stored under `filename`.
    pub async fn find_one_by_name(&self, filename: &str) -> Result<Option<GridFile>> {
        let mut cursor = self
            .find_with(
                Filter::eq("filename", filename),
                FindOptions::new()
                    .sort("uploadDate", SortOrder::Descending)
                    .sort("_id", SortOrder::Descending)
                    .limit(1),
            )
            .await?;
        cursor.next().await
    }

    /// Delete the file document and every chunk belonging to it.
    pub async fn remove(&self, id: ObjectId) -> Result<()> {
        let files_removed = self.files.delete_many(Filter::eq("_id", id)).await?;
        let chunks_removed = self.chunks.delete_many(Filter::eq("files_id", id)).await?;
        tracing::info!(
            "Removed file {} ({} file documents, {} chunks)",
            id,
            files_removed,
            chunks_removed
        );
        Ok(())
    }

    /// Store `request.data` as a new file and return its id.
    pub async fn store(&self, request: UploadRequest) -> Result<ObjectId> {
        let result = UploadFileOperation::new(
            self.files.clone(),
            self.chunks.clone(),
            self.options.chunk_size_bytes,
        )
        .run(request)
        .await?;
        Ok(result.file.id)
    }

    pub async fn store_bytes(&self, data: impl Into<Bytes>, filename: &str) -> Result<ObjectId> {
        self.store(UploadRequest::new(data).filename(filename)).await
    }

    /// Recompute the digest over the stored chunks and compare it with the
    /// recorded `md5`.
    pub async fn verify(&self, file: &GridFile) -> Result<()> {
        let mut chunks: ChunkCursor = file.chunked().await?;
        let mut hasher = ContentHasher::new();
        let mut consumed = 0u64;
        while let Some(chunk) = chunks.next().await? {
            hasher.update(&chunk.data)?;
            consumed += chunk.data.len() as u64;
        }

        let actual = hasher.finalize(consumed)?;
        if actual != file.md5 || consumed != file.length as u64 {
            return Err(GridError::HashMismatch {
                expected: file.md5.clone(),
                actual,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("options", &self.options)
            .field("files", &self.files.name())
            .field("chunks", &self.chunks.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_collection_names_follow_bucket_name() {
        let store = MemoryStore::new();
        let bucket = Bucket::new(&store, BucketOptions::default().bucket_name("media"))
            .await
            .unwrap();
        assert_eq!(bucket.files().name(), "media.files");
        assert_eq!(bucket.chunks().name(), "media.chunks");
        assert_eq!(
            store.collection_names().await,
            vec!["media.chunks".to_string(), "media.files".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_default_chunk_size() {
        let store = MemoryStore::new();
        let err = Bucket::new(&store, BucketOptions::default().chunk_size_bytes(15_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::InvalidChunkSize(15_000_000)));
    }

    #[tokio::test]
    async fn test_find_one_by_name_returns_newest() {
        let store = MemoryStore::new();
        let bucket = Bucket::with_defaults(&store).await.unwrap();
        bucket.store_bytes(&b"v1"[..], "notes.txt").await.unwrap();
        let newest = bucket.store_bytes(&b"v2"[..], "notes.txt").await.unwrap();

        let file = bucket.find_one_by_name("notes.txt").await.unwrap().unwrap();
        assert_eq!(file.id(), newest);
        assert_eq!(file.read_to_end().await.unwrap().as_ref(), b"v2");
        assert!(bucket.find_one_by_name("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let store = MemoryStore::new();
        let bucket = Bucket::with_defaults(&store).await.unwrap();
        let id = bucket
            .store(UploadRequest::new(vec![9u8; 10]).chunk_size(4))
            .await
            .unwrap();
        let file = bucket.find_one(id).await.unwrap().unwrap();
        bucket.verify(&file).await.unwrap();

        bucket
            .chunks()
            .delete_many(Filter::eq("files_id", id).and_eq("n", 2))
            .await
            .unwrap();
        let err = bucket.verify(&file).await.unwrap_err();
        assert!(matches!(err, GridError::HashMismatch { .. }));
    }
}
