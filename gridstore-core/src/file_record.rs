use crate::chunk::ChunkCursor;
use crate::document::{Document, ObjectId, Value};
use crate::error::Result;
use crate::operations::{ReadByteRange, ReadRangeOperation, ReadRangeOperationRequest};
use crate::storage::{Collection, DocumentCursor, Filter, FindOptions, SortOrder};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Metadata describing one stored file, decoded from the files collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: ObjectId,
    pub length: i64,
    pub chunk_size: i32,
    pub upload_date: DateTime<Utc>,
    pub md5: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub aliases: Option<Vec<String>>,
    pub metadata: Option<Value>,
}

impl FileRecord {
    /// Decode a files collection document. Returns `None` when any of `_id`,
    /// `length`, `chunkSize`, `uploadDate` or `md5` cannot be decoded, when
    /// `length` is negative, or when `chunkSize` is not positive.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let id = doc.get_object_id("_id")?;
        let length = doc.get_i64("length").filter(|length| *length >= 0)?;
        let chunk_size = i32::try_from(doc.get_i64("chunkSize")?)
            .ok()
            .filter(|size| *size > 0)?;
        let upload_date = doc.get_datetime("uploadDate")?;
        let md5 = doc.get_str("md5")?.to_string();

        let aliases = doc.get_array("aliases").map(|values| {
            values
                .iter()
                .filter_map(|value| match value {
                    Value::String(alias) => Some(alias.clone()),
                    _ => None,
                })
                .collect()
        });

        Some(Self {
            id,
            length,
            chunk_size,
            upload_date,
            md5,
            filename: doc.get_str("filename").map(str::to_string),
            content_type: doc.get_str("contentType").map(str::to_string),
            aliases,
            metadata: doc.get("metadata").cloned(),
        })
    }

    /// Document layout persisted in the files collection. Absent optional
    /// fields are omitted rather than stored as null.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new()
            .with("_id", self.id)
            .with("length", self.length)
            .with("chunkSize", self.chunk_size)
            .with("uploadDate", self.upload_date)
            .with("md5", self.md5.as_str());

        if let Some(filename) = &self.filename {
            doc.insert("filename", filename.as_str());
        }
        if let Some(content_type) = &self.content_type {
            doc.insert("contentType", content_type.as_str());
        }
        if let Some(aliases) = &self.aliases {
            let values: Vec<Value> = aliases.iter().map(|a| Value::from(a.as_str())).collect();
            doc.insert("aliases", values);
        }
        if let Some(metadata) = &self.metadata {
            doc.insert("metadata", metadata.clone());
        }
        doc
    }

    /// Number of chunks the file is split into.
    pub fn chunk_count(&self) -> i64 {
        if self.chunk_size <= 0 {
            return 0;
        }
        let chunk_size = i64::from(self.chunk_size);
        (self.length + chunk_size - 1) / chunk_size
    }
}

/// A stored file together with the chunks collection holding its bytes.
#[derive(Clone)]
pub struct GridFile {
    record: FileRecord,
    chunks: Arc<dyn Collection>,
}

impl GridFile {
    pub(crate) fn new(record: FileRecord, chunks: Arc<dyn Collection>) -> Self {
        Self { record, chunks }
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn into_record(self) -> FileRecord {
        self.record
    }

    pub fn id(&self) -> ObjectId {
        self.record.id
    }

    pub fn length(&self) -> i64 {
        self.record.length
    }

    /// Read the bytes in `range`, fetching only the chunks it covers.
    pub async fn read(&self, range: ReadByteRange) -> Result<Bytes> {
        ReadRangeOperation::new(self.chunks.clone())
            .run(ReadRangeOperationRequest {
                file: self.record.clone(),
                range,
            })
            .await
    }

    pub async fn read_to_end(&self) -> Result<Bytes> {
        self.read(ReadByteRange::full()).await
    }

    /// All chunks of this file in ascending `n` order.
    pub async fn chunked(&self) -> Result<ChunkCursor> {
        let cursor = self
            .chunks
            .find(
                Filter::eq("files_id", self.record.id),
                FindOptions::new().sort("n", SortOrder::Ascending),
            )
            .await?;
        Ok(ChunkCursor::new(cursor))
    }
}

impl std::ops::Deref for GridFile {
    type Target = FileRecord;

    fn deref(&self) -> &FileRecord {
        &self.record
    }
}

impl std::fmt::Debug for GridFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridFile")
            .field("record", &self.record)
            .field("chunks", &self.chunks.name())
            .finish()
    }
}

/// Lazy sequence of files matching a find. Documents that do not decode as
/// a [`FileRecord`] are skipped.
pub struct FileCursor {
    inner: Box<dyn DocumentCursor>,
    chunks: Arc<dyn Collection>,
}

impl FileCursor {
    pub(crate) fn new(inner: Box<dyn DocumentCursor>, chunks: Arc<dyn Collection>) -> Self {
        Self { inner, chunks }
    }

    pub async fn next(&mut self) -> Result<Option<GridFile>> {
        while let Some(doc) = self.inner.next().await? {
            match FileRecord::from_document(&doc) {
                Some(record) => return Ok(Some(GridFile::new(record, self.chunks.clone()))),
                None => {
                    tracing::debug!("Skipping undecodable file document {:?}", doc.get("_id"));
                }
            }
        }
        Ok(None)
    }

    pub async fn collect(mut self) -> Result<Vec<GridFile>> {
        let mut files = Vec::new();
        while let Some(file) = self.next().await? {
            files.push(file);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        FileRecord {
            id: ObjectId::new(),
            length: 600_000,
            chunk_size: 255_000,
            upload_date: Utc::now(),
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            filename: Some("video.mp4".to_string()),
            content_type: None,
            aliases: None,
            metadata: None,
        }
    }

    #[test]
    fn test_document_omits_absent_fields() {
        let doc = record().to_document();
        assert!(doc.contains_key("filename"));
        assert!(!doc.contains_key("contentType"));
        assert!(!doc.contains_key("aliases"));
        assert!(!doc.contains_key("metadata"));
        assert!(matches!(doc.get("chunkSize"), Some(Value::Int32(255_000))));
    }

    #[test]
    fn test_document_round_trip() {
        let mut original = record();
        original.aliases = Some(vec!["clip".to_string()]);
        original.metadata = Some(Document::new().with("owner", "ops").into());

        let decoded = FileRecord::from_document(&original.to_document()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.chunk_count(), 3);
    }

    #[test]
    fn test_aliases_keep_only_strings() {
        let doc = record().to_document().with(
            "aliases",
            vec![Value::from("a"), Value::Int32(1), Value::from("b"), Value::Null],
        );
        let decoded = FileRecord::from_document(&doc).unwrap();
        assert_eq!(decoded.aliases, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_missing_required_field_fails() {
        for field in ["_id", "length", "chunkSize", "uploadDate", "md5"] {
            let doc = record().to_document().with(field, Value::Null);
            assert!(FileRecord::from_document(&doc).is_none(), "field {}", field);
        }
    }

    #[test]
    fn test_negative_sizes_fail_to_decode() {
        let negative_length = record().to_document().with("length", -1i64);
        assert!(FileRecord::from_document(&negative_length).is_none());

        for chunk_size in [0, -4] {
            let doc = record().to_document().with("chunkSize", chunk_size);
            assert!(FileRecord::from_document(&doc).is_none(), "chunkSize {}", chunk_size);
        }

        let empty = record().to_document().with("length", 0i64);
        assert_eq!(FileRecord::from_document(&empty).unwrap().length, 0);
    }
}
