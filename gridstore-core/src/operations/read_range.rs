use crate::chunk::{Chunk, ChunkCursor};
use crate::error::{GridError, Result};
use crate::file_record::FileRecord;
use crate::storage::{Collection, Filter, FindOptions, SortOrder};
use bytes::Bytes;
use std::sync::Arc;

/// Requested byte window `[start, end)`; `end = None` reads to the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadByteRange {
    pub start: i64,
    pub end: Option<i64>,
}

impl ReadByteRange {
    pub fn new(start: i64, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn full() -> Self {
        Self::default()
    }

    pub fn starting_at(start: i64) -> Self {
        Self { start, end: None }
    }
}

/// Chunk window and boundary offsets for one range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    pub chunk_size: i64,
    /// Offset of the first requested byte inside the first chunk.
    pub remainder: i64,
    /// First chunk index to fetch.
    pub skip_chunks: i64,
    /// Exclusive upper bound of chunk indexes to fetch.
    pub end_chunk: i64,
    pub bytes_requested: i64,
    pub last_byte: i64,
}

impl RangePlan {
    pub fn new(length: i64, chunk_size: i64, range: ReadByteRange) -> Result<Self> {
        let ReadByteRange { start, end } = range;

        if start < 0 {
            return Err(GridError::NegativeByteRange { start, end });
        }
        if let Some(end) = end {
            if start >= end {
                return Err(GridError::NegativeByteRange {
                    start,
                    end: Some(end),
                });
            }
            if end > length {
                return Err(GridError::ExcessiveRangeRequested(format!(
                    "end {} exceeds file length {}",
                    end, length
                )));
            }
        } else if start > length {
            return Err(GridError::ExcessiveRangeRequested(format!(
                "start {} exceeds file length {}",
                start, length
            )));
        }
        if chunk_size <= 0 {
            return Err(GridError::InternalInconsistency(format!(
                "file has non-positive chunk size {}",
                chunk_size
            )));
        }

        let remainder = start % chunk_size;
        let skip_chunks = (start - remainder) / chunk_size;
        let bytes_requested = end.unwrap_or(length) - start;
        let last_byte = start + bytes_requested;
        let end_chunk = (last_byte + chunk_size - 1) / chunk_size;

        Ok(Self {
            chunk_size,
            remainder,
            skip_chunks,
            end_chunk,
            bytes_requested,
            last_byte,
        })
    }

    pub fn chunk_count(&self) -> i64 {
        (self.end_chunk - self.skip_chunks).max(0)
    }
}

/// Collects the requested bytes from chunks fed in ascending `n` order.
pub struct RangeAssembler {
    plan: RangePlan,
    next_n: i64,
    body: Vec<u8>,
}

impl RangeAssembler {
    pub fn new(plan: RangePlan) -> Self {
        Self {
            plan,
            next_n: plan.skip_chunks,
            body: Vec::with_capacity(plan.bytes_requested.max(0) as usize),
        }
    }

    pub fn push(&mut self, chunk: &Chunk) -> Result<()> {
        let plan = self.plan;
        let n = chunk.n;

        if n < plan.skip_chunks || n >= plan.end_chunk || n < self.next_n {
            return Err(GridError::InternalInconsistency(format!(
                "chunk {} of file {} outside window [{}, {}) at position {}",
                n, chunk.files_id, plan.skip_chunks, plan.end_chunk, self.next_n
            )));
        }
        if n > self.next_n {
            return Err(GridError::ChunkNotFound {
                files_id: chunk.files_id.to_string(),
                n: self.next_n,
            });
        }

        let data = chunk.data.as_ref();
        let is_first = n == plan.skip_chunks;
        let is_last = n == plan.end_chunk - 1;

        let slice_start = if is_first { plan.remainder as usize } else { 0 };
        let slice_end = if is_last {
            let end_index = plan.last_byte - n * plan.chunk_size;
            if end_index < 0 || (data.len() as i64) < end_index {
                return Err(GridError::ExcessiveRangeRequested(format!(
                    "chunk {} of file {} holds {} bytes, range needs {}",
                    n,
                    chunk.files_id,
                    data.len(),
                    end_index
                )));
            }
            end_index as usize
        } else {
            if (data.len() as i64) < plan.chunk_size {
                return Err(GridError::ExcessiveRangeRequested(format!(
                    "chunk {} of file {} holds {} bytes, expected a full chunk of {}",
                    n,
                    chunk.files_id,
                    data.len(),
                    plan.chunk_size
                )));
            }
            plan.chunk_size as usize
        };

        if slice_start > slice_end {
            return Err(GridError::ExcessiveRangeRequested(format!(
                "chunk {} of file {} holds {} bytes, range starts at {}",
                n,
                chunk.files_id,
                data.len(),
                slice_start
            )));
        }

        self.body.extend_from_slice(&data[slice_start..slice_end]);
        self.next_n += 1;
        Ok(())
    }

    pub fn finish(self, files_id: &str) -> Result<Bytes> {
        if self.next_n < self.plan.end_chunk {
            return Err(GridError::ChunkNotFound {
                files_id: files_id.to_string(),
                n: self.next_n,
            });
        }
        if self.body.len() as i64 != self.plan.bytes_requested {
            return Err(GridError::InternalInconsistency(format!(
                "assembled {} bytes of file {}, expected {}",
                self.body.len(),
                files_id,
                self.plan.bytes_requested
            )));
        }
        Ok(Bytes::from(self.body))
    }
}

#[derive(Clone)]
pub struct ReadRangeOperation {
    chunks: Arc<dyn Collection>,
}

#[derive(Debug, Clone)]
pub struct ReadRangeOperationRequest {
    pub file: FileRecord,
    pub range: ReadByteRange,
}

impl ReadRangeOperation {
    pub fn new(chunks: Arc<dyn Collection>) -> Self {
        Self { chunks }
    }

    pub async fn run(&self, request: ReadRangeOperationRequest) -> Result<Bytes> {
        let ReadRangeOperationRequest { file, range } = request;

        let plan = RangePlan::new(file.length, i64::from(file.chunk_size), range)?;
        if plan.bytes_requested == 0 {
            return Ok(Bytes::new());
        }

        let options = FindOptions::new()
            .sort("n", SortOrder::Ascending)
            .skip(plan.skip_chunks as u64)
            .limit(plan.chunk_count() as u64);
        let cursor = self
            .chunks
            .find(Filter::eq("files_id", file.id), options)
            .await?;
        let mut cursor = ChunkCursor::new(cursor);

        let files_id = file.id.to_string();
        let mut assembler = RangeAssembler::new(plan);
        while let Some(chunk) = cursor.next().await? {
            assembler.push(&chunk)?;
        }

        let body = assembler.finish(&files_id)?;
        tracing::debug!(
            "Read {} bytes of file {} from chunks [{}, {})",
            body.len(),
            files_id,
            plan.skip_chunks,
            plan.end_chunk
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ObjectId, Value};

    fn chunk(files_id: ObjectId, n: i64, data: &[u8]) -> Chunk {
        Chunk {
            id: Value::Int64(n),
            files_id,
            n,
            data: Bytes::copy_from_slice(data),
        }
    }

    #[test]
    fn test_plan_for_middle_range() {
        let plan = RangePlan::new(10, 4, ReadByteRange::new(5, Some(9))).unwrap();
        assert_eq!(plan.remainder, 1);
        assert_eq!(plan.skip_chunks, 1);
        assert_eq!(plan.end_chunk, 3);
        assert_eq!(plan.bytes_requested, 4);
        assert_eq!(plan.last_byte, 9);
    }

    #[test]
    fn test_plan_open_end_reads_to_length() {
        let plan = RangePlan::new(10, 4, ReadByteRange::starting_at(8)).unwrap();
        assert_eq!(plan.skip_chunks, 2);
        assert_eq!(plan.end_chunk, 3);
        assert_eq!(plan.bytes_requested, 2);
    }

    #[test]
    fn test_plan_validation() {
        assert!(matches!(
            RangePlan::new(10, 4, ReadByteRange::new(-1, None)),
            Err(GridError::NegativeByteRange { .. })
        ));
        assert!(matches!(
            RangePlan::new(10, 4, ReadByteRange::new(3, Some(3))),
            Err(GridError::NegativeByteRange { .. })
        ));
        assert!(matches!(
            RangePlan::new(10, 4, ReadByteRange::new(0, Some(11))),
            Err(GridError::ExcessiveRangeRequested(_))
        ));
        assert!(matches!(
            RangePlan::new(10, 4, ReadByteRange::starting_at(11)),
            Err(GridError::ExcessiveRangeRequested(_))
        ));
    }

    #[test]
    fn test_assemble_within_single_chunk() {
        let id = ObjectId::new();
        let plan = RangePlan::new(10, 4, ReadByteRange::new(5, Some(7))).unwrap();
        let mut assembler = RangeAssembler::new(plan);
        assembler.push(&chunk(id, 1, b"4567")).unwrap();
        assert_eq!(assembler.finish("f").unwrap().as_ref(), b"56");
    }

    #[test]
    fn test_assemble_across_chunks() {
        let id = ObjectId::new();
        let plan = RangePlan::new(10, 4, ReadByteRange::new(3, Some(9))).unwrap();
        let mut assembler = RangeAssembler::new(plan);
        assembler.push(&chunk(id, 0, b"0123")).unwrap();
        assembler.push(&chunk(id, 1, b"4567")).unwrap();
        assembler.push(&chunk(id, 2, b"89")).unwrap();
        assert_eq!(assembler.finish("f").unwrap().as_ref(), b"345678");
    }

    #[test]
    fn test_short_last_chunk_is_excessive() {
        let id = ObjectId::new();
        let plan = RangePlan::new(10, 4, ReadByteRange::new(0, Some(10))).unwrap();
        let mut assembler = RangeAssembler::new(plan);
        assembler.push(&chunk(id, 0, b"0123")).unwrap();
        assembler.push(&chunk(id, 1, b"4567")).unwrap();
        let err = assembler.push(&chunk(id, 2, b"8")).unwrap_err();
        assert!(matches!(err, GridError::ExcessiveRangeRequested(_)));
    }

    #[test]
    fn test_short_middle_chunk_is_excessive() {
        let id = ObjectId::new();
        let plan = RangePlan::new(12, 4, ReadByteRange::new(0, Some(12))).unwrap();
        let mut assembler = RangeAssembler::new(plan);
        assembler.push(&chunk(id, 0, b"0123")).unwrap();
        let err = assembler.push(&chunk(id, 1, b"45")).unwrap_err();
        assert!(matches!(err, GridError::ExcessiveRangeRequested(_)));

        let plan = RangePlan::new(12, 4, ReadByteRange::new(2, Some(12))).unwrap();
        let mut assembler = RangeAssembler::new(plan);
        let err = assembler.push(&chunk(id, 0, b"012")).unwrap_err();
        assert!(matches!(err, GridError::ExcessiveRangeRequested(_)));
    }

    #[test]
    fn test_chunk_outside_window_is_inconsistent() {
        let id = ObjectId::new();
        let plan = RangePlan::new(10, 4, ReadByteRange::new(4, Some(8))).unwrap();
        let mut assembler = RangeAssembler::new(plan);
        let err = assembler.push(&chunk(id, 0, b"0123")).unwrap_err();
        assert!(matches!(err, GridError::InternalInconsistency(_)));
    }

    #[test]
    fn test_missing_chunks_are_reported() {
        let id = ObjectId::new();
        let plan = RangePlan::new(12, 4, ReadByteRange::full()).unwrap();

        let mut gap = RangeAssembler::new(plan);
        gap.push(&chunk(id, 0, b"0123")).unwrap();
        let err = gap.push(&chunk(id, 2, b"89ab")).unwrap_err();
        assert!(matches!(err, GridError::ChunkNotFound { n: 1, .. }));

        let mut truncated = RangeAssembler::new(plan);
        truncated.push(&chunk(id, 0, b"0123")).unwrap();
        let err = truncated.finish("f").unwrap_err();
        assert!(matches!(err, GridError::ChunkNotFound { n: 1, .. }));
    }
}
