pub mod read_range;
pub mod upload_file;

pub use read_range::{
    RangeAssembler, RangePlan, ReadByteRange, ReadRangeOperation, ReadRangeOperationRequest,
};
pub use upload_file::{
    DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, UploadFileOperation, UploadFileOperationResult,
    UploadRequest,
};
