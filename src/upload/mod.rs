//! Upload module
//!
//! Publishes a merged artifact to remote object storage, writes its record
//! and purges the local session once both have succeeded.

pub mod mock;
pub mod pipeline;
pub mod retry;
pub mod traits;
pub mod types;

pub use mock::{MemoryObjectStore, MemoryRecordStore, StoredObject};
pub use pipeline::{object_path, replace_extension, UploadPipeline};
pub use retry::{with_timeout_retry, with_timeout_retry_on_error};
pub use traits::{ObjectStore, RecordStore};
pub use types::{
    UploadConfig, UploadError, UploadOutcome, UploadProgress, UploadRecord, UploadRequest,
    UploadStage,
};
