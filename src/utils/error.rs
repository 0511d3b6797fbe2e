//! Error types and handling
//!
//! Common error types used across the crate.

use crate::export::MergeError;
use crate::recorder::CaptureError;
use crate::storage::StorageError;
use crate::upload::UploadError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Nothing to deliver: {0}")]
    NothingToDeliver(String),

    #[error("Recording format of session {0} is unknown")]
    UnknownFormat(String),
}

impl AppError {
    /// Whether the caller may simply run the same operation again
    ///
    /// Local chunks survive every merge and upload failure. A toolchain that
    /// cannot load needs the environment fixed first.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Merge(MergeError::Toolchain(_)) => false,
            AppError::Merge(_) | AppError::Upload(_) => true,
            AppError::Storage(StorageError::SessionBusy(_)) => true,
            _ => false,
        }
    }
}

/// Error response for front ends
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Capture(CaptureError::Fatal(_)) => "CAPTURE_FATAL",
            AppError::Capture(CaptureError::Validation(_)) => "VALIDATION_ERROR",
            AppError::Capture(CaptureError::InvalidState { .. }) => "INVALID_STATE",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Merge(MergeError::Toolchain(_)) => "MERGE_TOOLCHAIN_ERROR",
            AppError::Merge(MergeError::Cancelled) | AppError::Upload(UploadError::Cancelled) => {
                "CANCELLED"
            }
            AppError::Merge(_) => "MERGE_PROCESSING_ERROR",
            AppError::Upload(UploadError::Transfer(_)) => "UPLOAD_TRANSFER_ERROR",
            AppError::Upload(UploadError::Record(_)) => "UPLOAD_RECORD_ERROR",
            AppError::Upload(UploadError::Busy(_)) => "UPLOAD_BUSY",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::NothingToDeliver(_) => "NOTHING_TO_DELIVER",
            AppError::UnknownFormat(_) => "UNKNOWN_FORMAT",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FacingMode, FatalCaptureError};

    #[test]
    fn test_error_codes() {
        let fatal: AppError = CaptureError::from(FatalCaptureError::DeviceNotFound(FacingMode::User)).into();
        assert_eq!(ErrorResponse::from(fatal).code, "CAPTURE_FATAL");

        let record: AppError = UploadError::Record("down".to_string()).into();
        let response = ErrorResponse::from(record);
        assert_eq!(response.code, "UPLOAD_RECORD_ERROR");
        assert_eq!(response.message, "Upload error: Saving upload record failed: down");
    }

    #[test]
    fn test_merge_and_upload_failures_are_retryable() {
        assert!(AppError::from(MergeError::Processing("bad".into())).is_retryable());
        assert!(AppError::from(UploadError::Transfer("down".into())).is_retryable());
        assert!(!AppError::from(MergeError::Toolchain("no sandbox".into())).is_retryable());
        assert!(!AppError::Config("bad".into()).is_retryable());
    }
}
