//! Capture errors

use super::state::CaptureState;
use crate::capture::FatalCaptureError;
use thiserror::Error;

/// Errors returned by [`CaptureSession`](super::CaptureSession) operations
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The session was aborted and its resources released
    #[error(transparent)]
    Fatal(#[from] FatalCaptureError),

    /// The request was rejected without side effects
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: expected {expected}, found {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: CaptureState,
    },
}

pub type CaptureResult<T> = Result<T, CaptureError>;
