//! Recording system module
//!
//! The capture state machine and the session data it produces:
//! - CaptureSession orchestrating the device stream, chunk store and metadata
//! - HighlightMarker and SessionMetadata records
//! - CaptureEvent broadcast while recording

pub mod error;
pub mod session;
pub mod state;

pub use error::{CaptureError, CaptureResult};
pub use session::CaptureSession;
pub use state::{
    CaptureConfig, CaptureEvent, CaptureState, CaptureSummary, HighlightMarker, SessionMetadata,
    SessionStatus,
};
