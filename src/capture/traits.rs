//! Capture trait definitions
//!
//! Platform-agnostic capabilities the capture session is built on. Any
//! platform media API that can open a camera feed and emit periodic
//! buffers satisfies them.

use super::types::{FacingMode, FatalCaptureError, MediaFormat, RecordedData, StreamHandle};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Receiving end for recorder buffers
pub type ChunkSender = mpsc::UnboundedSender<RecordedData>;

/// Access to the device's cameras and microphone
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open a camera+microphone feed.
    ///
    /// There is no software timeout here; the call is bounded only by the
    /// platform permission prompt.
    async fn open(&self, facing: FacingMode) -> Result<StreamHandle, FatalCaptureError>;

    /// Stop every track of the stream. Must tolerate unknown or closed handles.
    fn close(&self, stream: &StreamHandle);

    /// Whether a recorder for `facing` can write `format`
    fn supports_format(&self, facing: FacingMode, format: &MediaFormat) -> bool;

    /// Create a recorder bound to an open stream
    fn create_recorder(
        &self,
        stream: &StreamHandle,
        format: &MediaFormat,
    ) -> Result<Box<dyn Recorder>, FatalCaptureError>;
}

/// Periodic buffer producer for one stream
#[async_trait]
pub trait Recorder: Send {
    /// Begin emitting one buffer per `interval` into `on_chunk`
    fn start(&mut self, interval: Duration, on_chunk: ChunkSender)
        -> Result<(), FatalCaptureError>;

    /// Stop recording. The last partially filled buffer is sent to the
    /// chunk handler before this returns. Calling it again is a no-op.
    async fn stop(&mut self);
}
