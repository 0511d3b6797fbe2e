//! Device stream management
//!
//! Owns the single live camera feed of a capture session.

use super::traits::MediaDevices;
use super::types::{FacingMode, FatalCaptureError, StreamHandle};
use std::sync::Arc;

/// Acquires, releases and switches the camera+microphone feed
pub struct DeviceStreamManager {
    devices: Arc<dyn MediaDevices>,
    current: Option<StreamHandle>,
}

impl DeviceStreamManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            current: None,
        }
    }

    /// Acquire a stream, or return the live one without prompting again
    pub async fn acquire(&mut self, facing: FacingMode) -> Result<StreamHandle, FatalCaptureError> {
        if let Some(stream) = &self.current {
            tracing::debug!("Reusing live stream {} ({})", stream.id, stream.facing);
            return Ok(stream.clone());
        }

        let stream = self.devices.open(facing).await?;
        tracing::info!("Acquired {} stream {}", stream.facing, stream.id);
        self.current = Some(stream.clone());
        Ok(stream)
    }

    /// Stop all tracks of the current stream. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(stream) = self.current.take() {
            tracing::info!("Releasing {} stream {}", stream.facing, stream.id);
            self.devices.close(&stream);
        }
    }

    /// Stop the current stream and open one facing `facing`.
    ///
    /// On failure nothing is resumed: the old stream stays stopped and the
    /// caller has to acquire again.
    pub async fn switch_to(&mut self, facing: FacingMode) -> Result<StreamHandle, FatalCaptureError> {
        self.release();
        let stream = self.devices.open(facing).await?;
        tracing::info!("Switched to {} stream {}", stream.facing, stream.id);
        self.current = Some(stream.clone());
        Ok(stream)
    }

    pub fn current(&self) -> Option<&StreamHandle> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn devices(&self) -> &Arc<dyn MediaDevices> {
        &self.devices
    }
}

impl Drop for DeviceStreamManager {
    fn drop(&mut self) {
        self.release();
    }
}
