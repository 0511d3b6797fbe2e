//! Capture value types
//!
//! Camera facing, negotiated media formats, stream handles and the fatal
//! capture error taxonomy shared by the device layer and the recorder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which physical camera a stream is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, facing the operator
    User,
    /// Rear camera, facing the court
    Environment,
}

impl FacingMode {
    /// The camera on the other side of the device
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }
}

impl Default for FacingMode {
    fn default() -> Self {
        Self::Environment
    }
}

/// Container a recorder writes chunks into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
}

impl Container {
    /// File extension used when staging or uploading this container
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Webm => "video/webm",
        }
    }
}

/// A recordable container plus optional codec string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub container: Container,
    /// Codec list as it appears in the mime type (e.g. `vp9,opus`)
    pub codecs: Option<String>,
}

impl MediaFormat {
    pub fn new(container: Container, codecs: Option<&str>) -> Self {
        Self {
            container,
            codecs: codecs.map(str::to_string),
        }
    }

    /// Full mime type, e.g. `video/webm;codecs=vp9,opus`
    pub fn mime_type(&self) -> String {
        match &self.codecs {
            Some(codecs) => format!("{};codecs={}", self.container.content_type(), codecs),
            None => self.container.content_type().to_string(),
        }
    }
}

/// Broad platform family, used to order codec candidates
///
/// Some platforms can record into a container they cannot play back, so
/// negotiation must try their playable container first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlatformClass {
    /// Records and plays back WebM and MP4 alike
    Standard,
    /// Can record WebM but only plays MP4 back
    RestrictedPlayback,
}

impl Default for PlatformClass {
    fn default() -> Self {
        Self::Standard
    }
}

/// Handle to a live camera+microphone feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    /// Backend-assigned identifier
    pub id: u64,
    pub facing: FacingMode,
}

/// One buffer emitted by a recorder
#[derive(Debug, Clone)]
pub struct RecordedData {
    pub payload: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl RecordedData {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            captured_at: Utc::now(),
        }
    }
}

/// Failures that abort a capture session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalCaptureError {
    #[error("Permission denied for {0} camera")]
    PermissionDenied(FacingMode),

    #[error("No {0} camera found")]
    DeviceNotFound(FacingMode),

    #[error("Camera is busy: {0}")]
    DeviceBusy(String),

    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
