//! Codec/container negotiation

use super::traits::MediaDevices;
use super::types::{Container, FacingMode, FatalCaptureError, MediaFormat, PlatformClass};

/// Candidate formats in preference order for a platform class
pub fn candidates(platform: PlatformClass) -> Vec<MediaFormat> {
    let mp4 = [
        MediaFormat::new(Container::Mp4, Some("avc1,mp4a")),
        MediaFormat::new(Container::Mp4, None),
    ];
    let webm = [
        MediaFormat::new(Container::Webm, Some("vp9,opus")),
        MediaFormat::new(Container::Webm, Some("vp8,opus")),
        MediaFormat::new(Container::Webm, None),
    ];

    match platform {
        // Playable container first; WebM only as a last resort
        PlatformClass::RestrictedPlayback => mp4.into_iter().chain(webm).collect(),
        PlatformClass::Standard => webm.into_iter().chain(mp4).collect(),
    }
}

/// Pick the first candidate the recorder backend supports
pub fn negotiate(
    platform: PlatformClass,
    facing: FacingMode,
    devices: &dyn MediaDevices,
) -> Result<MediaFormat, FatalCaptureError> {
    let format = candidates(platform)
        .into_iter()
        .find(|format| devices.supports_format(facing, format))
        .ok_or_else(|| {
            FatalCaptureError::UnsupportedEnvironment(format!(
                "no supported recording format for {} camera",
                facing
            ))
        })?;

    tracing::info!("Negotiated recording format {}", format.mime_type());
    Ok(format)
}
