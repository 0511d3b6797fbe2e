//! Pipeline configuration
//!
//! Loaded from JSON. Every field is optional and falls back to its default.

use crate::capture::{FacingMode, PlatformClass};
use crate::export::FfmpegToolchain;
use crate::recorder::CaptureConfig;
use crate::storage::LocalStore;
use crate::upload::UploadConfig;
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durations as fractional seconds
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Settings for the whole capture → merge → upload pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// How often the recorder flushes a chunk
    #[serde(with = "seconds")]
    pub chunk_interval: Duration,
    /// How often the displayed duration updates
    #[serde(with = "seconds")]
    pub duration_tick: Duration,
    /// Highlights are rejected before this much recording time
    #[serde(with = "seconds")]
    pub min_highlight_elapsed: Duration,
    /// Root directory for durable chunk storage
    pub storage_root: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Bound on each upload network call
    #[serde(with = "seconds")]
    pub network_timeout: Duration,
    /// Object-store prefix for uploaded recordings
    pub object_root: String,
    pub records_collection: String,
    pub platform: PlatformClass,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_interval: Duration::from_secs(10),
            duration_tick: Duration::from_secs(1),
            min_highlight_elapsed: Duration::from_secs(5),
            storage_root: std::env::temp_dir().join("courtcam"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            network_timeout: Duration::from_secs(30),
            object_root: "recordings".to_string(),
            records_collection: "videos".to_string(),
            platform: PlatformClass::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::info!("Loaded pipeline config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.chunk_interval.is_zero() {
            return Err(AppError::Config("chunkInterval must be positive".to_string()));
        }
        if self.duration_tick.is_zero() {
            return Err(AppError::Config("durationTick must be positive".to_string()));
        }
        if self.network_timeout.is_zero() {
            return Err(AppError::Config("networkTimeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn capture_config(&self, facing: FacingMode) -> CaptureConfig {
        CaptureConfig {
            chunk_interval: self.chunk_interval,
            duration_tick: self.duration_tick,
            min_highlight_elapsed: self.min_highlight_elapsed,
            platform: self.platform,
            facing,
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            object_root: self.object_root.clone(),
            records_collection: self.records_collection.clone(),
            network_timeout: self.network_timeout,
        }
    }

    pub fn toolchain(&self) -> FfmpegToolchain {
        FfmpegToolchain::new(&self.ffmpeg_path, &self.ffprobe_path)
    }

    /// Open local storage under `storage_root`, probing it once
    pub async fn open_store(&self) -> LocalStore {
        LocalStore::open(&self.storage_root).await
    }
}
