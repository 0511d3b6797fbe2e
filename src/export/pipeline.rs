//! Merge pipeline orchestration
//!
//! Stages the chunks of one session, drives the toolchain through one
//! concat + transcode pass, and finishes with a duration probe and a
//! thumbnail grab. All blocking work runs on the tokio blocking pool.

use super::toolchain::{build_manifest, Toolchain, TranscodeRequest};
use super::types::{
    Artifact, EncodeParams, MergeError, MergeJob, MergeOutput, MergeProgress, MergeStage,
    Thumbnail,
};
use crate::storage::SessionLocks;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MANIFEST_NAME: &str = "concat.txt";
const THUMBNAIL_OFFSET_SECONDS: f64 = 1.0;

/// A toolchain that passed its load check
#[derive(Debug, Clone)]
struct LoadedToolchain {
    version: String,
}

/// Merges recorded chunks into one web-playable artifact
///
/// The engine owns the loaded toolchain for its whole lifetime and is meant
/// to be reused across sessions. Each job stages into its own temporary
/// directory which is removed when the job ends, whatever the outcome.
pub struct MergeEngine {
    toolchain: Arc<dyn Toolchain>,
    loaded: Arc<Mutex<Option<LoadedToolchain>>>,
    locks: SessionLocks,
    staging_root: Option<PathBuf>,
}

impl MergeEngine {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            toolchain,
            loaded: Arc::new(Mutex::new(None)),
            locks: SessionLocks::new(),
            staging_root: None,
        }
    }

    /// Stage jobs under `root` instead of the system temp directory
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    /// Version reported by the toolchain when it was loaded
    pub fn toolchain_version(&self) -> Option<String> {
        self.loaded.lock().as_ref().map(|l| l.version.clone())
    }

    /// Drop the loaded toolchain; the next merge loads it again
    pub fn unload(&self) {
        if self.loaded.lock().take().is_some() {
            tracing::info!("Merge toolchain unloaded");
        }
    }

    /// Whether a merge for `session_id` is running
    pub fn is_merging(&self, session_id: &str) -> bool {
        self.locks.is_locked(session_id)
    }

    /// Merge the job's chunks.
    ///
    /// Only one merge per session runs at a time; a second call returns
    /// [`MergeError::Busy`]. Setting `cancel` aborts the job at the next
    /// checkpoint. The chunk store is never touched here.
    pub async fn merge<F>(
        &self,
        job: MergeJob,
        cancel: Arc<AtomicBool>,
        progress: F,
    ) -> Result<MergeOutput, MergeError>
    where
        F: Fn(MergeProgress) + Send + 'static,
    {
        let _guard = self
            .locks
            .try_lock(&job.session_id)
            .ok_or_else(|| MergeError::Busy(job.session_id.clone()))?;

        if job.chunks.is_empty() {
            return Err(MergeError::Processing(format!(
                "Session {} has no chunks to merge",
                job.session_id
            )));
        }

        tracing::info!(
            "Merging {} chunks for session {} ({:?})",
            job.chunks.len(),
            job.session_id,
            job.quality
        );

        let worker = MergeWorker {
            toolchain: self.toolchain.clone(),
            loaded: self.loaded.clone(),
            staging_root: self.staging_root.clone(),
            cancel,
        };

        let result = tokio::task::spawn_blocking(move || {
            let mut tracker = ProgressTracker::new(progress);
            worker.run(&job, &mut tracker)
        })
        .await
        .map_err(|e| MergeError::Processing(format!("Merge task failed: {}", e)))?;

        match &result {
            Ok(output) => tracing::info!(
                "Merge finished: {} bytes, {:.1}s",
                output.artifact.bytes.len(),
                output.artifact.duration_seconds
            ),
            Err(MergeError::Cancelled) => tracing::info!("Merge cancelled"),
            Err(e) => tracing::error!("Merge failed: {}", e),
        }
        result
    }
}

/// Keeps reported progress monotonic across stages
struct ProgressTracker<F> {
    callback: F,
    last: Option<MergeProgress>,
}

impl<F: Fn(MergeProgress)> ProgressTracker<F> {
    fn new(callback: F) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    /// Report `fraction` of `stage` done
    fn report(&mut self, stage: MergeStage, fraction: f32) {
        let (start, end) = stage.range();
        let span = f32::from(end - start);
        let percent = start + (span * fraction.clamp(0.0, 1.0)).round() as u8;

        let percent = self.last.map_or(percent, |last| last.percent.max(percent));
        let update = MergeProgress { percent, stage };
        if self.last == Some(update) {
            return;
        }
        self.last = Some(update);
        (self.callback)(update);
    }
}

/// The blocking half of a merge job
struct MergeWorker {
    toolchain: Arc<dyn Toolchain>,
    loaded: Arc<Mutex<Option<LoadedToolchain>>>,
    staging_root: Option<PathBuf>,
    cancel: Arc<AtomicBool>,
}

impl MergeWorker {
    fn run<F: Fn(MergeProgress)>(
        &self,
        job: &MergeJob,
        tracker: &mut ProgressTracker<F>,
    ) -> Result<MergeOutput, MergeError> {
        // 1. Toolchain
        tracker.report(MergeStage::LoadingToolchain, 0.0);
        self.ensure_loaded()?;
        tracker.report(MergeStage::LoadingToolchain, 1.0);
        self.check_cancelled()?;

        // 2. Staging; the directory is removed when `staging` drops
        let staging = self.staging_dir()?;
        let work_dir = staging.path();
        let extension = job.source_format.container.extension();
        let mut names = Vec::with_capacity(job.chunks.len());

        for (i, chunk) in job.chunks.iter().enumerate() {
            let name = format!("chunk_{:06}.{}", chunk.index, extension);
            fs::write(work_dir.join(&name), &chunk.payload)?;
            names.push(name);
            tracker.report(MergeStage::Staging, (i + 1) as f32 / job.chunks.len() as f32);
        }

        let manifest = work_dir.join(MANIFEST_NAME);
        fs::write(&manifest, build_manifest(&names))?;
        tracing::debug!("Staged {} inputs in {:?}", names.len(), work_dir);
        self.check_cancelled()?;

        // 3. Concat + transcode
        let params = EncodeParams::for_preset(job.quality);
        let output = work_dir.join(format!("merged.{}", params.container.extension()));
        let request = TranscodeRequest {
            work_dir,
            manifest: &manifest,
            output: &output,
            params: &params,
        };
        tracker.report(MergeStage::Transcoding, 0.0);
        self.toolchain.transcode(&request, &self.cancel, &mut |fraction| {
            tracker.report(MergeStage::Transcoding, fraction)
        })?;
        self.check_cancelled()?;

        // 4. Probe and thumbnail
        tracker.report(MergeStage::Finalizing, 0.0);
        let duration_seconds = self.toolchain.probe_duration(&output)?;
        tracker.report(MergeStage::Finalizing, 0.3);

        let thumbnail_path = work_dir.join(format!("thumbnail.{}", Thumbnail::EXTENSION));
        self.toolchain.extract_frame(
            &output,
            thumbnail_offset(duration_seconds),
            &thumbnail_path,
        )?;
        let thumbnail = read_thumbnail(&thumbnail_path)?;
        tracker.report(MergeStage::Finalizing, 0.7);

        let bytes = fs::read(&output)?;
        if bytes.is_empty() {
            return Err(MergeError::Processing("Toolchain produced an empty output".to_string()));
        }
        tracker.report(MergeStage::Finalizing, 1.0);
        tracker.report(MergeStage::Complete, 1.0);

        Ok(MergeOutput {
            artifact: Artifact {
                bytes,
                container: params.container,
                video_codec: params.video_codec.to_string(),
                audio_codec: params.audio_codec.to_string(),
                duration_seconds,
            },
            thumbnail,
        })
    }

    fn ensure_loaded(&self) -> Result<(), MergeError> {
        let mut loaded = self.loaded.lock();
        if loaded.is_none() {
            let version = self.toolchain.load()?;
            tracing::info!("Merge toolchain ready: {}", version);
            *loaded = Some(LoadedToolchain { version });
        }
        Ok(())
    }

    fn staging_dir(&self) -> Result<tempfile::TempDir, MergeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("merge-");
        let dir = match &self.staging_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn check_cancelled(&self) -> Result<(), MergeError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(MergeError::Cancelled);
        }
        Ok(())
    }
}

/// One second in, or the midpoint of anything shorter
fn thumbnail_offset(duration_seconds: f64) -> f64 {
    if duration_seconds > THUMBNAIL_OFFSET_SECONDS {
        THUMBNAIL_OFFSET_SECONDS
    } else {
        (duration_seconds / 2.0).max(0.0)
    }
}

/// Read a PNG thumbnail and its dimensions
fn read_thumbnail(path: &Path) -> Result<Thumbnail, MergeError> {
    let bytes = fs::read(path)?;
    let decoder = png::Decoder::new(bytes.as_slice());
    let reader = decoder
        .read_info()
        .map_err(|e| MergeError::Processing(format!("Invalid thumbnail: {}", e)))?;
    let (width, height) = (reader.info().width, reader.info().height);

    if width == 0 || height == 0 {
        return Err(MergeError::Processing("Thumbnail has no pixels".to_string()));
    }

    Ok(Thumbnail {
        bytes,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Container, FacingMode, MediaFormat, MockChunk};
    use crate::export::{MockToolchain, QualityPreset};
    use crate::storage::Chunk;
    use chrono::Utc;
    use std::time::{Duration, Instant};

    fn job(session_id: &str, durations_ms: &[u64]) -> MergeJob {
        let chunks = durations_ms
            .iter()
            .enumerate()
            .map(|(i, ms)| Chunk {
                session_id: session_id.to_string(),
                index: i as u64,
                payload: MockChunk {
                    facing: FacingMode::Environment,
                    stream_id: 1,
                    duration_ms: *ms,
                }
                .encode(),
                captured_at: Utc::now(),
            })
            .collect();
        MergeJob {
            session_id: session_id.to_string(),
            chunks,
            source_format: MediaFormat::new(Container::Webm, Some("vp9,opus")),
            quality: QualityPreset::Medium,
        }
    }

    fn engine(toolchain: Arc<MockToolchain>, root: &Path) -> MergeEngine {
        MergeEngine::new(toolchain).with_staging_root(root)
    }

    #[tokio::test]
    async fn test_merge_three_chunks() {
        let staging = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(MockToolchain::new());
        let engine = engine(toolchain.clone(), staging.path());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let output = engine
            .merge(
                job("s1", &[10_000, 10_000, 8_000]),
                Arc::new(AtomicBool::new(false)),
                move |p| sink.lock().push(p),
            )
            .await
            .unwrap();

        let duration = output.artifact.duration_seconds;
        assert!((26.0..=30.0).contains(&duration), "duration {}", duration);
        assert_eq!(output.artifact.container, Container::Mp4);
        assert!(!output.thumbnail.bytes.is_empty());
        assert!(output.thumbnail.width > 0 && output.thumbnail.height > 0);

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(seen.last().map(|p| p.percent), Some(100));
        assert_eq!(seen.last().map(|p| p.stage), Some(MergeStage::Complete));
    }

    #[tokio::test]
    async fn test_staging_is_removed_after_success_and_failure() {
        let staging = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(MockToolchain::new());
        let engine = engine(toolchain.clone(), staging.path());

        engine
            .merge(job("s1", &[1_000]), Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap();
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);

        toolchain.fail_transcode(true);
        let err = engine
            .merge(job("s1", &[1_000]), Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Processing(_)));
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_toolchain_loaded_once_and_reused() {
        let staging = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(MockToolchain::new());
        let engine = engine(toolchain.clone(), staging.path());

        for session in ["a", "b"] {
            engine
                .merge(job(session, &[2_000]), Arc::new(AtomicBool::new(false)), |_| {})
                .await
                .unwrap();
        }
        assert_eq!(toolchain.load_calls(), 1);
        assert!(engine.is_loaded());

        engine.unload();
        assert!(!engine.is_loaded());
    }

    #[tokio::test]
    async fn test_load_failure_is_toolchain_error() {
        let staging = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(MockToolchain::new());
        toolchain.fail_load(true);
        let engine = engine(toolchain.clone(), staging.path());

        let err = engine
            .merge(job("s1", &[1_000]), Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Toolchain(_)));
        assert!(!engine.is_loaded());
        assert_eq!(toolchain.transcode_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let staging = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(MockToolchain::new()), staging.path());

        let err = engine
            .merge(job("s1", &[1_000]), Arc::new(AtomicBool::new(true)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Cancelled));
        assert!(!engine.is_merging("s1"));
    }

    #[tokio::test]
    async fn test_empty_job_rejected() {
        let staging = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(MockToolchain::new()), staging.path());

        let err = engine
            .merge(job("s1", &[]), Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Processing(_)));
    }

    #[tokio::test]
    async fn test_unrecognized_chunk_is_processing_error() {
        let staging = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(MockToolchain::new()), staging.path());

        let mut bad = job("s1", &[1_000]);
        bad.chunks[0].payload = b"garbage".to_vec();
        let err = engine
            .merge(bad, Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Processing(_)));
    }

    #[test]
    fn test_thumbnail_offset() {
        assert_eq!(thumbnail_offset(28.0), 1.0);
        assert_eq!(thumbnail_offset(0.5), 0.25);
    }

    #[test]
    fn test_progress_tracker_never_goes_backwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut tracker = ProgressTracker::new(move |p: MergeProgress| sink.lock().push(p.percent));

        tracker.report(MergeStage::Transcoding, 0.5);
        tracker.report(MergeStage::Transcoding, 0.2);
        tracker.report(MergeStage::Finalizing, 0.0);

        assert_eq!(*seen.lock(), vec![58, 90]);
    }

    #[tokio::test]
    async fn test_session_lock_and_mid_transcode_cancel() {
        let staging = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(MockToolchain::new());
        toolchain.set_transcode_delay(Duration::from_millis(100));
        let engine = Arc::new(engine(toolchain.clone(), staging.path()));

        let cancel = Arc::new(AtomicBool::new(false));
        let slow = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                engine
                    .merge(job("s1", &[1_000; 50]), cancel, |_| {})
                    .await
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !(engine.is_merging("s1") && toolchain.transcode_calls() >= 1) {
            assert!(Instant::now() < deadline, "merge of s1 never started transcoding");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let busy = engine
            .merge(job("s1", &[1_000]), Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(busy, MergeError::Busy(ref id) if id == "s1"));

        let other = engine
            .merge(job("s2", &[2_000]), Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap();
        assert_eq!(other.artifact.duration_seconds, 2.0);
        assert!(engine.is_merging("s1"));

        cancel.store(true, Ordering::SeqCst);
        let err = slow.await.unwrap().unwrap_err();
        assert!(matches!(err, MergeError::Cancelled));
        assert!(!engine.is_merging("s1"));
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);
    }
}
