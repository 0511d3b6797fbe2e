//! Capture session
//!
//! Drives one recording: stream acquisition, codec negotiation, periodic
//! chunk persistence, highlight marking and live camera handoff.
//!
//! Chunks flow from the active recorder through a single unbounded channel
//! into one writer task. The writer owns index assignment from a counter
//! that belongs to the session, so a camera switch (old recorder flushed,
//! new recorder started on the same channel) can neither skip nor reuse an
//! index, and a slow storage write never delays the recorder's timer.

use super::error::{CaptureError, CaptureResult};
use super::state::{
    CaptureConfig, CaptureEvent, CaptureState, CaptureSummary, HighlightMarker, SessionMetadata,
    SessionStatus,
};
use crate::capture::{
    negotiate, ChunkSender, DeviceStreamManager, FacingMode, FatalCaptureError, MediaDevices,
    MediaFormat, RecordedData, Recorder, StreamHandle,
};
use crate::storage::{ChunkStore, SessionMetadataStore};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Resources of the recording in progress
struct ActiveRecording {
    session_id: String,
    format: MediaFormat,
    started: Instant,
    recorder: Box<dyn Recorder>,
    chunk_tx: ChunkSender,
    writer: JoinHandle<()>,
    ticker: JoinHandle<()>,
    next_index: Arc<AtomicU64>,
    /// Authoritative metadata, including the highlight list
    metadata: Arc<Mutex<SessionMetadata>>,
}

/// State machine for a single recording on one device stream
pub struct CaptureSession {
    config: CaptureConfig,
    devices: DeviceStreamManager,
    chunks: ChunkStore,
    metadata: SessionMetadataStore,
    state: Arc<RwLock<CaptureState>>,
    facing: FacingMode,
    active: Option<ActiveRecording>,
    last_summary: Option<CaptureSummary>,
    event_tx: broadcast::Sender<CaptureEvent>,
    /// Metadata writes not yet finished; drained before the final write
    pending_persists: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureSession {
    pub fn new(
        config: CaptureConfig,
        devices: Arc<dyn MediaDevices>,
        chunks: ChunkStore,
        metadata: SessionMetadataStore,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            facing: config.facing,
            config,
            devices: DeviceStreamManager::new(devices),
            chunks,
            metadata,
            state: Arc::new(RwLock::new(CaptureState::Idle)),
            active: None,
            last_summary: None,
            event_tx,
            pending_persists: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    /// Camera used by the current or next stream
    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_tx.subscribe()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    /// Wall-clock recording time, independent of chunk flushes
    pub fn duration(&self) -> Duration {
        match (&self.active, &self.last_summary) {
            (Some(active), _) => active.started.elapsed(),
            (None, Some(summary)) => Duration::from_secs_f64(summary.duration_seconds),
            (None, None) => Duration::ZERO,
        }
    }

    /// Highlights of the current recording
    pub fn highlights(&self) -> Vec<HighlightMarker> {
        self.active
            .as_ref()
            .map(|a| a.metadata.lock().highlight_events.clone())
            .unwrap_or_default()
    }

    pub fn is_using_memory_mode(&self) -> bool {
        self.chunks.is_using_memory_mode()
    }

    pub fn last_summary(&self) -> Option<&CaptureSummary> {
        self.last_summary.as_ref()
    }

    fn set_state(&self, state: CaptureState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.event_tx.send(event);
    }

    fn invalid_state(&self, expected: &'static str) -> CaptureError {
        CaptureError::InvalidState {
            expected,
            actual: self.state(),
        }
    }

    /// Acquire the stream without recording
    pub async fn arm(&mut self) -> CaptureResult<StreamHandle> {
        match self.state() {
            CaptureState::Recording => return Err(self.invalid_state("idle or armed")),
            CaptureState::Idle | CaptureState::Armed | CaptureState::Stopped(_) => {}
        }

        match self.devices.acquire(self.facing).await {
            Ok(stream) => {
                self.facing = stream.facing;
                self.set_state(CaptureState::Armed);
                Ok(stream)
            }
            Err(e) => Err(self.abort_start(e)),
        }
    }

    /// Begin recording `session_id`, reusing a live stream if there is one
    pub async fn start(&mut self, session_id: impl Into<String>) -> CaptureResult<()> {
        if self.state() == CaptureState::Recording {
            return Err(self.invalid_state("idle or armed"));
        }
        let session_id = session_id.into();
        tracing::info!("Starting capture session {}", session_id);

        let stream = match self.devices.acquire(self.facing).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.abort_start(e)),
        };
        self.facing = stream.facing;

        let devices = self.devices.devices().clone();
        let format = match negotiate(self.config.platform, stream.facing, &*devices) {
            Ok(format) => format,
            Err(e) => return Err(self.abort_start(e)),
        };
        let mut recorder = match devices.create_recorder(&stream, &format) {
            Ok(recorder) => recorder,
            Err(e) => return Err(self.abort_start(e)),
        };

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let metadata = Arc::new(Mutex::new(
            SessionMetadata::new(&session_id).with_format(format.clone()),
        ));
        let next_index = Arc::new(AtomicU64::new(0));

        if let Err(e) = recorder.start(self.config.chunk_interval, chunk_tx.clone()) {
            return Err(self.abort_start(e));
        }

        let writer = spawn_writer(
            session_id.clone(),
            chunk_rx,
            next_index.clone(),
            metadata.clone(),
            self.chunks.clone(),
            self.metadata.clone(),
            self.event_tx.clone(),
        );
        let started = Instant::now();
        let ticker = spawn_ticker(started, self.config.duration_tick, self.event_tx.clone());

        let snapshot = metadata.lock().clone();
        self.active = Some(ActiveRecording {
            session_id: session_id.clone(),
            format,
            started,
            recorder,
            chunk_tx,
            writer,
            ticker,
            next_index,
            metadata,
        });
        self.last_summary = None;
        self.persist_in_background(snapshot);

        if self.chunks.take_memory_mode_warning() {
            tracing::warn!("Recording {} in memory mode; footage is lost if the app closes before upload", session_id);
            self.emit(CaptureEvent::MemoryMode);
        }

        self.set_state(CaptureState::Recording);
        self.emit(CaptureEvent::Started { session_id });
        Ok(())
    }

    /// Release everything acquired by a failed start
    fn abort_start(&mut self, error: FatalCaptureError) -> CaptureError {
        tracing::error!("Capture could not start: {}", error);
        self.devices.release();
        self.set_state(CaptureState::Idle);
        CaptureError::Fatal(error)
    }

    /// Mark a highlight at the current recording offset
    pub fn mark_highlight(&self, label: Option<&str>) -> CaptureResult<HighlightMarker> {
        let active = match (&self.active, self.state()) {
            (Some(active), CaptureState::Recording) => active,
            _ => {
                return Err(CaptureError::Validation(
                    "highlights can only be marked while recording".to_string(),
                ))
            }
        };

        let elapsed = active.started.elapsed();
        if elapsed < self.config.min_highlight_elapsed {
            return Err(CaptureError::Validation(format!(
                "highlight marked too early ({:.1}s elapsed, minimum {:.1}s)",
                elapsed.as_secs_f64(),
                self.config.min_highlight_elapsed.as_secs_f64()
            )));
        }

        let (marker, snapshot) = {
            let mut metadata = active.metadata.lock();
            let label = label
                .map(str::to_string)
                .unwrap_or_else(|| format!("Highlight {}", metadata.highlight_events.len() + 1));
            let marker = HighlightMarker::new(elapsed.as_secs_f64(), label);
            metadata.highlight_events.push(marker.clone());
            (marker, metadata.clone())
        };

        tracing::info!(
            "Highlight '{}' at {:.1}s in {}",
            marker.label,
            marker.timestamp_offset_seconds,
            active.session_id
        );
        self.persist_in_background(snapshot);
        self.emit(CaptureEvent::HighlightMarked(marker.clone()));
        Ok(marker)
    }

    /// Switch to the other camera.
    ///
    /// While recording, the current recorder is finalized and a new one is
    /// started on the new stream with the same format, continuing the chunk
    /// index. The switch is rejected up front when the other camera cannot
    /// record the negotiated format.
    pub async fn switch_camera(&mut self) -> CaptureResult<FacingMode> {
        let target = self.facing.opposite();

        match self.state() {
            CaptureState::Idle | CaptureState::Stopped(_) => {}
            CaptureState::Armed => {
                if let Err(e) = self.devices.switch_to(target).await {
                    tracing::error!("Camera switch failed: {}", e);
                    self.set_state(CaptureState::Idle);
                    return Err(CaptureError::Fatal(e));
                }
            }
            CaptureState::Recording => {
                let active = match self.active.as_mut() {
                    Some(active) => active,
                    None => {
                        return Err(CaptureError::InvalidState {
                            expected: "recording",
                            actual: CaptureState::Recording,
                        })
                    }
                };

                let devices = self.devices.devices().clone();
                if !devices.supports_format(target, &active.format) {
                    return Err(CaptureError::Validation(format!(
                        "{} camera cannot record {}",
                        target,
                        active.format.mime_type()
                    )));
                }

                // Flushes the last chunk of the old camera before the new recorder starts
                active.recorder.stop().await;

                let handoff = start_recorder_on(
                    &mut self.devices,
                    &devices,
                    target,
                    &active.format,
                    self.config.chunk_interval,
                    &active.chunk_tx,
                )
                .await;

                match handoff {
                    Ok(recorder) => active.recorder = recorder,
                    Err(e) => return Err(self.fail_recording(e).await),
                }
            }
        }

        tracing::info!("Switched camera to {}", target);
        self.facing = target;
        self.emit(CaptureEvent::CameraSwitched(target));
        Ok(target)
    }

    /// Finish the recording and release the stream
    pub async fn stop(&mut self) -> CaptureResult<CaptureSummary> {
        if self.state() != CaptureState::Recording || self.active.is_none() {
            return Err(self.invalid_state("recording"));
        }
        self.finish(SessionStatus::Completed)
            .await
            .ok_or_else(|| self.invalid_state("recording"))
    }

    /// Return to `Idle`, abandoning a recording in progress.
    ///
    /// An abandoned recording is marked failed; its chunks stay in the store.
    pub async fn release(&mut self) -> Option<CaptureSummary> {
        let summary = if self.active.is_some() {
            self.finish(SessionStatus::Failed).await
        } else {
            None
        };
        self.devices.release();
        self.set_state(CaptureState::Idle);
        summary
    }

    async fn fail_recording(&mut self, error: FatalCaptureError) -> CaptureError {
        tracing::error!("Recording aborted: {}", error);
        self.finish(SessionStatus::Failed).await;
        CaptureError::Fatal(error)
    }

    async fn finish(&mut self, status: SessionStatus) -> Option<CaptureSummary> {
        let ActiveRecording {
            session_id,
            format,
            started,
            mut recorder,
            chunk_tx,
            writer,
            ticker,
            next_index,
            metadata,
        } = self.active.take()?;

        recorder.stop().await;
        // Closing every sender lets the writer drain and exit
        drop(recorder);
        drop(chunk_tx);
        if let Err(e) = writer.await {
            tracing::warn!("Chunk writer for {} ended abnormally: {}", session_id, e);
        }
        ticker.abort();
        self.devices.release();

        let pending = std::mem::take(&mut *self.pending_persists.lock());
        for persist in pending {
            if let Err(e) = persist.await {
                tracing::warn!("Metadata write for {} ended abnormally: {}", session_id, e);
            }
        }

        let duration = started.elapsed();
        let snapshot = {
            let mut metadata = metadata.lock();
            metadata.status = status;
            metadata.end_time = Some(Utc::now());
            metadata.chunk_count = next_index.load(Ordering::SeqCst);
            metadata.clone()
        };

        if let Err(e) = self.metadata.save(&snapshot).await {
            tracing::warn!("Final metadata write for {} failed: {}", session_id, e);
            self.emit(CaptureEvent::PersistenceWarning(e.to_string()));
        }

        self.set_state(CaptureState::Stopped(status));
        self.emit(CaptureEvent::Stopped {
            session_id: session_id.clone(),
            status,
        });

        let summary = CaptureSummary {
            session_id,
            status,
            chunk_count: snapshot.chunk_count,
            duration_seconds: duration.as_secs_f64(),
            highlights: snapshot.highlight_events,
            format,
            memory_mode: self.chunks.is_using_memory_mode(),
        };
        tracing::info!(
            "Capture {} stopped ({:?}): {} chunks, {:.1}s",
            summary.session_id,
            status,
            summary.chunk_count,
            summary.duration_seconds
        );
        self.last_summary = Some(summary.clone());
        Some(summary)
    }

    fn persist_in_background(&self, snapshot: SessionMetadata) {
        let store = self.metadata.clone();
        let event_tx = self.event_tx.clone();
        let persist = tokio::spawn(async move {
            if let Err(e) = store.save(&snapshot).await {
                tracing::warn!("Metadata write for {} failed: {}", snapshot.session_id, e);
                let _ = event_tx.send(CaptureEvent::PersistenceWarning(e.to_string()));
            }
        });
        let mut pending = self.pending_persists.lock();
        pending.retain(|handle| !handle.is_finished());
        pending.push(persist);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.ticker.abort();
        }
    }
}

async fn start_recorder_on(
    manager: &mut DeviceStreamManager,
    devices: &Arc<dyn MediaDevices>,
    facing: FacingMode,
    format: &MediaFormat,
    interval: Duration,
    chunk_tx: &ChunkSender,
) -> Result<Box<dyn Recorder>, FatalCaptureError> {
    let stream = manager.switch_to(facing).await?;
    let mut recorder = devices.create_recorder(&stream, format)?;
    recorder.start(interval, chunk_tx.clone())?;
    Ok(recorder)
}

/// Persist chunks in arrival order, assigning indices from the session counter
fn spawn_writer(
    session_id: String,
    mut chunk_rx: mpsc::UnboundedReceiver<RecordedData>,
    next_index: Arc<AtomicU64>,
    metadata: Arc<Mutex<SessionMetadata>>,
    chunks: ChunkStore,
    metadata_store: SessionMetadataStore,
    event_tx: broadcast::Sender<CaptureEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(data) = chunk_rx.recv().await {
            let index = next_index.fetch_add(1, Ordering::SeqCst);

            match chunks
                .append(&session_id, index, data.payload, data.captured_at)
                .await
            {
                Ok(kind) => {
                    tracing::debug!("Chunk {} of {} stored ({:?})", index, session_id, kind);
                    let _ = event_tx.send(CaptureEvent::ChunkStored { index });
                }
                Err(e) => {
                    tracing::warn!("Chunk {} of {} was not stored: {}", index, session_id, e);
                    let _ = event_tx.send(CaptureEvent::PersistenceWarning(e.to_string()));
                }
            }

            if chunks.take_memory_mode_warning() {
                tracing::warn!("Storage fell back to memory during {}", session_id);
                let _ = event_tx.send(CaptureEvent::MemoryMode);
            }

            let snapshot = {
                let mut metadata = metadata.lock();
                metadata.chunk_count = index + 1;
                metadata.clone()
            };
            if let Err(e) = metadata_store.save(&snapshot).await {
                tracing::debug!("Chunk count update for {} skipped: {}", session_id, e);
            }
        }
    })
}

/// Broadcast elapsed time on a fixed tick, independent of chunk flushes
fn spawn_ticker(
    started: Instant,
    tick: Duration,
    event_tx: broadcast::Sender<CaptureEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let _ = event_tx.send(CaptureEvent::Duration(started.elapsed().as_secs_f64()));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Container, MockChunk, MockDevices, PlatformClass};
    use crate::storage::LocalStore;

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            chunk_interval: Duration::from_millis(20),
            duration_tick: Duration::from_millis(10),
            min_highlight_elapsed: Duration::from_millis(30),
            platform: PlatformClass::Standard,
            facing: FacingMode::Environment,
        }
    }

    fn fixture(
        config: CaptureConfig,
        store: LocalStore,
    ) -> (CaptureSession, Arc<MockDevices>, ChunkStore, SessionMetadataStore) {
        let devices = Arc::new(MockDevices::new());
        let store = Arc::new(store);
        let chunks = ChunkStore::new(store.clone());
        let metadata = SessionMetadataStore::new(store);
        let session = CaptureSession::new(config, devices.clone(), chunks.clone(), metadata.clone());
        (session, devices, chunks, metadata)
    }

    fn indices(chunks: &[crate::storage::Chunk]) -> Vec<u64> {
        chunks.iter().map(|c| c.index).collect()
    }

    #[tokio::test]
    async fn test_completed_session_has_contiguous_chunks() {
        let (mut session, devices, chunks, metadata) = fixture(fast_config(), LocalStore::volatile());

        session.start("s1").await.unwrap();
        assert_eq!(session.state(), CaptureState::Recording);
        tokio::time::sleep(Duration::from_millis(75)).await;
        let summary = session.stop().await.unwrap();

        assert_eq!(session.state(), CaptureState::Stopped(SessionStatus::Completed));
        assert_eq!(devices.active_streams(), 0);
        assert!(summary.chunk_count >= 3);

        let stored = chunks.read_all("s1").await.unwrap();
        let expected: Vec<u64> = (0..summary.chunk_count).collect();
        assert_eq!(indices(&stored), expected);

        let saved = metadata.get("s1").await.unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Completed);
        assert_eq!(saved.chunk_count, summary.chunk_count);
        assert!(saved.end_time.is_some());
    }

    #[tokio::test]
    async fn test_early_highlight_is_rejected() {
        let mut config = fast_config();
        config.min_highlight_elapsed = Duration::from_secs(60);
        let (mut session, _, _, _) = fixture(config, LocalStore::volatile());

        session.start("s1").await.unwrap();
        let err = session.mark_highlight(Some("too soon")).unwrap_err();

        assert!(matches!(err, CaptureError::Validation(_)));
        assert!(session.highlights().is_empty());
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_highlight_outside_recording_is_rejected() {
        let (session, _, _, _) = fixture(fast_config(), LocalStore::volatile());
        assert!(matches!(
            session.mark_highlight(None),
            Err(CaptureError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_highlights_are_kept_and_persisted() {
        let (mut session, _, _, metadata) = fixture(fast_config(), LocalStore::volatile());

        session.start("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let first = session.mark_highlight(Some("Smash")).unwrap();
        let second = session.mark_highlight(None).unwrap();
        let summary = session.stop().await.unwrap();

        assert!(first.timestamp_offset_seconds >= 0.03);
        assert_eq!(second.label, "Highlight 2");
        assert_eq!(summary.highlights, vec![first, second]);

        let saved = metadata.get("s1").await.unwrap().unwrap();
        assert_eq!(saved.highlight_events.len(), 2);
    }

    #[tokio::test]
    async fn test_camera_switch_continues_chunk_index() {
        let (mut session, devices, chunks, _) = fixture(fast_config(), LocalStore::volatile());

        session.start("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.switch_camera().await.unwrap(), FacingMode::User);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let summary = session.stop().await.unwrap();

        let stored = chunks.read_all("s1").await.unwrap();
        let expected: Vec<u64> = (0..summary.chunk_count).collect();
        assert_eq!(indices(&stored), expected);

        let facings: Vec<FacingMode> = stored
            .iter()
            .map(|c| MockChunk::decode(&c.payload).unwrap().facing)
            .collect();
        let switch_at = facings
            .iter()
            .position(|f| *f == FacingMode::User)
            .unwrap();
        assert!(switch_at > 0);
        assert!(facings[..switch_at].iter().all(|f| *f == FacingMode::Environment));
        assert!(facings[switch_at..].iter().all(|f| *f == FacingMode::User));
        assert_eq!(devices.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_switch_rejected_when_other_camera_lacks_format() {
        let (mut session, devices, _, _) = fixture(fast_config(), LocalStore::volatile());
        devices.set_supported(
            FacingMode::User,
            vec![crate::capture::MediaFormat::new(Container::Mp4, None)],
        );

        session.start("s1").await.unwrap();
        let err = session.switch_camera().await.unwrap_err();

        assert!(matches!(err, CaptureError::Validation(_)));
        assert_eq!(session.state(), CaptureState::Recording);
        assert_eq!(session.facing(), FacingMode::Environment);
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_switch_acquisition_fails_session() {
        let (mut session, devices, chunks, _) = fixture(fast_config(), LocalStore::volatile());
        devices.deny(FacingMode::User);

        session.start("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let err = session.switch_camera().await.unwrap_err();

        assert!(matches!(
            err,
            CaptureError::Fatal(FatalCaptureError::PermissionDenied(FacingMode::User))
        ));
        assert_eq!(session.state(), CaptureState::Stopped(SessionStatus::Failed));
        assert_eq!(devices.active_streams(), 0);
        assert!(!chunks.read_all("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied_releases_everything() {
        let (mut session, devices, _, _) = fixture(fast_config(), LocalStore::volatile());
        devices.deny(FacingMode::Environment);

        let err = session.start("s1").await.unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Fatal(FatalCaptureError::PermissionDenied(_))
        ));
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(devices.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_no_supported_format_is_fatal() {
        let (mut session, devices, _, _) = fixture(fast_config(), LocalStore::volatile());
        devices.set_supported(FacingMode::Environment, vec![]);

        let err = session.start("s1").await.unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Fatal(FatalCaptureError::UnsupportedEnvironment(_))
        ));
        assert_eq!(devices.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_start_reuses_armed_stream() {
        let (mut session, devices, _, _) = fixture(fast_config(), LocalStore::volatile());

        session.arm().await.unwrap();
        assert_eq!(session.state(), CaptureState::Armed);
        session.start("s1").await.unwrap();
        session.stop().await.unwrap();

        assert_eq!(devices.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_release_abandons_recording() {
        let (mut session, devices, _, metadata) = fixture(fast_config(), LocalStore::volatile());

        session.start("s1").await.unwrap();
        let summary = session.release().await.unwrap();

        assert_eq!(summary.status, SessionStatus::Failed);
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(devices.active_streams(), 0);
        assert_eq!(
            metadata.get("s1").await.unwrap().unwrap().status,
            SessionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_memory_mode_session_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = LocalStore::open(blocker.join("chunks")).await;

        let (mut session, _, chunks, _) = fixture(fast_config(), store);
        let mut events = session.subscribe();

        session.start("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let summary = session.stop().await.unwrap();

        assert!(summary.memory_mode);
        assert!(session.is_using_memory_mode());
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(
            chunks.read_all("s1").await.unwrap().len() as u64,
            summary.chunk_count
        );

        let mut memory_warnings = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CaptureEvent::MemoryMode) {
                memory_warnings += 1;
            }
        }
        assert_eq!(memory_warnings, 1);
    }

    #[tokio::test]
    async fn test_duration_ticks_while_recording() {
        let (mut session, _, _, _) = fixture(fast_config(), LocalStore::volatile());
        let mut events = session.subscribe();

        session.start("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        session.stop().await.unwrap();

        let mut ticks = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CaptureEvent::Duration(secs) = event {
                ticks.push(secs);
            }
        }
        assert!(ticks.len() >= 3);
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
        assert!(session.duration() >= Duration::from_millis(60));
    }

    /// Durable backing that stalls writes carrying highlights while recording
    struct SlowHighlightWrites {
        inner: crate::storage::MemoryStorage,
    }

    #[async_trait::async_trait]
    impl crate::storage::Storage for SlowHighlightWrites {
        fn kind(&self) -> crate::storage::StorageKind {
            crate::storage::StorageKind::Durable
        }

        async fn put_chunk(&self, chunk: &crate::storage::Chunk) -> Result<(), crate::storage::StorageError> {
            self.inner.put_chunk(chunk).await
        }

        async fn chunks(&self, session_id: &str) -> Result<Vec<crate::storage::Chunk>, crate::storage::StorageError> {
            self.inner.chunks(session_id).await
        }

        async fn put_metadata(&self, metadata: &SessionMetadata) -> Result<(), crate::storage::StorageError> {
            if metadata.status == SessionStatus::Recording && !metadata.highlight_events.is_empty() {
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            self.inner.put_metadata(metadata).await
        }

        async fn metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, crate::storage::StorageError> {
            self.inner.metadata(session_id).await
        }

        async fn remove_session(&self, session_id: &str) -> Result<(), crate::storage::StorageError> {
            self.inner.remove_session(session_id).await
        }
    }

    #[tokio::test]
    async fn test_slow_highlight_write_does_not_overwrite_final_status() {
        let backing = Arc::new(SlowHighlightWrites {
            inner: crate::storage::MemoryStorage::new(),
        });
        let store = LocalStore::with_durable(backing).await;
        let (mut session, _, _, metadata) = fixture(fast_config(), store);
        let mut events = session.subscribe();

        session.start("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        session.mark_highlight(None).unwrap();
        session.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let saved = metadata.get("s1").await.unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Completed);
        assert!(saved.end_time.is_some());
        assert_eq!(saved.highlight_events.len(), 1);

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, CaptureEvent::PersistenceWarning(_)));
        }
    }
}
