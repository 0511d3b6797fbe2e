//! Mock media backend for testing without camera hardware.
//!
//! Streams are plain counters and recorders emit small synthetic payloads
//! on a tokio timer, which makes the full capture path runnable in CI.

use super::format::candidates;
use super::traits::{ChunkSender, MediaDevices, Recorder};
use super::types::{FacingMode, FatalCaptureError, MediaFormat, PlatformClass, RecordedData, StreamHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Synthetic chunk payload produced by [`MockDevices`] recorders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockChunk {
    pub facing: FacingMode,
    pub stream_id: u64,
    pub duration_ms: u64,
}

impl MockChunk {
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "mock-chunk facing={} stream={} ms={}",
            self.facing, self.stream_id, self.duration_ms
        )
        .into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;
        let mut parts = text.strip_prefix("mock-chunk ")?.split(' ');

        let facing = match parts.next()?.strip_prefix("facing=")? {
            "user" => FacingMode::User,
            "environment" => FacingMode::Environment,
            _ => return None,
        };
        let stream_id = parts.next()?.strip_prefix("stream=")?.parse().ok()?;
        let duration_ms = parts.next()?.strip_prefix("ms=")?.parse().ok()?;

        Some(Self {
            facing,
            stream_id,
            duration_ms,
        })
    }
}

#[derive(Default)]
struct MockState {
    denied: HashSet<FacingMode>,
    missing: HashSet<FacingMode>,
    busy: bool,
    supported: HashMap<FacingMode, Vec<MediaFormat>>,
    active: HashSet<u64>,
}

/// In-process camera backend
#[derive(Default)]
pub struct MockDevices {
    state: Mutex<MockState>,
    next_id: AtomicU64,
    open_calls: AtomicUsize,
}

impl MockDevices {
    /// Every camera present, permitted, and able to record every candidate format
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject permission for one camera
    pub fn deny(&self, facing: FacingMode) {
        self.state.lock().denied.insert(facing);
    }

    /// Pretend one camera does not exist
    pub fn remove(&self, facing: FacingMode) {
        self.state.lock().missing.insert(facing);
    }

    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    /// Restrict the formats one camera can record
    pub fn set_supported(&self, facing: FacingMode, formats: Vec<MediaFormat>) {
        self.state.lock().supported.insert(facing, formats);
    }

    /// Number of times a stream was opened
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Number of streams opened and not yet closed
    pub fn active_streams(&self) -> usize {
        self.state.lock().active.len()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn open(&self, facing: FacingMode) -> Result<StreamHandle, FatalCaptureError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();

        if state.missing.contains(&facing) {
            return Err(FatalCaptureError::DeviceNotFound(facing));
        }
        if state.denied.contains(&facing) {
            return Err(FatalCaptureError::PermissionDenied(facing));
        }
        if state.busy {
            return Err(FatalCaptureError::DeviceBusy(format!("{} camera in use", facing)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        state.active.insert(id);
        Ok(StreamHandle { id, facing })
    }

    fn close(&self, stream: &StreamHandle) {
        self.state.lock().active.remove(&stream.id);
    }

    fn supports_format(&self, facing: FacingMode, format: &MediaFormat) -> bool {
        match self.state.lock().supported.get(&facing) {
            Some(formats) => formats.contains(format),
            None => candidates(PlatformClass::Standard).contains(format),
        }
    }

    fn create_recorder(
        &self,
        stream: &StreamHandle,
        format: &MediaFormat,
    ) -> Result<Box<dyn Recorder>, FatalCaptureError> {
        if !self.state.lock().active.contains(&stream.id) {
            return Err(FatalCaptureError::DeviceBusy(format!(
                "stream {} is not live",
                stream.id
            )));
        }
        if !self.supports_format(stream.facing, format) {
            return Err(FatalCaptureError::UnsupportedEnvironment(format!(
                "{} cannot record {}",
                stream.facing,
                format.mime_type()
            )));
        }
        Ok(Box::new(MockRecorder::new(stream.clone())))
    }
}

/// Timer-driven recorder emitting [`MockChunk`] payloads
pub struct MockRecorder {
    stream: StreamHandle,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MockRecorder {
    fn new(stream: StreamHandle) -> Self {
        Self {
            stream,
            stop_tx: None,
            task: None,
        }
    }
}

#[async_trait]
impl Recorder for MockRecorder {
    fn start(&mut self, interval: Duration, on_chunk: ChunkSender) -> Result<(), FatalCaptureError> {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let stream = self.stream.clone();

        let emit = move |elapsed: Duration| {
            let chunk = MockChunk {
                facing: stream.facing,
                stream_id: stream.id,
                duration_ms: elapsed.as_millis() as u64,
            };
            let _ = on_chunk.send(RecordedData::new(chunk.encode()));
        };

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut last_flush = Instant::now();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        emit(last_flush.elapsed());
                        last_flush = Instant::now();
                    }
                    _ = &mut stop_rx => {
                        // Final partial buffer
                        let remaining = last_flush.elapsed();
                        if !remaining.is_zero() {
                            emit(remaining);
                        }
                        break;
                    }
                }
            }
        }));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MockRecorder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
