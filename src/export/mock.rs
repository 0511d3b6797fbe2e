//! Mock toolchain for testing without FFmpeg.
//!
//! Understands the synthetic payloads written by [`MockDevices`] recorders:
//! "transcoding" sums their durations and the output is a small text marker
//! that [`MockToolchain::probe_duration`] reads back.
//!
//! [`MockDevices`]: crate::capture::MockDevices

use super::toolchain::{parse_manifest, Toolchain, TranscodeRequest};
use super::types::MergeError;
use crate::capture::MockChunk;
use std::fs;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const OUTPUT_PREFIX: &str = "fake-mp4 duration=";

/// Scriptable stand-in for a codec toolchain
#[derive(Default)]
pub struct MockToolchain {
    fail_load: AtomicBool,
    fail_transcode: AtomicBool,
    /// Milliseconds spent on each input during `transcode`
    input_delay_ms: AtomicU64,
    load_calls: AtomicUsize,
    transcode_calls: AtomicUsize,
}

impl MockToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `load` fail with a toolchain error
    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Make every `transcode` fail with a processing error
    pub fn fail_transcode(&self, fail: bool) {
        self.fail_transcode.store(fail, Ordering::SeqCst);
    }

    /// Spend `delay` on every input while transcoding, honouring cancel
    pub fn set_transcode_delay(&self, delay: Duration) {
        self.input_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn transcode_calls(&self) -> usize {
        self.transcode_calls.load(Ordering::SeqCst)
    }
}

/// Write a solid grey PNG
fn write_png(path: &Path, width: u32, height: u32) -> Result<(), MergeError> {
    let file = fs::File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);

    let data = vec![0x80u8; (width * height * 3) as usize];
    encoder
        .write_header()
        .and_then(|mut writer| {
            writer.write_image_data(&data)?;
            writer.finish()
        })
        .map_err(|e| MergeError::Processing(format!("Failed to write thumbnail: {}", e)))
}

impl Toolchain for MockToolchain {
    fn load(&self) -> Result<String, MergeError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(MergeError::Toolchain("mock toolchain unavailable".to_string()));
        }
        Ok("mock-toolchain 1.0".to_string())
    }

    fn transcode(
        &self,
        request: &TranscodeRequest<'_>,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<(), MergeError> {
        self.transcode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transcode.load(Ordering::SeqCst) {
            return Err(MergeError::Processing("mock transcode failed".to_string()));
        }

        let manifest = fs::read_to_string(request.manifest)?;
        let inputs = parse_manifest(&manifest);
        if inputs.is_empty() {
            return Err(MergeError::Processing("empty manifest".to_string()));
        }

        let delay = Duration::from_millis(self.input_delay_ms.load(Ordering::SeqCst));
        let mut total_ms = 0u64;
        for (i, name) in inputs.iter().enumerate() {
            let mut waited = Duration::ZERO;
            loop {
                if cancel.load(Ordering::SeqCst) {
                    return Err(MergeError::Cancelled);
                }
                if waited >= delay {
                    break;
                }
                let slice = (delay - waited).min(Duration::from_millis(10));
                thread::sleep(slice);
                waited += slice;
            }

            let payload = fs::read(request.work_dir.join(name))?;
            let chunk = MockChunk::decode(&payload).ok_or_else(|| {
                MergeError::Processing(format!("{} is not a recognizable media chunk", name))
            })?;
            total_ms += chunk.duration_ms;
            on_progress((i + 1) as f32 / inputs.len() as f32);
        }

        let seconds = total_ms as f64 / 1000.0;
        fs::write(request.output, format!("{}{}", OUTPUT_PREFIX, seconds))?;
        Ok(())
    }

    fn probe_duration(&self, media: &Path) -> Result<f64, MergeError> {
        let text = fs::read_to_string(media)?;
        text.trim()
            .strip_prefix(OUTPUT_PREFIX)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MergeError::Processing(format!("Cannot probe {:?}", media)))
    }

    fn extract_frame(&self, media: &Path, at_seconds: f64, output: &Path) -> Result<(), MergeError> {
        let duration = self.probe_duration(media)?;
        if at_seconds > duration {
            return Err(MergeError::Processing(format!(
                "Seek {}s is past the end ({}s)",
                at_seconds, duration
            )));
        }
        write_png(output, 64, 36)
    }
}
