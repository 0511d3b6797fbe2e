//! FFmpeg toolchain for merging
//!
//! Runs `ffmpeg`/`ffprobe` as child processes. The concat demuxer stitches
//! the staged chunks together and a single encode pass writes a faststart
//! MP4 so playback can begin before the whole file is downloaded.

use super::toolchain::{Toolchain, TranscodeRequest};
use super::types::{EncodeParams, MergeError};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// FFmpeg binaries used for merging
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegToolchain {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegToolchain {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn version_of(binary: &Path) -> Result<String, MergeError> {
        let output = Command::new(binary)
            .arg("-version")
            .output()
            .map_err(|e| MergeError::Toolchain(format!("Failed to run {:?}: {}", binary, e)))?;

        if !output.status.success() {
            return Err(MergeError::Toolchain(format!(
                "{:?} -version exited with {}",
                binary, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Duration of `input`, optionally read through the concat demuxer
    fn probe(&self, input: &Path, concat: bool) -> Result<f64, MergeError> {
        let mut args: Vec<String> = vec!["-v".into(), "error".into()];
        if concat {
            args.extend(["-f".into(), "concat".into(), "-safe".into(), "0".into()]);
        }
        args.extend([
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            "-i".into(),
            input.to_string_lossy().to_string(),
        ]);

        let output = Command::new(&self.ffprobe)
            .args(&args)
            .output()
            .map_err(|e| MergeError::Toolchain(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MergeError::Processing(format!("ffprobe failed: {}", stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| MergeError::Processing(format!("Unexpected ffprobe output: {}", stdout)))
    }
}

/// Arguments for the concat + transcode pass
pub fn transcode_args(manifest: &Path, output: &Path, params: &EncodeParams) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest.to_string_lossy().to_string(),
        "-c:v".to_string(),
        params.video_codec.to_string(),
        "-preset".to_string(),
        params.speed_preset.to_string(),
        "-crf".to_string(),
        params.crf.to_string(),
        "-maxrate".to_string(),
        params.video_bitrate.to_string(),
        "-bufsize".to_string(),
        params.video_bitrate.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        params.audio_codec.to_string(),
        "-b:a".to_string(),
        params.audio_bitrate.to_string(),
        // Move moov atom to start for streaming
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Encoded seconds from an `-progress` line (`out_time_us`/`out_time_ms`, both microseconds)
fn parse_progress_seconds(line: &str) -> Option<f64> {
    let value = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?;
    value.trim().parse::<f64>().ok().map(|us| us / 1_000_000.0)
}

/// Kill a running FFmpeg and reap it along with its stderr reader
fn stop_process(process: &mut Child, stderr_reader: JoinHandle<String>) {
    let _ = process.kill();
    let _ = process.wait();
    let _ = stderr_reader.join();
}

/// Last few lines of FFmpeg's stderr
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    lines[lines.len().saturating_sub(5)..].join("\n")
}

impl Toolchain for FfmpegToolchain {
    fn load(&self) -> Result<String, MergeError> {
        let version = Self::version_of(&self.ffmpeg)?;
        Self::version_of(&self.ffprobe)?;
        tracing::info!("Loaded toolchain: {}", version);
        Ok(version)
    }

    fn transcode(
        &self,
        request: &TranscodeRequest<'_>,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<(), MergeError> {
        let total_seconds = match self.probe(request.manifest, true) {
            Ok(seconds) => Some(seconds),
            Err(e) => {
                tracing::warn!("Could not probe merge input duration: {}", e);
                None
            }
        };

        let args = transcode_args(request.manifest, request.output, request.params);
        tracing::info!("Starting FFmpeg merge: {:?}", args);

        let mut process = Command::new(&self.ffmpeg)
            .args(&args)
            .current_dir(request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MergeError::Toolchain(format!("Failed to start FFmpeg: {}", e)))?;

        // Drain stderr on its own thread so a chatty encode cannot block on a full pipe
        let stderr = process.stderr.take();
        let stderr_reader = std::thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut text);
            }
            text
        });

        let stdout = match process.stdout.take() {
            Some(stdout) => stdout,
            None => {
                stop_process(&mut process, stderr_reader);
                return Err(MergeError::Toolchain(
                    "Failed to capture FFmpeg stdout".to_string(),
                ));
            }
        };

        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Lost FFmpeg progress output: {}", e);
                    stop_process(&mut process, stderr_reader);
                    return Err(e.into());
                }
            };

            if cancel.load(Ordering::Relaxed) {
                tracing::info!("Cancelling FFmpeg merge");
                stop_process(&mut process, stderr_reader);
                return Err(MergeError::Cancelled);
            }

            if let (Some(done), Some(total)) = (parse_progress_seconds(&line), total_seconds) {
                if total > 0.0 {
                    on_progress((done / total).clamp(0.0, 1.0) as f32);
                }
            }
        }

        let status = process.wait()?;
        let stderr = stderr_reader.join().unwrap_or_default();

        if cancel.load(Ordering::Relaxed) {
            return Err(MergeError::Cancelled);
        }
        if !status.success() {
            return Err(MergeError::Processing(format!(
                "FFmpeg exited with error: {}",
                stderr_tail(&stderr)
            )));
        }

        on_progress(1.0);
        Ok(())
    }

    fn probe_duration(&self, media: &Path) -> Result<f64, MergeError> {
        self.probe(media, false)
    }

    fn extract_frame(&self, media: &Path, at_seconds: f64, output: &Path) -> Result<(), MergeError> {
        let output_status = Command::new(&self.ffmpeg)
            .args([
                "-y".to_string(),
                "-ss".to_string(),
                format!("{:.3}", at_seconds),
                "-i".to_string(),
                media.to_string_lossy().to_string(),
                "-frames:v".to_string(),
                "1".to_string(),
                "-c:v".to_string(),
                "png".to_string(),
                "-f".to_string(),
                "image2".to_string(),
                output.to_string_lossy().to_string(),
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| MergeError::Toolchain(format!("Failed to start FFmpeg: {}", e)))?;

        if !output_status.status.success() {
            let stderr = String::from_utf8_lossy(&output_status.stderr);
            return Err(MergeError::Processing(format!(
                "Thumbnail extraction failed: {}",
                stderr_tail(&stderr)
            )));
        }
        Ok(())
    }
}
