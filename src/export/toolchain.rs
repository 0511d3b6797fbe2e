//! Codec toolchain capability
//!
//! The merge engine only needs four things from a toolchain: prove it can
//! run here, concatenate-and-transcode from a manifest, probe a duration,
//! and grab a still frame.

use super::types::{EncodeParams, MergeError};
use std::path::Path;
use std::sync::atomic::AtomicBool;

/// Inputs for one encode pass
pub struct TranscodeRequest<'a> {
    /// Directory holding the staged inputs; manifest entries are relative to it
    pub work_dir: &'a Path,
    /// Concat manifest, one `file '<name>'` line per input
    pub manifest: &'a Path,
    pub output: &'a Path,
    pub params: &'a EncodeParams,
}

/// Blocking codec toolchain. Called off the async runtime.
pub trait Toolchain: Send + Sync {
    /// Check the toolchain is usable and return its version string
    fn load(&self) -> Result<String, MergeError>;

    /// Concatenate the manifest inputs and encode them into `output`.
    ///
    /// `on_progress` receives the encoded fraction in `[0, 1]`. The encode
    /// must stop with [`MergeError::Cancelled`] once `cancel` is set.
    fn transcode(
        &self,
        request: &TranscodeRequest<'_>,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<(), MergeError>;

    /// Media duration in seconds
    fn probe_duration(&self, media: &Path) -> Result<f64, MergeError>;

    /// Write one PNG frame taken `at_seconds` into `media`
    fn extract_frame(&self, media: &Path, at_seconds: f64, output: &Path) -> Result<(), MergeError>;
}

/// Escape a file name for a concat manifest line
pub fn manifest_entry(name: &str) -> String {
    format!("file '{}'", name.replace('\'', r"'\''"))
}

/// Build the concat manifest for inputs in order
pub fn build_manifest<S: AsRef<str>>(names: &[S]) -> String {
    let mut manifest = names
        .iter()
        .map(|n| manifest_entry(n.as_ref()))
        .collect::<Vec<_>>()
        .join("\n");
    manifest.push('\n');
    manifest
}

/// Parse a concat manifest back into input names
pub fn parse_manifest(manifest: &str) -> Vec<String> {
    manifest
        .lines()
        .filter_map(|line| line.trim().strip_prefix("file '")?.strip_suffix('\'').map(str::to_string))
        .map(|name| name.replace(r"'\''", "'"))
        .collect()
}
