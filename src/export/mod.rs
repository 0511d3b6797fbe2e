//! Merge module
//!
//! Turns the ordered chunks of one session into a single web-playable
//! artifact plus a thumbnail, using an injected codec toolchain.

pub mod ffmpeg;
pub mod mock;
pub mod pipeline;
pub mod toolchain;
pub mod types;

pub use ffmpeg::FfmpegToolchain;
pub use mock::MockToolchain;
pub use pipeline::MergeEngine;
pub use toolchain::{Toolchain, TranscodeRequest};
pub use types::{
    Artifact, EncodeParams, MergeError, MergeJob, MergeOutput, MergeProgress, MergeStage,
    QualityPreset, Thumbnail,
};
