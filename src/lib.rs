//! CourtCam - resilient court-side capture.
//!
//! This is the library crate behind the CourtCam recorder. It captures a
//! camera feed in fixed-interval chunks that are persisted locally as they
//! arrive, lets the operator mark highlights, and later merges the chunks
//! into one web-playable video that is uploaded and recorded remotely.
//! Media devices, the codec toolchain and the remote stores are injected.

pub mod capture;
pub mod config;
pub mod delivery;
pub mod export;
pub mod recorder;
pub mod storage;
pub mod upload;
pub mod utils;

pub use config::PipelineConfig;
pub use delivery::{Delivery, DeliveryProgress, DeliveryRequest};
pub use utils::error::{AppError, AppResult, ErrorResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging
///
/// Honors `RUST_LOG`; defaults to debug output for this crate. Safe to call
/// more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courtcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::info!("Starting CourtCam v{}", env!("CARGO_PKG_VERSION"));
}
