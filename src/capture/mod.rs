//! Camera capture
//!
//! Device stream management, codec negotiation and the recorder capability.

pub mod device;
pub mod format;
pub mod mock;
pub mod traits;
pub mod types;

pub use device::DeviceStreamManager;
pub use format::negotiate;
pub use mock::{MockChunk, MockDevices};
pub use traits::{ChunkSender, MediaDevices, Recorder};
pub use types::{
    Container, FacingMode, FatalCaptureError, MediaFormat, PlatformClass, RecordedData,
    StreamHandle,
};
