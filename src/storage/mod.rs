//! Local session storage
//!
//! Chunk and metadata persistence over a durable backing with an automatic,
//! permanent fallback to process memory.

pub mod backend;
pub mod chunks;
pub mod file;
pub mod local;
pub mod locks;
pub mod memory;
pub mod metadata;
pub mod types;

pub use backend::Storage;
pub use chunks::{ChunkLease, ChunkStore};
pub use file::FileStorage;
pub use local::LocalStore;
pub use locks::{SessionGuard, SessionLocks};
pub use memory::MemoryStorage;
pub use metadata::SessionMetadataStore;
pub use types::{chunk_key, Chunk, StorageError, StorageKind};
