//! In-memory collaborators for testing without a backend service.

use super::traits::{ObjectStore, RecordStore};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A stored object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Object store keeping everything in a map
pub struct MemoryObjectStore {
    base_url: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    failures: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://objects")
    }
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` uploads
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Sleep before every upload
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.objects.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Consume one injected failure, if any are left
fn take_failure(failures: &AtomicUsize) -> bool {
    failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.failures) {
            bail!("object store unavailable");
        }

        self.objects.lock().insert(
            path.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("{}/{}", self.base_url, path))
    }
}

/// Record store keeping rows per collection
#[derive(Default)]
pub struct MemoryRecordStore {
    rows: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    failures: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` inserts
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Sleep before every insert
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self, collection: &str) -> Vec<serde_json::Value> {
        self.rows.lock().get(collection).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, collection: &str, row: serde_json::Value) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.failures) {
            bail!("records store rejected the insert");
        }
        self.rows
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(row);
        Ok(())
    }
}
