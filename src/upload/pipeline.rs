//! Upload pipeline
//!
//! Strictly ordered: transfer the artifact, publish the thumbnail, write the
//! record, and only then purge the local session. A failure anywhere before
//! the purge leaves every local chunk in place so the upload can be retried.

use super::retry::{with_timeout_retry, with_timeout_retry_on_error};
use super::traits::{ObjectStore, RecordStore};
use super::types::{
    UploadConfig, UploadError, UploadOutcome, UploadProgress, UploadRecord, UploadRequest,
    UploadStage,
};
use crate::export::Thumbnail;
use crate::storage::{ChunkStore, StorageError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Object path for an artifact: `{root}/{ownerId}/{sessionId}.{ext}`
pub fn object_path(root: &str, owner_id: &str, session_id: &str, extension: &str) -> String {
    format!(
        "{}/{}/{}.{}",
        root.trim_end_matches('/'),
        urlencoding::encode(owner_id),
        urlencoding::encode(session_id),
        extension
    )
}

/// Swap the extension of the last path segment of a path or URL
pub fn replace_extension(location: &str, extension: &str) -> String {
    let segment_start = location.rfind('/').map_or(0, |i| i + 1);
    let stem_end = location[segment_start..]
        .rfind('.')
        .map_or(location.len(), |i| segment_start + i);
    format!("{}.{}", &location[..stem_end], extension)
}

/// Publishes merged sessions and purges them locally
pub struct UploadPipeline {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    chunks: ChunkStore,
    config: UploadConfig,
}

impl UploadPipeline {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        chunks: ChunkStore,
        config: UploadConfig,
    ) -> Self {
        Self {
            objects,
            records,
            chunks,
            config,
        }
    }

    /// Upload one artifact and record it.
    ///
    /// The session's local data stays leased for the whole run. `cancel` is
    /// honored up to the record write; once the record exists the run
    /// completes.
    pub async fn run<F>(
        &self,
        request: UploadRequest,
        cancel: &AtomicBool,
        progress: F,
    ) -> Result<UploadOutcome, UploadError>
    where
        F: Fn(UploadProgress),
    {
        let lease = self.chunks.lease(&request.session_id).map_err(|e| match e {
            StorageError::SessionBusy(id) => UploadError::Busy(id),
            other => UploadError::Transfer(other.to_string()),
        })?;

        tracing::info!(
            "Uploading session {} ({} bytes)",
            request.session_id,
            request.artifact.bytes.len()
        );

        // 1. Artifact
        check_cancelled(cancel)?;
        progress(UploadStage::Uploading.into());

        let container = request.artifact.container;
        let video_path = object_path(
            &self.config.object_root,
            &request.owner_id,
            &request.session_id,
            container.extension(),
        );
        let video_url = with_timeout_retry(self.config.network_timeout, "video upload", || {
            self.objects
                .upload(&video_path, &request.artifact.bytes, container.content_type())
        })
        .await
        .map_err(|e| UploadError::Transfer(format!("{:#}", e)))?;
        tracing::debug!("Uploaded {} -> {}", video_path, video_url);

        // 2. Thumbnail, published next to the artifact
        check_cancelled(cancel)?;
        progress(UploadStage::RemoteProcessing.into());

        let thumbnail_url = replace_extension(&video_url, Thumbnail::EXTENSION);
        if let Some(thumbnail) = &request.thumbnail {
            let thumbnail_path = replace_extension(&video_path, Thumbnail::EXTENSION);
            with_timeout_retry(self.config.network_timeout, "thumbnail upload", || {
                self.objects
                    .upload(&thumbnail_path, &thumbnail.bytes, Thumbnail::CONTENT_TYPE)
            })
            .await
            .map_err(|e| UploadError::Transfer(format!("{:#}", e)))?;
        }

        // 3. Record
        check_cancelled(cancel)?;
        progress(UploadStage::SavingRecord.into());

        let record = UploadRecord {
            owner_id: request.owner_id.clone(),
            video_url,
            thumbnail_url,
            title: request.title.clone(),
            court_id: request.court_id.clone(),
            highlight_events: request.highlight_events.clone(),
            duration_seconds: request.duration_seconds,
        };
        let row = serde_json::to_value(&record).map_err(|e| UploadError::Record(e.to_string()))?;
        let collection = self.config.records_collection.as_str();
        // A timed-out insert may have landed; repeating it could write the row twice
        with_timeout_retry_on_error(self.config.network_timeout, "record insert", || {
            self.records.insert(collection, row.clone())
        })
        .await
        .map_err(|e| UploadError::Record(format!("{:#}", e)))?;
        tracing::info!("Recorded upload for session {}", request.session_id);

        // 4. Purge; the upload already succeeded, so a failure here is only logged
        let purged = match lease.clear().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Uploaded session {} but could not purge local data: {}",
                    request.session_id,
                    e
                );
                false
            }
        };

        progress(UploadStage::Done.into());
        Ok(UploadOutcome { record, purged })
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<(), UploadError> {
    if cancel.load(Ordering::Relaxed) {
        return Err(UploadError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Container;
    use crate::export::Artifact;
    use crate::recorder::SessionMetadata;
    use crate::storage::{Chunk, LocalStore, MemoryStorage, Storage, StorageKind};
    use crate::upload::{MemoryObjectStore, MemoryRecordStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Durable backing that counts purges
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        removals: AtomicUsize,
    }

    #[async_trait]
    impl Storage for CountingStorage {
        fn kind(&self) -> StorageKind {
            StorageKind::Durable
        }

        async fn put_chunk(&self, chunk: &Chunk) -> Result<(), StorageError> {
            self.inner.put_chunk(chunk).await
        }

        async fn chunks(&self, session_id: &str) -> Result<Vec<Chunk>, StorageError> {
            self.inner.chunks(session_id).await
        }

        async fn put_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError> {
            self.inner.put_metadata(metadata).await
        }

        async fn metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
            self.inner.metadata(session_id).await
        }

        async fn remove_session(&self, session_id: &str) -> Result<(), StorageError> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            self.inner.remove_session(session_id).await
        }
    }

    struct Fixture {
        backing: Arc<CountingStorage>,
        chunks: ChunkStore,
        objects: Arc<MemoryObjectStore>,
        records: Arc<MemoryRecordStore>,
        pipeline: UploadPipeline,
    }

    async fn fixture() -> Fixture {
        let backing = Arc::new(CountingStorage::default());
        let store = Arc::new(LocalStore::with_durable(backing.clone()).await);
        let chunks = ChunkStore::new(store);
        for index in 0..3 {
            chunks
                .append("s1", index, vec![index as u8], Utc::now())
                .await
                .unwrap();
        }

        let objects = Arc::new(MemoryObjectStore::new("https://cdn.example"));
        let records = Arc::new(MemoryRecordStore::new());
        let pipeline = UploadPipeline::new(
            objects.clone(),
            records.clone(),
            chunks.clone(),
            UploadConfig {
                network_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        );
        Fixture {
            backing,
            chunks,
            objects,
            records,
            pipeline,
        }
    }

    fn request() -> UploadRequest {
        UploadRequest {
            owner_id: "user 1".to_string(),
            session_id: "s1".to_string(),
            title: "Morning rally".to_string(),
            court_id: Some("court-7".to_string()),
            highlight_events: vec![6.0, 21.5],
            duration_seconds: 28.0,
            artifact: Artifact {
                bytes: b"mp4".to_vec(),
                container: Container::Mp4,
                video_codec: "libx264".to_string(),
                audio_codec: "aac".to_string(),
                duration_seconds: 28.0,
            },
            thumbnail: Some(Thumbnail {
                bytes: b"png".to_vec(),
                width: 64,
                height: 36,
            }),
        }
    }

    #[test]
    fn test_object_path_encodes_ids() {
        assert_eq!(
            object_path("recordings/", "user 1", "s/1", "mp4"),
            "recordings/user%201/s%2F1.mp4"
        );
    }

    #[test]
    fn test_replace_extension() {
        assert_eq!(
            replace_extension("https://cdn/r/u/s1.mp4", "png"),
            "https://cdn/r/u/s1.png"
        );
        assert_eq!(replace_extension("https://cdn.io/r/s1", "png"), "https://cdn.io/r/s1.png");
    }

    #[tokio::test]
    async fn test_success_writes_one_record_and_purges_once() {
        let f = fixture().await;
        let seen = Mutex::new(Vec::new());

        let outcome = f
            .pipeline
            .run(request(), &AtomicBool::new(false), |p| seen.lock().push(p))
            .await
            .unwrap();

        assert!(outcome.purged);
        assert_eq!(outcome.record.video_url, "https://cdn.example/recordings/user%201/s1.mp4");
        assert_eq!(outcome.record.thumbnail_url, "https://cdn.example/recordings/user%201/s1.png");
        assert_eq!(
            f.objects.paths(),
            vec!["recordings/user%201/s1.mp4", "recordings/user%201/s1.png"]
        );

        let rows = f.records.rows("videos");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["courtId"], "court-7");
        assert_eq!(rows[0]["durationSeconds"], 28.0);

        assert_eq!(f.backing.removals.load(Ordering::SeqCst), 1);
        assert!(f.chunks.read_all("s1").await.unwrap().is_empty());

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(seen.last().map(|p| p.stage), Some(UploadStage::Done));
    }

    #[tokio::test]
    async fn test_record_failure_keeps_local_chunks() {
        let f = fixture().await;
        f.records.fail_next(2);

        let err = f
            .pipeline
            .run(request(), &AtomicBool::new(false), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Record(_)));
        assert_eq!(f.backing.removals.load(Ordering::SeqCst), 0);
        assert_eq!(f.chunks.read_all("s1").await.unwrap().len(), 3);

        // Retry from scratch succeeds
        let outcome = f
            .pipeline
            .run(request(), &AtomicBool::new(false), |_| {})
            .await
            .unwrap();
        assert!(outcome.purged);
        assert_eq!(f.records.rows("videos").len(), 1);
    }

    #[tokio::test]
    async fn test_transient_transfer_failure_is_retried_once() {
        let f = fixture().await;
        f.objects.fail_next(1);

        f.pipeline
            .run(request(), &AtomicBool::new(false), |_| {})
            .await
            .unwrap();
        assert_eq!(f.objects.calls(), 3);
    }

    #[tokio::test]
    async fn test_transfer_failure_is_typed_and_keeps_chunks() {
        let f = fixture().await;
        f.objects.fail_next(2);

        let err = f
            .pipeline
            .run(request(), &AtomicBool::new(false), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transfer(_)));
        assert!(f.records.rows("videos").is_empty());
        assert_eq!(f.chunks.read_all("s1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_before_start_touches_nothing() {
        let f = fixture().await;

        let err = f
            .pipeline
            .run(request(), &AtomicBool::new(true), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(f.objects.calls(), 0);
        assert_eq!(f.chunks.read_all("s1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_leased_session_cannot_be_cleared_elsewhere() {
        let f = fixture().await;
        let _lease = f.chunks.lease("s1").unwrap();

        let err = f
            .pipeline
            .run(request(), &AtomicBool::new(false), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Busy(_)));
        assert!(matches!(
            f.chunks.clear("s1").await,
            Err(StorageError::SessionBusy(_))
        ));
    }

    #[tokio::test]
    async fn test_timed_out_record_insert_is_not_repeated() {
        let f = fixture().await;
        f.records.set_delay(Some(Duration::from_secs(3)));

        let err = f
            .pipeline
            .run(request(), &AtomicBool::new(false), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Record(ref msg) if msg.contains("timed out")));
        assert_eq!(f.records.calls(), 1);
        assert_eq!(f.backing.removals.load(Ordering::SeqCst), 0);
        assert_eq!(f.chunks.read_all("s1").await.unwrap().len(), 3);
    }
}
