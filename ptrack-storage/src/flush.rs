//! Coalesced persistence of conversation metadata.
//!
//! Mutations never write durably themselves. They hand the latest snapshot
//! of the store to a [`FlushScheduler`] and return; the scheduler decides
//! when the snapshot reaches a [`MetadataSink`]. Only the newest snapshot
//! inside a coalescing window is written.
//!
//! # Ordering
//!
//! Writes go through a single async mutex, so a snapshot taken earlier can
//! never be persisted after one taken later. Nothing guarantees a pending
//! snapshot survives a crash before its window elapses.

use async_trait::async_trait;
use ptrack_core::{TrackerError, TrackerResult};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Schedules durable writes of the record store.
#[async_trait]
pub trait FlushScheduler: Send + Sync {
    /// Queue `snapshot` for writing and return immediately.
    ///
    /// A later call before the write happens replaces the queued snapshot.
    fn schedule_flush(&self, snapshot: Value);

    /// Write any queued snapshot now and wait for the write to finish.
    async fn flush(&self);
}

/// Durable home of conversation metadata.
///
/// Stores are rebuilt from [`MetadataSink::load`], so a sink must hand back
/// what it was last given.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    /// Persist `value` under `metadata_key` in the conversation's metadata.
    async fn persist(
        &self,
        conversation_id: &str,
        metadata_key: &str,
        value: Value,
    ) -> TrackerResult<()>;

    /// Value last persisted under `metadata_key`, or `None` if there is none.
    async fn load(&self, conversation_id: &str, metadata_key: &str) -> TrackerResult<Option<Value>>;
}

#[async_trait]
impl<T: MetadataSink + ?Sized> MetadataSink for Arc<T> {
    async fn persist(
        &self,
        conversation_id: &str,
        metadata_key: &str,
        value: Value,
    ) -> TrackerResult<()> {
        (**self).persist(conversation_id, metadata_key, value).await
    }

    async fn load(&self, conversation_id: &str, metadata_key: &str) -> TrackerResult<Option<Value>> {
        (**self).load(conversation_id, metadata_key).await
    }
}

// ============================================================================
// DEBOUNCED FLUSHER
// ============================================================================

/// Flush scheduler with a fixed coalescing window.
///
/// The first `schedule_flush` arms a timer task on the current tokio
/// runtime; further calls inside the window only replace the pending
/// snapshot. When called outside a runtime the snapshot stays pending until
/// the next explicit [`FlushScheduler::flush`].
pub struct DebouncedFlusher<S: MetadataSink + 'static> {
    inner: Arc<FlushInner<S>>,
}

struct FlushInner<S> {
    sink: S,
    conversation_id: String,
    metadata_key: String,
    window: Duration,
    pending: Mutex<Option<Value>>,
    armed: AtomicBool,
    write_lock: tokio::sync::Mutex<()>,
    writes: AtomicU64,
}

impl<S: MetadataSink + 'static> DebouncedFlusher<S> {
    pub fn new(
        sink: S,
        conversation_id: impl Into<String>,
        metadata_key: impl Into<String>,
        window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(FlushInner {
                sink,
                conversation_id: conversation_id.into(),
                metadata_key: metadata_key.into(),
                window,
                pending: Mutex::new(None),
                armed: AtomicBool::new(false),
                write_lock: tokio::sync::Mutex::new(()),
                writes: AtomicU64::new(0),
            }),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.inner.conversation_id
    }

    /// Number of successful sink writes so far.
    pub fn writes(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        self.inner
            .pending
            .lock()
            .map(|pending| pending.is_some())
            .unwrap_or(false)
    }
}

impl<S: MetadataSink> FlushInner<S> {
    fn set_pending(&self, snapshot: Value) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = Some(snapshot);
    }

    fn take_pending(&self) -> Option<Value> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn write_pending(&self) {
        let _write = self.write_lock.lock().await;
        let Some(snapshot) = self.take_pending() else {
            return;
        };
        match self
            .sink
            .persist(&self.conversation_id, &self.metadata_key, snapshot)
            .await
        {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    conversation_id = %self.conversation_id,
                    "Metadata flushed"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    conversation_id = %self.conversation_id,
                    "Metadata flush failed"
                );
            }
        }
    }
}

#[async_trait]
impl<S: MetadataSink + 'static> FlushScheduler for DebouncedFlusher<S> {
    fn schedule_flush(&self, snapshot: Value) {
        self.inner.set_pending(snapshot);
        if self.inner.armed.swap(true, Ordering::SeqCst) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    tokio::time::sleep(inner.window).await;
                    inner.armed.store(false, Ordering::SeqCst);
                    inner.write_pending().await;
                });
            }
            Err(_) => {
                self.inner.armed.store(false, Ordering::SeqCst);
                tracing::warn!(
                    conversation_id = %self.inner.conversation_id,
                    "No async runtime available, snapshot kept pending until explicit flush"
                );
            }
        }
    }

    async fn flush(&self) {
        self.inner.write_pending().await;
    }
}

// ============================================================================
// JSON FILE SINK
// ============================================================================

/// Stores each conversation's metadata as `<dir>/<conversation_id>.json`.
///
/// Other keys already present in the file are preserved; only the tracker's
/// own key is replaced.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a conversation.
    ///
    /// `[A-Za-z0-9-]` is kept as is; every other character, `_` included,
    /// becomes `_` followed by its code point in hex and a closing `_`, so
    /// distinct ids never share a file.
    pub fn path_for(&self, conversation_id: &str) -> PathBuf {
        let mut file_stem = String::with_capacity(conversation_id.len());
        for c in conversation_id.chars() {
            if c.is_ascii_alphanumeric() || c == '-' {
                file_stem.push(c);
            } else {
                file_stem.push_str(&format!("_{:x}_", u32::from(c)));
            }
        }
        self.dir.join(format!("{file_stem}.json"))
    }

    /// Read a conversation's whole metadata object, if the file exists.
    pub async fn read_metadata(&self, conversation_id: &str) -> TrackerResult<Option<Map<String, Value>>> {
        let path = self.path_for(conversation_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TrackerError::persistence(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        if contents.trim().is_empty() {
            return Ok(Some(Map::new()));
        }
        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(TrackerError::persistence(format!(
                "{} does not hold a JSON object",
                path.display()
            ))),
            Err(e) => Err(TrackerError::persistence(format!(
                "failed to parse {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl MetadataSink for JsonFileSink {
    async fn persist(
        &self,
        conversation_id: &str,
        metadata_key: &str,
        value: Value,
    ) -> TrackerResult<()> {
        let mut metadata = self.read_metadata(conversation_id).await?.unwrap_or_default();
        metadata.insert(metadata_key.to_string(), value);

        let contents = serde_json::to_string_pretty(&Value::Object(metadata))
            .map_err(|e| TrackerError::persistence(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            TrackerError::persistence(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let path = self.path_for(conversation_id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, contents).await.map_err(|e| {
            TrackerError::persistence(format!("failed to write {}: {}", tmp_path.display(), e))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            TrackerError::persistence(format!("failed to replace {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    async fn load(&self, conversation_id: &str, metadata_key: &str) -> TrackerResult<Option<Value>> {
        Ok(self
            .read_metadata(conversation_id)
            .await?
            .and_then(|mut metadata| metadata.remove(metadata_key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        writes: StdMutex<Vec<Value>>,
    }

    #[async_trait]
    impl MetadataSink for RecordingSink {
        async fn persist(&self, _id: &str, _key: &str, value: Value) -> TrackerResult<()> {
            self.writes.lock().unwrap().push(value);
            Ok(())
        }

        async fn load(&self, _id: &str, _key: &str) -> TrackerResult<Option<Value>> {
            Ok(self.writes.lock().unwrap().last().cloned())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl MetadataSink for FailingSink {
        async fn persist(&self, _id: &str, _key: &str, _value: Value) -> TrackerResult<()> {
            Err(TrackerError::persistence("disk full"))
        }

        async fn load(&self, _id: &str, _key: &str) -> TrackerResult<Option<Value>> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedules_inside_window_coalesce() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = DebouncedFlusher::new(Arc::clone(&sink), "chat", "key", Duration::from_millis(500));

        flusher.schedule_flush(json!({ "a": 1 }));
        flusher.schedule_flush(json!({ "a": 2 }));
        flusher.schedule_flush(json!({ "a": 3 }));
        assert!(flusher.has_pending());

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(flusher.writes(), 1);
        assert_eq!(*sink.writes.lock().unwrap(), vec![json!({ "a": 3 })]);
        assert!(!flusher.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_flush_writes_immediately() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = DebouncedFlusher::new(Arc::clone(&sink), "chat", "key", Duration::from_secs(60));

        flusher.schedule_flush(json!({ "k": "v" }));
        flusher.flush().await;
        assert_eq!(sink.writes.lock().unwrap().len(), 1);

        // The armed timer finds nothing left to write.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(sink.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_without_pending_is_noop() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = DebouncedFlusher::new(Arc::clone(&sink), "chat", "key", Duration::from_millis(1));
        flusher.flush().await;
        assert!(sink.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let flusher = DebouncedFlusher::new(FailingSink, "chat", "key", Duration::from_millis(1));
        flusher.schedule_flush(json!({}));
        flusher.flush().await;
        assert_eq!(flusher.writes(), 0);
        assert!(!flusher.has_pending());
    }

    #[test]
    fn test_schedule_outside_runtime_keeps_pending() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = DebouncedFlusher::new(Arc::clone(&sink), "chat", "key", Duration::from_millis(1));
        flusher.schedule_flush(json!({ "x": true }));
        assert!(flusher.has_pending());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(flusher.flush());
        assert_eq!(*sink.writes.lock().unwrap(), vec![json!({ "x": true })]);
    }

    #[tokio::test]
    async fn test_json_file_sink_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        let path = sink.path_for("chat 1/alpha");
        assert_eq!(path.file_name().unwrap(), "chat_20_1_2f_alpha.json");

        std::fs::write(&path, r#"{ "note": "keep me" }"#).unwrap();
        sink.persist("chat 1/alpha", "presets", json!({ "k": "Old" }))
            .await
            .unwrap();

        let metadata = sink.read_metadata("chat 1/alpha").await.unwrap().unwrap();
        assert_eq!(metadata.get("note"), Some(&json!("keep me")));
        assert_eq!(metadata.get("presets"), Some(&json!({ "k": "Old" })));
    }

    #[tokio::test]
    async fn test_json_file_sink_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        std::fs::write(sink.path_for("c"), "not json").unwrap();

        let err = sink.persist("c", "presets", json!({})).await.unwrap_err();
        assert!(matches!(err, TrackerError::Persistence { .. }));
        assert_eq!(std::fs::read_to_string(sink.path_for("c")).unwrap(), "not json");
    }

    #[tokio::test]
    async fn test_json_file_sink_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("nested"));
        assert_eq!(sink.read_metadata("nobody").await.unwrap(), None);
        assert_eq!(sink.load("nobody", "presets").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_file_sink_load_returns_persisted_key() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        sink.persist("c", "presets", json!({ "k": "v" })).await.unwrap();

        assert_eq!(sink.load("c", "presets").await.unwrap(), Some(json!({ "k": "v" })));
        assert_eq!(sink.load("c", "other").await.unwrap(), None);
    }

    #[test]
    fn test_json_file_sink_paths_never_collide() {
        let sink = JsonFileSink::new("/data");
        let ids = ["chat 1", "chat/1", "chat_1", "chat-1", "chat_5f_1", "chaté"];
        let paths: std::collections::HashSet<PathBuf> =
            ids.iter().map(|id| sink.path_for(id)).collect();
        assert_eq!(paths.len(), ids.len());
        assert_eq!(sink.path_for("chat-1").file_name().unwrap(), "chat-1.json");
        assert_eq!(sink.path_for("chat_1").file_name().unwrap(), "chat_5f_1.json");
    }
}
