//! Conversation-scoped record store.
//!
//! Maps fingerprints to stored records. The in-memory map is authoritative:
//! every mutation is applied under a single write lock (so no reader ever
//! sees a half-applied change) and then hands a snapshot to the flush
//! scheduler. Reads never wait on persistence.

use crate::flush::FlushScheduler;
use ptrack_core::{Fingerprint, PresetRecord, StoredRecord, TrackerError, TrackerResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) type RecordMap = BTreeMap<Fingerprint, StoredRecord>;

pub struct RecordStore {
    entries: RwLock<RecordMap>,
    flusher: Arc<dyn FlushScheduler>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("entries", &self.len().unwrap_or(0))
            .finish()
    }
}

impl RecordStore {
    /// Create an empty store.
    pub fn new(flusher: Arc<dyn FlushScheduler>) -> Self {
        Self {
            entries: RwLock::new(RecordMap::new()),
            flusher,
        }
    }

    /// Build the store from the value persisted under the metadata key.
    ///
    /// A missing value, or one that is not a JSON object, yields an empty
    /// store. Entries whose value is neither a string nor an object are
    /// dropped with a warning.
    pub fn from_metadata(value: Option<&Value>, flusher: Arc<dyn FlushScheduler>) -> Self {
        let Some(Value::Object(object)) = value else {
            tracing::info!("No preset records in metadata, starting with an empty store");
            return Self::new(flusher);
        };

        let mut entries = RecordMap::new();
        for (key, raw) in object {
            match StoredRecord::from_json(raw) {
                Some(record) => {
                    entries.insert(Fingerprint::from_raw(key.as_str()), record);
                }
                None => {
                    tracing::warn!(key = %key, "Dropping stored value that is not a preset record");
                }
            }
        }

        tracing::info!(entries = entries.len(), "Preset records loaded");
        Self {
            entries: RwLock::new(entries),
            flusher,
        }
    }

    fn read(&self) -> TrackerResult<RwLockReadGuard<'_, RecordMap>> {
        self.entries.read().map_err(|_| TrackerError::LockPoisoned)
    }

    fn write(&self) -> TrackerResult<RwLockWriteGuard<'_, RecordMap>> {
        self.entries.write().map_err(|_| TrackerError::LockPoisoned)
    }

    /// Apply `mutate` under the write lock.
    ///
    /// `mutate` returns its result and whether it changed the map; a flush
    /// is scheduled only for actual changes, after the lock is released.
    pub(crate) fn apply<R>(
        &self,
        mutate: impl FnOnce(&mut RecordMap) -> (R, bool),
    ) -> TrackerResult<R> {
        let (result, snapshot) = {
            let mut entries = self.write()?;
            let (result, changed) = mutate(&mut entries);
            (result, changed.then(|| snapshot_of(&entries)))
        };
        if let Some(snapshot) = snapshot {
            self.flusher.schedule_flush(snapshot);
        }
        Ok(result)
    }

    pub fn has(&self, key: &Fingerprint) -> TrackerResult<bool> {
        Ok(self.read()?.contains_key(key))
    }

    pub fn get(&self, key: &Fingerprint) -> TrackerResult<Option<StoredRecord>> {
        Ok(self.read()?.get(key).cloned())
    }

    /// Store `record` only if `key` is not present yet.
    ///
    /// This is the automatic-collection path: an existing entry is never
    /// overwritten. Returns whether the record was inserted.
    pub fn insert_if_absent(&self, key: Fingerprint, record: PresetRecord) -> TrackerResult<bool> {
        self.apply(|entries| {
            if entries.contains_key(&key) {
                tracing::debug!(key = %key, "Record already present, keeping existing entry");
                (false, false)
            } else {
                entries.insert(key, StoredRecord::Record(record));
                (true, true)
            }
        })
    }

    /// Unconditionally store `record` under `key`.
    pub fn force_set(&self, key: Fingerprint, record: PresetRecord) -> TrackerResult<()> {
        self.apply(|entries| {
            entries.insert(key, StoredRecord::Record(record));
            ((), true)
        })
    }

    /// Remove `key`; returns whether it was present.
    pub fn remove(&self, key: &Fingerprint) -> TrackerResult<bool> {
        self.apply(|entries| {
            let removed = entries.remove(key).is_some();
            (removed, removed)
        })
    }

    pub fn keys(&self) -> TrackerResult<Vec<Fingerprint>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    pub fn len(&self) -> TrackerResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> TrackerResult<bool> {
        Ok(self.read()?.is_empty())
    }

    /// All entries, in key order.
    pub fn entries(&self) -> TrackerResult<Vec<(Fingerprint, StoredRecord)>> {
        Ok(self
            .read()?
            .iter()
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect())
    }

    /// The persisted shape: `{ "<fingerprint>": record | string, ... }`.
    pub fn snapshot(&self) -> TrackerResult<Value> {
        let entries = self.read()?;
        Ok(snapshot_of(&entries))
    }

    /// Wait for any scheduled flush to be written.
    pub async fn flush(&self) {
        self.flusher.flush().await;
    }
}

fn snapshot_of(entries: &RecordMap) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(key, record)| (key.to_string(), record.to_json()))
            .collect::<Map<String, Value>>(),
    )
}
