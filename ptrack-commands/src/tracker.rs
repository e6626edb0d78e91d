//! Host-facing preset tracker.
//!
//! [`PresetTracker`] owns the record store of the current conversation and
//! exposes the lifecycle hooks (chat change, reply received), click-to-
//! inspect, and the three maintenance commands. Command methods come in two
//! forms: `try_*` returns a typed result, the plain form turns every error
//! into a user-facing string and a log entry.

use ptrack_core::{
    collect, ChatMessage, ConversationSource, EnvironmentState, Fingerprint, PresetRecord,
    TrackerConfig, TrackerError, TrackerResult, VariantSelection,
};
use ptrack_storage::{
    resolve, DebouncedFlusher, DisplayInfo, MetadataSink, Reconciler, RecordStore,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

// ============================================================================
// OUTCOMES
// ============================================================================

/// Why a reply was not captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyConversation,
    /// The candidate message is user or system authored.
    NotAiReply,
    /// The reply has no timestamp.
    KeyGeneration,
    /// The environment yielded no configuration at all.
    NothingCollected,
    Failed(TrackerError),
}

/// Result of [`PresetTracker::on_reply_received`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyCapture {
    Stored(Fingerprint),
    /// A record already exists under this key and was kept.
    AlreadyPresent(Fingerprint),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The store was empty.
    NothingToClean,
    Removed(usize),
    NoOrphans,
}

impl fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToClean => write!(f, "Orphan cleanup: nothing to clean"),
            Self::Removed(1) => write!(f, "Orphan cleanup: 1 entry removed"),
            Self::Removed(n) => write!(f, "Orphan cleanup: {n} entries removed"),
            Self::NoOrphans => write!(f, "Orphan cleanup: no orphaned entries"),
        }
    }
}

/// Result of a successful force-save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceSaved {
    pub message_id: usize,
    /// Zero-based variant the key was derived from, if any.
    pub variant_index: Option<usize>,
    pub key: Fingerprint,
    pub record: PresetRecord,
}

/// Rendered click-to-inspect block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectView {
    pub title: String,
    pub body: String,
    pub info: DisplayInfo,
}

// ============================================================================
// TRACKER
// ============================================================================

struct LoadedConversation {
    id: String,
    store: RecordStore,
}

/// A conversation made current, and the one it displaced.
type Activated = (Arc<LoadedConversation>, Option<Arc<LoadedConversation>>);

#[derive(Default)]
struct LoadState {
    current: Option<Arc<LoadedConversation>>,
    /// Displaced stores whose final flush has not finished yet.
    retiring: Vec<Arc<LoadedConversation>>,
}

impl LoadState {
    /// Make an in-memory store for `id` current, if one exists.
    ///
    /// A retiring store is revived rather than reloaded, since its latest
    /// snapshot may not have reached the sink yet.
    fn activate_existing(&mut self, id: &str) -> Option<Activated> {
        if let Some(current) = self.current.as_ref().filter(|c| c.id == id) {
            return Some((Arc::clone(current), None));
        }
        let position = self.retiring.iter().position(|c| c.id == id)?;
        let revived = self.retiring.swap_remove(position);
        let previous = self.displace(Arc::clone(&revived));
        Some((revived, previous))
    }

    fn displace(&mut self, next: Arc<LoadedConversation>) -> Option<Arc<LoadedConversation>> {
        let previous = self.current.replace(next);
        if let Some(previous) = &previous {
            self.retiring.push(Arc::clone(previous));
        }
        previous
    }
}

pub struct PresetTracker {
    config: TrackerConfig,
    environment: Arc<dyn EnvironmentState>,
    conversations: Arc<dyn ConversationSource>,
    sink: Arc<dyn MetadataSink>,
    loaded: Mutex<LoadState>,
    reconciler: Reconciler,
}

impl fmt::Debug for PresetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conversation = self.loaded_snapshot().map(|c| c.id.clone());
        f.debug_struct("PresetTracker")
            .field("config", &self.config)
            .field("conversation", &conversation)
            .field("sweep", &self.reconciler.state())
            .finish()
    }
}

fn plural(count: usize, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 {
        one
    } else {
        many
    }
}

fn message_at(messages: &[ChatMessage], message_id: i64) -> TrackerResult<(usize, &ChatMessage)> {
    usize::try_from(message_id)
        .ok()
        .and_then(|index| messages.get(index).map(|message| (index, message)))
        .ok_or_else(|| {
            TrackerError::invalid_argument(
                "messageId",
                format!(
                    "{message_id} is not a message index (conversation has {} messages)",
                    messages.len()
                ),
            )
        })
}

fn swipe_selection(swipe_number: Option<i64>) -> TrackerResult<VariantSelection> {
    match swipe_number {
        None => Ok(VariantSelection::Active),
        Some(number) => usize::try_from(number)
            .ok()
            .filter(|number| *number >= 1)
            .map(|number| VariantSelection::Index(number - 1))
            .ok_or_else(|| {
                TrackerError::invalid_argument(
                    "swipeNumber",
                    format!("{number} is not a valid swipe number (swipes start at 1)"),
                )
            }),
    }
}

impl PresetTracker {
    pub fn new(
        config: TrackerConfig,
        environment: Arc<dyn EnvironmentState>,
        conversations: Arc<dyn ConversationSource>,
        sink: Arc<dyn MetadataSink>,
    ) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            environment,
            conversations,
            sink,
            loaded: Mutex::new(LoadState::default()),
            reconciler: Reconciler::new(),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Build the store of conversation `id`.
    ///
    /// What the sink last persisted wins; the host's own metadata only seeds
    /// conversations the sink has never written.
    async fn load(&self, id: String) -> TrackerResult<Arc<LoadedConversation>> {
        let key = &self.config.metadata_key;
        let persisted = self.sink.load(&id, key).await.map_err(|e| {
            tracing::error!(error = %e, conversation_id = %id, "Failed to read persisted metadata");
            e
        })?;
        let raw = persisted.or_else(|| self.conversations.metadata(key));
        let flusher = Arc::new(DebouncedFlusher::new(
            Arc::clone(&self.sink),
            id.clone(),
            key.clone(),
            self.config.flush_debounce(),
        ));
        let store = RecordStore::from_metadata(raw.as_ref(), flusher);
        Ok(Arc::new(LoadedConversation { id, store }))
    }

    fn conversation_id(&self) -> TrackerResult<String> {
        self.conversations.conversation_id().ok_or_else(|| {
            tracing::error!("No conversation loaded");
            TrackerError::missing_context("conversation")
        })
    }

    fn messages(&self) -> TrackerResult<Vec<ChatMessage>> {
        self.conversations.messages().ok_or_else(|| {
            tracing::error!("Conversation messages unavailable");
            TrackerError::missing_context("conversation messages")
        })
    }

    fn state(&self) -> TrackerResult<MutexGuard<'_, LoadState>> {
        self.loaded.lock().map_err(|_| TrackerError::LockPoisoned)
    }

    /// Store of the current conversation, loading it on first use.
    ///
    /// The new store is installed before the displaced one is flushed, so
    /// callbacks arriving during that flush already see it.
    async fn current(&self) -> TrackerResult<Arc<LoadedConversation>> {
        let id = self.conversation_id()?;
        let existing = self.state()?.activate_existing(&id);
        let (current, previous) = match existing {
            Some(activated) => activated,
            None => {
                let fresh = self.load(id.clone()).await?;
                let mut state = self.state()?;
                // Another caller may have installed the same conversation
                // while the sink was being read.
                match state.activate_existing(&id) {
                    Some(activated) => activated,
                    None => {
                        let previous = state.displace(Arc::clone(&fresh));
                        (fresh, previous)
                    }
                }
            }
        };
        if let Some(previous) = previous {
            self.retire(previous).await;
        }
        Ok(current)
    }

    async fn retire(&self, previous: Arc<LoadedConversation>) {
        previous.store.flush().await;
        match self.state() {
            Ok(mut state) => state.retiring.retain(|c| !Arc::ptr_eq(c, &previous)),
            Err(e) => tracing::error!(error = %e, "Could not release retired conversation"),
        }
        tracing::debug!(conversation_id = %previous.id, "Previous conversation flushed");
    }

    fn loaded_snapshot(&self) -> Option<Arc<LoadedConversation>> {
        self.loaded
            .lock()
            .ok()
            .and_then(|state| state.current.as_ref().map(Arc::clone))
    }

    /// Read-only handle to the current conversation's store.
    pub async fn with_store<R>(&self, read: impl FnOnce(&RecordStore) -> R) -> TrackerResult<R> {
        Ok(read(&self.current().await?.store))
    }

    /// Write out any pending snapshot of the current store.
    pub async fn flush(&self) {
        if let Some(current) = self.loaded_snapshot() {
            current.store.flush().await;
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle hooks
    // ------------------------------------------------------------------------

    /// Switch to the conversation the host now shows.
    ///
    /// Makes its store current, then flushes the previous one. Returns the
    /// number of records in the store.
    pub async fn on_chat_changed(&self) -> TrackerResult<usize> {
        let current = self.current().await?;
        let entries = current.store.len()?;
        tracing::info!(
            conversation_id = %current.id,
            entries,
            "Conversation changed, preset records loaded"
        );
        Ok(entries)
    }

    /// Capture the configuration for the reply that just arrived.
    pub async fn on_reply_received(&self) -> ReplyCapture {
        match self.try_capture_reply().await {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!(error = %e, "Reply capture failed");
                ReplyCapture::Skipped(SkipReason::Failed(e))
            }
        }
    }

    async fn try_capture_reply(&self) -> TrackerResult<ReplyCapture> {
        let conversation = self.current().await?;
        let messages = self.messages()?;

        let Some(mut index) = messages.len().checked_sub(1) else {
            tracing::warn!("Reply received in an empty conversation");
            return Ok(ReplyCapture::Skipped(SkipReason::EmptyConversation));
        };
        if messages[index].is_user && index > 0 {
            index -= 1;
        }
        let message = &messages[index];
        if !message.is_ai() {
            tracing::debug!(index, "Last message is not an AI reply");
            return Ok(ReplyCapture::Skipped(SkipReason::NotAiReply));
        }

        let Some(key) = message.active_source().fingerprint() else {
            tracing::debug!(index, "Reply has no timestamp, skipping capture");
            return Ok(ReplyCapture::Skipped(SkipReason::KeyGeneration));
        };
        let Some(record) = collect(self.environment.as_ref(), None) else {
            tracing::warn!(key = %key, "No generation configuration collected");
            return Ok(ReplyCapture::Skipped(SkipReason::NothingCollected));
        };

        if conversation.store.insert_if_absent(key.clone(), record)? {
            tracing::debug!(key = %key, "Preset record captured");
            Ok(ReplyCapture::Stored(key))
        } else {
            Ok(ReplyCapture::AlreadyPresent(key))
        }
    }

    /// Display info for a clicked message.
    ///
    /// `Ok(None)` for user and system messages.
    pub async fn inspect_message(&self, message_id: i64) -> TrackerResult<Option<InspectView>> {
        let conversation = self.current().await?;
        let messages = self.messages()?;
        let (index, message) = message_at(&messages, message_id)?;
        if !message.is_ai() {
            return Ok(None);
        }

        let info = resolve(message, VariantSelection::Active, &conversation.store)?;
        let title = match info.variant_index {
            Some(variant) => format!(
                "Message #{index} ({} {})",
                self.config.labels.swipe,
                variant + 1
            ),
            None => format!("Message #{index}"),
        };
        let body = info.render(&self.config.labels);
        Ok(Some(InspectView { title, body, info }))
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Delete records whose reply no longer exists.
    pub async fn cleanup_orphans(&self) -> String {
        match self.try_cleanup_orphans().await {
            Ok(outcome) => outcome.to_string(),
            Err(e @ TrackerError::ConcurrentOperation { .. }) => e.to_string(),
            Err(e) => {
                tracing::error!(error = %e, "Orphan cleanup failed");
                format!("Orphan cleanup failed: {e}")
            }
        }
    }

    pub async fn try_cleanup_orphans(&self) -> TrackerResult<CleanupOutcome> {
        let conversation = self.current().await?;
        let messages = self.messages()?;
        let report = self.reconciler.sweep(&conversation.store, &messages).await?;
        Ok(match report {
            r if r.scanned == 0 => CleanupOutcome::NothingToClean,
            r if r.removed > 0 => CleanupOutcome::Removed(r.removed),
            _ => CleanupOutcome::NoOrphans,
        })
    }

    /// Upgrade bare-string records to the structured schema.
    pub async fn migrate_legacy(&self) -> String {
        match self.try_migrate_legacy().await {
            Ok(0) => "No legacy preset records to migrate".to_string(),
            Ok(n) => format!(
                "Migrated {n} legacy preset {}",
                plural(n, "record", "records")
            ),
            Err(e) => {
                tracing::error!(error = %e, "Legacy migration failed");
                format!("Legacy migration failed: {e}")
            }
        }
    }

    pub async fn try_migrate_legacy(&self) -> TrackerResult<usize> {
        let conversation = self.current().await?;
        ptrack_storage::migrate_legacy(&conversation.store)
    }

    /// Overwrite the record of a message with the current configuration.
    ///
    /// `swipe_number` is one-based; `None` targets the displayed variant.
    /// `model` is the auto keyword, a literal display model, or `None` for
    /// no override.
    pub async fn force_save_preset(
        &self,
        message_id: i64,
        swipe_number: Option<i64>,
        model: Option<&str>,
    ) -> String {
        match self.try_force_save_preset(message_id, swipe_number, model).await {
            Ok(saved) => {
                let swipe = saved
                    .variant_index
                    .map(|v| format!(" ({} {})", self.config.labels.swipe, v + 1))
                    .unwrap_or_default();
                let model = saved
                    .record
                    .forced_model()
                    .map(|m| format!(" with model {m}"))
                    .unwrap_or_default();
                format!(
                    "Preset record saved for message #{}{swipe}{model}",
                    saved.message_id
                )
            }
            Err(e @ TrackerError::Collection) => {
                tracing::warn!(error = %e, message_id, "Force-save found nothing to save");
                format!("Force-save failed: {e}")
            }
            Err(e) => {
                tracing::error!(error = %e, message_id, "Force-save failed");
                format!("Force-save failed: {e}")
            }
        }
    }

    pub async fn try_force_save_preset(
        &self,
        message_id: i64,
        swipe_number: Option<i64>,
        model: Option<&str>,
    ) -> TrackerResult<ForceSaved> {
        let conversation = self.current().await?;
        let messages = self.messages()?;
        let (index, message) = message_at(&messages, message_id)?;
        if !message.is_ai() {
            return Err(TrackerError::invalid_argument(
                "messageId",
                format!("message {index} is not an AI reply"),
            ));
        }

        let selection = swipe_selection(swipe_number)?;
        let source = message.source_for(selection)?;
        let key = source.fingerprint().ok_or(TrackerError::KeyGeneration)?;
        let forced_model = self.resolve_model(model)?;
        let record =
            collect(self.environment.as_ref(), forced_model.as_deref()).ok_or(TrackerError::Collection)?;

        conversation.store.force_set(key.clone(), record.clone())?;
        tracing::info!(
            key = %key,
            message_id = index,
            forced_model = ?record.forced_model,
            "Preset record force-saved"
        );
        Ok(ForceSaved {
            message_id: index,
            variant_index: source.variant_index,
            key,
            record,
        })
    }

    fn resolve_model(&self, model: Option<&str>) -> TrackerResult<Option<String>> {
        let Some(model) = model.filter(|m| !m.trim().is_empty()) else {
            return Ok(None);
        };
        if !model.trim().eq_ignore_ascii_case(&self.config.auto_model_keyword) {
            return Ok(Some(model.to_string()));
        }
        self.environment
            .active_model_name()
            .filter(|name| !name.trim().is_empty())
            .map(Some)
            .ok_or_else(|| {
                TrackerError::invalid_argument(
                    "model",
                    format!("'{model}' requested but no model is active"),
                )
            })
    }
}
