//! ptrack Test Utilities
//!
//! Centralized test infrastructure for the ptrack workspace:
//! - Deterministic collaborators (environment, conversation, sinks, flusher)
//! - Proptest generators for records and conversations
//! - Fixtures for common message shapes

pub use ptrack_core::{
    fingerprint, ChatMessage, ConversationSource, DisplayLabels, EnvironmentState, Fingerprint,
    PresetRecord, StoredRecord, TrackerConfig, TrackerError, TrackerResult, Variant,
    VariantSelection,
};
pub use ptrack_storage::{FlushScheduler, MetadataSink, RecordStore};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::sync::Notify;

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Values reported by [`StaticEnvironment`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentValues {
    pub preset: Option<String>,
    pub templated: bool,
    pub context: Option<String>,
    pub instruct: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

/// Environment provider with settable values.
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    values: RwLock<EnvironmentValues>,
}

impl StaticEnvironment {
    pub fn new(values: EnvironmentValues) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Chat-completion style: only a preset name.
    pub fn generic(preset: &str) -> Self {
        Self::new(EnvironmentValues {
            preset: Some(preset.to_string()),
            ..EnvironmentValues::default()
        })
    }

    /// Templated completion style with all three templates set.
    pub fn templated(preset: &str, context: &str, instruct: &str, system_prompt: &str) -> Self {
        Self::new(EnvironmentValues {
            preset: Some(preset.to_string()),
            templated: true,
            context: Some(context.to_string()),
            instruct: Some(instruct.to_string()),
            system_prompt: Some(system_prompt.to_string()),
            model: None,
        })
    }

    pub fn with_model(self, model: &str) -> Self {
        self.update(|values| values.model = Some(model.to_string()));
        self
    }

    /// Change what the environment reports from now on.
    pub fn update(&self, change: impl FnOnce(&mut EnvironmentValues)) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        change(&mut values);
    }

    fn values(&self) -> EnvironmentValues {
        self.values.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EnvironmentState for StaticEnvironment {
    fn active_preset_name(&self) -> Option<String> {
        self.values().preset
    }

    fn is_templated_mode(&self) -> bool {
        self.values().templated
    }

    fn active_context_template_name(&self) -> Option<String> {
        self.values().context
    }

    fn active_instruct_template_name(&self) -> Option<String> {
        self.values().instruct
    }

    fn active_system_prompt_name(&self) -> Option<String> {
        self.values().system_prompt
    }

    fn active_model_name(&self) -> Option<String> {
        self.values().model
    }
}

// ============================================================================
// CONVERSATION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub metadata: Map<String, Value>,
}

/// Conversation store held in memory. Starts with no conversation open
/// when built with [`InMemoryConversation::closed`].
#[derive(Debug, Default)]
pub struct InMemoryConversation {
    state: RwLock<Option<ConversationState>>,
}

impl InMemoryConversation {
    pub fn new(id: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            state: RwLock::new(Some(ConversationState {
                id: id.to_string(),
                messages,
                metadata: Map::new(),
            })),
        }
    }

    pub fn closed() -> Self {
        Self::default()
    }

    pub fn with_metadata(self, key: &str, value: Value) -> Self {
        self.set_metadata(key, value);
        self
    }

    fn modify(&self, change: impl FnOnce(&mut ConversationState)) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = state.as_mut() {
            change(state);
        }
    }

    /// Replace the open conversation.
    pub fn open(&self, state: ConversationState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = Some(state);
    }

    pub fn close(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn push(&self, message: ChatMessage) {
        self.modify(|state| state.messages.push(message));
    }

    /// Drop the message at `index`, as when a user deletes a reply.
    pub fn remove(&self, index: usize) {
        self.modify(|state| {
            if index < state.messages.len() {
                state.messages.remove(index);
            }
        });
    }

    pub fn set_messages(&self, messages: Vec<ChatMessage>) {
        self.modify(|state| state.messages = messages);
    }

    pub fn set_metadata(&self, key: &str, value: Value) {
        self.modify(|state| {
            state.metadata.insert(key.to_string(), value);
        });
    }
}

impl ConversationSource for InMemoryConversation {
    fn conversation_id(&self) -> Option<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.as_ref().map(|state| state.id.clone())
    }

    fn messages(&self) -> Option<Vec<ChatMessage>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.as_ref().map(|state| state.messages.clone())
    }

    fn metadata(&self, key: &str) -> Option<Value> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.as_ref().and_then(|state| state.metadata.get(key).cloned())
    }
}

// ============================================================================
// SINKS AND FLUSHERS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SinkWrite {
    pub conversation_id: String,
    pub metadata_key: String,
    pub value: Value,
}

/// Sink that remembers every write.
#[derive(Debug, Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<SinkWrite>>,
}

impl RecordingSink {
    pub fn writes(&self) -> Vec<SinkWrite> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Newest value written for `conversation_id`.
    pub fn last_value(&self, conversation_id: &str) -> Option<Value> {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|write| write.conversation_id == conversation_id)
            .map(|write| write.value.clone())
    }
}

#[async_trait]
impl MetadataSink for RecordingSink {
    async fn persist(
        &self,
        conversation_id: &str,
        metadata_key: &str,
        value: Value,
    ) -> TrackerResult<()> {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SinkWrite {
                conversation_id: conversation_id.to_string(),
                metadata_key: metadata_key.to_string(),
                value,
            });
        Ok(())
    }

    async fn load(&self, conversation_id: &str, metadata_key: &str) -> TrackerResult<Option<Value>> {
        Ok(self
            .writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|write| write.conversation_id == conversation_id && write.metadata_key == metadata_key)
            .map(|write| write.value.clone()))
    }
}

/// Sink whose writes park until `release` is notified.
///
/// `entered` is notified as each write begins, so a test can act while a
/// write is in flight. Loads are never gated.
#[derive(Debug, Default)]
pub struct GatedSink {
    pub entered: Notify,
    pub release: Notify,
    pub inner: RecordingSink,
}

#[async_trait]
impl MetadataSink for GatedSink {
    async fn persist(
        &self,
        conversation_id: &str,
        metadata_key: &str,
        value: Value,
    ) -> TrackerResult<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.persist(conversation_id, metadata_key, value).await
    }

    async fn load(&self, conversation_id: &str, metadata_key: &str) -> TrackerResult<Option<Value>> {
        self.inner.load(conversation_id, metadata_key).await
    }
}

/// Flush scheduler that only counts calls and keeps the newest snapshot.
#[derive(Debug, Default)]
pub struct CountingFlusher {
    scheduled: AtomicUsize,
    flushes: AtomicUsize,
    last: Mutex<Option<Value>>,
}

impl CountingFlusher {
    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn last_snapshot(&self) -> Option<Value> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl FlushScheduler for CountingFlusher {
    fn schedule_flush(&self, snapshot: Value) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
    }

    async fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for records and conversations.

    use super::*;
    use proptest::prelude::*;

    /// ISO-8601 timestamps as hosts write them.
    pub fn arb_timestamp() -> impl Strategy<Value = String> {
        "20[0-9]{2}-[01][0-9]-[0-3][0-9]T[0-2][0-9]:[0-5][0-9]:[0-5][0-9]\\.[0-9]{3}Z"
    }

    pub fn arb_model() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9.-]{0,11}"
    }

    pub fn arb_preset_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 _-]{0,15}"
    }

    /// A structured record; may be empty.
    pub fn arb_preset_record() -> impl Strategy<Value = PresetRecord> {
        (
            proptest::option::of(arb_preset_name()),
            proptest::option::of(arb_preset_name()),
            proptest::option::of(arb_preset_name()),
            proptest::option::of(arb_preset_name()),
            proptest::option::of(arb_model()),
        )
            .prop_map(|(gen_preset, ctx_tpl, ins_tpl, sys_ppt, forced_model)| PresetRecord {
                gen_preset,
                ctx_tpl,
                ins_tpl,
                sys_ppt,
                forced_model,
            })
    }

    pub fn arb_stored_record() -> impl Strategy<Value = StoredRecord> {
        prop_oneof![
            arb_preset_name().prop_map(StoredRecord::Legacy),
            arb_preset_record().prop_map(StoredRecord::Record),
        ]
    }

    pub fn arb_variant() -> impl Strategy<Value = Variant> {
        (arb_timestamp(), proptest::option::of(arb_model())).prop_map(|(timestamp, model)| Variant {
            timestamp: Some(timestamp),
            model,
        })
    }

    /// An AI reply with zero to three variants and an arbitrary (possibly
    /// out of range) active index.
    pub fn arb_ai_reply() -> impl Strategy<Value = ChatMessage> {
        (
            arb_timestamp(),
            proptest::option::of(arb_model()),
            proptest::collection::vec(proptest::option::weighted(0.9, arb_variant()), 0..4),
            proptest::option::of(0usize..5),
        )
            .prop_map(|(timestamp, model, variants, active_variant)| ChatMessage {
                timestamp: Some(timestamp),
                model,
                variants,
                active_variant,
                ..ChatMessage::default()
            })
    }

    pub fn arb_user_message() -> impl Strategy<Value = ChatMessage> {
        arb_timestamp().prop_map(|timestamp| fixtures::user_message(&timestamp))
    }

    /// A conversation of up to `max` messages mixing users and AI replies.
    pub fn arb_chat(max: usize) -> impl Strategy<Value = Vec<ChatMessage>> {
        proptest::collection::vec(
            prop_oneof![3 => arb_ai_reply(), 1 => arb_user_message()],
            0..=max,
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built messages and stores for common scenarios.

    use super::*;
    use std::sync::Arc;

    pub fn ai_reply(timestamp: &str, model: &str) -> ChatMessage {
        ChatMessage {
            timestamp: Some(timestamp.to_string()),
            model: Some(model.to_string()),
            ..ChatMessage::default()
        }
    }

    pub fn user_message(timestamp: &str) -> ChatMessage {
        ChatMessage {
            is_user: true,
            timestamp: Some(timestamp.to_string()),
            ..ChatMessage::default()
        }
    }

    pub fn system_message(timestamp: &str) -> ChatMessage {
        ChatMessage {
            is_system: true,
            timestamp: Some(timestamp.to_string()),
            ..ChatMessage::default()
        }
    }

    /// An AI reply whose variants are `swipes`, showing `active`.
    ///
    /// The message's own data mirrors the active swipe, as hosts keep them
    /// in sync.
    pub fn ai_reply_with_swipes(swipes: &[(&str, &str)], active: usize) -> ChatMessage {
        let (timestamp, model) = swipes.get(active).copied().unwrap_or(("", ""));
        ChatMessage {
            timestamp: Some(timestamp.to_string()).filter(|t| !t.is_empty()),
            model: Some(model.to_string()).filter(|m| !m.is_empty()),
            active_variant: Some(active),
            variants: swipes
                .iter()
                .map(|(timestamp, model)| Some(Variant::new(*timestamp, Some(*model))))
                .collect(),
            ..ChatMessage::default()
        }
    }

    /// Key the tracker stores a reply under.
    pub fn key_of(timestamp: &str, model: &str) -> Fingerprint {
        fingerprint(Some(timestamp), Some(model)).unwrap_or_else(|| Fingerprint::from_raw(""))
    }

    /// Store loaded from `metadata`, backed by a fresh [`CountingFlusher`].
    pub fn store_from(metadata: Value) -> (RecordStore, Arc<CountingFlusher>) {
        let flusher = Arc::new(CountingFlusher::default());
        let store = RecordStore::from_metadata(Some(&metadata), flusher.clone());
        (store, flusher)
    }
}
