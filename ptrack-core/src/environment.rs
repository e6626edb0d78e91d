//! UI/environment state provider.
//!
//! The tracker never reads on-screen controls itself. Hosts implement this
//! trait over whatever holds the currently selected configuration; tests
//! substitute a static implementation. [`ConversationSource`] is the same
//! kind of seam over the host's conversation store.

use crate::conversation::ChatMessage;
use serde_json::Value;

/// Read-only view of the currently selected generation configuration.
pub trait EnvironmentState: Send + Sync {
    /// Name of the active sampling/generation preset.
    fn active_preset_name(&self) -> Option<String>;

    /// Whether the active API style is the templated completion variant.
    fn is_templated_mode(&self) -> bool;

    fn active_context_template_name(&self) -> Option<String>;

    fn active_instruct_template_name(&self) -> Option<String>;

    fn active_system_prompt_name(&self) -> Option<String>;

    /// Model currently selected; used to resolve a force-save `"auto"` model.
    fn active_model_name(&self) -> Option<String>;
}

/// Host conversation store.
///
/// Every accessor returns `None` when no conversation is loaded.
pub trait ConversationSource: Send + Sync {
    /// Identifier used to address the conversation's persisted metadata.
    fn conversation_id(&self) -> Option<String>;

    /// Messages in conversation order.
    fn messages(&self) -> Option<Vec<ChatMessage>>;

    /// Value stored under `key` in the conversation's metadata.
    fn metadata(&self, key: &str) -> Option<Value>;
}
