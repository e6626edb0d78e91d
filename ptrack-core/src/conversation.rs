//! Conversation model as seen by the tracker.
//!
//! Only the fields needed to fingerprint replies are modelled: authorship
//! flags, the message's own timestamp/model, and its variants ("swipes").

use crate::error::{TrackerError, TrackerResult};
use crate::fingerprint::{fingerprint, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One alternative generation attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Variant {
    pub fn new(timestamp: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            timestamp: Some(timestamp.into()),
            model: model.map(str::to_string),
        }
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Index of the displayed variant; absent means 0.
    #[serde(default)]
    pub active_variant: Option<usize>,
    /// Variant slots. A slot may be empty in data written by older hosts.
    #[serde(default)]
    pub variants: Vec<Option<Variant>>,
}

/// Which variant of a message to operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantSelection {
    /// Whatever the message currently displays.
    Active,
    /// A specific variant, zero-based.
    Index(usize),
}

/// Original (never overridden) timestamp/model of a message or variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSource<'a> {
    pub timestamp: Option<&'a str>,
    pub model: Option<&'a str>,
    /// Set when the data came from a variant slot rather than the message.
    pub variant_index: Option<usize>,
}

impl GenerationSource<'_> {
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        fingerprint(self.timestamp, self.model)
    }
}

impl ChatMessage {
    /// AI-authored: neither user nor system.
    pub fn is_ai(&self) -> bool {
        !self.is_user && !self.is_system
    }

    fn own_source(&self) -> GenerationSource<'_> {
        GenerationSource {
            timestamp: self.timestamp.as_deref(),
            model: self.model.as_deref(),
            variant_index: None,
        }
    }

    fn variant_slot(&self, index: usize) -> Option<GenerationSource<'_>> {
        self.variants
            .get(index)
            .and_then(Option::as_ref)
            .map(|variant| GenerationSource {
                timestamp: variant.timestamp.as_deref(),
                model: variant.model.as_deref(),
                variant_index: Some(index),
            })
    }

    /// Data of the displayed variant.
    ///
    /// The variant is used only when its slot exists and is populated;
    /// otherwise the message's own data stands in.
    pub fn active_source(&self) -> GenerationSource<'_> {
        let index = self.active_variant.unwrap_or(0);
        match self.variant_slot(index) {
            Some(source) => source,
            None => {
                if !self.variants.is_empty() {
                    tracing::warn!(
                        index,
                        variants = self.variants.len(),
                        "Active variant index invalid, using message data"
                    );
                }
                self.own_source()
            }
        }
    }

    /// Data for an explicit selection.
    ///
    /// A message without variants has exactly one addressable generation,
    /// index 0, which is the message itself.
    pub fn source_for(&self, selection: VariantSelection) -> TrackerResult<GenerationSource<'_>> {
        match selection {
            VariantSelection::Active => Ok(self.active_source()),
            VariantSelection::Index(0) if self.variants.is_empty() => Ok(self.own_source()),
            VariantSelection::Index(index) => self.variant_slot(index).ok_or_else(|| {
                TrackerError::invalid_argument(
                    "swipeNumber",
                    format!(
                        "variant {} does not exist (message has {})",
                        index + 1,
                        self.variants.len().max(1)
                    ),
                )
            }),
        }
    }

    /// Every fingerprint this message can be looked up under: its own data
    /// plus each populated variant.
    pub fn fingerprints(&self) -> impl Iterator<Item = Fingerprint> + '_ {
        std::iter::once(self.own_source())
            .chain((0..self.variants.len()).filter_map(|index| self.variant_slot(index)))
            .filter_map(|source| source.fingerprint())
    }
}

/// Fingerprints of all live AI replies and their variants.
pub fn live_fingerprints(messages: &[ChatMessage]) -> HashSet<Fingerprint> {
    messages
        .iter()
        .filter(|message| message.is_ai())
        .flat_map(ChatMessage::fingerprints)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai(timestamp: &str, model: &str) -> ChatMessage {
        ChatMessage {
            timestamp: Some(timestamp.to_string()),
            model: Some(model.to_string()),
            ..ChatMessage::default()
        }
    }

    #[test]
    fn test_active_source_prefers_populated_variant() {
        let mut message = ai("t0", "m0");
        message.variants = vec![
            Some(Variant::new("t0", Some("m0"))),
            Some(Variant::new("t1", Some("m1"))),
        ];
        message.active_variant = Some(1);

        let source = message.active_source();
        assert_eq!(source.timestamp, Some("t1"));
        assert_eq!(source.model, Some("m1"));
        assert_eq!(source.variant_index, Some(1));
    }

    #[test]
    fn test_active_source_falls_back_on_bad_index_or_empty_slot() {
        let mut message = ai("t0", "m0");
        message.variants = vec![Some(Variant::new("t1", Some("m1"))), None];

        message.active_variant = Some(5);
        assert_eq!(message.active_source().variant_index, None);
        assert_eq!(message.active_source().timestamp, Some("t0"));

        message.active_variant = Some(1);
        assert_eq!(message.active_source().variant_index, None);
    }

    #[test]
    fn test_active_source_defaults_to_index_zero() {
        let mut message = ai("t0", "m0");
        message.variants = vec![Some(Variant::new("t9", Some("m9")))];
        assert_eq!(message.active_source().timestamp, Some("t9"));
    }

    #[test]
    fn test_source_for_explicit_index() {
        let plain = ai("t0", "m0");
        assert_eq!(
            plain.source_for(VariantSelection::Index(0)).unwrap().timestamp,
            Some("t0")
        );
        assert!(matches!(
            plain.source_for(VariantSelection::Index(1)),
            Err(TrackerError::InvalidArgument { .. })
        ));

        let mut swiped = ai("t0", "m0");
        swiped.variants = vec![Some(Variant::new("t0", Some("m0"))), None];
        assert!(swiped.source_for(VariantSelection::Index(1)).is_err());
        assert_eq!(
            swiped.source_for(VariantSelection::Index(0)).unwrap().variant_index,
            Some(0)
        );
    }

    #[test]
    fn test_live_fingerprints_skip_user_and_system() {
        let mut user = ai("u", "m");
        user.is_user = true;
        let mut system = ai("s", "m");
        system.is_system = true;
        let mut reply = ai("r", "M");
        reply.variants = vec![
            Some(Variant::new("r", Some("m"))),
            Some(Variant::new("r2", None)),
        ];
        let no_timestamp = ChatMessage::default();

        let live = live_fingerprints(&[user, system, reply, no_timestamp]);
        let mut keys: Vec<_> = live.iter().map(Fingerprint::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["r2_model_unknown", "r_model_m"]);
    }
}
