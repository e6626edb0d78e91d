//! Display resolution for a message or one of its variants.
//!
//! The lookup key is always computed from the message's original
//! timestamp/model. A `forcedModel` stored in the record only changes what
//! is shown as the model, never which record is found.

use crate::store::RecordStore;
use ptrack_core::{
    ChatMessage, DisplayLabels, Fingerprint, PresetRecord, StoredRecord, TrackerError,
    TrackerResult, VariantSelection,
};

/// Model name to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayModel {
    /// Operator override from a force-save.
    Forced(String),
    /// Model recorded on the message or variant itself.
    Original(String),
    Unknown,
}

/// Classification of the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordView {
    Templated {
        preset: Option<String>,
        context: Option<String>,
        instruct: Option<String>,
        system_prompt: Option<String>,
    },
    Generic {
        preset: Option<String>,
    },
    Legacy {
        preset: String,
    },
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    /// `None` when the source had no timestamp.
    pub lookup_key: Option<Fingerprint>,
    /// Zero-based variant that supplied the data, if any.
    pub variant_index: Option<usize>,
    pub model: DisplayModel,
    pub record: RecordView,
}

impl DisplayModel {
    pub fn as_str<'a>(&'a self, labels: &'a DisplayLabels) -> &'a str {
        match self {
            Self::Forced(name) | Self::Original(name) => name,
            Self::Unknown => &labels.no_model,
        }
    }
}

fn classify(key: &Fingerprint, stored: StoredRecord) -> RecordView {
    match stored {
        StoredRecord::Legacy(preset) => RecordView::Legacy { preset },
        StoredRecord::Record(record) if record.is_templated() => {
            let PresetRecord {
                gen_preset,
                ctx_tpl,
                ins_tpl,
                sys_ppt,
                ..
            } = record;
            if gen_preset.is_none() || ins_tpl.is_none() || sys_ppt.is_none() {
                tracing::warn!(
                    key = %key,
                    preset = gen_preset.is_some(),
                    instruct = ins_tpl.is_some(),
                    system_prompt = sys_ppt.is_some(),
                    "Templated preset record is missing fields"
                );
            }
            RecordView::Templated {
                preset: gen_preset,
                context: ctx_tpl,
                instruct: ins_tpl,
                system_prompt: sys_ppt,
            }
        }
        StoredRecord::Record(record) => {
            if record.gen_preset.is_none() {
                let error = TrackerError::MalformedRecord {
                    key: key.to_string(),
                };
                tracing::error!(error = %error, "Preset record has no preset name");
            }
            RecordView::Generic {
                preset: record.gen_preset,
            }
        }
    }
}

/// Resolve what to show for `selection` of `message`.
///
/// Fails only when an explicit variant index does not exist or the store
/// lock is poisoned. A missing timestamp or missing record yields
/// [`RecordView::Absent`].
pub fn resolve(
    message: &ChatMessage,
    selection: VariantSelection,
    store: &RecordStore,
) -> TrackerResult<DisplayInfo> {
    let source = message.source_for(selection)?;
    let lookup_key = source.fingerprint();

    let stored = match &lookup_key {
        Some(key) => store.get(key)?,
        None => {
            tracing::debug!("No timestamp on message, nothing to look up");
            None
        }
    };

    let forced = stored
        .as_ref()
        .and_then(StoredRecord::as_record)
        .and_then(PresetRecord::forced_model)
        .map(str::to_string);
    let model = match (forced, source.model) {
        (Some(forced), _) => DisplayModel::Forced(forced),
        (None, Some(original)) if !original.is_empty() => DisplayModel::Original(original.to_string()),
        _ => DisplayModel::Unknown,
    };

    let record = match (&lookup_key, stored) {
        (Some(key), Some(stored)) => classify(key, stored),
        _ => RecordView::Absent,
    };

    Ok(DisplayInfo {
        lookup_key,
        variant_index: source.variant_index,
        model,
        record,
    })
}

impl DisplayInfo {
    /// Plain-text body: model first, then the record's fields.
    pub fn render(&self, labels: &DisplayLabels) -> String {
        let field = |value: &Option<String>| -> String {
            value.clone().unwrap_or_else(|| labels.no_info.clone())
        };

        let mut lines = vec![format!("Model: {}", self.model.as_str(labels))];
        match &self.record {
            RecordView::Templated {
                preset,
                instruct,
                system_prompt,
                ..
            } => {
                lines.push(format!("Preset: {}", field(preset)));
                lines.push(format!("Instruct template: {}", field(instruct)));
                lines.push(format!("System prompt: {}", field(system_prompt)));
            }
            RecordView::Generic { preset } => {
                lines.push(format!("Preset: {}", field(preset)));
            }
            RecordView::Legacy { preset } => {
                lines.push(format!("Preset: {preset}"));
                lines.push(labels.legacy_hint.clone());
            }
            RecordView::Absent => lines.push(labels.absent.clone()),
        }
        lines.join("\n")
    }
}
