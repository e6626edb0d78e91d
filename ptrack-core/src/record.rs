//! Preset records: the configuration snapshot stored per fingerprint.
//!
//! Two schema versions coexist on disk. The current one is a JSON object
//! ([`PresetRecord`]); the legacy one is a bare string holding only the
//! preset name. [`StoredRecord`] keeps the two apart with an explicit
//! discriminant until migration collapses everything to `Record`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured configuration snapshot. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetRecord {
    /// Sampling/generation preset name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_preset: Option<String>,
    /// Context template (templated completion mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx_tpl: Option<String>,
    /// Instruct template (templated completion mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ins_tpl: Option<String>,
    /// System prompt (templated completion mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_ppt: Option<String>,
    /// Operator-supplied display model; only set by force-save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_model: Option<String>,
}

impl PresetRecord {
    /// Upgrade a legacy preset name to the structured schema.
    pub fn from_legacy(preset_name: impl Into<String>) -> Self {
        Self {
            gen_preset: Some(preset_name.into()),
            ..Self::default()
        }
    }

    /// Number of populated fields.
    pub fn field_count(&self) -> usize {
        [
            &self.gen_preset,
            &self.ctx_tpl,
            &self.ins_tpl,
            &self.sys_ppt,
            &self.forced_model,
        ]
        .iter()
        .filter(|field| field.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }

    /// True when any template-mode field is present.
    pub fn is_templated(&self) -> bool {
        self.ctx_tpl.is_some() || self.ins_tpl.is_some() || self.sys_ppt.is_some()
    }

    /// The forced display model, if set and non-empty.
    pub fn forced_model(&self) -> Option<&str> {
        self.forced_model.as_deref().filter(|model| !model.is_empty())
    }

    /// Build from a JSON object, keeping only string-valued known fields.
    fn from_object(object: &Map<String, Value>) -> Self {
        let field = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            gen_preset: field("genPreset"),
            ctx_tpl: field("ctxTpl"),
            ins_tpl: field("insTpl"),
            sys_ppt: field("sysPpt"),
            forced_model: field("forcedModel"),
        }
    }
}

/// A value held by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredRecord {
    /// Pre-migration bare preset name.
    Legacy(String),
    /// Current structured schema.
    Record(PresetRecord),
}

impl StoredRecord {
    /// Interpret a persisted JSON value.
    ///
    /// Strings are legacy records, objects are structured records. Any other
    /// JSON type is not a record and yields `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(name) => Some(Self::Legacy(name.clone())),
            Value::Object(object) => Some(Self::Record(PresetRecord::from_object(object))),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Legacy(name) => Value::String(name.clone()),
            Self::Record(record) => {
                serde_json::to_value(record).unwrap_or_else(|_| Value::Object(Map::new()))
            }
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    pub fn as_record(&self) -> Option<&PresetRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Legacy(_) => None,
        }
    }
}

impl From<PresetRecord> for StoredRecord {
    fn from(record: PresetRecord) -> Self {
        Self::Record(record)
    }
}
