//! Reply fingerprints.
//!
//! A fingerprint is the lookup key for a stored preset record. It is derived
//! from the reply's send timestamp and model name, both normalized so that
//! cosmetic differences (case, stray whitespace in the timestamp) collapse to
//! the same key:
//!
//! ```text
//! normalize(timestamp) + "_model_" + lowercase(model | "unknown")
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Separator between the timestamp and model halves of a fingerprint.
pub const MODEL_SEPARATOR: &str = "_model_";

/// Model half used when the reply carries no model name.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Normalized key identifying one reply or reply variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a key that was read back from persisted metadata.
    ///
    /// Persisted keys are trusted as-is; they are only ever compared against
    /// freshly generated fingerprints.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Fingerprint {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Derive the fingerprint for a reply.
///
/// Returns `None` when the timestamp is missing or blank: a fingerprint
/// requires a timestamp. Callers skip the save or lookup in that case.
///
/// A whitespace-only timestamp counts as blank. Hosts that only test for a
/// non-empty string would key such a reply as `_model_<m>`; here it gets no
/// key at all.
pub fn fingerprint(timestamp: Option<&str>, model: Option<&str>) -> Option<Fingerprint> {
    let timestamp = normalize_timestamp(timestamp?);
    if timestamp.is_empty() {
        return None;
    }
    let model = normalize_model(model);
    Some(Fingerprint(format!("{timestamp}{MODEL_SEPARATOR}{model}")))
}

/// Strip all whitespace and lowercase.
fn normalize_timestamp(timestamp: &str) -> String {
    timestamp
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn normalize_model(model: Option<&str>) -> String {
    match model {
        Some(name) if !name.is_empty() => name.to_lowercase(),
        _ => UNKNOWN_MODEL.to_string(),
    }
}
