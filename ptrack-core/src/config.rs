//! Tracker configuration.
//!
//! Loaded from TOML, then overridden from the environment, then validated.
//! Every field has a default so an empty file (or no file) is valid.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Metadata key the record store is persisted under.
pub const DEFAULT_METADATA_KEY: &str = "presetsBySwipeKey";

/// Coalescing window for metadata flushes.
pub const DEFAULT_FLUSH_DEBOUNCE_MS: u64 = 1_000;

/// Force-save model argument that resolves to the active model.
pub const DEFAULT_AUTO_MODEL_KEYWORD: &str = "auto";

pub const ENV_METADATA_KEY: &str = "PTRACK_METADATA_KEY";
pub const ENV_FLUSH_DEBOUNCE_MS: &str = "PTRACK_FLUSH_DEBOUNCE_MS";
pub const ENV_AUTO_MODEL_KEYWORD: &str = "PTRACK_AUTO_MODEL_KEYWORD";

/// Placeholder texts used when rendering display info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayLabels {
    /// Shown when the reply has no model name.
    pub no_model: String,
    /// Shown for a missing field inside a stored record.
    pub no_info: String,
    /// Shown when nothing is stored for the reply.
    pub absent: String,
    /// Shown for a legacy (unmigrated) record.
    pub legacy_hint: String,
    /// Word used in titles for a variant, e.g. "swipe" in "(swipe 2)".
    pub swipe: String,
}

impl Default for DisplayLabels {
    fn default() -> Self {
        Self {
            no_model: "(no model info)".to_string(),
            no_info: "(no info)".to_string(),
            absent: "(no preset info recorded)".to_string(),
            legacy_hint: "Legacy record; run the migrate command to upgrade it".to_string(),
            swipe: "swipe".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub metadata_key: String,
    pub flush_debounce_ms: u64,
    pub auto_model_keyword: String,
    pub labels: DisplayLabels,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            flush_debounce_ms: DEFAULT_FLUSH_DEBOUNCE_MS,
            auto_model_keyword: DEFAULT_AUTO_MODEL_KEYWORD.to_string(),
            labels: DisplayLabels::default(),
        }
    }
}

impl TrackerConfig {
    /// Load from an optional TOML file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Apply overrides from `PTRACK_*` environment variables.
    ///
    /// Unparseable numeric values are ignored and the current value kept.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(ENV_METADATA_KEY) {
            self.metadata_key = key;
        }
        if let Some(ms) = std::env::var(ENV_FLUSH_DEBOUNCE_MS)
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.flush_debounce_ms = ms;
        }
        if let Ok(keyword) = std::env::var(ENV_AUTO_MODEL_KEYWORD) {
            self.auto_model_keyword = keyword;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metadata_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "metadata_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.flush_debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "flush_debounce_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.auto_model_keyword.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "auto_model_keyword",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = TrackerConfig::from_toml_str("").unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overrides_fields() {
        let config = TrackerConfig::from_toml_str(
            r#"
            flush_debounce_ms = 250

            [labels]
            absent = "nothing here"
            "#,
        )
        .unwrap();
        assert_eq!(config.flush_debounce(), Duration::from_millis(250));
        assert_eq!(config.labels.absent, "nothing here");
        assert_eq!(config.labels.no_info, DisplayLabels::default().no_info);
        assert_eq!(config.metadata_key, DEFAULT_METADATA_KEY);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = TrackerConfig::from_toml_str("metdata_key = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_blank_key_and_zero_window() {
        let config = TrackerConfig {
            metadata_key: "  ".to_string(),
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "metadata_key", .. })
        ));

        let config = TrackerConfig {
            flush_debounce_ms: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "flush_debounce_ms", .. })
        ));
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "auto_model_keyword = \"current\"").unwrap();
        let config = TrackerConfig::from_path(file.path()).unwrap();
        assert_eq!(config.auto_model_keyword, "current");
    }

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_env_overrides_apply_before_validation() {
        let _key = EnvVarGuard::set(ENV_METADATA_KEY, "presetsV2");
        let _window = EnvVarGuard::set(ENV_FLUSH_DEBOUNCE_MS, "not-a-number");
        let _keyword = EnvVarGuard::set(ENV_AUTO_MODEL_KEYWORD, "current");

        let config = TrackerConfig::load(None).unwrap();
        assert_eq!(config.metadata_key, "presetsV2");
        assert_eq!(config.flush_debounce_ms, DEFAULT_FLUSH_DEBOUNCE_MS);
        assert_eq!(config.auto_model_keyword, "current");
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = TrackerConfig::from_path(Path::new("/nonexistent/ptrack.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
