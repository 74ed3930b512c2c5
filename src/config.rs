// src/config.rs
//! Application settings.
//!
//! Settings start from built-in defaults and can be overlaid by a JSON
//! document. Loading is all-or-nothing: top-level keys present in the file
//! replace the current values (a `replace_rules` object replaces the whole
//! rule set), and any failure leaves the current settings untouched.
//!
//! ```json
//! {
//!   "auto_convert": true,
//!   "check_interval": 1.0,
//!   "replace_rules": {
//!     "commands": { "\\mathbf": "\\bm" },
//!     "inline":  ["\\(", "\\)", "$$", "$$"],
//!     "display": ["\\[", "\\]", "$$", "$$"]
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::rules::ReplaceRules;

/// Config file looked up when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/to_feishu.json";

const KNOWN_KEYS: &[&str] = &["auto_convert", "check_interval", "replace_rules", "log_file"];

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing or shape error.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Convert every clipboard update without waiting for the trigger.
    pub auto_convert: bool,
    /// Rewrite rules handed to the text processor.
    pub replace_rules: ReplaceRules,
    /// Clipboard polling interval in seconds.
    pub check_interval: f64,
    /// Optional debug log file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Path of the last successfully loaded file.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_convert: true,
            replace_rules: ReplaceRules::builtin(),
            check_interval: 1.0,
            log_file: None,
            config_path: None,
        }
    }
}

/// Top-level keys as they appear in a file; absent keys keep current values.
#[derive(Debug, Default, Deserialize)]
struct SettingsPatch {
    auto_convert: Option<bool>,
    replace_rules: Option<ReplaceRules>,
    check_interval: Option<f64>,
    log_file: Option<PathBuf>,
}

impl Settings {
    /// Overlay a JSON config file onto these settings.
    ///
    /// Returns the number of top-level keys the file contained.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, not a JSON
    /// object, carries wrongly-typed values, or fails validation. `self` is
    /// unchanged in every error case.
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize, SettingsError> {
        info!(path = %path.display(), "loading configuration");
        if !path.exists() {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let (next, keys) = self.merged_with(&content)?;
        *self = next;
        self.config_path = Some(path.to_path_buf());

        info!(path = %path.display(), keys, "configuration loaded");
        Ok(keys)
    }

    /// Build the settings that result from applying `json` on top of `self`.
    fn merged_with(&self, json: &str) -> Result<(Self, usize), SettingsError> {
        let document: serde_json::Value = serde_json::from_str(json)?;
        let Some(object) = document.as_object() else {
            return Err(SettingsError::Validation(
                "top level must be a JSON object".into(),
            ));
        };
        for key in object.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            debug!(key = %key, "ignoring unrecognised configuration key");
        }
        let keys = object.len();

        let patch: SettingsPatch = serde_json::from_value(document)?;
        let mut next = self.clone();
        if let Some(auto_convert) = patch.auto_convert {
            next.auto_convert = auto_convert;
        }
        if let Some(rules) = patch.replace_rules {
            next.replace_rules = rules;
        }
        if let Some(interval) = patch.check_interval {
            next.check_interval = interval;
        }
        if let Some(log_file) = patch.log_file {
            next.log_file = Some(log_file);
        }
        next.validate()?;
        Ok((next, keys))
    }

    /// Validate configuration values.
    ///
    /// Rule completeness is checked when the text processor is built, so a
    /// missing rule surfaces as a configuration error at startup.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Validation` if `check_interval` is not a
    /// positive number of seconds that fits in a `Duration`.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.interval().is_none() {
            return Err(SettingsError::Validation(format!(
                "check_interval must be a positive number of seconds, got {}",
                self.check_interval
            )));
        }
        Ok(())
    }

    /// Polling interval as a `Duration`. Falls back to one second when the
    /// field was set to a value `validate` rejects.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.interval().unwrap_or(Duration::from_secs(1))
    }

    fn interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.check_interval)
            .ok()
            .filter(|interval| !interval.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.auto_convert);
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.replace_rules, ReplaceRules::builtin());
        assert!(settings.log_file.is_none());
    }

    #[test]
    fn test_missing_file_leaves_settings_untouched() {
        let mut settings = Settings::default();
        let err = settings
            .load_from_file(Path::new("/nonexistent/texclip.json"))
            .unwrap_err();
        assert!(matches!(err, SettingsError::NotFound(_)), "got {err:?}");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_merges_top_level_keys() {
        let file = write_config(r#"{"check_interval": 0.5, "auto_convert": false}"#);
        let mut settings = Settings::default();
        let keys = settings.load_from_file(file.path()).unwrap();
        assert_eq!(keys, 2);
        assert!(!settings.auto_convert);
        assert_eq!(settings.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.replace_rules, ReplaceRules::builtin());
        assert_eq!(settings.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_replace_rules_replaced_wholesale() {
        let file = write_config(r#"{"replace_rules": {"commands": {"\\rm": "\\mathrm"}}}"#);
        let mut settings = Settings::default();
        settings.load_from_file(file.path()).unwrap();
        let rules = &settings.replace_rules;
        assert_eq!(
            rules.commands.as_ref().unwrap().iter().collect::<Vec<_>>(),
            vec![("\\rm", "\\mathrm")]
        );
        assert!(rules.inline.is_none());
        assert!(rules.display.is_none());
    }

    #[test]
    fn test_malformed_json_is_rejected_without_mutation() {
        let file = write_config(r#"{"check_interval": 2.0,"#);
        let mut settings = Settings::default();
        let err = settings.load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)), "got {err:?}");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_wrong_type_is_rejected_without_mutation() {
        let file = write_config(r#"{"auto_convert": false, "check_interval": "fast"}"#);
        let mut settings = Settings::default();
        assert!(settings.load_from_file(file.path()).is_err());
        assert!(settings.auto_convert);
    }

    #[test]
    fn test_non_positive_interval_rejected() {
        let file = write_config(r#"{"check_interval": 0}"#);
        let mut settings = Settings::default();
        let err = settings.load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)), "got {err:?}");
        assert_eq!(settings.check_interval, 1.0);
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let file = write_config(r#"{"check_interval": 1e20, "auto_convert": false}"#);
        let mut settings = Settings::default();
        let err = settings.load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)), "got {err:?}");
        assert_eq!(settings.check_interval, 1.0);
        assert!(settings.auto_convert);
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_poll_interval_never_panics() {
        let mut settings = Settings::default();
        settings.check_interval = 0.25;
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));
        for bad in [1e20, f64::NAN, f64::INFINITY, -1.0, 0.0, 1e-12] {
            settings.check_interval = bad;
            assert_eq!(settings.poll_interval(), Duration::from_secs(1), "{bad}");
        }
    }

    #[test]
    fn test_non_object_document_rejected() {
        let file = write_config("[1, 2, 3]");
        let mut settings = Settings::default();
        assert!(matches!(
            settings.load_from_file(file.path()),
            Err(SettingsError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let file = write_config(r#"{"theme": "dark", "log_file": "texclip.log"}"#);
        let mut settings = Settings::default();
        assert_eq!(settings.load_from_file(file.path()).unwrap(), 2);
        assert_eq!(settings.log_file, Some(PathBuf::from("texclip.log")));
    }

    #[test]
    fn test_shipped_config_parses() {
        let mut settings = Settings::default();
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/to_feishu.json");
        settings.load_from_file(&path).unwrap();
        assert!(settings.replace_rules.require().is_ok());
    }
}
