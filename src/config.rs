//! Settings loaded from `channel-review.toml`.
//!
//! Every section is optional; missing keys fall back to defaults. Unknown
//! keys in `[fields]` are rejected so a typo in the field mapping cannot
//! silently aggregate the wrong attribute.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapping::FieldMapping;
use crate::sessions::MAX_COMPLETION_DELAY_SECS;

pub const DEFAULT_CONFIG_FILE: &str = "channel-review.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("field mapping entry `{0}` must name an attribute")]
    BlankField(&'static str),
    #[error("store.completion_delay_secs = {0} exceeds the maximum of {max}s", max = MAX_COMPLETION_DELAY_SECS)]
    DelayOutOfRange(u64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub review: ReviewConfig,

    #[serde(default)]
    pub fields: FieldMapping,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Treat any non-zero count as a full match.
    #[serde(default = "default_normalize_counts")]
    pub normalize_counts: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            normalize_counts: default_normalize_counts(),
        }
    }
}

fn default_normalize_counts() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file backing the mock session workflow.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Seconds a started session stays RUNNING before its feedback appears.
    #[serde(default = "default_completion_delay")]
    pub completion_delay_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            completion_delay_secs: default_completion_delay(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".channel-review/sessions.json")
}

fn default_completion_delay() -> u64 {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_interval() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    60
}

impl Config {
    /// Loads `path`, or `channel-review.toml` in the working directory when
    /// no path is given. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.fields.validate().map_err(ConfigError::BlankField)?;
        if config.store.completion_delay_secs > MAX_COMPLETION_DELAY_SECS {
            return Err(ConfigError::DelayOutOfRange(config.store.completion_delay_secs));
        }
        Ok(config)
    }

    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.review.normalize_counts);
        assert_eq!(config.fields, FieldMapping::default());
        assert_eq!(config.store.completion_delay_secs, 6);
        assert_eq!(config.polling.interval_secs, 5);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [review]
            normalize_counts = false

            [fields]
            msg_created = "created_at"

            [store]
            path = "/tmp/review-sessions.json"
            "#,
        )
        .unwrap();

        assert!(!config.review.normalize_counts);
        assert_eq!(config.fields.msg_created, "created_at");
        assert_eq!(config.fields.msg_channel, "channel_id");
        assert_eq!(config.store.path, PathBuf::from("/tmp/review-sessions.json"));
        assert_eq!(config.store.completion_delay_secs, 6);
    }

    #[test]
    fn mapping_typos_and_blanks_are_errors() {
        let typo = Config::from_toml("[fields]\nmsg_chanel = \"room\"\n");
        assert!(matches!(typo, Err(ConfigError::Parse { .. })));

        let blank = Config::from_toml("[fields]\ncrit_name = \"\"\n");
        assert!(matches!(blank, Err(ConfigError::BlankField("crit_name"))));
    }

    #[test]
    fn completion_delay_must_be_in_range() {
        let config = Config::from_toml("[store]\ncompletion_delay_secs = 31536000\n").unwrap();
        assert_eq!(config.store.completion_delay_secs, MAX_COMPLETION_DELAY_SECS);

        let too_long = Config::from_toml("[store]\ncompletion_delay_secs = 100000000000000000\n");
        assert!(matches!(
            too_long,
            Err(ConfigError::DelayOutOfRange(100_000_000_000_000_000))
        ));
    }

    #[test]
    fn default_toml_round_trips() {
        let config = Config::from_toml(&Config::default_toml()).unwrap();
        assert_eq!(config.fields, FieldMapping::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(Config::load(Some(missing.as_path())), Err(ConfigError::Read { .. })));
    }
}
