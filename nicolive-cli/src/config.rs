//! Application configuration, loaded from a TOML file.
//!
//! ```toml
//! log_filter = "nicolive=debug"
//!
//! [[channels]]
//! id = "jk1"
//! name = "NHK総合"
//! tags = ["jk1", "NHK総合"]
//! official = true
//!
//! [feed]
//! capacity = 128
//! policy = "drop_oldest"
//! ```

use std::path::{Path, PathBuf};

use nicolive::{ApiConfig, Channel, FeedConfig, ReconnectConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub channels: Vec<Channel>,
    pub api: ApiConfig,
    pub feed: FeedConfig,
    pub reconnect: ReconnectConfig,
    /// `EnvFilter` directives used when neither `-v` nor `-q` is given
    pub log_filter: Option<String>,
}

impl AppConfig {
    /// `<config dir>/nicolive/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nicolive").join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields the
    /// default (empty) configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No configuration file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content).map_err(|source| AppError::Config {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), channels = config.channels.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Channels selected by `filter`; all channels when it is empty.
    pub fn select_channels(&self, filter: &[String]) -> Result<Vec<Channel>> {
        if filter.is_empty() {
            return Ok(self.channels.clone());
        }

        filter
            .iter()
            .map(|id| {
                self.channels
                    .iter()
                    .find(|channel| &channel.id == id)
                    .cloned()
                    .ok_or_else(|| AppError::InvalidInput(format!("Unknown channel: {}", id)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nicolive::FeedPolicy;
    use std::io::Write;

    const SAMPLE: &str = r#"
log_filter = "nicolive=debug"

[[channels]]
id = "jk1"
name = "NHK総合"
tags = ["jk1", "NHK総合"]
official = true

[[channels]]
id = "jk4"
tags = ["jk4"]

[feed]
policy = "block"

[reconnect]
max_attempts = 3
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(
            config.channels[0],
            Channel {
                id: "jk1".to_string(),
                name: Some("NHK総合".to_string()),
                tags: vec!["jk1".to_string(), "NHK総合".to_string()],
                official: true,
            }
        );
        assert!(!config.channels[1].official);
        assert_eq!(config.feed.policy, FeedPolicy::Block);
        assert_eq!(config.feed.capacity, FeedConfig::default().capacity);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.api, ApiConfig::default());
        assert_eq!(config.log_filter.as_deref(), Some("nicolive=debug"));
    }

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(AppConfig::parse("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(AppConfig::parse("[feed]\npolicy = \"sometimes\"").is_err());
    }

    #[test]
    fn test_select_channels() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.select_channels(&[]).unwrap().len(), 2);

        let selected = config.select_channels(&["jk4".to_string()]).unwrap();
        assert_eq!(selected[0].id, "jk4");

        let err = config.select_channels(&["jk9".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.channels.len(), 2);

        let missing = file.path().with_extension("missing");
        assert!(matches!(AppConfig::load(Some(&missing)), Err(AppError::Io(_))));
    }

    #[test]
    fn test_load_invalid_file_names_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"channels = 3").unwrap();

        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(&err, AppError::Config { path, .. } if path == file.path()));
    }
}
