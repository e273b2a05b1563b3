use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use teq_engine::EngineConfig;
use teq_transport::{DEFAULT_GLOBAL_TEMPO, TeqError, validate_tempo};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] TeqError),
}

/// Construction parameters of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeqConfig {
    /// Backend client name.
    pub client_name: String,
    pub command_buffer_size: usize,
    pub state_info_buffer_size: usize,
    pub command_timeout_ms: u64,
    pub max_tracks: usize,
    /// Initial tempo in ticks per second.
    pub global_tempo: f32,
}

impl Default for TeqConfig {
    fn default() -> Self {
        Self {
            client_name: "teq".to_string(),
            command_buffer_size: 1024,
            state_info_buffer_size: 1024,
            command_timeout_ms: 1000,
            max_tracks: 256,
            global_tempo: DEFAULT_GLOBAL_TEMPO,
        }
    }
}

impl TeqConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("teq").join("config.toml"))
    }

    /// Loads the user's config file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("ignoring config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Writes the config, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TeqError> {
        validate_tempo("global tempo", self.global_tempo)?;
        for (what, value) in [
            ("command buffer size", self.command_buffer_size),
            ("state info buffer size", self.state_info_buffer_size),
        ] {
            if value == 0 {
                return Err(TeqError::InvalidValue { what, value: 0.0 });
            }
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            command_buffer_size: self.command_buffer_size,
            state_info_buffer_size: self.state_info_buffer_size,
            command_timeout: self.command_timeout(),
            max_tracks: self.max_tracks,
            global_tempo: self.global_tempo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = TeqConfig::from_toml_str("client_name = \"drums\"\nmax_tracks = 16\n").unwrap();
        assert_eq!(config.client_name, "drums");
        assert_eq!(config.max_tracks, 16);
        assert_eq!(config.command_buffer_size, 1024);
        assert_eq!(config.command_timeout(), Duration::from_secs(1));
        assert_eq!(config.global_tempo, 8.0);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(TeqConfig::from_toml_str("").unwrap(), TeqConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            TeqConfig::from_toml_str("global_tempo = 0.0"),
            Err(ConfigError::Invalid(TeqError::InvalidValue { .. }))
        ));
        assert!(matches!(
            TeqConfig::from_toml_str("global_tempo = 1e9"),
            Err(ConfigError::Invalid(TeqError::InvalidValue { .. }))
        ));
        assert!(matches!(
            TeqConfig::from_toml_str("command_buffer_size = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TeqConfig::from_toml_str("max_tracks = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "command_timeout_ms = 250\nglobal_tempo = 12.5\n").unwrap();

        let config = TeqConfig::load_from(&path).unwrap();
        assert_eq!(config.command_timeout(), Duration::from_millis(250));
        assert_eq!(config.engine_config().global_tempo, 12.5);

        assert!(matches!(
            TeqConfig::load_from(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teq").join("config.toml");
        let config = TeqConfig {
            client_name: "bounce".to_string(),
            max_tracks: 8,
            ..TeqConfig::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(TeqConfig::load_from(&path).unwrap(), config);
    }
}
