use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub log_level: Option<String>,
    pub engine: EngineConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub name: String,
    pub default_width: u32,
    pub default_height: u32,
    pub max_snapshot_pixels: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            log_level: None,
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "rayport".into(),
            default_width: 640,
            default_height: 480,
            max_snapshot_pixels: 16_777_216,
        }
    }
}

impl DaemonConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.default_width == 0 || engine.default_height == 0 {
            return Err(ConfigError::Invalid("default snapshot size must be non-zero".into()));
        }
        let default_pixels = u64::from(engine.default_width) * u64::from(engine.default_height);
        if default_pixels > engine.max_snapshot_pixels {
            return Err(ConfigError::Invalid(format!(
                "default snapshot of {default_pixels} pixels exceeds max_snapshot_pixels {}",
                engine.max_snapshot_pixels
            )));
        }
        Ok(())
    }
}
