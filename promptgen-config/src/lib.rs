use std::{
    fs,
    path::{Path, PathBuf},
};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_GEMINI_API_KEY: &str = "";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

const CONFIG_DIR_NAME: &str = ".promptgen";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory")]
    ConfigDirUnavailable,
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a valid promptgen config: {source}", .path.display())]
    Deserialize {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to encode configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self {
        move |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Values persisted in `~/.promptgen/config.toml`.
///
/// Every field falls back to its default when missing from the file, so
/// older or hand-trimmed files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gemini_api_key: String,
    pub output_dir: String,
    pub model: String,
    /// Deadline for the generation request. Zero disables it.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: DEFAULT_GEMINI_API_KEY.to_string(),
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub config: Config,
    pub path: PathBuf,
    pub created: bool,
}

/// Loads the configuration from the user's home directory, creating a default
/// file if absent.
pub fn load_or_init() -> Result<LoadOutcome, ConfigError> {
    let path = config_file_path()?;
    load_or_init_at(&path)
}

/// Loads the configuration stored at `path`, writing defaults there when the
/// file does not exist yet. An existing file is never rewritten on load.
pub fn load_or_init_at(path: &Path) -> Result<LoadOutcome, ConfigError> {
    let created = !path.exists();
    let config = if created {
        let config = Config::default();
        save(&config, path)?;
        config
    } else {
        let contents = fs::read_to_string(path).map_err(ConfigError::io(path))?;
        toml::from_str(&contents).map_err(|source| ConfigError::Deserialize {
            path: path.to_path_buf(),
            source,
        })?
    };

    Ok(LoadOutcome {
        config,
        path: path.to_path_buf(),
        created,
    })
}

/// Persist the given configuration to `path`, creating its directory.
pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(ConfigError::io(parent))?;
    }
    let serialized = toml::to_string_pretty(config)?;
    fs::write(path, serialized).map_err(ConfigError::io(path))
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    let base_dirs = BaseDirs::new().ok_or(ConfigError::ConfigDirUnavailable)?;
    Ok(base_dirs
        .home_dir()
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME))
}
