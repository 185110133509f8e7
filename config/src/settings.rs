use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;

/// Environment variable that overrides the data root.
pub const DATA_ROOT_ENV: &str = "TRELLIS_DATA_ROOT";

pub const SETTINGS_FILE: &str = "settings.toml";

const DEFAULT_ADDRESS: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5555;
const DEFAULT_MAX_TRANSACTIONS: usize = 256;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Contents of `settings.toml`. Every section is optional.
///
/// ```toml
/// [settings]
/// common_services = ["uno", "status"]
/// entities = ["einz", "zwei"]
///
/// [server]
/// address = "127.0.0.1"
/// port = 5555
/// reload_on_error = false
/// max_transactions = 256
///
/// [client]
/// address = "127.0.0.1"
/// port = 5555
/// request_timeout_secs = 30
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrellisConfig {
    pub settings: Settings,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Services shared by every entity, loaded from `common_services/`.
    pub common_services: Vec<String>,
    /// Entities loaded from `entities/`.
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Reload every definition after a request that finished with errors.
    pub reload_on_error: bool,
    /// Transactions kept per connected identity before the oldest is dropped.
    pub max_transactions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            reload_on_error: false,
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub address: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl TrellisConfig {
    /// Load `<data_root>/settings.toml`. A missing file yields the defaults.
    pub fn load(data_root: &Path) -> Result<Self, ConfigError> {
        let path = data_root.join(SETTINGS_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read settings at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse settings at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}

/// Pick the data root: an explicit path, then `TRELLIS_DATA_ROOT`, then
/// `~/.trellis` when it exists, then `./data`.
#[must_use]
pub fn resolve_data_root(explicit: Option<&Path>) -> PathBuf {
    let home = dirs::home_dir().map(|home| home.join(".trellis"));
    resolve_from(explicit, env::var_os(DATA_ROOT_ENV), home)
}

fn resolve_from(
    explicit: Option<&Path>,
    from_env: Option<OsString>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(value) = from_env.filter(|v| !v.is_empty()) {
        return PathBuf::from(value);
    }
    if let Some(home) = home.filter(|h| h.is_dir()) {
        return home;
    }
    PathBuf::from("data")
}
