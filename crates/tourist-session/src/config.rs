//! User configuration.
//!
//! Read from `<config dir>/tourist/config.json`. Every field is optional in
//! the file. `TOURIST_BINARY` overrides the binary path, and command line
//! flags override both.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tourist_client::{ClientOptions, DEFAULT_SLOW_REQUEST_TIMEOUT};

/// Environment variable naming the tourist executable.
pub const BINARY_ENV: &str = "TOURIST_BINARY";

/// Extension of tour files.
pub const TOUR_EXTENSION: &str = "tour";

/// Settings for a tourist host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Executable started as `<binary_path> serve`.
    pub binary_path: PathBuf,
    /// Per-request timeout in seconds. `0` waits forever.
    pub request_timeout_secs: u64,
    /// Directories searched by [`Config::discover_tours`].
    pub tour_directories: Vec<PathBuf>,
    /// Open tours read-only unless asked otherwise.
    pub read_only_by_default: bool,
    /// Where new tours are saved when no path is given.
    pub default_tour_save_location: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("tourist"),
            request_timeout_secs: 30,
            tour_directories: Vec::new(),
            read_only_by_default: true,
            default_tour_save_location: None,
        }
    }
}

impl Config {
    /// `<config dir>/tourist/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tourist").join("config.json"))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if it exists and defaults otherwise. The environment override is
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_binary_override(std::env::var_os(BINARY_ENV));
        Ok(config)
    }

    /// Read one config file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Replace the binary path with `value` when it is set and non-empty.
    pub fn apply_binary_override(&mut self, value: Option<OsString>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.binary_path = PathBuf::from(value);
        }
    }

    /// The request timeout, or `None` when disabled.
    pub const fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Client options derived from this configuration.
    ///
    /// The slow limit is never shorter than the ordinary one.
    pub fn client_options(&self) -> ClientOptions {
        let request_timeout = self.request_timeout();
        ClientOptions {
            request_timeout,
            slow_request_timeout: request_timeout.map(|t| t.max(DEFAULT_SLOW_REQUEST_TIMEOUT)),
        }
    }

    /// `edit` flag for tours opened without an explicit choice.
    pub const fn default_edit(&self) -> bool {
        !self.read_only_by_default
    }

    /// `*.tour` files directly inside the tour directories, sorted.
    ///
    /// Directories that do not exist are skipped.
    pub fn discover_tours(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut tours = Vec::new();
        for dir in &self.tour_directories {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!("Tour directory {} does not exist", dir.display());
                    continue;
                }
                Err(source) => {
                    return Err(ConfigError::Read {
                        path: dir.clone(),
                        source,
                    })
                }
            };
            for entry in entries {
                let path = entry
                    .map_err(|source| ConfigError::Read {
                        path: dir.clone(),
                        source,
                    })?
                    .path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == TOUR_EXTENSION) {
                    tours.push(path);
                }
            }
        }
        tours.sort();
        tours.dedup();
        Ok(tours)
    }

    /// Save path for a new tour titled `title`, under the default save location.
    pub fn new_tour_path(&self, title: &str) -> Option<PathBuf> {
        let dir = self.default_tour_save_location.as_ref()?;
        let stem: String = title
            .trim()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        let stem = stem.trim_matches('-');
        let stem = if stem.is_empty() { "tour" } else { stem };
        Some(dir.join(format!("{stem}.{TOUR_EXTENSION}")))
    }
}
