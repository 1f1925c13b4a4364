//! User configuration stored as `config.json` in the config directory.

use crate::error::PickerError;
use crate::fetcher::DEFAULT_API_URL;
use crate::utils::{read_json, write_json_atomic};
use crate::validation::{parse_bool, parse_list, parse_optional, parse_positive_float};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Every key accepted by `config set`, in file order.
pub const CONFIG_KEYS: &[&str] = &[
    "disclaimer_accepted",
    "default_region",
    "auto_reset_on_exit",
    "ping_timeout",
    "clustered",
    "use_sudo",
    "firewall_backend",
    "favorites",
    "always_block",
    "never_block",
    "api_url",
];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Auto-detect backend (checks nftables first, then iptables)
    #[default]
    Auto,
    /// Dedicated iptables chain hooked into OUTPUT and FORWARD
    Iptables,
    /// Dedicated `inet` table
    #[serde(alias = "nft")]
    Nftables,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Auto => "auto",
            Backend::Iptables => "iptables",
            Backend::Nftables => "nftables",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = PickerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "iptables" => Ok(Backend::Iptables),
            "nftables" | "nft" => Ok(Backend::Nftables),
            other => Err(PickerError::Config(format!(
                "Invalid firewall backend '{}' (expected auto, iptables or nftables)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub disclaimer_accepted: bool,
    /// Region used by `allow-region` when none is given
    pub default_region: Option<String>,
    pub auto_reset_on_exit: bool,
    /// Probe timeout in seconds
    pub ping_timeout: f64,
    /// Use the clustered view by default
    pub clustered: bool,
    /// Prefix firewall commands with sudo (turn off when running as root)
    pub use_sudo: bool,
    pub firewall_backend: Backend,
    pub favorites: Vec<String>,
    pub always_block: Vec<String>,
    pub never_block: Vec<String>,
    pub api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disclaimer_accepted: false,
            default_region: None,
            auto_reset_on_exit: true,
            ping_timeout: 2.0,
            clustered: false,
            use_sudo: true,
            firewall_backend: Backend::Auto,
            favorites: Vec::new(),
            always_block: Vec::new(),
            never_block: Vec::new(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

impl Config {
    /// Display form of one setting, or `None` for an unknown key.
    pub fn value_of(&self, key: &str) -> Option<String> {
        let value = match key {
            "disclaimer_accepted" => self.disclaimer_accepted.to_string(),
            "default_region" => self.default_region.clone().unwrap_or_default(),
            "auto_reset_on_exit" => self.auto_reset_on_exit.to_string(),
            "ping_timeout" => self.ping_timeout.to_string(),
            "clustered" => self.clustered.to_string(),
            "use_sudo" => self.use_sudo.to_string(),
            "firewall_backend" => self.firewall_backend.to_string(),
            "favorites" => self.favorites.join(","),
            "always_block" => self.always_block.join(","),
            "never_block" => self.never_block.join(","),
            "api_url" => self.api_url.clone(),
            _ => return None,
        };
        Some(value)
    }

    /// Convert `value` according to the field's type and store it.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), PickerError> {
        match key {
            "disclaimer_accepted" => self.disclaimer_accepted = parse_bool(value),
            "default_region" => self.default_region = parse_optional(value),
            "auto_reset_on_exit" => self.auto_reset_on_exit = parse_bool(value),
            "ping_timeout" => {
                self.ping_timeout = parse_positive_float(value)
                    .map_err(|e| PickerError::Config(format!("ping_timeout: {}", e)))?
            }
            "clustered" => self.clustered = parse_bool(value),
            "use_sudo" => self.use_sudo = parse_bool(value),
            "firewall_backend" => self.firewall_backend = value.parse()?,
            "favorites" => self.favorites = parse_list(value),
            "always_block" => self.always_block = parse_list(value),
            "never_block" => self.never_block = parse_list(value),
            "api_url" => {
                let url = value.trim();
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(PickerError::Config(format!(
                        "api_url must be an http(s) URL: {}",
                        url
                    )));
                }
                self.api_url = url.to_string();
            }
            _ => {
                return Err(PickerError::Config(format!(
                    "Invalid config key: {} (valid keys: {})",
                    key,
                    CONFIG_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// Probe timeout, falling back to the default for bad values in a
    /// hand-edited file.
    pub fn ping_timeout_duration(&self) -> std::time::Duration {
        if self.ping_timeout.is_finite() && self.ping_timeout > 0.0 {
            std::time::Duration::from_secs_f64(self.ping_timeout)
        } else {
            crate::ping::DEFAULT_TIMEOUT
        }
    }
}

/// Loads, caches and persists [`Config`].
pub struct ConfigManager {
    dir: PathBuf,
    path: PathBuf,
    cache: Option<Config>,
}

impl ConfigManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(CONFIG_FILE_NAME);
        Self {
            dir,
            path,
            cache: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load from disk once; later calls return the cached value.
    ///
    /// A missing file yields defaults silently; an unreadable or invalid
    /// one yields defaults with a warning.
    pub fn load(&mut self) -> &Config {
        if self.cache.is_none() {
            let config = match read_json::<Config>(&self.path) {
                Ok(Some(config)) => {
                    debug!("Loaded config from {}", self.path.display());
                    config
                }
                Ok(None) => Config::default(),
                Err(e) => {
                    warn!("{:#}; using default settings", e);
                    Config::default()
                }
            };
            self.cache = Some(config);
        }
        self.cache.get_or_insert_with(Config::default)
    }

    /// Persist `config` (or the cached value when `None`).
    pub fn save(&mut self, config: Option<Config>) -> Result<()> {
        if let Some(config) = config {
            self.cache = Some(config);
        }
        let config = self.cache.get_or_insert_with(Config::default);
        write_json_atomic(&self.path, config)
            .map_err(|e| PickerError::Config(format!("Failed to save config: {:#}", e)))?;
        Ok(())
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.load().value_of(key)
    }

    /// Set one key and save. Returns the stored value in display form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<String> {
        let mut config = self.load().clone();
        config.apply(key, value)?;
        let stored = config.value_of(key).unwrap_or_default();
        self.save(Some(config))?;
        Ok(stored)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.save(Some(Config::default()))
    }
}

/// `$XDG_CONFIG_HOME/deadlock-server-picker`, or the platform equivalent.
pub fn default_config_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "deadlock-server-picker")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| {
            PickerError::Config("Could not determine a home directory for config files".into())
                .into()
        })
}
