//! Configuration management for the Griq client.
//!
//! Loads `config.toml` from the per-user config directory. The only
//! recognized key is `server_url`, an override for the relay URL. A missing
//! or malformed file is never fatal: the client falls back to the CLI-supplied
//! URL or the built-in default.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Relay used when neither the CLI nor the config file supplies one.
pub const DEFAULT_RELAY_URL: &str = "wss://griq.site/";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub server_url: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => {
                ensure_parent_dir(&path);
                Self::load_from(&path)
            }
            None => Self::default(),
        }
    }

    fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Could not read config file {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Invalid config file {}: {}; using default server URL",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "griq").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Create the config directory if it does not exist yet. Failure is not
/// fatal: the client can run without a config directory.
fn ensure_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!(
                "Could not create config directory {}: {}",
                parent.display(),
                e
            );
        }
    }
}

/// Relay URL precedence: CLI flag, then config file, then the default.
pub fn resolve_relay_url(cli_url: Option<String>, config: &Config) -> String {
    cli_url
        .or_else(|| config.server_url.clone())
        .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string())
}
