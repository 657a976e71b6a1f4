// ABOUTME: YAML config file loading and resolution of effective settings
// ABOUTME: CLI flags override the config file, which overrides built-in defaults

use crate::api::DEFAULT_TIMEOUT_SECS;
use crate::auth::resolve_token;
use crate::cli::Cli;
use crate::{Error, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_URL: &str = "http://localhost:30000";

/// Contents of `config.yaml`. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub root_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Loads a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(FileConfig::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(FileConfig::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Loads `explicit` when given, which must exist, else the platform default location.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) if !path.exists() => Err(Error::Config(format!(
                "config file {} does not exist",
                path.display()
            ))),
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) => Self::load(&path),
                None => Ok(FileConfig::default()),
            },
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "orgfoundry").map(|dirs| dirs.config_dir().join("config.yaml"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    Default,
    Disabled,
    Range(u64, u64),
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub url: String,
    pub root: PathBuf,
    pub timeout: Duration,
    pub throttle: Throttle,
    cli_token: Option<String>,
    file_token: Option<String>,
}

impl Settings {
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self> {
        let url = cli
            .url
            .clone()
            .or(file.url)
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!("relay URL must be http(s): {}", url)));
        }

        let timeout_secs = cli
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(Error::Config("timeout must be at least one second".into()));
        }

        let throttle = if cli.no_throttle {
            Throttle::Disabled
        } else if let Some((min, max)) = cli.throttle_ms {
            Throttle::Range(min, max)
        } else {
            Throttle::Default
        };

        Ok(Settings {
            url,
            root: cli
                .root_dir
                .clone()
                .or(file.root_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            timeout: Duration::from_secs(timeout_secs),
            throttle,
            cli_token: cli.token.clone(),
            file_token: file.token,
        })
    }

    pub fn token(&self) -> Result<String> {
        resolve_token(self.cli_token.clone(), self.file_token.clone())
    }
}
