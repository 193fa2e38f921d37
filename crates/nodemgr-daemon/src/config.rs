//! Daemon configuration
//!
//! ```yaml
//! package_path:
//!   - /opt/ros/noetic/share
//!   - /home/robot/catkin_ws/src
//! machine_id: robot1
//! zenoh_endpoint: tcp/10.0.0.2:7447
//! log_level: debug
//! ```
//!
//! Every field is optional. Missing fields fall back to the environment
//! (`ROS_PACKAGE_PATH`, `NODEMGR_MACHINE_ID`, `NODEMGR_ZENOH_ENDPOINT`) and
//! then to built-in defaults.

use crate::zenoh_api::DEFAULT_ZENOH_ENDPOINT;
use nodemgr_launch::{PackageLocator, PackagePath};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory under the home directory holding the daemon files
pub const CONFIG_DIR: &str = ".nodemgr";

/// Default configuration file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "daemon.yaml";

/// Daemon configuration as read from YAML
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Package search roots, in priority order
    pub package_path: Option<Vec<PathBuf>>,
    pub machine_id: Option<String>,
    pub zenoh_endpoint: Option<String>,
    pub log_level: Option<String>,
}

impl DaemonConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load `path` if given, else the default file when it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(default) if default.is_file() => {
                    log::debug!("Using configuration {}", default.display());
                    Self::from_file(default)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    /// Package search roots, falling back to `ROS_PACKAGE_PATH`
    pub fn package_roots(&self) -> Vec<PathBuf> {
        match &self.package_path {
            Some(roots) => roots.clone(),
            None => PackagePath::from_env().search_roots(),
        }
    }

    /// Machine id, falling back to `NODEMGR_MACHINE_ID` then the hostname
    pub fn machine_id(&self) -> String {
        self.machine_id
            .clone()
            .or_else(|| std::env::var("NODEMGR_MACHINE_ID").ok())
            .unwrap_or_else(|| {
                hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or_else(|_| "unknown".to_string())
            })
    }

    /// Zenoh router endpoint, falling back to `NODEMGR_ZENOH_ENDPOINT`
    pub fn zenoh_endpoint(&self) -> String {
        self.zenoh_endpoint
            .clone()
            .or_else(|| std::env::var("NODEMGR_ZENOH_ENDPOINT").ok())
            .unwrap_or_else(|| DEFAULT_ZENOH_ENDPOINT.to_string())
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

/// `~/.nodemgr/daemon.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}
