//! Configuration loading and types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use yu_exec::SessionConfig;
use yu_net::ConnectivityConfig;
use yu_pkg::pip::DEFAULT_PYTHON;
use yu_pkg::yum::{YUM_CONFIG_FILE, YUM_REPO_DIR};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "YU_CONFIG";

/// Top-level configuration for the yu CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    /// Transport settings shared by every SSH session
    #[serde(default)]
    pub ssh: SessionConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub pip: PipConfig,
    #[serde(default)]
    pub yum: YumConfig,
    /// Named hosts
    #[serde(default)]
    pub host: Vec<HostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipConfig {
    /// Interpreter used for local `python -m pip` calls
    #[serde(default = "default_python")]
    pub python: String,
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YumConfig {
    #[serde(default = "default_yum_config_file")]
    pub config_file: PathBuf,
    #[serde(default = "default_yum_repo_dir")]
    pub repo_dir: PathBuf,
    #[serde(default)]
    pub use_sudo: bool,
}

impl Default for YumConfig {
    fn default() -> Self {
        Self {
            config_file: default_yum_config_file(),
            repo_dir: default_yum_repo_dir(),
            use_sudo: false,
        }
    }
}

/// One `[[host]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    pub addr: String,
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key file
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    /// Environment variable holding a base64-encoded private key
    #[serde(default)]
    pub ssh_key_env: Option<String>,
    /// Environment variable holding the login password
    #[serde(default)]
    pub password_env: Option<String>,
}

impl HostConfig {
    /// Ad-hoc entry for an address that is not in the config file
    pub fn from_addr(addr: &str) -> Self {
        Self {
            name: addr.to_string(),
            addr: addr.to_string(),
            user: default_user(),
            ssh_key: None,
            ssh_key_env: None,
            password_env: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_python() -> String {
    DEFAULT_PYTHON.to_string()
}

fn default_yum_config_file() -> PathBuf {
    PathBuf::from(YUM_CONFIG_FILE)
}

fn default_yum_repo_dir() -> PathBuf {
    PathBuf::from(YUM_REPO_DIR)
}

fn default_user() -> String {
    "root".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// First config file that exists: `$YU_CONFIG`, then the common paths
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let mut paths = vec![
            PathBuf::from("yu.toml"),
            PathBuf::from("/etc/yu/yu.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("yu/yu.toml"));
        }

        paths.into_iter().find(|path| path.exists())
    }

    /// Entry named `host`, or an ad-hoc entry treating `host` as an address
    pub fn resolve_host(&self, host: &str) -> HostConfig {
        self.host
            .iter()
            .find(|h| h.name == host)
            .cloned()
            .unwrap_or_else(|| HostConfig::from_addr(host))
    }
}
