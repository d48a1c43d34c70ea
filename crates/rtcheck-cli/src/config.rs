//! CLI configuration at `~/.rtcheck/config.toml`.
//!
//! Describes how to reach target consoles, how to manage target lifecycles,
//! where to report results, and default checkup parameters. CLI flags always
//! override config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use rtcheck_checkup::config::{DEFAULT_PASSWORD, DEFAULT_USERNAME};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub console: ConsoleConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub report: ReportConfig,

    /// Checkup parameters (`targetNodeName`, `oslatDuration`, ...).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Target identity and guest credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            username: default_username(),
            password: default_password(),
        }
    }
}

/// Serial console access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Console address template: `tcp://host:port` or `unix:///path`, with
    /// `{namespace}` and `{name}` placeholders.
    #[serde(default = "default_console_address")]
    pub address: String,

    /// Trace all console traffic.
    #[serde(default)]
    pub trace: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            address: default_console_address(),
            trace: false,
        }
    }
}

/// Shell commands managing the target. Each runs with `RTCHECK_NAMESPACE`,
/// `RTCHECK_NAME`, `RTCHECK_IMAGE` and `RTCHECK_NODE` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub create: String,

    /// Must print `ready [node]`, `absent`, or anything else for not ready.
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub delete: String,

    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            create: String::new(),
            status: String::new(),
            delete: String::new(),
            shell: default_shell(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// JSON file receiving the status record. Unset logs the record.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

fn default_console_address() -> String {
    "unix:///run/rtcheck/{namespace}/{name}/console.sock".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Default location: `~/.rtcheck/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".rtcheck")
            .join("config.toml")
    }
}

/// Parse a `key=value` checkup parameter.
pub fn parse_param(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("parameter '{raw}' is not in key=value form"))?;
    if key.is_empty() {
        anyhow::bail!("empty parameter name in '{raw}'");
    }
    Ok((key.to_string(), value.to_string()))
}
