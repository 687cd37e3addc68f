use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::BackendKind;
use crate::path::default_deny_list;

const CONFIG_FILE: &str = "nook.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend selection for newly provisioned workspaces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Which backend new workspaces use: "host" or "container"
    #[serde(default)]
    pub kind: BackendKind,
}

/// Docker container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image every workspace container is created from
    #[serde(default = "default_image")]
    pub image: String,

    /// Memory limit (e.g., "512m", "2g")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Relative CPU weight
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: i64,

    /// Docker restart policy name
    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,

    /// Docker network mode
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            memory: default_memory(),
            cpu_shares: default_cpu_shares(),
            restart_policy: default_restart_policy(),
            network_mode: default_network_mode(),
        }
    }
}

/// Host sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Shell binaries tried in order for interactive sessions
    #[serde(default = "default_shells")]
    pub shells: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            shells: default_shells(),
        }
    }
}

/// File gateway limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Largest accepted write, in bytes
    #[serde(default = "default_max_write_bytes")]
    pub max_write_bytes: usize,

    /// Default depth of tree listings
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,

    /// Path prefixes that are never accessible
    #[serde(default = "default_deny_list")]
    pub deny_list: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_write_bytes: default_max_write_bytes(),
            tree_depth: default_tree_depth(),
            deny_list: default_deny_list(),
        }
    }
}

/// One-shot execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Wall-clock limit for a single run
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra interpreters by extension, e.g. `".rb" = ["ruby", "{file}"]`
    #[serde(default)]
    pub interpreters: BTreeMap<String, Vec<String>>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            interpreters: BTreeMap::new(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files (stderr only when unset)
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

// Default value functions
fn default_image() -> String {
    "node:18-alpine".to_string()
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_cpu_shares() -> i64 {
    512
}

fn default_restart_policy() -> String {
    "unless-stopped".to_string()
}

fn default_network_mode() -> String {
    "bridge".to_string()
}

fn default_shells() -> Vec<String> {
    vec!["/bin/bash".to_string(), "/bin/sh".to_string()]
}

fn default_max_write_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_tree_depth() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from the nook home, using defaults if not found
    pub fn load(home: &Path) -> Result<Self> {
        let config_path = home.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}

/// Resolve the nook home directory: explicit flag/env first, then the
/// platform data directory.
pub fn resolve_home(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(home) = explicit {
        return Ok(home);
    }
    let base = dirs::data_local_dir().context("Could not determine data directory")?;
    Ok(base.join("nook"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.kind, BackendKind::Host);
        assert_eq!(config.container.image, "node:18-alpine");
        assert_eq!(config.container.cpu_shares, 512);
        assert_eq!(config.files.max_write_bytes, 10 * 1024 * 1024);
        assert_eq!(config.files.tree_depth, 4);
        assert_eq!(config.execution.timeout_secs, 30);
        assert!(config.files.deny_list.contains(&"/proc".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[backend]
kind = "container"

[container]
image = "python:3.12-slim"
memory = "1g"

[host]
shells = ["/usr/bin/zsh"]

[files]
max_write_bytes = 1024

[execution]
timeout_secs = 5

[execution.interpreters]
".rb" = ["ruby", "{file}"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Container);
        assert_eq!(config.container.image, "python:3.12-slim");
        assert_eq!(config.container.memory, "1g");
        assert_eq!(config.container.restart_policy, "unless-stopped");
        assert_eq!(config.host.shells, vec!["/usr/bin/zsh".to_string()]);
        assert_eq!(config.files.max_write_bytes, 1024);
        assert_eq!(config.files.tree_depth, 4);
        assert_eq!(config.execution.timeout_secs, 5);
        assert_eq!(
            config.execution.interpreters.get(".rb"),
            Some(&vec!["ruby".to_string(), "{file}".to_string()])
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Host);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[backend]\nkind = \"vm\"").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_resolve_home_prefers_explicit() {
        let home = resolve_home(Some(PathBuf::from("/tmp/nook-test"))).unwrap();
        assert_eq!(home, PathBuf::from("/tmp/nook-test"));
    }
}
