//! Vault-level configuration (`<vault>/.vigil/config.toml`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{AgentKind, MergedBeforeStartPolicy, SortKey};

pub const CONFIG_RELATIVE_PATH: &str = ".vigil/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VigilConfig {
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub merged_before_start: MergedBeforeStartPolicy,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            merged_before_start: MergedBeforeStartPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Prefix for every multiplexer session this vault owns.
    #[serde(default = "default_session_prefix")]
    pub prefix: String,
    /// Bootstrap command for the chat pane of the dashboard.
    #[serde(default = "default_chat_command")]
    pub chat_command: String,
    /// Command rendering the issues view in the dashboard.
    #[serde(default = "default_issues_command")]
    pub issues_command: String,
    #[serde(default = "default_chat_percent")]
    pub chat_percent: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix: default_session_prefix(),
            chat_command: default_chat_command(),
            issues_command: default_issues_command(),
            chat_percent: default_chat_percent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub default: AgentKind,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_ready_poll_ms")]
    pub ready_poll_ms: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default: AgentKind::default(),
            ready_timeout_secs: default_ready_timeout_secs(),
            ready_poll_ms: default_ready_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ViewConfig {
    #[serde(default)]
    pub sort: SortKey,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_session_prefix() -> String {
    "vigil".to_string()
}

fn default_chat_command() -> String {
    "claude".to_string()
}

fn default_issues_command() -> String {
    "vigil issues --watch".to_string()
}

fn default_chat_percent() -> u8 {
    25
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_ready_poll_ms() -> u64 {
    250
}

pub fn config_path_for_vault(vault: &Path) -> PathBuf {
    vault.join(CONFIG_RELATIVE_PATH)
}

pub fn parse_config(contents: &str) -> Result<VigilConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<VigilConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<VigilConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(VigilConfig::default());
    }
    load_config(path_ref)
}

pub fn save_config(path: impl AsRef<Path>, config: &VigilConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    if let Some(parent_dir) = path_ref.parent() {
        fs::create_dir_all(parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}
