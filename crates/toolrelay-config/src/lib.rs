//! Multi-tier TOML configuration for toolrelay.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > project > global > defaults

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toolrelay_mcp::McpServerConfig;

/// The default log filter when nothing else is configured.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Name of the per-project settings file, looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = ".toolrelay.toml";

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("No MCP server named '{name}' is configured")]
    UnknownServer { name: String },

    #[error("No MCP servers configured (add [servers.<name>] to ~/.toolrelay/config.toml)")]
    NoServers,

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Resolved configuration for a toolrelay run.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub servers: HashMap<String, McpServerConfig>,
    pub default_server: Option<String>,
    pub log_level: String,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    pub log_level: Option<String>,
    pub default_server: Option<String>,
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server: Option<String>,
    pub log_level: Option<String>,
}

impl RelayConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`TOOLRELAY_SERVER`, `TOOLRELAY_LOG`)
    /// 3. Project config (`./.toolrelay.toml`)
    /// 4. Global config (`~/.toolrelay/config.toml`)
    /// 5. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let project = std::env::current_dir()
            .map(|cwd| cwd.join(PROJECT_CONFIG_FILE))
            .ok();
        let mut config = Self::load_from(&config_dir.join("config.toml"), project.as_deref())?;
        config.config_dir = config_dir;

        if let Some(server) = overrides
            .server
            .or_else(|| std::env::var("TOOLRELAY_SERVER").ok())
        {
            config.default_server = Some(server);
        }
        if let Some(level) = overrides
            .log_level
            .or_else(|| std::env::var("TOOLRELAY_LOG").ok())
        {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Merge a global and an optional project settings file.
    ///
    /// Missing files are fine; files that exist but do not parse are errors.
    pub fn load_from(global: &Path, project: Option<&Path>) -> Result<Self, ConfigError> {
        let global_settings = load_settings_file(global)?;
        let project_settings = match project {
            Some(path) => load_settings_file(path)?,
            None => SettingsFile::default(),
        };

        // Project servers replace global servers of the same name
        let mut servers = global_settings.servers;
        servers.extend(project_settings.servers);

        for (name, server) in &servers {
            validate_server(name, server)?;
        }

        let config_dir = global
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(RelayConfig {
            servers,
            default_server: project_settings
                .default_server
                .or(global_settings.default_server),
            log_level: project_settings
                .log_level
                .or(global_settings.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            config_dir,
        })
    }

    /// Pick the server to talk to.
    ///
    /// An explicit name wins, then `default_server`, then the only configured
    /// server if there is exactly one.
    pub fn select_server(&self, name: Option<&str>) -> Result<(String, McpServerConfig), ConfigError> {
        if let Some(name) = name.or(self.default_server.as_deref()) {
            return self
                .servers
                .get(name)
                .map(|server| (name.to_string(), server.clone()))
                .ok_or_else(|| ConfigError::UnknownServer {
                    name: name.to_string(),
                });
        }

        let mut servers = self.servers.iter();
        match (servers.next(), servers.next()) {
            (Some((name, server)), None) => Ok((name.clone(), server.clone())),
            (None, _) => Err(ConfigError::NoServers),
            (Some(_), Some(_)) => Err(ConfigError::InvalidValue {
                key: "default_server".into(),
                message: "several servers are configured; pick one with --server".into(),
            }),
        }
    }
}

fn validate_server(name: &str, server: &McpServerConfig) -> Result<(), ConfigError> {
    if server.command.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: format!("servers.{name}.command"),
            message: "must not be empty".into(),
        });
    }
    if server.timeout_ms == 0 || server.init_timeout_ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: format!("servers.{name}"),
            message: "timeouts must be greater than zero".into(),
        });
    }
    Ok(())
}

/// Get the toolrelay config directory path (~/.toolrelay/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TOOLRELAY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolrelay")
}

/// Load and parse a TOML settings file; a missing file yields defaults.
fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            Ok(SettingsFile::default())
        }
    }
}
