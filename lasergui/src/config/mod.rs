//! Configuration for the web GUI server.
//!
//! Defaults live here as named constants; an optional INI config file can
//! override them, and CLI flags override the file. A missing file is not
//! an error, it just means defaults.

use crate::broker::BrokerConfig;
use crate::engine::SessionConfig;
use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 5555;

/// Default engine command, relative to the working directory.
pub const DEFAULT_ENGINE_COMMAND: &str = "../player/leiserchess";

/// Default asset root (the working directory, like the original GUI).
pub const DEFAULT_ASSET_ROOT: &str = ".";

// =============================================================================
// Configuration
// =============================================================================

/// Full configuration for the server.
#[derive(Clone, Debug)]
pub struct GuiConfig {
    /// HTTP listen port.
    pub port: u16,

    /// Path to the engine executable.
    pub engine_command: PathBuf,

    /// Directory the static asset server is rooted at.
    pub asset_root: PathBuf,

    /// Engine session settings.
    pub session: SessionConfig,

    /// Request broker settings.
    pub broker: BrokerConfig,
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            engine_command: PathBuf::from(DEFAULT_ENGINE_COMMAND),
            asset_root: PathBuf::from(DEFAULT_ASSET_ROOT),
            session: SessionConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the config file
    #[error("failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl GuiConfig {
    /// Loads configuration from an INI file.
    ///
    /// If the file does not exist, returns defaults.
    ///
    /// ```ini
    /// [server]
    /// port = 5555
    /// asset_root = .
    ///
    /// [engine]
    /// command = ../player/leiserchess
    /// reply_timeout_secs = 300
    /// handshake_timeout_secs = 10
    ///
    /// [broker]
    /// result_max_age_secs = 300
    /// evict_interval_secs = 30
    /// ```
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        let mut config = Self::default();

        if let Some(port) = get_u64(&ini, "server", "port")? {
            config.port = u16::try_from(port).map_err(|_| ConfigError::InvalidValue {
                section: "server".to_string(),
                key: "port".to_string(),
                value: port.to_string(),
                reason: "port must fit in 16 bits".to_string(),
            })?;
        }
        if let Some(root) = get_str(&ini, "server", "asset_root") {
            config.asset_root = PathBuf::from(root);
        }

        if let Some(command) = get_str(&ini, "engine", "command") {
            config.engine_command = PathBuf::from(command);
        }
        if let Some(secs) = get_u64(&ini, "engine", "reply_timeout_secs")? {
            config.session.reply_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = get_u64(&ini, "engine", "handshake_timeout_secs")? {
            config.session.handshake_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = get_u64(&ini, "broker", "result_max_age_secs")? {
            config.broker.result_max_age = Duration::from_secs(secs);
        }
        if let Some(secs) = get_u64(&ini, "broker", "evict_interval_secs")? {
            config.broker.evict_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn get_str(ini: &Ini, section: &str, key: &str) -> Option<String> {
    ini.section(Some(section))
        .and_then(|s| s.get(key))
        .map(str::to_string)
}

fn get_u64(ini: &Ini, section: &str, key: &str) -> Result<Option<u64>, ConfigError> {
    match get_str(ini, section, key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value,
                reason: "expected an unsigned integer".to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GuiConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.engine_command, PathBuf::from(DEFAULT_ENGINE_COMMAND));
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = GuiConfig::load_from(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_load_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(
            &path,
            "[server]\nport = 8080\n\n[engine]\ncommand = /usr/bin/player\nreply_timeout_secs = 60\n\n[broker]\nresult_max_age_secs = 120\n",
        )
        .unwrap();

        let config = GuiConfig::load_from(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.engine_command, PathBuf::from("/usr/bin/player"));
        assert_eq!(config.session.reply_timeout, Duration::from_secs(60));
        assert_eq!(config.broker.result_max_age, Duration::from_secs(120));
        // Untouched keys keep their defaults.
        assert_eq!(
            config.session.handshake_timeout,
            crate::engine::SessionConfig::default().handshake_timeout
        );
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, "[server]\nport = soon\n").unwrap();

        let err = GuiConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_oversized_port_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, "[server]\nport = 70000\n").unwrap();

        let err = GuiConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
