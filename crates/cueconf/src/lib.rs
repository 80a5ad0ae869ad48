//! Configuration loading for cuesync.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/cuesync/config.toml` (system)
//! 2. `~/.config/cuesync/config.toml` (user)
//! 3. `./cuesync.toml` (local override, replaced by an explicit path)
//! 4. Environment variables (`CUESYNC_*`)
//!
//! # Example Config
//!
//! ```toml
//! [connection]
//! host = "10.0.0.20"
//! port = 53000
//! passcode = "1234"
//! timeout_secs = 45
//! max_retries = 1
//!
//! [sync]
//! force_cue_numbers = true
//! cache_dir = "~/.cache/cuesync"
//!
//! [telemetry]
//! log_level = "debug"
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use settings::{ConnectionConfig, SyncConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete cuesync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CueConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl CueConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of
    /// `./cuesync.toml`. System and user configs still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = CueConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Per-request reply timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connection.timeout_secs)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# cuesync configuration\n\n");

        output.push_str("[connection]\n");
        output.push_str(&format!("host = \"{}\"\n", self.connection.host));
        output.push_str(&format!("port = {}\n", self.connection.port));
        if let Some(passcode) = &self.connection.passcode {
            output.push_str(&format!("passcode = \"{}\"\n", passcode));
        }
        output.push_str("# raise for workspaces with many cues\n");
        output.push_str(&format!(
            "timeout_secs = {}\n",
            self.connection.timeout_secs
        ));
        output.push_str(&format!("max_retries = {}\n", self.connection.max_retries));
        output.push_str(&format!(
            "max_failures = {}\n",
            self.connection.max_failures
        ));
        output.push_str(&format!(
            "listen_port_attempts = {}\n",
            self.connection.listen_port_attempts
        ));

        output.push_str("\n[sync]\n");
        output.push_str(&format!(
            "force_cue_numbers = {}\n",
            self.sync.force_cue_numbers
        ));
        output.push_str(&format!("dry_run = {}\n", self.sync.dry_run));
        output.push_str(&format!(
            "cache_dir = \"{}\"\n",
            self.sync.cache_dir.display()
        ));
        output.push_str(&format!(
            "inbox_list_name = \"{}\"\n",
            self.sync.inbox_list_name
        ));
        output.push_str(&format!("delete_removed = {}\n", self.sync.delete_removed));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CueConfig::default();
        assert_eq!(config.connection.port, 53000);
        assert_eq!(config.connection.timeout_secs, 10);
        assert_eq!(config.connection.max_retries, 0);
        assert_eq!(config.connection.max_failures, 2);
        assert!(!config.sync.force_cue_numbers);
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_to_toml_roundtrips_through_loader() {
        let mut config = CueConfig::default();
        config.connection.host = "10.1.1.1".to_string();
        config.connection.passcode = Some("4321".to_string());
        config.sync.dry_run = true;

        let rendered = config.to_toml();
        assert!(rendered.contains("[connection]"));
        assert!(rendered.contains("[sync]"));
        assert!(rendered.contains("[telemetry]"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuesync.toml");
        std::fs::write(&path, rendered).unwrap();
        let parsed = loader::load_from_file(&path).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.toml");
        std::fs::write(&path, "[connection]\nport = 53535\n").unwrap();

        let (config, sources) = CueConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.connection.port, 53535);
        assert_eq!(sources.files.last(), Some(&path));
    }
}
