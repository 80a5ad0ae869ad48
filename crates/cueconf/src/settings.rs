//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How to reach the QLab workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// QLab host.
    /// Default: 127.0.0.1
    #[serde(default = "ConnectionConfig::default_host")]
    pub host: String,

    /// QLab OSC port. Replies come back to a local port above this one.
    /// Default: 53000
    #[serde(default = "ConnectionConfig::default_port")]
    pub port: u16,

    /// Workspace passcode, if the workspace requires one.
    #[serde(default)]
    pub passcode: Option<String>,

    /// Per-request reply timeout in seconds. Workspaces with thousands of
    /// cues can need 30-60 seconds for a full `/cueLists` query.
    /// Default: 10
    #[serde(default = "ConnectionConfig::default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after a timed-out request.
    /// Default: 0
    #[serde(default)]
    pub max_retries: u32,

    /// Consecutive failed requests before the connection is declared lost.
    /// Default: 2
    #[serde(default = "ConnectionConfig::default_max_failures")]
    pub max_failures: u32,

    /// How many local ports to try when binding the reply socket.
    /// Default: 10
    #[serde(default = "ConnectionConfig::default_listen_port_attempts")]
    pub listen_port_attempts: u16,
}

impl ConnectionConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        53000
    }

    fn default_timeout_secs() -> u64 {
        10
    }

    fn default_max_failures() -> u32 {
        2
    }

    fn default_listen_port_attempts() -> u16 {
        10
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            passcode: None,
            timeout_secs: Self::default_timeout_secs(),
            max_retries: 0,
            max_failures: Self::default_max_failures(),
            listen_port_attempts: Self::default_listen_port_attempts(),
        }
    }
}

/// Reconciliation and mutation behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Clear the number of an existing cue that collides with a new one
    /// instead of skipping the assignment.
    /// Default: false
    #[serde(default)]
    pub force_cue_numbers: bool,

    /// Log write operations instead of sending them.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Where transmission snapshots live.
    /// Default: ~/.cache/cuesync
    #[serde(default = "SyncConfig::default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Cue list that holds cues created outside of any list.
    /// Default: Sync Inbox
    #[serde(default = "SyncConfig::default_inbox_list_name")]
    pub inbox_list_name: String,

    /// Delete remote cues that were removed from the source file.
    /// Default: false
    #[serde(default)]
    pub delete_removed: bool,
}

impl SyncConfig {
    fn default_cache_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.cache_dir().join("cuesync"))
            .unwrap_or_else(|| PathBuf::from(".cache/cuesync"))
    }

    fn default_inbox_list_name() -> String {
        "Sync Inbox".to_string()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            force_cue_numbers: false,
            dry_run: false,
            cache_dir: Self::default_cache_dir(),
            inbox_list_name: Self::default_inbox_list_name(),
            delete_removed: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
