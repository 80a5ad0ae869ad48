//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, CueConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/cuesync/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("cuesync/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("cuesync.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<CueConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<CueConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let bad_value = |section: &str, key: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("[{}] {} is out of range", section, key),
    };

    let mut config = CueConfig::default();

    if let Some(conn) = table.get("connection").and_then(|v| v.as_table()) {
        if let Some(v) = conn.get("host").and_then(|v| v.as_str()) {
            config.connection.host = v.to_string();
        }
        if let Some(v) = conn.get("port").and_then(|v| v.as_integer()) {
            config.connection.port =
                u16::try_from(v).map_err(|_| bad_value("connection", "port"))?;
        }
        if let Some(v) = conn.get("passcode") {
            // QLab passcodes are digits; accept them unquoted too
            config.connection.passcode = match v {
                toml::Value::String(s) if !s.is_empty() => Some(s.clone()),
                toml::Value::Integer(n) => Some(n.to_string()),
                _ => None,
            };
        }
        if let Some(v) = conn.get("timeout_secs").and_then(|v| v.as_integer()) {
            config.connection.timeout_secs =
                u64::try_from(v).map_err(|_| bad_value("connection", "timeout_secs"))?;
        }
        if let Some(v) = conn.get("max_retries").and_then(|v| v.as_integer()) {
            config.connection.max_retries =
                u32::try_from(v).map_err(|_| bad_value("connection", "max_retries"))?;
        }
        if let Some(v) = conn.get("max_failures").and_then(|v| v.as_integer()) {
            config.connection.max_failures =
                u32::try_from(v).map_err(|_| bad_value("connection", "max_failures"))?;
        }
        if let Some(v) = conn.get("listen_port_attempts").and_then(|v| v.as_integer()) {
            config.connection.listen_port_attempts = u16::try_from(v)
                .map_err(|_| bad_value("connection", "listen_port_attempts"))?;
        }
    }

    if let Some(sync) = table.get("sync").and_then(|v| v.as_table()) {
        if let Some(v) = sync.get("force_cue_numbers").and_then(|v| v.as_bool()) {
            config.sync.force_cue_numbers = v;
        }
        if let Some(v) = sync.get("dry_run").and_then(|v| v.as_bool()) {
            config.sync.dry_run = v;
        }
        if let Some(v) = sync.get("cache_dir").and_then(|v| v.as_str()) {
            config.sync.cache_dir = expand_path(v);
        }
        if let Some(v) = sync.get("inbox_list_name").and_then(|v| v.as_str()) {
            config.sync.inbox_list_name = v.to_string();
        }
        if let Some(v) = sync.get("delete_removed").and_then(|v| v.as_bool()) {
            config.sync.delete_removed = v;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(config)
}

/// Overlay value wins only where it differs from the compiled default.
fn pick<T: PartialEq>(base: T, overlay: T, default: &T) -> T {
    if overlay != *default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with `overlay` taking precedence.
pub fn merge_configs(base: CueConfig, overlay: CueConfig) -> CueConfig {
    let d = CueConfig::default();
    CueConfig {
        connection: crate::ConnectionConfig {
            host: pick(base.connection.host, overlay.connection.host, &d.connection.host),
            port: pick(base.connection.port, overlay.connection.port, &d.connection.port),
            passcode: pick(
                base.connection.passcode,
                overlay.connection.passcode,
                &d.connection.passcode,
            ),
            timeout_secs: pick(
                base.connection.timeout_secs,
                overlay.connection.timeout_secs,
                &d.connection.timeout_secs,
            ),
            max_retries: pick(
                base.connection.max_retries,
                overlay.connection.max_retries,
                &d.connection.max_retries,
            ),
            max_failures: pick(
                base.connection.max_failures,
                overlay.connection.max_failures,
                &d.connection.max_failures,
            ),
            listen_port_attempts: pick(
                base.connection.listen_port_attempts,
                overlay.connection.listen_port_attempts,
                &d.connection.listen_port_attempts,
            ),
        },
        sync: crate::SyncConfig {
            force_cue_numbers: pick(
                base.sync.force_cue_numbers,
                overlay.sync.force_cue_numbers,
                &d.sync.force_cue_numbers,
            ),
            dry_run: pick(base.sync.dry_run, overlay.sync.dry_run, &d.sync.dry_run),
            cache_dir: pick(base.sync.cache_dir, overlay.sync.cache_dir, &d.sync.cache_dir),
            inbox_list_name: pick(
                base.sync.inbox_list_name,
                overlay.sync.inbox_list_name,
                &d.sync.inbox_list_name,
            ),
            delete_removed: pick(
                base.sync.delete_removed,
                overlay.sync.delete_removed,
                &d.sync.delete_removed,
            ),
        },
        telemetry: crate::TelemetryConfig {
            log_level: pick(
                base.telemetry.log_level,
                overlay.telemetry.log_level,
                &d.telemetry.log_level,
            ),
        },
    }
}

fn env_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut CueConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("CUESYNC_HOST") {
        config.connection.host = v;
        sources.env_overrides.push("CUESYNC_HOST".to_string());
    }
    if let Ok(v) = env::var("CUESYNC_PORT") {
        if let Ok(port) = v.parse() {
            config.connection.port = port;
            sources.env_overrides.push("CUESYNC_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("CUESYNC_PASSCODE") {
        config.connection.passcode = Some(v).filter(|p| !p.is_empty());
        sources.env_overrides.push("CUESYNC_PASSCODE".to_string());
    }
    if let Ok(v) = env::var("CUESYNC_TIMEOUT") {
        if let Ok(secs) = v.parse() {
            config.connection.timeout_secs = secs;
            sources.env_overrides.push("CUESYNC_TIMEOUT".to_string());
        }
    }
    if let Ok(v) = env::var("CUESYNC_RETRIES") {
        if let Ok(retries) = v.parse() {
            config.connection.max_retries = retries;
            sources.env_overrides.push("CUESYNC_RETRIES".to_string());
        }
    }

    if let Ok(v) = env::var("CUESYNC_CACHE_DIR") {
        config.sync.cache_dir = expand_path(&v);
        sources.env_overrides.push("CUESYNC_CACHE_DIR".to_string());
    }
    if let Some(flag) = env::var("CUESYNC_DRY_RUN").ok().as_deref().and_then(env_flag) {
        config.sync.dry_run = flag;
        sources.env_overrides.push("CUESYNC_DRY_RUN".to_string());
    }
    if let Some(flag) = env::var("CUESYNC_FORCE_CUE_NUMBERS")
        .ok()
        .as_deref()
        .and_then(env_flag)
    {
        config.sync.force_cue_numbers = flag;
        sources.env_overrides.push("CUESYNC_FORCE_CUE_NUMBERS".to_string());
    }

    if let Ok(v) = env::var("CUESYNC_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("CUESYNC_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(stripped),
            None => PathBuf::from(path),
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        match stripped.split_once('/') {
            Some((var_name, rest)) => match env::var(var_name) {
                Ok(value) => PathBuf::from(value).join(rest),
                Err(_) => PathBuf::from(path),
            },
            None => env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path)),
        }
    } else {
        PathBuf::from(path)
    }
}
