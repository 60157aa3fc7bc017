//! Application configuration loading for CLI defaults.
//!
//! The config file is a TOML table whose keys are the fields of
//! [`OrchestratorConfig`]; missing keys keep their defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use seedbox_core::OrchestratorConfig;

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed orchestrator settings (defaults when no file was read).
    pub config: OrchestratorConfig,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/seedbox/config.toml`
/// 2. `$HOME/.config/seedbox/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("seedbox")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("seedbox")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` if given, else from the default path if present.
///
/// An explicit path must exist; the default path is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: OrchestratorConfig::default(),
            loaded_from_file: false,
        }),
    }
}

fn load_file_config(path: &Path) -> Result<OrchestratorConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<OrchestratorConfig> {
    let config: OrchestratorConfig = toml::from_str(raw)?;
    validate(&config)?;
    Ok(config)
}

/// Validates values the type system does not constrain.
pub fn validate(config: &OrchestratorConfig) -> Result<()> {
    let factor = config.retry_backoff_factor;
    if !factor.is_finite() || !(1.0..=10.0).contains(&factor) {
        bail!("Invalid config value for `retry_backoff_factor`: {factor}. Expected range: 1.0..=10.0");
    }
    if config.max_restarts > 100 {
        bail!(
            "Invalid config value for `max_restarts`: {}. Expected range: 0..=100",
            config.max_restarts
        );
    }
    if config.restart_pause_ms > 60_000 {
        bail!(
            "Invalid config value for `restart_pause_ms`: {}. Expected range: 0..=60000",
            config.restart_pause_ms
        );
    }
    if config.backend_timeout_secs > 3600 {
        bail!(
            "Invalid config value for `backend_timeout_secs`: {}. Expected range: 0..=3600",
            config.backend_timeout_secs
        );
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let config = parse_config_str(
            "max_concurrent_sessions = 2\nmax_memory_bytes = 0\ncache_dir = \"/tmp/seedbox\"\n",
        )
        .unwrap();
        assert_eq!(config.max_concurrent_sessions, 2);
        assert_eq!(config.max_memory_bytes, 0);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/seedbox")));
        assert!(config.auto_start);
    }

    #[test]
    fn test_parse_config_rejects_small_backoff_factor() {
        let err = parse_config_str("retry_backoff_factor = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("retry_backoff_factor"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_key() {
        assert!(parse_config_str("concurrency = 5\n").is_err());
    }

    #[test]
    fn test_parse_config_rejects_wrong_type() {
        assert!(parse_config_str("auto_start = \"yes\"\n").is_err());
    }

    #[test]
    fn test_load_config_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "enable_auto_retry = false\n").unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert!(loaded.loaded_from_file);
        assert!(!loaded.config.enable_auto_retry);
    }

    #[test]
    fn test_load_config_explicit_missing_path_errors() {
        let temp = TempDir::new().unwrap();
        let err = load_config(Some(&temp.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
