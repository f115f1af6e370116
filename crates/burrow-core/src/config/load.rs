//! Configuration loading from files and environment
//!
//! Each layer produces a new `Config`; nothing is mutated in place.

use std::path::{Path, PathBuf};

use super::types::{Config, PartialConfig};
use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy.
///
/// `root_override` (typically a CLI flag) wins over every other source for
/// the root path and decides which `config.toml` is read as the root layer.
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or names unknown keys
/// - An environment variable holds an unparseable value
/// - The merged values fail validation
pub fn load_config(root_override: Option<&Path>) -> Result<Config> {
    // 1. Built-in defaults
    let config = Config::default();

    // 2. Global config if it exists
    let config = match global_config_path() {
        Some(path) if path.is_file() => config.merge(load_toml_file(&path)?),
        _ => config,
    };

    // 3. Resolve the root before reading its own config file
    let root = root_override
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("BURROW_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| config.root.clone());
    let config = Config { root, ..config };

    let root_path = root_config_path(&config.root);
    let config = if root_path.is_file() {
        let layer = load_toml_file(&root_path)?;
        // The root file cannot relocate the root it was found in.
        config.merge(PartialConfig {
            root: None,
            ..layer
        })
    } else {
        config
    };

    // 4. Environment variable overrides
    let config = config.apply_env_vars()?;

    // 5. Validate
    config.validate()?;
    tracing::debug!(root = %config.root.display(), "loaded configuration");
    Ok(config)
}

// ═══════════════════════════════════════════════════════════════════════════
// PATH HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Get path to the global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "burrow")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

/// Get path to the config file stored inside a coordination root
pub fn root_config_path(root: &Path) -> PathBuf {
    root.join("config.toml")
}

/// Load a TOML file into a partial config layer
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_toml_file(path: &Path) -> Result<PartialConfig> {
    if path.is_dir() {
        return Err(Error::invalid_config(format!(
            "config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read config file {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| {
        Error::invalid_config(format!(
            "failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLE OVERRIDES
// ═══════════════════════════════════════════════════════════════════════════

impl Config {
    /// Apply `BURROW_*` environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if an environment variable value cannot be parsed
    pub fn apply_env_vars(mut self) -> Result<Self> {
        if let Some(value) = env_value("BURROW_LOCK_TIMEOUT_MS")? {
            self.lock.timeout_ms = value;
        }
        if let Some(value) = env_value("BURROW_LOCK_RETRY_INTERVAL_MS")? {
            self.lock.retry_interval_ms = value;
        }
        if let Some(value) = env_value("BURROW_LOCK_STALE_AFTER_SECS")? {
            self.lock.stale_after_secs = value;
        }
        if let Some(value) = env_value("BURROW_BACKUP_RETENTION")? {
            self.store.backup_retention = value;
        }
        if let Some(value) = env_value("BURROW_CHECK_CONFLICTS")? {
            self.store.check_conflicts = value;
        }
        Ok(self)
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key).ok().map_or(Ok(None), |raw| {
        raw.trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::invalid_config(format!("invalid {key} value '{raw}': {e}")))
    })
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;

    const ENV_KEYS: &[&str] = &[
        "BURROW_ROOT",
        "BURROW_LOCK_TIMEOUT_MS",
        "BURROW_LOCK_RETRY_INTERVAL_MS",
        "BURROW_LOCK_STALE_AFTER_SECS",
        "BURROW_BACKUP_RETENTION",
        "BURROW_CHECK_CONFLICTS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_root_override_without_files_uses_defaults() -> Result<()> {
        clear_env();
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        let config = load_config(Some(dir.path()))?;
        assert_eq!(config.root, dir.path());
        assert_eq!(config.lock.timeout_ms, 30_000);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_root_config_file_is_applied() -> Result<()> {
        clear_env();
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        std::fs::write(
            root_config_path(dir.path()),
            "[lock]\ntimeout_ms = 2000\n\n[store]\nbackup_retention = 2\n",
        )
        .map_err(|e| Error::io("write config", e))?;

        let config = load_config(Some(dir.path()))?;
        assert_eq!(config.lock.timeout_ms, 2000);
        assert_eq!(config.lock.retry_interval_ms, 100);
        assert_eq!(config.store.backup_retention, 2);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() -> Result<()> {
        clear_env();
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        std::fs::write(root_config_path(dir.path()), "[lock]\ntimeout_ms = 2000\n")
            .map_err(|e| Error::io("write config", e))?;
        std::env::set_var("BURROW_LOCK_TIMEOUT_MS", "4000");
        std::env::set_var("BURROW_CHECK_CONFLICTS", "false");

        let result = load_config(Some(dir.path()));
        clear_env();
        let config = result?;
        assert_eq!(config.lock.timeout_ms, 4000);
        assert!(!config.store.check_conflicts);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_rejected() {
        clear_env();
        std::env::set_var("BURROW_BACKUP_RETENTION", "lots");
        let result = Config::default().apply_env_vars();
        clear_env();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_toml_returns_config_error() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[lock\ntimeout_ms = ").map_err(|e| Error::io("write", e))?;
        assert!(matches!(load_toml_file(&path), Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_unknown_keys_are_rejected() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        let path = dir.path().join("typo.toml");
        std::fs::write(&path, "[lock]\ntimout_ms = 5\n").map_err(|e| Error::io("write", e))?;
        assert!(load_toml_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_directory_path_is_rejected() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::io("tempdir", e))?;
        assert!(matches!(
            load_toml_file(dir.path()),
            Err(Error::InvalidConfig(_))
        ));
        Ok(())
    }
}
