//! Where tunehub keeps its files.
//!
//! Priority for every path:
//! 1. `--config-dir` on the command line
//! 2. `TUNEHUB_CONFIG_DIR` environment variable
//! 3. Current directory, if it already holds a tunehub file
//!    (`tunehub.json`, `play_history.json`, `tunehub.log`)
//! 4. Platform directories from `dirs-next`
//!
//! | file                | kind   | Linux default                          |
//! |---------------------|--------|----------------------------------------|
//! | `tunehub.json`      | config | `~/.config/tunehub/`                   |
//! | `play_history.json` | data   | `~/.local/share/tunehub/`              |
//! | `storage/`          | data   | `~/.local/share/tunehub/storage/`      |
//! | `tunehub.log`       | data   | `~/.local/share/tunehub/`              |

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "tunehub";
pub const ENV_CONFIG_DIR: &str = "TUNEHUB_CONFIG_DIR";

pub const PREFS_FILE: &str = "tunehub.json";
pub const HISTORY_FILE: &str = "play_history.json";
pub const LOG_FILE: &str = "tunehub.log";
pub const STORAGE_DIR: &str = "storage";

const LOCAL_MARKERS: [&str; 3] = [PREFS_FILE, HISTORY_FILE, LOG_FILE];

/// Path overrides collected from CLI and environment
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Collect the override from CLI and environment.
    ///
    /// Priority: CLI args → ENV var (TUNEHUB_CONFIG_DIR) → None (use defaults).
    /// A blank env value counts as unset.
    ///
    /// # Arguments
    ///
    /// * `cli_dir` - Value of `--config-dir`, if given
    ///
    /// # Example
    /// ```ignore
    /// let paths = PathConfig::from_env_and_cli(args.config_dir.clone());
    /// let history = HistoryLedger::new(paths.history_file());
    /// ```
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| {
            std::env::var(ENV_CONFIG_DIR)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        });
        Self { config_dir }
    }

    pub fn prefs_file(&self) -> PathBuf {
        config_file(PREFS_FILE, self)
    }

    pub fn history_file(&self) -> PathBuf {
        data_file(HISTORY_FILE, self)
    }

    pub fn log_file(&self) -> PathBuf {
        data_file(LOG_FILE, self)
    }

    /// Root of the media cache tree
    pub fn storage_dir(&self) -> PathBuf {
        data_file(STORAGE_DIR, self)
    }
}

/// Resolve a config file (preferences).
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. TUNEHUB_CONFIG_DIR environment variable
/// 3. Local folder IF any tunehub files exist (tunehub.json, play_history.json, tunehub.log)
/// 4. Platform config dir (`~/.config/tunehub` on Linux)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config_dir(config).join(name)
}

/// Resolve a data file (history, log, media storage).
///
/// Same priority as [`config_file`], falling back to the platform data dir
/// (`~/.local/share/tunehub` on Linux).
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    data_dir(config).join(name)
}

/// Create config, data and storage directories
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    for dir in [config_dir(config), data_dir(config), config.storage_dir()] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

fn has_local_files(dir: &Path) -> bool {
    LOCAL_MARKERS.iter().any(|f| dir.join(f).exists())
}

fn local_dir() -> Option<PathBuf> {
    std::env::current_dir().ok().filter(|dir| has_local_files(dir))
}

fn config_dir(config: &PathConfig) -> PathBuf {
    // Priority 1: Custom directory from CLI or ENV
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    // Priority 2: Local folder IF tunehub files exist there
    if let Some(dir) = local_dir() {
        return dir;
    }

    // Priority 3: Platform-specific config directory
    if let Some(dir) = dirs_next::config_dir() {
        return dir.join(APP_DIR);
    }

    // Fallback: current directory
    PathBuf::from(".")
}

fn data_dir(config: &PathConfig) -> PathBuf {
    // Priority 1: Custom directory from CLI or ENV (same as config)
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    // Priority 2: Local folder IF tunehub files exist there
    if let Some(dir) = local_dir() {
        return dir;
    }

    // Priority 3: Platform-specific data directory
    if let Some(dir) = dirs_next::data_dir() {
        return dir.join(APP_DIR);
    }

    PathBuf::from(".")
}
