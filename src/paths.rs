//! Application path management
//!
//! - **Dev mode**: `config.yaml` in the working directory (debug builds only);
//!   state and logs live next to it.
//! - **Portable mode**: a `.portable` marker next to the executable keeps all
//!   data in the executable's directory.
//! - **Installed mode** (default): data lives in the platform data directory
//!   under `gesture-bridge/`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used in installed mode
const APP_NAME: &str = "gesture-bridge";

/// How the paths were resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Dev,
    Portable,
    Installed,
}

/// Application paths for config, state, and logs
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    pub config: PathBuf,
    /// Embedded database directory lives under here
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub mode: PathMode,
}

impl AppPaths {
    /// Detect paths from the environment
    ///
    /// Called before logging is initialized.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        Self::resolve(&cwd, &exe_dir, dirs::data_dir(), cfg!(debug_assertions))
    }

    /// Pure resolution used by [`AppPaths::detect`]
    pub fn resolve(cwd: &Path, exe_dir: &Path, data_dir: Option<PathBuf>, allow_dev: bool) -> Self {
        if allow_dev && cwd.join("config.yaml").exists() {
            return Self::rooted(cwd, PathMode::Dev);
        }

        if exe_dir.join(".portable").exists() {
            return Self::rooted(exe_dir, PathMode::Portable);
        }

        let base = data_dir.unwrap_or_else(|| exe_dir.to_path_buf()).join(APP_NAME);
        Self {
            config: base.join("config.yaml"),
            state_dir: base.join("state"),
            logs_dir: base.join("logs"),
            mode: PathMode::Installed,
        }
    }

    fn rooted(dir: &Path, mode: PathMode) -> Self {
        Self {
            config: dir.join("config.yaml"),
            state_dir: dir.join(".state"),
            logs_dir: dir.join("logs"),
            mode,
        }
    }

    /// Directory holding the config file
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the state and logs directories
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.state_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_prefers_cwd_config() {
        let cwd = tempfile::tempdir().unwrap();
        let exe = tempfile::tempdir().unwrap();
        std::fs::write(cwd.path().join("config.yaml"), "{}").unwrap();
        std::fs::write(exe.path().join(".portable"), "").unwrap();

        let paths = AppPaths::resolve(cwd.path(), exe.path(), None, true);
        assert_eq!(paths.mode, PathMode::Dev);
        assert_eq!(paths.state_dir, cwd.path().join(".state"));

        let release = AppPaths::resolve(cwd.path(), exe.path(), None, false);
        assert_eq!(release.mode, PathMode::Portable);
        assert_eq!(release.config, exe.path().join("config.yaml"));
    }

    #[test]
    fn test_installed_mode_uses_data_dir() {
        let cwd = tempfile::tempdir().unwrap();
        let exe = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();

        let paths = AppPaths::resolve(cwd.path(), exe.path(), Some(data.path().to_path_buf()), true);
        assert_eq!(paths.mode, PathMode::Installed);
        assert_eq!(paths.base_dir(), data.path().join("gesture-bridge"));
        assert_eq!(paths.state_dir, data.path().join("gesture-bridge").join("state"));
    }

    #[test]
    fn test_ensure_directories_creates_state_and_logs() {
        let root = tempfile::tempdir().unwrap();
        let paths = AppPaths::resolve(root.path(), root.path(), Some(root.path().to_path_buf()), false);

        paths.ensure_directories().unwrap();
        assert!(paths.state_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
    }
}
