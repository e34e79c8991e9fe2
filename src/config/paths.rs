//! Where the settings file and the default session directory live.
//!
//! Both sit under a `submission-pipeline` folder in the platform's standard
//! location, as reported by `dirs`:
//!
//! | what                      | Linux                                     | macOS / Windows                  |
//! |---------------------------|-------------------------------------------|----------------------------------|
//! | `settings.toml`           | `~/.config/submission-pipeline/`          | user config dir                  |
//! | `sessions/` (records)     | `~/.local/share/submission-pipeline/`     | user local data dir              |
//!
//! A platform without one of these directories gets paths relative to the
//! working directory instead.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "submission-pipeline";
const SETTINGS_FILE: &str = "settings.toml";
const SESSIONS_DIR: &str = "sessions";

/// Resolved on-disk locations.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub settings_file: PathBuf,
    /// Used by `--persist` and by commands that read earlier records.
    pub sessions_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        Self::from_roots(dirs::config_dir(), dirs::data_local_dir())
    }

    fn from_roots(config_root: Option<PathBuf>, data_root: Option<PathBuf>) -> Self {
        let app_dir = |root: Option<PathBuf>| -> PathBuf {
            root.as_deref().unwrap_or(Path::new(".")).join(APP_DIR)
        };
        Self {
            settings_file: app_dir(config_root).join(SETTINGS_FILE),
            sessions_dir: app_dir(data_root).join(SESSIONS_DIR),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
