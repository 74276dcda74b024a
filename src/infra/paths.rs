// src/infra/paths.rs — Config and data locations
//
// All paths respect the QUERYLOOP_HOME environment variable for isolation.
// When QUERYLOOP_HOME is set, config and data live under that directory.
// When unset, config uses ~/.queryloop/ and data uses XDG_DATA_HOME/queryloop.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn queryloop_home() -> Option<PathBuf> {
    std::env::var_os("QUERYLOOP_HOME").map(PathBuf::from)
}

/// Home directory, or the working directory when no home can be resolved.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $QUERYLOOP_HOME/ or ~/.queryloop/
pub fn config_dir() -> PathBuf {
    if let Some(home) = queryloop_home() {
        return home;
    }
    dirs_home().join(".queryloop")
}

/// Data directory: $QUERYLOOP_HOME/data/ or ~/.local/share/queryloop/
pub fn data_dir() -> PathBuf {
    if let Some(home) = queryloop_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "queryloop")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Query history database
pub fn history_db_path() -> PathBuf {
    data_dir().join("history.db")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
