use std::env;
use std::path::PathBuf;

use dirs_next::{config_dir, home_dir};

/// Directory name under the platform config directory.
const CONFIG_DIR_NAME: &str = "dsq";

pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Resolve a config file path, preferring a non-empty `override_env` value.
///
/// Falls back to `<config_dir>/dsq/<file_name>` (for example
/// `~/.config/dsq/credentials.json`).
pub fn config_file_path(override_env: &str, file_name: &str) -> PathBuf {
    if let Ok(path) = env::var(override_env)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(file_name)
}
