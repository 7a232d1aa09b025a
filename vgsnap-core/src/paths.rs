//! Centralized path configuration for vgsnap.

use std::path::PathBuf;

/// Get the vgsnap configuration directory.
///
/// Resolution order:
/// 1. `VGSNAP_CONFIG_DIR` environment variable
/// 2. `/etc/vgsnap` if it exists (system install)
/// 3. `~/.config/vgsnap` for user installs
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VGSNAP_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    let system_dir = PathBuf::from("/etc/vgsnap");
    if system_dir.exists() {
        return system_dir;
    }

    dirs::config_dir().map(|d| d.join("vgsnap")).unwrap_or(system_dir)
}

/// Get the default configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}
