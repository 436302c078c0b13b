//! Path constants for configuration, data and cache files.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOG_TARGET: &str = "osuplayer::paths";

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "osuplayer";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The name of the user data database file (collections, recent plays, export queue)
pub const USER_DB_FILE_NAME: &str = "player.db";

/// The name of the lyrics cache database file
pub const LYRICS_CACHE_DB_FILE_NAME: &str = "lyrics_cache.db";

/// The name of the log file
pub const LOG_FILE_NAME: &str = "osuplayer.log";

/// File name of the game client's beatmap database
pub const OSU_DB_FILE_NAME: &str = "osu!.db";

/// Folder next to `osu!.db` that holds the beatmap-set directories
pub const SONGS_DIR_NAME: &str = "Songs";

/// Get the configuration directory path (~/.config/osuplayer/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.config/osuplayer/config.toml)
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Get the data directory (platform data dir, falling back to the config dir)
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(config_dir, |dir| dir.join(CONFIG_DIR_NAME))
}

/// Get the user data database path (`<data dir>/player.db`)
#[must_use]
pub fn user_db_path() -> PathBuf {
    data_dir().join(USER_DB_FILE_NAME)
}

/// Get the lyrics cache directory (`<data dir>/lyrics`)
#[must_use]
pub fn lyrics_cache_dir() -> PathBuf {
    data_dir().join("lyrics")
}

/// Get the lyrics cache database path (`<data dir>/lyrics/lyrics_cache.db`)
#[must_use]
pub fn lyrics_cache_db_path() -> PathBuf {
    lyrics_cache_dir().join(LYRICS_CACHE_DB_FILE_NAME)
}

/// Get the default export directory (`<data dir>/export`)
#[must_use]
pub fn default_export_dir() -> PathBuf {
    data_dir().join("export")
}

/// Get the log directory (`<data dir>/logs`)
#[must_use]
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Get the log file path (`<data dir>/logs/osuplayer.log`)
#[must_use]
pub fn log_file_path() -> PathBuf {
    log_dir().join(LOG_FILE_NAME)
}

/// Directories the player expects to exist at startup.
#[must_use]
pub fn required_dirs(export_dir: &Path) -> [(&'static str, PathBuf); 5] {
    [
        ("config", config_dir()),
        ("data", data_dir()),
        ("lyrics cache", lyrics_cache_dir()),
        ("export", export_dir.to_path_buf()),
        ("logs", log_dir()),
    ]
}

/// Create every directory from [`required_dirs`].
///
/// Failures are logged per directory and do not stop the others from being
/// created; the returned list names the directories that could not be created.
pub fn ensure_required_dirs(export_dir: &Path) -> Vec<&'static str> {
    let mut failed = Vec::new();
    for (name, dir) in required_dirs(export_dir) {
        match std::fs::create_dir_all(&dir) {
            Ok(()) => debug!(target: LOG_TARGET, "Ensured {} directory at {:?}", name, dir),
            Err(e) => {
                warn!(target: LOG_TARGET, "Could not create {} directory at {:?}: {}", name, dir, e);
                failed.push(name);
            }
        }
    }
    failed
}
