use crate::error::Result;
use crate::queue::PlayMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const LOG_TARGET: &str = "osuplayer::config";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub lyrics: LyricsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path to the game client's `osu!.db`. Filled in after auto-detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub play_mode: PlayMode,
    /// Upper bound for preparing a track on the audio output
    #[serde(default = "default_load_timeout")]
    pub load_timeout_ms: u64,
}

const fn default_load_timeout() -> u64 {
    10_000
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            play_mode: PlayMode::default(),
            load_timeout_ms: default_load_timeout(),
        }
    }
}

impl PlaybackConfig {
    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsConfig {
    #[serde(default)]
    pub source: LyricSourceKind,
    /// Require exact (normalized) title and artist matches
    #[serde(default = "default_true")]
    pub strict_mode: bool,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_days: u32,
    /// Upper bound for a single source lookup
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_cache_ttl() -> u32 {
    30
}

const fn default_request_timeout() -> u64 {
    15_000
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            source: LyricSourceKind::default(),
            strict_mode: default_true(),
            cache_enabled: default_true(),
            cache_ttl_days: default_cache_ttl(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl LyricsConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Which lyric source the player asks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricSourceKind {
    /// Netease, then Kugou, then QQ Music
    #[default]
    Auto,
    Netease,
    Kugou,
    QqMusic,
}

impl LyricSourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Netease => "netease",
            Self::Kugou => "kugou",
            Self::QqMusic => "qq_music",
        }
    }
}

impl std::fmt::Display for LyricSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Upper bound for a single user data store call
    #[serde(default = "default_persistence_timeout")]
    pub persistence_timeout_ms: u64,
}

const fn default_persistence_timeout() -> u64 {
    5_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persistence_timeout_ms: default_persistence_timeout(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub const fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl ExportConfig {
    /// Configured export directory or the default one under the data dir
    #[must_use]
    pub fn directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(crate::paths::default_export_dir)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to `<data dir>/logs/osuplayer.log`
    #[serde(default)]
    pub enabled: bool,
}

impl PlayerConfig {
    /// Get the config file path (~/.config/osuplayer/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from the default location, writing the template on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, or contains invalid TOML.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::config_path())
    }

    /// Load config from `path`, writing the template if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, or contains invalid TOML.
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, CONFIG_TEMPLATE)?;
            info!(target: LOG_TARGET, "Created config template at {:?}", path);
            return Ok(toml::from_str(CONFIG_TEMPLATE)?);
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overwrite the config at `path` with the template (used after a parse error).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn reset_at(path: &Path) -> Result<Self> {
        warn!(target: LOG_TARGET, "Resetting config at {:?} to defaults", path);
        fs::write(path, CONFIG_TEMPLATE)?;
        Ok(toml::from_str(CONFIG_TEMPLATE)?)
    }

    /// Persist the config to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Persist the config to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    fn validate(&self) -> Result<()> {
        use crate::error::CoreError;

        if self.playback.load_timeout_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "playback.load_timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.lyrics.request_timeout_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "lyrics.request_timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.storage.persistence_timeout_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "storage.persistence_timeout_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r#"# OsuPlayer Configuration
# ~/.config/osuplayer/config.toml

[general]
# Path to osu!.db. Leave unset to detect it from a running osu! client.
# db_path = "C:/Games/osu!/osu!.db"

[playback]
# "sequential", "shuffle", "repeat_one" or "repeat_all"
play_mode = "sequential"
load_timeout_ms = 10000

[lyrics]
# "auto" tries netease, kugou and qq_music in that order
source = "auto"
# Only accept lyrics whose title and artist match exactly (after normalization)
strict_mode = true
cache_enabled = true
cache_ttl_days = 30
request_timeout_ms = 15000

[storage]
persistence_timeout_ms = 5000

[export]
# directory = "D:/Music/osu export"

[logging]
# Also write logs to the data directory
enabled = false
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn test_template_parses_to_defaults() {
        let config: PlayerConfig = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert!(config.general.db_path.is_none());
        assert_eq!(config.playback.play_mode, PlayMode::Sequential);
        assert_eq!(config.lyrics.source, LyricSourceKind::Auto);
        assert!(config.lyrics.strict_mode);
        assert_eq!(config.lyrics.cache_ttl_days, 30);
        assert!(!config.logging.enabled);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: PlayerConfig = toml::from_str("").unwrap();
        assert_eq!(config.playback.load_timeout(), Duration::from_secs(10));
        assert_eq!(config.storage.persistence_timeout(), Duration::from_secs(5));
        assert!(config.lyrics.cache_enabled);
    }

    #[test]
    fn test_lyric_source_kind_parsing() {
        let config: PlayerConfig = toml::from_str("[lyrics]\nsource = \"qq_music\"\n").unwrap();
        assert_eq!(config.lyrics.source, LyricSourceKind::QqMusic);
        assert_eq!(config.lyrics.source.to_string(), "qq_music");
    }

    #[test]
    fn test_unknown_lyric_source_is_parse_error() {
        let result: std::result::Result<PlayerConfig, _> =
            toml::from_str("[lyrics]\nsource = \"spotify\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_create_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = PlayerConfig::load_or_create_at(&path).unwrap();
        assert!(path.exists());
        assert!(config.lyrics.strict_mode);
    }

    #[test]
    fn test_save_and_reload_db_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = PlayerConfig::default();
        config.general.db_path = Some(PathBuf::from("/games/osu!/osu!.db"));
        config.lyrics.strict_mode = false;
        config.save_to(&path).unwrap();

        let loaded = PlayerConfig::load_or_create_at(&path).unwrap();
        assert_eq!(
            loaded.general.db_path,
            Some(PathBuf::from("/games/osu!/osu!.db"))
        );
        assert!(!loaded.lyrics.strict_mode);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[lyrics\nsource = ").unwrap();

        let err = PlayerConfig::load_or_create_at(&path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse(_)));

        let reset = PlayerConfig::reset_at(&path).unwrap();
        assert_eq!(reset.lyrics.source, LyricSourceKind::Auto);
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[playback]\nload_timeout_ms = 0\n").unwrap();

        let err = PlayerConfig::load_or_create_at(&path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }
}
