pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod hub;
pub mod identity;
pub mod library;
pub mod locate;
pub mod lrc;
pub mod output;
pub mod paths;
pub mod provider;
pub mod queue;
pub mod session;
pub mod source;
pub mod store;
pub mod time;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use cache::{CachedLyrics, LyricsCache};
pub use catalog::{Catalog, CatalogItem, RecentSort};
pub use config::{
    ExportConfig, GeneralConfig, LoggingConfig, LyricSourceKind, LyricsConfig, PlaybackConfig,
    PlayerConfig, StorageConfig,
};

/// Re-export toml error type for config parsing error handling
pub use toml::de::Error as TomlParseError;
pub use context::{ContextPaths, PlayerContext};
pub use error::{CoreError, Result};
pub use export::{ExportReport, Exporter};
pub use fetcher::LyricsFetcher;
pub use hub::{LyricSlot, PlaybackState, SessionEvent, SessionHub, SessionSnapshot};
pub use identity::BeatmapIdentity;
pub use library::{BeatmapEntry, LibraryIndex, LibrarySnapshot};
pub use locate::{DatabaseLocator, DatabaseOrigin, DatabasePrompt, LocatedDatabase};
pub use lrc::{LyricDocument, LyricLine, LyricMetadata};
pub use output::{AudioOutput, PreparedTrack, SilentOutput};
pub use paths::{
    config_dir, config_path, data_dir, log_file_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    LYRICS_CACHE_DB_FILE_NAME, OSU_DB_FILE_NAME, USER_DB_FILE_NAME,
};
pub use provider::{
    LyricsProvider, LyricsQuery, MatchedLyrics, SongCandidate, StrictMatch,
};
pub use queue::{Direction, PlayMode, PlayQueue};
pub use session::{PlayOutcome, SessionController};
pub use source::LyricSource;
pub use store::{Collection, ExportRequest, RecentPlay, UserDataStore, DEFAULT_COLLECTION_NAME};
pub use time::DurationExt;
pub use watcher::LibraryWatcher;
