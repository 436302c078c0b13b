use crate::identity::BeatmapIdentity;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Library errors
    #[error("Beatmap database unavailable at {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("Failed to parse beatmap database {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    // Playback errors
    #[error("Track unavailable: {identity} ({reason})")]
    TrackUnavailable {
        identity: BeatmapIdentity,
        reason: String,
    },

    #[error("Play queue has no playable entries")]
    EmptyQueue,

    // User data errors
    #[error("Persistence error during {operation}: {reason}")]
    Persistence {
        operation: &'static str,
        reason: String,
    },

    #[error("Collection \"{name}\" (id {id}) is locked and cannot be removed")]
    CollectionLocked { id: i64, name: String },

    #[error("Collection {id} not found")]
    CollectionNotFound { id: i64 },

    // Configuration errors
    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    // Lyrics errors
    #[error("Lyrics provider {provider} failed: {reason}")]
    LyricsProviderFailed { provider: String, reason: String },

    #[error("Lyrics cache error: {0}")]
    Cache(#[from] tokio_rusqlite::Error),

    #[error("Failed to encode lyrics: {0}")]
    Json(#[from] serde_json::Error),

    // Network errors
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Network request failed: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to watch {path}: {reason}")]
    Watcher { path: PathBuf, reason: String },
}

impl CoreError {
    pub(crate) fn persistence(operation: &'static str, reason: impl ToString) -> Self {
        Self::Persistence {
            operation,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unavailable(identity: &BeatmapIdentity, reason: impl Into<String>) -> Self {
        Self::TrackUnavailable {
            identity: identity.clone(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
