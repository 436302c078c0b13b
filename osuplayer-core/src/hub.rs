use crate::identity::BeatmapIdentity;
use crate::library::BeatmapEntry;
use crate::lrc::LyricDocument;
use crate::queue::PlayMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Playback state machine states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

impl PlaybackState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the lyric display currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LyricSlot {
    /// No track
    #[default]
    Empty,
    /// Resolution in progress for the current track
    Pending,
    Loaded(Arc<LyricDocument>),
    /// Resolution finished without a result
    NotFound,
}

impl LyricSlot {
    #[must_use]
    pub fn document(&self) -> Option<&Arc<LyricDocument>> {
        match self {
            Self::Loaded(doc) => Some(doc),
            _ => None,
        }
    }
}

/// Events emitted by the session hub
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        state: PlaybackState,
    },
    /// A new track was committed; `generation` identifies it for lyric results
    TrackChanged {
        generation: u64,
        identity: BeatmapIdentity,
        entry: Arc<BeatmapEntry>,
    },
    /// A play request failed
    LoadFailed {
        identity: BeatmapIdentity,
        reason: String,
    },
    QueueChanged {
        len: usize,
        cursor: Option<usize>,
        mode: PlayMode,
    },
    LyricsLoaded {
        generation: u64,
        lyrics: Arc<LyricDocument>,
    },
    LyricsNotFound {
        generation: u64,
    },
    LibraryReloaded {
        count: usize,
    },
    Error {
        message: String,
    },
}

/// Observable session state at one point in time
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub current: Option<BeatmapIdentity>,
    pub entry: Option<Arc<BeatmapEntry>>,
    pub generation: u64,
}

struct HubInner {
    snapshot: SessionSnapshot,
    lyrics: LyricSlot,
}

/// Observable session state and the current-lyric slot.
///
/// The controller and the lyrics fetcher write here; consumers read snapshots
/// or subscribe to [`SessionEvent`]s.
pub struct SessionHub {
    inner: RwLock<HubInner>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Update the playback state, emitting `StateChanged` when it differs.
    pub async fn set_state(&self, state: PlaybackState) {
        let mut inner = self.inner.write().await;
        if inner.snapshot.state != state {
            inner.snapshot.state = state;
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    /// Commit a new current track and reset the lyric slot to pending.
    ///
    /// Returns the new track generation. Lyric results carrying an older
    /// generation are discarded from here on.
    pub async fn begin_track(&self, identity: BeatmapIdentity, entry: Arc<BeatmapEntry>) -> u64 {
        let mut inner = self.inner.write().await;
        inner.snapshot.generation += 1;
        let generation = inner.snapshot.generation;
        inner.snapshot.current = Some(identity.clone());
        inner.snapshot.entry = Some(Arc::clone(&entry));
        inner.lyrics = LyricSlot::Pending;
        self.emit(SessionEvent::TrackChanged {
            generation,
            identity,
            entry,
        });
        generation
    }

    /// Forget the current track (the active track itself became unplayable).
    pub async fn clear_track(&self) {
        let mut inner = self.inner.write().await;
        inner.snapshot.generation += 1;
        inner.snapshot.current = None;
        inner.snapshot.entry = None;
        inner.lyrics = LyricSlot::Empty;
    }

    /// Attach lyrics if `generation` is still the current track. Returns whether they were applied.
    pub async fn set_lyrics(&self, generation: u64, lyrics: Arc<LyricDocument>) -> bool {
        let mut inner = self.inner.write().await;
        if inner.snapshot.generation != generation {
            return false;
        }
        inner.lyrics = LyricSlot::Loaded(Arc::clone(&lyrics));
        self.emit(SessionEvent::LyricsLoaded { generation, lyrics });
        true
    }

    /// Mark that no lyrics were found, if `generation` is still current
    pub async fn set_no_lyrics(&self, generation: u64) -> bool {
        let mut inner = self.inner.write().await;
        if inner.snapshot.generation != generation {
            return false;
        }
        inner.lyrics = LyricSlot::NotFound;
        self.emit(SessionEvent::LyricsNotFound { generation });
        true
    }

    /// Put the lyric slot back to pending for a re-resolution of the current track
    pub async fn mark_lyrics_pending(&self, generation: u64) -> bool {
        let mut inner = self.inner.write().await;
        if inner.snapshot.generation != generation {
            return false;
        }
        inner.lyrics = LyricSlot::Pending;
        true
    }

    pub fn emit_load_failed(&self, identity: BeatmapIdentity, reason: String) {
        self.emit(SessionEvent::LoadFailed { identity, reason });
    }

    pub fn emit_queue_changed(&self, len: usize, cursor: Option<usize>, mode: PlayMode) {
        self.emit(SessionEvent::QueueChanged { len, cursor, mode });
    }

    pub fn emit_library_reloaded(&self, count: usize) {
        self.emit(SessionEvent::LibraryReloaded { count });
    }

    /// Emit an error event
    pub fn emit_error(&self, message: String) {
        self.emit(SessionEvent::Error { message });
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().await.snapshot.clone()
    }

    pub async fn state(&self) -> PlaybackState {
        self.inner.read().await.snapshot.state
    }

    pub async fn current_track(&self) -> Option<BeatmapIdentity> {
        self.inner.read().await.snapshot.current.clone()
    }

    /// Current track with its generation
    pub async fn current_entry(&self) -> Option<(u64, Arc<BeatmapEntry>)> {
        let inner = self.inner.read().await;
        inner
            .snapshot
            .entry
            .as_ref()
            .map(|entry| (inner.snapshot.generation, Arc::clone(entry)))
    }

    pub async fn lyrics(&self) -> LyricSlot {
        self.inner.read().await.lyrics.clone()
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            inner: RwLock::new(HubInner {
                snapshot: SessionSnapshot::default(),
                lyrics: LyricSlot::Empty,
            }),
            event_tx,
        }
    }
}
