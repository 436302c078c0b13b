//! Lyrics fetcher that resolves lyrics for every track change.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::LyricsCache;
use crate::hub::{LyricSlot, SessionEvent, SessionHub};
use crate::library::BeatmapEntry;
use crate::provider::{LyricsQuery, StrictMatch};
use crate::source::LyricSource;

const LOG_TARGET: &str = "osuplayer::lyrics::fetcher";

/// Resolves lyrics on every track change and writes them to the hub's lyric slot.
///
/// Each resolution runs as its own task. A newer track change cancels the
/// running one, and the hub drops any result whose generation is stale.
pub struct LyricsFetcher {
    hub: Arc<SessionHub>,
    cache: Option<Arc<LyricsCache>>,
    source: RwLock<LyricSource>,
    strict: StrictMatch,
    request_timeout: Duration,
    cancel_token: CancellationToken,
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
}

impl LyricsFetcher {
    /// Create a new lyrics fetcher
    ///
    /// # Arguments
    /// * `hub` - Session hub to listen for track changes on
    /// * `cache` - Lyrics cache, `None` when caching is disabled
    /// * `source` - Provider chain to resolve with
    /// * `strict` - Shared strict-mode flag
    /// * `request_timeout` - Upper bound for each provider lookup
    /// * `cancel_token` - Optional external cancellation token for graceful shutdown
    pub fn new(
        hub: Arc<SessionHub>,
        cache: Option<Arc<LyricsCache>>,
        source: LyricSource,
        strict: StrictMatch,
        request_timeout: Duration,
        cancel_token: Option<CancellationToken>,
    ) -> Self {
        Self {
            hub,
            cache,
            source: RwLock::new(source),
            strict,
            request_timeout,
            cancel_token: cancel_token.unwrap_or_default(),
            in_flight: Mutex::new(None),
        }
    }

    /// Get a clone of the cancellation token
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn strict(&self) -> &StrictMatch {
        &self.strict
    }

    /// Name of the active lyric source
    #[must_use]
    pub fn source_name(&self) -> &'static str {
        self.source.read().name()
    }

    #[must_use]
    pub fn source(&self) -> LyricSource {
        self.source.read().clone()
    }

    /// Swap the provider chain. Affects resolutions started afterwards.
    pub fn replace_source(&self, source: LyricSource) {
        info!(target: LOG_TARGET, "Switching lyric source to {}", source.name());
        *self.source.write() = source;
    }

    /// Start the lyrics fetcher in a background task
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let rx = self.hub.subscribe();
        tokio::spawn(async move {
            self.run(rx).await;
        })
    }

    async fn run(self: &Arc<Self>, mut rx: broadcast::Receiver<SessionEvent>) {
        info!(target: LOG_TARGET, "Initializing lyrics fetching handler");

        self.catch_up().await;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: LOG_TARGET, "Lyrics fetcher shutting down");
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Ok(SessionEvent::TrackChanged { generation, entry, .. }) => {
                            self.spawn_resolution(generation, entry);
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(target: LOG_TARGET, "Missed {} session events", missed);
                            self.catch_up().await;
                        }
                        Err(RecvError::Closed) => break,
                        Ok(_) => {}
                    }
                }
            }
        }

        self.cancel_in_flight();
    }

    /// Resolve the current track if its lyrics are still pending and nothing is working on it.
    async fn catch_up(self: &Arc<Self>) {
        let Some((generation, entry)) = self.hub.current_entry().await else {
            return;
        };
        let busy = self
            .in_flight
            .lock()
            .as_ref()
            .is_some_and(|(g, _)| *g == generation);
        if !busy && self.hub.lyrics().await == LyricSlot::Pending {
            info!(
                target: LOG_TARGET,
                "Found pending track {}, fetching lyrics",
                entry.identity
            );
            self.spawn_resolution(generation, entry);
        }
    }

    /// Re-resolve the current track, e.g. after switching source or strict mode.
    pub async fn refresh(self: &Arc<Self>) {
        let Some((generation, entry)) = self.hub.current_entry().await else {
            debug!(target: LOG_TARGET, "No current track to refresh lyrics for");
            return;
        };
        if self.hub.mark_lyrics_pending(generation).await {
            self.spawn_resolution(generation, entry);
        }
    }

    fn cancel_in_flight(&self) {
        if let Some((generation, token)) = self.in_flight.lock().take() {
            debug!(target: LOG_TARGET, "Cancelling lyric resolution for generation {}", generation);
            token.cancel();
        }
    }

    fn spawn_resolution(self: &Arc<Self>, generation: u64, entry: Arc<BeatmapEntry>) {
        let token = self.cancel_token.child_token();
        if let Some((_, previous)) = self
            .in_flight
            .lock()
            .replace((generation, token.clone()))
        {
            previous.cancel();
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(target: LOG_TARGET, "Lyric resolution for {} cancelled", entry.identity);
                }
                () = this.resolve(generation, &entry) => {}
            }
            let mut in_flight = this.in_flight.lock();
            if in_flight.as_ref().is_some_and(|(g, _)| *g == generation) {
                *in_flight = None;
            }
        });
    }

    /// Resolve lyrics for `entry` and publish them under `generation`.
    pub async fn resolve(&self, generation: u64, entry: &BeatmapEntry) {
        let query = LyricsQuery::for_entry(entry);
        let source = self.source.read().clone();
        info!(
            target: LOG_TARGET,
            "Fetching lyrics for: {} - {} (source: {})",
            query.artist,
            query.title,
            source.name()
        );

        if let Some(cache) = &self.cache {
            match cache
                .get(source.name(), &query.title, &query.artist, self.strict.get())
                .await
            {
                Ok(Some(cached)) => {
                    info!(target: LOG_TARGET, "Using cached lyrics for {}", query.title);
                    self.hub
                        .set_lyrics(generation, Arc::new(cached.document))
                        .await;
                    return;
                }
                Ok(None) => {}
                Err(e) => warn!(target: LOG_TARGET, "Failed to read lyrics cache: {}", e),
            }
        }

        let Some(found) = source
            .search(&query, &self.strict, self.request_timeout)
            .await
        else {
            info!(
                target: LOG_TARGET,
                "No lyrics found for {} - {} (tried {} providers)",
                query.artist,
                query.title,
                source.providers().len()
            );
            self.hub.set_no_lyrics(generation).await;
            return;
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache
                .store(source.name(), &query.title, &query.artist, &found)
                .await
            {
                warn!(target: LOG_TARGET, "Failed to cache lyrics: {}", e);
            }
        }

        if !self.hub.set_lyrics(generation, Arc::new(found.document)).await {
            debug!(target: LOG_TARGET, "Discarded lyrics for superseded track {}", entry.identity);
        }
    }
}
