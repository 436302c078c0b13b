//! Startup wiring. Everything a front end needs is reachable from [`PlayerContext`].

use crate::cache::LyricsCache;
use crate::catalog::Catalog;
use crate::config::PlayerConfig;
use crate::error::Result;
use crate::export::Exporter;
use crate::fetcher::LyricsFetcher;
use crate::hub::SessionHub;
use crate::library::LibraryIndex;
use crate::locate::{DatabaseLocator, DatabasePrompt};
use crate::output::AudioOutput;
use crate::provider::StrictMatch;
use crate::session::SessionController;
use crate::source::LyricSource;
use crate::store::UserDataStore;
use crate::watcher::LibraryWatcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const LOG_TARGET: &str = "osuplayer::context";

/// File locations used by the context
#[derive(Debug, Clone)]
pub struct ContextPaths {
    pub config: PathBuf,
    pub user_db: PathBuf,
    pub lyrics_cache: PathBuf,
    /// Create the standard config, data, cache, export and log directories
    pub create_required_dirs: bool,
}

impl Default for ContextPaths {
    fn default() -> Self {
        Self {
            config: crate::paths::config_path(),
            user_db: crate::paths::user_db_path(),
            lyrics_cache: crate::paths::lyrics_cache_db_path(),
            create_required_dirs: true,
        }
    }
}

impl ContextPaths {
    /// All files inside `dir`; nothing outside it is created
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config: dir.join(crate::paths::CONFIG_FILE_NAME),
            user_db: dir.join(crate::paths::USER_DB_FILE_NAME),
            lyrics_cache: dir.join(crate::paths::LYRICS_CACHE_DB_FILE_NAME),
            create_required_dirs: false,
        }
    }
}

pub struct PlayerContext {
    config: PlayerConfig,
    paths: ContextPaths,
    db_path: Option<PathBuf>,
    library: Arc<LibraryIndex>,
    store: Arc<UserDataStore>,
    lyrics_cache: Option<Arc<LyricsCache>>,
    hub: Arc<SessionHub>,
    controller: Arc<SessionController>,
    fetcher: Arc<LyricsFetcher>,
    strict: StrictMatch,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PlayerContext {
    /// Bring up the player core.
    ///
    /// A missing or unreadable beatmap database is not fatal: the library
    /// stays empty and lookups report tracks as unavailable.
    ///
    /// # Errors
    ///
    /// Returns an error if the user data store cannot be opened.
    pub async fn start(
        mut config: PlayerConfig,
        paths: ContextPaths,
        source: LyricSource,
        output: Arc<dyn AudioOutput>,
        prompt: Option<&dyn DatabasePrompt>,
    ) -> Result<Self> {
        if paths.create_required_dirs {
            let failed = crate::paths::ensure_required_dirs(&config.export.directory());
            if !failed.is_empty() {
                warn!(target: LOG_TARGET, "Missing directories: {}", failed.join(", "));
            }
        }

        let store = Arc::new(
            UserDataStore::open(&paths.user_db, config.storage.persistence_timeout()).await?,
        );
        store.ensure_default_collection().await?;

        let lyrics_cache = if config.lyrics.cache_enabled {
            open_lyrics_cache(&paths.lyrics_cache, config.lyrics.cache_ttl_days).await
        } else {
            None
        };

        let library = Arc::new(LibraryIndex::new());
        let mut locator = DatabaseLocator::new(config.general.db_path.clone());
        if let Some(prompt) = prompt {
            locator = locator.with_prompt(prompt);
        }
        let db_path = match locator.locate().await {
            Ok(located) => {
                if let Err(e) = library.load(&located.path).await {
                    warn!(target: LOG_TARGET, "Starting with an empty library: {}", e);
                }
                if config.general.db_path.as_ref() != Some(&located.path) {
                    config.general.db_path = Some(located.path.clone());
                    if let Err(e) = config.save_to(&paths.config) {
                        warn!(target: LOG_TARGET, "Could not save discovered database path: {}", e);
                    }
                }
                Some(located.path)
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Starting with an empty library: {}", e);
                None
            }
        };

        let cancel_token = CancellationToken::new();
        let hub = SessionHub::new();
        let strict = StrictMatch::new(config.lyrics.strict_mode);
        let controller = Arc::new(SessionController::new(
            Arc::clone(&library),
            Arc::clone(&store),
            output,
            Arc::clone(&hub),
            &config.playback,
        ));
        let fetcher = Arc::new(LyricsFetcher::new(
            Arc::clone(&hub),
            lyrics_cache.clone(),
            source,
            strict.clone(),
            config.lyrics.request_timeout(),
            Some(cancel_token.child_token()),
        ));

        let mut tasks = vec![Arc::clone(&fetcher).start()];
        if let Some(path) = &db_path {
            match LibraryWatcher::spawn(
                path.clone(),
                Arc::clone(&library),
                Arc::clone(&hub),
                cancel_token.child_token(),
            ) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(target: LOG_TARGET, "Library changes will not be picked up: {}", e),
            }
        }

        info!(
            target: LOG_TARGET,
            "Player started: {} beatmaps, lyric source {}",
            library.len(),
            fetcher.source_name()
        );

        Ok(Self {
            config,
            paths,
            db_path,
            library,
            store,
            lyrics_cache,
            hub,
            controller,
            fetcher,
            strict,
            cancel_token,
            tasks,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// The beatmap database in use, if one was found
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    #[must_use]
    pub fn library(&self) -> &Arc<LibraryIndex> {
        &self.library
    }

    #[must_use]
    pub fn store(&self) -> &Arc<UserDataStore> {
        &self.store
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    #[must_use]
    pub fn fetcher(&self) -> &Arc<LyricsFetcher> {
        &self.fetcher
    }

    #[must_use]
    pub fn strict(&self) -> &StrictMatch {
        &self.strict
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn catalog(&self) -> Catalog {
        Catalog::new(Arc::clone(&self.library), Arc::clone(&self.store))
    }

    #[must_use]
    pub fn exporter(&self) -> Exporter {
        Exporter::new(
            Arc::clone(&self.library),
            Arc::clone(&self.store),
            self.config.export.directory(),
        )
    }

    /// Change strict matching for later lyric lookups and persist the choice.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn set_strict_mode(&mut self, strict: bool) -> Result<()> {
        self.strict.set(strict);
        self.config.lyrics.strict_mode = strict;
        self.config.save_to(&self.paths.config)
    }

    /// Stop playback and background tasks, then flush the databases.
    pub async fn shutdown(self) {
        info!(target: LOG_TARGET, "Shutting down");
        self.cancel_token.cancel();

        if let Err(e) = self.controller.stop().await {
            warn!(target: LOG_TARGET, "Audio output failed to stop: {}", e);
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(target: LOG_TARGET, "Background task ended abnormally: {}", e);
            }
        }

        if let Err(e) = self.store.checkpoint().await {
            warn!(target: LOG_TARGET, "Failed to checkpoint user data: {}", e);
        }
        if let Some(cache) = &self.lyrics_cache {
            if let Err(e) = cache.checkpoint().await {
                warn!(target: LOG_TARGET, "Failed to checkpoint lyrics cache: {}", e);
            }
        }
    }
}

async fn open_lyrics_cache(path: &Path, ttl_days: u32) -> Option<Arc<LyricsCache>> {
    let cache = match LyricsCache::open(path).await {
        Ok(cache) => cache,
        Err(e) => {
            warn!(target: LOG_TARGET, "Lyrics cache disabled: {}", e);
            return None;
        }
    };
    match cache.cleanup(ttl_days).await {
        Ok(0) => {}
        Ok(deleted) => info!(target: LOG_TARGET, "Removed {} expired cached lyrics", deleted),
        Err(e) => warn!(target: LOG_TARGET, "Lyrics cache cleanup failed: {}", e),
    }
    Some(Arc::new(cache))
}
