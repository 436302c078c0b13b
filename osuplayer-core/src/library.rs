//! In-memory beatmap index built from the game client's `osu!.db`.

use crate::error::{CoreError, Result};
use crate::identity::BeatmapIdentity;
use crate::paths::SONGS_DIR_NAME;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::library";

/// Default upper bound for reading the database file from disk
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// One beatmap difficulty as listed in the game's database.
///
/// Entries are rebuilt wholesale on every reload and never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatmapEntry {
    pub identity: BeatmapIdentity,
    pub beatmap_set_id: Option<i32>,
    pub beatmap_id: Option<i32>,
    pub artist: String,
    pub artist_unicode: Option<String>,
    pub title: String,
    pub title_unicode: Option<String>,
    pub creator: String,
    pub source: String,
    pub tags: String,
    /// Absolute path of the beatmap-set directory
    pub folder_path: PathBuf,
    /// `.osu` file name inside the folder
    pub osu_file: Option<String>,
    /// Audio file name inside the folder
    pub audio_file: Option<String>,
    /// Background image file name inside the folder. `osu!.db` does not list
    /// it; see [`BeatmapEntry::resolve_background`].
    pub background_file: Option<String>,
    pub length: Duration,
    pub last_modified: Option<DateTime<Utc>>,
}

impl BeatmapEntry {
    /// Create an entry with empty metadata for `identity` located under `songs_dir`.
    pub fn new(identity: BeatmapIdentity, songs_dir: &Path) -> Self {
        let folder_path = songs_dir.join(identity.folder_name());
        Self {
            identity,
            beatmap_set_id: None,
            beatmap_id: None,
            artist: String::new(),
            artist_unicode: None,
            title: String::new(),
            title_unicode: None,
            creator: String::new(),
            source: String::new(),
            tags: String::new(),
            folder_path,
            osu_file: None,
            audio_file: None,
            background_file: None,
            length: Duration::ZERO,
            last_modified: None,
        }
    }

    /// Set artist and title (romanized form)
    #[must_use]
    pub fn with_metadata(mut self, artist: impl Into<String>, title: impl Into<String>) -> Self {
        self.artist = artist.into();
        self.title = title.into();
        self
    }

    /// Set the unicode artist and title
    #[must_use]
    pub fn with_unicode(mut self, artist: impl Into<String>, title: impl Into<String>) -> Self {
        self.artist_unicode = Some(artist.into());
        self.title_unicode = Some(title.into());
        self
    }

    /// Set the audio file name
    #[must_use]
    pub fn with_audio(mut self, audio_file: impl Into<String>) -> Self {
        self.audio_file = Some(audio_file.into());
        self
    }

    /// Title shown to the user: unicode form when present, romanized otherwise
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title_unicode.as_deref().unwrap_or(&self.title)
    }

    /// Artist shown to the user: unicode form when present, romanized otherwise
    #[must_use]
    pub fn display_artist(&self) -> &str {
        self.artist_unicode.as_deref().unwrap_or(&self.artist)
    }

    #[must_use]
    pub fn audio_path(&self) -> Option<PathBuf> {
        self.audio_file.as_ref().map(|f| self.folder_path.join(f))
    }

    #[must_use]
    pub fn osu_file_path(&self) -> Option<PathBuf> {
        self.osu_file.as_ref().map(|f| self.folder_path.join(f))
    }

    #[must_use]
    pub fn background_path(&self) -> Option<PathBuf> {
        self.background_file.as_ref().map(|f| self.folder_path.join(f))
    }

    /// Background image path, read from the `.osu` file when the entry does
    /// not carry one. `None` if neither names a background.
    pub async fn resolve_background(&self) -> Option<PathBuf> {
        if let Some(path) = self.background_path() {
            return Some(path);
        }
        let osu_path = self.osu_file_path()?;
        let bytes = match tokio::fs::read(&osu_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(target: LOG_TARGET, "Cannot read {}: {}", osu_path.display(), e);
                return None;
            }
        };
        background_from_osu(&String::from_utf8_lossy(&bytes)).map(|f| self.folder_path.join(f))
    }

    fn matches_keyword(&self, keyword: &str) -> bool {
        let fields = [
            Some(self.title.as_str()),
            self.title_unicode.as_deref(),
            Some(self.artist.as_str()),
            self.artist_unicode.as_deref(),
            Some(self.creator.as_str()),
            Some(self.source.as_str()),
            Some(self.tags.as_str()),
            Some(self.identity.version()),
        ];
        fields
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(keyword))
    }
}

/// Immutable view of the index at one point in time.
#[derive(Debug, Default)]
pub struct LibrarySnapshot {
    source: Option<PathBuf>,
    entries: Vec<Arc<BeatmapEntry>>,
    by_identity: HashMap<BeatmapIdentity, usize>,
    loaded_at: Option<DateTime<Utc>>,
}

impl LibrarySnapshot {
    fn build(source: Option<PathBuf>, entries: Vec<BeatmapEntry>) -> Self {
        let mut by_identity = HashMap::with_capacity(entries.len());
        let mut unique = Vec::with_capacity(entries.len());
        let mut duplicates = 0usize;

        for entry in entries {
            if by_identity.contains_key(&entry.identity) {
                duplicates += 1;
                continue;
            }
            by_identity.insert(entry.identity.clone(), unique.len());
            unique.push(Arc::new(entry));
        }

        if duplicates > 0 {
            debug!(target: LOG_TARGET, "Skipped {} duplicate beatmap identities", duplicates);
        }

        Self {
            source,
            entries: unique,
            by_identity,
            loaded_at: Some(Utc::now()),
        }
    }

    #[must_use]
    pub fn get(&self, identity: &BeatmapIdentity) -> Option<&Arc<BeatmapEntry>> {
        self.by_identity.get(identity).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BeatmapEntry>> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Database file this snapshot was built from
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    #[must_use]
    pub const fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

/// Identity-keyed beatmap index that stays readable during reloads.
///
/// A reload builds a complete [`LibrarySnapshot`] off to the side and then
/// swaps the published `Arc`; readers only ever contend on that pointer swap.
pub struct LibraryIndex {
    current: RwLock<Arc<LibrarySnapshot>>,
    reload_lock: tokio::sync::Mutex<()>,
    read_timeout: Duration,
}

impl Default for LibraryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryIndex {
    /// Create an empty index. Every lookup returns `None` until a load succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_read_timeout(Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS))
    }

    #[must_use]
    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        Self {
            current: RwLock::new(Arc::new(LibrarySnapshot::default())),
            reload_lock: tokio::sync::Mutex::new(()),
            read_timeout,
        }
    }

    /// Parse the database at `path` and publish it.
    ///
    /// On any failure the previously published index stays in place.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnavailable` if the file is missing, unreadable or the read
    /// times out, and `Parse` if its contents are not a valid beatmap database.
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let _guard = self.reload_lock.lock().await;
        info!(target: LOG_TARGET, "Loading beatmap database from {:?}", path);

        let bytes = match tokio::time::timeout(self.read_timeout, tokio::fs::read(path)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(target: LOG_TARGET, "Cannot read beatmap database {:?}: {}", path, e);
                return Err(CoreError::SourceUnavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CoreError::SourceUnavailable {
                    path: path.to_path_buf(),
                    reason: format!("read timed out after {:?}", self.read_timeout),
                });
            }
        };

        let songs_dir = songs_dir_for(path);
        let decoded = tokio::task::spawn_blocking(move || decode_listing(&bytes, &songs_dir))
            .await
            .map_err(|e| CoreError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let entries = decoded.map_err(|reason| {
            warn!(target: LOG_TARGET, "Beatmap database {:?} is malformed: {}", path, reason);
            CoreError::Parse {
                path: path.to_path_buf(),
                reason,
            }
        })?;

        let count = self.swap(Some(path.to_path_buf()), entries);
        info!(target: LOG_TARGET, "Indexed {} beatmaps from {:?}", count, path);
        Ok(count)
    }

    /// Publish an already built list of entries, replacing the current index.
    pub fn publish(&self, source: Option<PathBuf>, entries: Vec<BeatmapEntry>) -> usize {
        self.swap(source, entries)
    }

    fn swap(&self, source: Option<PathBuf>, entries: Vec<BeatmapEntry>) -> usize {
        let snapshot = Arc::new(LibrarySnapshot::build(source, entries));
        let count = snapshot.len();
        *self.current.write() = snapshot;
        count
    }

    /// Look up an entry; unknown identities yield `None`.
    #[must_use]
    pub fn lookup(&self, identity: &BeatmapIdentity) -> Option<Arc<BeatmapEntry>> {
        self.current.read().get(identity).cloned()
    }

    /// Snapshot of the index at call time, unaffected by later reloads.
    #[must_use]
    pub fn all(&self) -> Arc<LibrarySnapshot> {
        Arc::clone(&self.current.read())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    /// Case-insensitive search; every whitespace-separated term must match
    /// title, artist, creator, source, tags or difficulty name.
    #[must_use]
    pub fn search(&self, keyword: &str) -> Vec<Arc<BeatmapEntry>> {
        let terms: Vec<String> = keyword
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let snapshot = self.all();
        if terms.is_empty() {
            return snapshot.iter().cloned().collect();
        }
        snapshot
            .iter()
            .filter(|entry| terms.iter().all(|term| entry.matches_keyword(term)))
            .cloned()
            .collect()
    }
}

/// `Songs` directory that sits next to the database file
#[must_use]
pub fn songs_dir_for(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map_or_else(|| PathBuf::from(SONGS_DIR_NAME), |dir| dir.join(SONGS_DIR_NAME))
}

fn decode_listing(bytes: &[u8], songs_dir: &Path) -> std::result::Result<Vec<BeatmapEntry>, String> {
    let listing = osu_db::Listing::from_bytes(bytes).map_err(|e| e.to_string())?;
    debug!(
        target: LOG_TARGET,
        "osu!.db version {} lists {} beatmaps in {} folders",
        listing.version,
        listing.beatmaps.len(),
        listing.folder_count
    );

    let mut skipped = 0usize;
    let entries: Vec<BeatmapEntry> = listing
        .beatmaps
        .iter()
        .filter_map(|beatmap| {
            let entry = convert_beatmap(beatmap, songs_dir);
            if entry.is_none() {
                skipped += 1;
            }
            entry
        })
        .collect();

    if skipped > 0 {
        debug!(target: LOG_TARGET, "Skipped {} beatmaps without a folder name", skipped);
    }
    Ok(entries)
}

/// File name of the background event (`0,0,"bg.jpg",0,0`) in a `.osu` file's
/// `[Events]` section.
#[must_use]
pub fn background_from_osu(osu: &str) -> Option<String> {
    let mut in_events = false;
    for line in osu.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_events = line.eq_ignore_ascii_case("[Events]");
            continue;
        }
        if !in_events || line.is_empty() || line.starts_with("//") {
            continue;
        }

        let mut fields = line.splitn(3, ',');
        let kind = fields.next().map(str::trim);
        let _start_time = fields.next();
        let Some(rest) = fields.next() else {
            continue;
        };
        if !matches!(kind, Some("0" | "Background")) {
            continue;
        }

        let rest = rest.trim();
        let file = match rest.strip_prefix('"') {
            Some(quoted) => quoted.split('"').next(),
            None => rest.split(',').next(),
        };
        if let Some(file) = file.map(str::trim).filter(|f| !f.is_empty()) {
            return Some(file.replace('\\', "/"));
        }
    }
    None
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty()).cloned()
}

fn positive(id: i32) -> Option<i32> {
    (id > 0).then_some(id)
}

fn convert_beatmap(beatmap: &osu_db::listing::Beatmap, songs_dir: &Path) -> Option<BeatmapEntry> {
    let folder = non_empty(beatmap.folder_name.as_ref())?;
    let version = beatmap.difficulty_name.clone().unwrap_or_default();
    let identity = BeatmapIdentity::new(folder, version);

    Some(BeatmapEntry {
        beatmap_set_id: positive(beatmap.beatmapset_id),
        beatmap_id: positive(beatmap.beatmap_id),
        artist: beatmap.artist_ascii.clone().unwrap_or_default(),
        artist_unicode: non_empty(beatmap.artist_unicode.as_ref()),
        title: beatmap.title_ascii.clone().unwrap_or_default(),
        title_unicode: non_empty(beatmap.title_unicode.as_ref()),
        creator: beatmap.creator.clone().unwrap_or_default(),
        source: beatmap.song_source.clone().unwrap_or_default(),
        tags: beatmap.tags.clone().unwrap_or_default(),
        osu_file: non_empty(beatmap.file_name.as_ref()),
        audio_file: non_empty(beatmap.audio.as_ref()),
        background_file: None,
        length: Duration::from_millis(u64::try_from(beatmap.total_time).unwrap_or_default()),
        last_modified: Some(beatmap.last_modified),
        ..BeatmapEntry::new(identity, songs_dir)
    })
}
