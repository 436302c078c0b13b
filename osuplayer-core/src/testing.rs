//! Fixtures and fakes shared by unit tests.

use crate::error::{CoreError, Result};
use crate::identity::BeatmapIdentity;
use crate::library::BeatmapEntry;
use crate::lrc::LyricDocument;
use crate::output::{AudioOutput, PreparedTrack};
use crate::provider::{LyricsProvider, SongCandidate};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Entry under a songs directory that does not exist
pub fn entry(folder: &str, version: &str) -> BeatmapEntry {
    entry_in(Path::new("/nonexistent/Songs"), folder, version)
}

pub fn entry_in(songs_dir: &Path, folder: &str, version: &str) -> BeatmapEntry {
    BeatmapEntry::new(BeatmapIdentity::new(folder, version), songs_dir)
        .with_metadata(format!("Artist of {folder}"), folder)
}

/// Entry whose audio file exists on disk
pub fn playable_entry(songs_dir: &Path, folder: &str, version: &str) -> BeatmapEntry {
    let dir = songs_dir.join(folder);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("audio.mp3"), b"ID3").unwrap();
    entry_in(songs_dir, folder, version).with_audio("audio.mp3")
}

/// `osu!.db` bytes listing one beatmap per `(folder, difficulty)`
pub fn osu_db_bytes(beatmaps: &[(&str, &str)]) -> Vec<u8> {
    use osu_db::listing::{Beatmap, Grade, RankedStatus};

    let now = chrono::Utc::now();
    let beatmaps = beatmaps
        .iter()
        .map(|&(folder, difficulty)| Beatmap {
            artist_ascii: Some("Artist".to_string()),
            artist_unicode: None,
            title_ascii: Some(folder.to_string()),
            title_unicode: None,
            creator: Some("mapper".to_string()),
            difficulty_name: Some(difficulty.to_string()),
            audio: Some("audio.mp3".to_string()),
            hash: None,
            file_name: Some(format!("{folder} [{difficulty}].osu")),
            status: RankedStatus::Ranked,
            hitcircle_count: 0,
            slider_count: 0,
            spinner_count: 0,
            last_modified: now,
            approach_rate: 9.0,
            circle_size: 4.0,
            hp_drain: 5.0,
            overall_difficulty: 8.0,
            slider_velocity: 1.4,
            std_ratings: Vec::new(),
            taiko_ratings: Vec::new(),
            ctb_ratings: Vec::new(),
            mania_ratings: Vec::new(),
            drain_time: 120,
            total_time: 125_000,
            preview_time: 40_000,
            timing_points: Vec::new(),
            beatmap_id: 1,
            beatmapset_id: 1,
            thread_id: 0,
            std_grade: Grade::Unplayed,
            taiko_grade: Grade::Unplayed,
            ctb_grade: Grade::Unplayed,
            mania_grade: Grade::Unplayed,
            local_beatmap_offset: 0,
            stack_leniency: 0.7,
            mode: osu_db::Mode::Standard,
            song_source: None,
            tags: None,
            online_offset: 0,
            title_font: None,
            last_played: None,
            is_osz2: false,
            folder_name: Some(folder.to_string()),
            last_online_check: now,
            ignore_sounds: false,
            ignore_skin: false,
            disable_storyboard: false,
            disable_video: false,
            visual_override: false,
            mysterious_short: None,
            mysterious_last_modified: 0,
            mania_scroll_speed: 0,
        })
        .collect();

    let listing = osu_db::Listing {
        version: 20_211_107,
        folder_count: 1,
        unban_date: None,
        player_name: Some("player".to_string()),
        beatmaps,
        user_permissions: 1,
    };
    let mut bytes = Vec::new();
    listing.to_writer(&mut bytes).unwrap();
    bytes
}

/// Output whose prepare step can be held open or made to fail per identity
#[derive(Default)]
pub struct FakeOutput {
    gates: Mutex<HashMap<BeatmapIdentity, Arc<Notify>>>,
    failing: Mutex<HashSet<BeatmapIdentity>>,
    started: Mutex<Vec<BeatmapIdentity>>,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold `prepare` for `identity` until the returned handle is notified
    pub fn gate(&self, identity: &BeatmapIdentity) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates.lock().insert(identity.clone(), Arc::clone(&notify));
        notify
    }

    pub fn fail(&self, identity: &BeatmapIdentity) {
        self.failing.lock().insert(identity.clone());
    }

    pub fn started(&self) -> Vec<BeatmapIdentity> {
        self.started.lock().clone()
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn prepare(&self, entry: &BeatmapEntry) -> Result<PreparedTrack> {
        let gate = self.gates.lock().get(&entry.identity).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.lock().contains(&entry.identity) {
            return Err(CoreError::unavailable(&entry.identity, "device rejected file"));
        }
        Ok(PreparedTrack {
            identity: entry.identity.clone(),
            audio_path: entry.audio_path().unwrap_or_default(),
            duration: None,
        })
    }

    async fn start(&self, track: &PreparedTrack) -> Result<()> {
        self.started.lock().push(track.identity.clone());
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory lyric source
pub struct FakeProvider {
    name: &'static str,
    songs: Vec<SongCandidate>,
    lyrics: HashMap<String, String>,
    fail: bool,
    delay: Option<Duration>,
    searches: AtomicUsize,
}

impl FakeProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            songs: Vec::new(),
            lyrics: HashMap::new(),
            fail: false,
            delay: None,
            searches: AtomicUsize::new(0),
        }
    }

    /// Add a searchable song with LRC text
    #[must_use]
    pub fn with_song(mut self, id: &str, title: &str, artist: &str, lrc: &str) -> Self {
        self.songs
            .push(SongCandidate::new(id, title, vec![artist.to_string()]));
        self.lyrics.insert(id.to_string(), lrc.to_string());
        self
    }

    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LyricsProvider for FakeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search_songs(&self, _title: &str, _artist: &str) -> Result<Vec<SongCandidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(CoreError::LyricsProviderFailed {
                provider: self.name.to_string(),
                reason: "service unavailable".to_string(),
            });
        }
        Ok(self.songs.clone())
    }

    async fn fetch_lyrics(&self, song: &SongCandidate) -> Result<Option<LyricDocument>> {
        Ok(self.lyrics.get(&song.id).map(|lrc| LyricDocument::parse(lrc)))
    }
}
