use crate::error::CoreError;
use crate::library::BeatmapEntry;
use crate::lrc::LyricDocument;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const LOG_TARGET: &str = "osuplayer::lyrics";

/// Minimum similarity for a non-strict match
const FUZZY_THRESHOLD: f64 = 0.75;

/// Weight of the title in the fuzzy score; the artist gets the rest
const TITLE_WEIGHT: f64 = 0.7;

/// Query parameters for fetching lyrics
#[derive(Debug, Clone, PartialEq)]
pub struct LyricsQuery {
    /// Romanized title
    pub title: String,
    /// Romanized artist
    pub artist: String,
    pub title_unicode: Option<String>,
    pub artist_unicode: Option<String>,
    /// Track duration (for tie-breaking between candidates)
    pub duration: Option<Duration>,
}

impl LyricsQuery {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            title_unicode: None,
            artist_unicode: None,
            duration: None,
        }
    }

    /// Set unicode title and artist; blank values are ignored
    #[must_use]
    pub fn with_unicode(mut self, title: Option<&str>, artist: Option<&str>) -> Self {
        let keep = |s: Option<&str>| s.filter(|s| !s.trim().is_empty()).map(str::to_string);
        self.title_unicode = keep(title);
        self.artist_unicode = keep(artist);
        self
    }

    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Query for a library entry, preferring its unicode metadata
    #[must_use]
    pub fn for_entry(entry: &BeatmapEntry) -> Self {
        let query = Self::new(&entry.title, &entry.artist).with_unicode(
            entry.title_unicode.as_deref(),
            entry.artist_unicode.as_deref(),
        );
        if entry.length.is_zero() {
            query
        } else {
            query.with_duration(entry.length)
        }
    }

    /// `(title, artist)` pairs to search with: unicode first, then romanized
    #[must_use]
    pub fn variants(&self) -> Vec<(&str, &str)> {
        let unicode = (
            self.title_unicode.as_deref().unwrap_or(&self.title),
            self.artist_unicode.as_deref().unwrap_or(&self.artist),
        );
        let romanized = (self.title.as_str(), self.artist.as_str());
        if unicode == romanized {
            vec![romanized]
        } else {
            vec![unicode, romanized]
        }
    }
}

/// One song returned by a provider search
#[derive(Debug, Clone, PartialEq)]
pub struct SongCandidate {
    /// Provider-specific song id
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub duration: Option<Duration>,
    /// Extra provider data needed to fetch lyrics (e.g. an access key)
    pub extra: Option<String>,
}

impl SongCandidate {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists,
            duration: None,
            extra: None,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

/// Lyrics accepted from a provider
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedLyrics {
    pub document: LyricDocument,
    /// Provider that produced the document
    pub provider: &'static str,
    /// Provider song id the lyrics belong to
    pub song_id: String,
    /// Title and artist matched exactly after normalization
    pub exact: bool,
}

/// Process-wide strict-mode flag, shared by handle.
///
/// Every lookup reads it when it starts, so a change applies to the next
/// resolution and never to one already running.
#[derive(Debug, Clone)]
pub struct StrictMatch(Arc<AtomicBool>);

impl StrictMatch {
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self(Arc::new(AtomicBool::new(strict)))
    }

    #[must_use]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, strict: bool) {
        self.0.store(strict, Ordering::Release);
    }
}

impl Default for StrictMatch {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Trait for lyrics providers
#[async_trait]
pub trait LyricsProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Search the provider's catalogue
    async fn search_songs(&self, title: &str, artist: &str) -> Result<Vec<SongCandidate>, CoreError>;

    /// Fetch the synced lyrics of a song; `None` when the song has none
    async fn fetch_lyrics(&self, song: &SongCandidate) -> Result<Option<LyricDocument>, CoreError>;

    /// Search and fetch in one step, applying the match policy.
    ///
    /// Tries each query variant in turn. Empty documents count as absent.
    async fn search(&self, query: &LyricsQuery, strict: bool) -> Result<Option<MatchedLyrics>, CoreError> {
        for (title, artist) in query.variants() {
            let candidates = self.search_songs(title, artist).await?;
            debug!(
                target: LOG_TARGET,
                "{} returned {} candidates for {} - {}",
                self.name(),
                candidates.len(),
                artist,
                title
            );

            let Some((song, exact)) = select_candidate(title, artist, query.duration, &candidates, strict) else {
                continue;
            };

            if let Some(document) = self.fetch_lyrics(song).await? {
                if !document.is_empty() {
                    return Ok(Some(MatchedLyrics {
                        document,
                        provider: self.name(),
                        song_id: song.id.clone(),
                        exact,
                    }));
                }
            }
        }
        Ok(None)
    }
}

/// Lowercase, drop bracketed parts like "(TV Size)" and keep only letters and digits.
#[must_use]
pub fn normalize(value: &str) -> String {
    let mut depth = 0usize;
    let mut stripped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '(' | '[' | '{' | '（' | '【' | '「' => depth += 1,
            ')' | ']' | '}' | '）' | '】' | '」' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    let keep = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    };

    let normalized = keep(&stripped);
    if normalized.is_empty() {
        keep(value)
    } else {
        normalized
    }
}

/// Split an artist credit into individual names
fn split_artists(artist: &str) -> Vec<String> {
    let lowered = artist.to_lowercase();
    let mut parts = vec![lowered.as_str()];
    for separator in [" feat. ", " feat ", " ft. ", " vs. ", " vs ", " x ", " × ", "&", ",", "/", "、"] {
        parts = parts.into_iter().flat_map(|p| p.split(separator)).collect();
    }
    parts
        .into_iter()
        .map(normalize)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Normalized title equality plus at least one shared artist
#[must_use]
pub fn is_exact_match(title: &str, artist: &str, candidate: &SongCandidate) -> bool {
    if normalize(title) != normalize(&candidate.title) {
        return false;
    }

    let joined = normalize(&candidate.artists.join(" "));
    if normalize(artist) == joined {
        return true;
    }

    let wanted = split_artists(artist);
    candidate
        .artists
        .iter()
        .flat_map(|a| split_artists(a))
        .any(|a| wanted.contains(&a))
}

/// Weighted Jaro-Winkler similarity of title and artist
#[must_use]
pub fn similarity(title: &str, artist: &str, candidate: &SongCandidate) -> f64 {
    let title_score = strsim::jaro_winkler(&normalize(title), &normalize(&candidate.title));
    let artist_score = strsim::jaro_winkler(&normalize(artist), &normalize(&candidate.artists.join(" ")));
    TITLE_WEIGHT * title_score + (1.0 - TITLE_WEIGHT) * artist_score
}

fn duration_gap(expected: Option<Duration>, candidate: &SongCandidate) -> Duration {
    match (expected, candidate.duration) {
        (Some(a), Some(b)) => a.max(b) - a.min(b),
        _ => Duration::MAX,
    }
}

/// Pick the candidate to fetch lyrics for.
///
/// Exact matches win, closest duration first. Without strict mode the most
/// similar candidate above [`FUZZY_THRESHOLD`] is accepted instead. The flag
/// in the result tells whether the pick was exact.
#[must_use]
pub fn select_candidate<'a>(
    title: &str,
    artist: &str,
    duration: Option<Duration>,
    candidates: &'a [SongCandidate],
    strict: bool,
) -> Option<(&'a SongCandidate, bool)> {
    let exact = candidates
        .iter()
        .filter(|c| is_exact_match(title, artist, c))
        .min_by_key(|c| duration_gap(duration, c));
    if let Some(song) = exact {
        return Some((song, true));
    }

    if strict {
        return None;
    }

    candidates
        .iter()
        .map(|c| (c, similarity(title, artist, c)))
        .filter(|(_, score)| *score >= FUZZY_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| (c, false))
}
