use async_trait::async_trait;
use osuplayer_core::{CoreError, LyricDocument, LyricsProvider, SongCandidate};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::lyrics::netease";

const NETEASE_API_URL: &str = "https://music.163.com/api";
const NETEASE_REFERER: &str = "https://music.163.com/";

/// Default timeout for HTTP requests (10 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Songs requested per search
const SEARCH_LIMIT: u32 = 10;

/// Netease Cloud Music lyrics provider
pub struct NeteaseProvider {
    client: ClientWithMiddleware,
}

impl NeteaseProvider {
    /// Create a new Netease provider with default 10-second timeout and 3 retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, CoreError> {
        let base_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("OsuPlayer/1.0 (https://github.com/osuplayer)")
            .build()?;

        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(DEFAULT_MAX_RETRIES);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client })
    }

    fn failed(&self, reason: impl Into<String>) -> CoreError {
        CoreError::LyricsProviderFailed {
            provider: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    code: i32,
    result: Option<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    songs: Vec<Song>,
}

#[derive(Debug, Deserialize)]
struct Song {
    id: u64,
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    /// Milliseconds
    duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

impl Song {
    fn into_candidate(self) -> SongCandidate {
        let artists = self.artists.into_iter().map(|a| a.name).collect();
        let candidate = SongCandidate::new(self.id.to_string(), self.name, artists);
        match self.duration {
            Some(ms) if ms > 0 => candidate.with_duration(Duration::from_millis(ms)),
            _ => candidate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LyricResponse {
    code: i32,
    lrc: Option<LyricBody>,
    tlyric: Option<LyricBody>,
    #[serde(default)]
    nolyric: bool,
    #[serde(default)]
    uncollected: bool,
}

#[derive(Debug, Deserialize)]
struct LyricBody {
    lyric: Option<String>,
}

impl LyricResponse {
    /// Original lyrics with the translation merged in; `None` for instrumentals and missing lyrics
    fn into_document(self) -> Option<LyricDocument> {
        if self.nolyric || self.uncollected {
            return None;
        }
        let original = self
            .lrc
            .and_then(|body| body.lyric)
            .filter(|text| !text.trim().is_empty())?;

        let document = LyricDocument::parse(&original);
        match self.tlyric.and_then(|body| body.lyric) {
            Some(translation) if !translation.trim().is_empty() => {
                Some(document.with_translation(&translation))
            }
            _ => Some(document),
        }
    }
}

#[async_trait]
impl LyricsProvider for NeteaseProvider {
    fn name(&self) -> &'static str {
        "netease"
    }

    async fn search_songs(&self, title: &str, artist: &str) -> Result<Vec<SongCandidate>, CoreError> {
        let keyword = format!("{title} {artist}");
        let url = format!(
            "{}/search/get/web?s={}&type=1&offset=0&limit={}",
            NETEASE_API_URL,
            urlencoding::encode(keyword.trim()),
            SEARCH_LIMIT
        );
        debug!(target: LOG_TARGET, "Netease GET (search): {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, NETEASE_REFERER)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(target: LOG_TARGET, "Netease search returned status: {}", response.status());
            return Err(self.failed(format!("search returned status: {}", response.status())));
        }

        let body: SearchResponse = response.json().await?;
        if body.code != 200 {
            return Err(self.failed(format!("search returned code {}", body.code)));
        }

        let songs = body.result.map(|r| r.songs).unwrap_or_default();
        info!(target: LOG_TARGET, "Netease search found {} songs for {}", songs.len(), keyword);
        Ok(songs.into_iter().map(Song::into_candidate).collect())
    }

    async fn fetch_lyrics(&self, song: &SongCandidate) -> Result<Option<LyricDocument>, CoreError> {
        let url = format!(
            "{}/song/lyric?id={}&lv=1&kv=1&tv=-1",
            NETEASE_API_URL,
            urlencoding::encode(&song.id)
        );
        debug!(target: LOG_TARGET, "Netease GET (lyric): {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, NETEASE_REFERER)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.failed(format!("lyric returned status: {}", response.status())));
        }

        let body: LyricResponse = response.json().await?;
        if body.code != 200 {
            return Err(self.failed(format!("lyric returned code {}", body.code)));
        }
        Ok(body.into_document())
    }
}
