use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use osuplayer_core::{CoreError, DurationExt, LyricDocument, LyricsProvider, SongCandidate};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::lyrics::kugou";

const KUGOU_SEARCH_URL: &str = "http://mobilecdn.kugou.com/api/v3/search/song";
const KUGOU_LYRIC_SEARCH_URL: &str = "http://krcs.kugou.com/search";
const KUGOU_LYRIC_DOWNLOAD_URL: &str = "http://lyrics.kugou.com/download";

/// Default timeout for HTTP requests (10 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Songs requested per search
const SEARCH_PAGE_SIZE: u32 = 20;

/// Kugou lyrics provider.
///
/// Lyrics take two requests after the song search: one to find the lyric
/// id and access key for a song hash, one to download the base64 LRC.
pub struct KugouProvider {
    client: ClientWithMiddleware,
}

impl KugouProvider {
    /// Create a new Kugou provider with default 10-second timeout and 3 retries.
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

    async fn get_json<T: serde::de::DeserializeOwned + Send>(&self, url: &str) -> Result<T, CoreError> {
        debug!(target: LOG_TARGET, "Kugou GET: {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            warn!(target: LOG_TARGET, "Kugou returned status: {}", response.status());
            return Err(self.failed(format!("returned status: {}", response.status())));
        }
        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    status: i32,
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    info: Vec<SongInfo>,
}

#[derive(Debug, Deserialize)]
struct SongInfo {
    hash: String,
    songname: String,
    singername: String,
    /// Seconds
    duration: Option<u64>,
}

impl SongInfo {
    fn into_candidate(self) -> SongCandidate {
        let artists = split_singers(&self.singername);
        let candidate = SongCandidate::new(self.hash, strip_highlight(&self.songname), artists);
        match self.duration {
            Some(secs) if secs > 0 => candidate.with_duration(Duration::from_secs(secs)),
            _ => candidate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LyricSearchResponse {
    status: i32,
    #[serde(default)]
    candidates: Vec<LyricCandidate>,
}

#[derive(Debug, Deserialize)]
struct LyricCandidate {
    id: String,
    accesskey: String,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    status: i32,
    #[serde(default)]
    content: String,
}

impl DownloadResponse {
    fn decode(&self) -> Result<String, String> {
        let bytes = STANDARD
            .decode(self.content.trim())
            .map_err(|e| format!("invalid base64 lyric content: {e}"))?;
        String::from_utf8(bytes).map_err(|e| format!("lyric content is not UTF-8: {e}"))
    }
}

/// Kugou joins several singers with "、"
fn split_singers(singers: &str) -> Vec<String> {
    singers
        .split('、')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Search results wrap matched keywords in `<em>` tags
fn strip_highlight(text: &str) -> String {
    text.replace("<em>", "").replace("</em>", "")
}

#[async_trait]
impl LyricsProvider for KugouProvider {
    fn name(&self) -> &'static str {
        "kugou"
    }

    async fn search_songs(&self, title: &str, artist: &str) -> Result<Vec<SongCandidate>, CoreError> {
        let keyword = format!("{artist} - {title}");
        let url = format!(
            "{}?format=json&keyword={}&page=1&pagesize={}&showtype=1",
            KUGOU_SEARCH_URL,
            urlencoding::encode(&keyword),
            SEARCH_PAGE_SIZE
        );

        let body: SearchResponse = self.get_json(&url).await?;
        if body.status != 1 {
            return Err(self.failed(format!("search returned status {}", body.status)));
        }

        let songs = body.data.map(|d| d.info).unwrap_or_default();
        info!(target: LOG_TARGET, "Kugou search found {} songs for {}", songs.len(), keyword);
        Ok(songs.into_iter().map(SongInfo::into_candidate).collect())
    }

    async fn fetch_lyrics(&self, song: &SongCandidate) -> Result<Option<LyricDocument>, CoreError> {
        let duration_ms = song.duration.map_or(0, |d| d.as_millis_u64());
        let url = format!(
            "{}?ver=1&man=yes&client=mobi&keyword=&duration={}&hash={}",
            KUGOU_LYRIC_SEARCH_URL,
            duration_ms,
            urlencoding::encode(&song.id)
        );
        let found: LyricSearchResponse = self.get_json(&url).await?;
        if found.status != 200 {
            return Err(self.failed(format!("lyric search returned status {}", found.status)));
        }
        let Some(lyric) = found.candidates.into_iter().next() else {
            debug!(target: LOG_TARGET, "No lyric candidates for hash {}", song.id);
            return Ok(None);
        };

        let url = format!(
            "{}?ver=1&client=pc&id={}&accesskey={}&fmt=lrc&charset=utf8",
            KUGOU_LYRIC_DOWNLOAD_URL,
            urlencoding::encode(&lyric.id),
            urlencoding::encode(&lyric.accesskey)
        );
        let download: DownloadResponse = self.get_json(&url).await?;
        if download.status != 200 {
            return Err(self.failed(format!("lyric download returned status {}", download.status)));
        }

        let text = download.decode().map_err(|reason| self.failed(reason))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(LyricDocument::parse(&text)))
    }
}
