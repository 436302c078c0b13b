use async_trait::async_trait;
use osuplayer_core::{CoreError, LyricDocument, LyricsProvider, SongCandidate};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::lyrics::qqmusic";

const QQ_SEARCH_URL: &str = "https://c.y.qq.com/soso/fcgi-bin/client_search_cp";
const QQ_LYRIC_URL: &str = "https://c.y.qq.com/lyric/fcgi-bin/fcg_query_lyric_new.fcg";
/// The lyric endpoint rejects requests without a player referer
const QQ_REFERER: &str = "https://y.qq.com/portal/player.html";

/// Default timeout for HTTP requests (10 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Songs requested per search
const SEARCH_LIMIT: u32 = 10;

/// QQ Music lyrics provider
pub struct QqMusicProvider {
    client: ClientWithMiddleware,
}

impl QqMusicProvider {
    /// Create a new QQ Music provider with default 10-second timeout and 3 retries.
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
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    song: Option<SongList>,
}

#[derive(Debug, Deserialize)]
struct SongList {
    #[serde(default)]
    list: Vec<Song>,
}

#[derive(Debug, Deserialize)]
struct Song {
    songmid: String,
    songname: String,
    #[serde(default)]
    singer: Vec<Singer>,
    /// Seconds
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Singer {
    name: String,
}

impl SearchResponse {
    fn into_candidates(self) -> Vec<SongCandidate> {
        self.data
            .and_then(|d| d.song)
            .map(|s| s.list)
            .unwrap_or_default()
            .into_iter()
            .map(|song| {
                let artists = song.singer.into_iter().map(|s| s.name).collect();
                let candidate = SongCandidate::new(song.songmid, song.songname, artists);
                match song.interval {
                    Some(secs) if secs > 0 => candidate.with_duration(Duration::from_secs(secs)),
                    _ => candidate,
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct LyricResponse {
    #[serde(default)]
    retcode: i32,
    #[serde(default)]
    lyric: String,
    #[serde(default)]
    trans: String,
}

impl LyricResponse {
    fn into_document(self) -> Option<LyricDocument> {
        let original = unescape_html(&self.lyric);
        if original.trim().is_empty() {
            return None;
        }
        let document = LyricDocument::parse(&original);
        let translation = unescape_html(&self.trans);
        if translation.trim().is_empty() {
            Some(document)
        } else {
            Some(document.with_translation(&translation))
        }
    }
}

/// The plain-text lyric endpoint escapes punctuation as HTML entities (`&#58;` for `:`)
fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail.find(';').and_then(|end| {
            let entity = &tail[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix('#')
                    .and_then(|code| code.parse::<u32>().ok())
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, end))
        });
        if let Some((c, end)) = decoded {
            out.push(c);
            rest = &tail[end + 1..];
        } else {
            out.push('&');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl LyricsProvider for QqMusicProvider {
    fn name(&self) -> &'static str {
        "qq_music"
    }

    async fn search_songs(&self, title: &str, artist: &str) -> Result<Vec<SongCandidate>, CoreError> {
        let keyword = format!("{title} {artist}");
        let url = format!(
            "{}?w={}&format=json&p=1&n={}&cr=1",
            QQ_SEARCH_URL,
            urlencoding::encode(keyword.trim()),
            SEARCH_LIMIT
        );
        debug!(target: LOG_TARGET, "QQ Music GET (search): {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(target: LOG_TARGET, "QQ Music search returned status: {}", response.status());
            return Err(self.failed(format!("search returned status: {}", response.status())));
        }

        let body: SearchResponse = response.json().await?;
        if body.code != 0 {
            return Err(self.failed(format!("search returned code {}", body.code)));
        }

        let candidates = body.into_candidates();
        info!(target: LOG_TARGET, "QQ Music search found {} songs for {}", candidates.len(), keyword);
        Ok(candidates)
    }

    async fn fetch_lyrics(&self, song: &SongCandidate) -> Result<Option<LyricDocument>, CoreError> {
        let url = format!(
            "{}?songmid={}&format=json&nobase64=1&g_tk=5381",
            QQ_LYRIC_URL,
            urlencoding::encode(&song.id)
        );
        debug!(target: LOG_TARGET, "QQ Music GET (lyric): {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, QQ_REFERER)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.failed(format!("lyric returned status: {}", response.status())));
        }

        let body: LyricResponse = response.json().await?;
        if body.retcode != 0 {
            debug!(target: LOG_TARGET, "No lyrics for {} (retcode {})", song.id, body.retcode);
            return Ok(None);
        }
        Ok(body.into_document())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_candidates() {
        let body: SearchResponse = serde_json::from_str(
            r#"{
                "code": 0,
                "data": {
                    "keyword": "Blue Zenith xi",
                    "song": {
                        "curnum": 1,
                        "list": [
                            {
                                "songid": 1,
                                "songmid": "003aAYrm3GE0Ac",
                                "songname": "Blue Zenith",
                                "singer": [{"id": 5, "mid": "x", "name": "xi"}],
                                "interval": 261
                            }
                        ]
                    }
                }
            }"#,
        )
        .unwrap();

        let candidates = body.into_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "003aAYrm3GE0Ac");
        assert_eq!(candidates[0].artists, vec!["xi".to_string()]);
        assert_eq!(candidates[0].duration, Some(Duration::from_secs(261)));
    }

    #[test]
    fn test_search_without_song_list() {
        let body: SearchResponse = serde_json::from_str(r#"{"code": 0, "data": {}}"#).unwrap();
        assert!(body.into_candidates().is_empty());
    }

    #[test]
    fn test_unescape_html() {
        assert_eq!(unescape_html("[00&#58;01&#46;00]A &amp; B"), "[00:01.00]A & B");
        assert_eq!(unescape_html("Tom &unknown; Jerry & co"), "Tom &unknown; Jerry & co");
        assert_eq!(unescape_html("&#10;"), "\n");
    }

    #[test]
    fn test_lyric_response_with_translation() {
        let body: LyricResponse = serde_json::from_str(
            r#"{
                "retcode": 0,
                "code": 0,
                "subcode": 0,
                "lyric": "[ti&#58;Blue Zenith]&#10;[00&#58;01&#46;00]Hello",
                "trans": "[00&#58;01&#46;00]你好"
            }"#,
        )
        .unwrap();

        let document = body.into_document().unwrap();
        assert_eq!(document.metadata.title.as_deref(), Some("Blue Zenith"));
        assert_eq!(document.lines[0].text, "Hello");
        assert_eq!(document.lines[0].translation.as_deref(), Some("你好"));
    }

    #[test]
    fn test_empty_lyric_is_absent() {
        let body: LyricResponse = serde_json::from_str(r#"{"retcode": 0, "lyric": ""}"#).unwrap();
        assert!(body.into_document().is_none());
    }
}
