use crate::error::Result;
use crate::lrc::LyricDocument;
use crate::provider::{normalize, MatchedLyrics};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const LOG_TARGET: &str = "osuplayer::lyrics::cache";

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS lyrics (
    id INTEGER PRIMARY KEY,
    source TEXT NOT NULL,
    title_key TEXT NOT NULL,
    artist_key TEXT NOT NULL,
    provider TEXT NOT NULL,
    song_id TEXT NOT NULL,
    exact INTEGER NOT NULL,
    content TEXT NOT NULL,
    fetched_at INTEGER NOT NULL,
    UNIQUE(source, title_key, artist_key)
);

CREATE INDEX IF NOT EXISTS idx_lyrics_fetched_at ON lyrics(fetched_at);
";

/// Cached lyrics entry
#[derive(Debug, Clone)]
pub struct CachedLyrics {
    pub document: LyricDocument,
    pub provider: String,
    pub song_id: String,
    /// Stored from an exact match; only these satisfy strict lookups
    pub exact: bool,
    pub fetched_at: DateTime<Utc>,
}

/// SQLite-based lyrics cache keyed by source and normalized title/artist
pub struct LyricsCache {
    conn: Connection,
}

impl LyricsCache {
    /// Create a new cache at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the cache database cannot be created or opened.
    pub async fn new() -> Result<Self> {
        let cache_path = crate::paths::lyrics_cache_db_path();
        Self::open(&cache_path).await
    }

    /// Open a cache at a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        info!(target: LOG_TARGET, "Opening lyrics cache database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::init(Connection::open(path).await?).await
    }

    /// Open an in-memory cache
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().await?).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        })
        .await?;

        debug!(target: LOG_TARGET, "Lyrics cache database initialized");
        Ok(Self { conn })
    }

    /// Look up lyrics for a track. With `strict` set, only exact matches are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the stored document is corrupt.
    pub async fn get(
        &self,
        source: &str,
        title: &str,
        artist: &str,
        strict: bool,
    ) -> Result<Option<CachedLyrics>> {
        let source = source.to_string();
        let title_key = normalize(title);
        let artist_key = normalize(artist);

        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT provider, song_id, exact, content, fetched_at
                    FROM lyrics
                    WHERE source = ?1 AND title_key = ?2 AND artist_key = ?3
                ",
                )?;

                let row = stmt
                    .query_row(rusqlite::params![source, title_key, artist_key], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, bool>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    })
                    .optional()?;

                Ok(row)
            })
            .await?;

        let Some((provider, song_id, exact, content, fetched_at)) = row else {
            return Ok(None);
        };
        if strict && !exact {
            debug!(target: LOG_TARGET, "Ignoring fuzzy cache entry under strict mode");
            return Ok(None);
        }

        Ok(Some(CachedLyrics {
            document: serde_json::from_str(&content)?,
            provider,
            song_id,
            exact,
            fetched_at: DateTime::from_timestamp(fetched_at, 0).unwrap_or_else(Utc::now),
        }))
    }

    /// Store lyrics for a track, replacing any previous entry
    ///
    /// # Errors
    ///
    /// Returns an error if the lyrics cannot be encoded or stored.
    pub async fn store(
        &self,
        source: &str,
        title: &str,
        artist: &str,
        lyrics: &MatchedLyrics,
    ) -> Result<()> {
        info!(
            target: LOG_TARGET,
            "Storing lyrics in cache: {} - {} (provider: {}, song id: {})",
            artist, title, lyrics.provider, lyrics.song_id
        );
        let source = source.to_string();
        let title_key = normalize(title);
        let artist_key = normalize(artist);
        let provider = lyrics.provider.to_string();
        let song_id = lyrics.song_id.clone();
        let exact = lyrics.exact;
        let content = serde_json::to_string(&lyrics.document)?;
        let now = Utc::now().timestamp();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO lyrics (source, title_key, artist_key, provider, song_id, exact, content, fetched_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(source, title_key, artist_key) DO UPDATE SET
                        provider = excluded.provider,
                        song_id = excluded.song_id,
                        exact = excluded.exact,
                        content = excluded.content,
                        fetched_at = excluded.fetched_at
                ",
                    rusqlite::params![source, title_key, artist_key, provider, song_id, exact, content, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    /// Delete old cache entries beyond TTL
    ///
    /// # Errors
    ///
    /// Returns an error if the database cleanup fails.
    pub async fn cleanup(&self, ttl_days: u32) -> Result<usize> {
        let cutoff = Utc::now().timestamp() - (i64::from(ttl_days) * 24 * 60 * 60);

        self.conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM lyrics WHERE fetched_at < ?1",
                    rusqlite::params![cutoff],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(Into::into)
    }

    /// Checkpoint WAL for clean shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL checkpoint fails.
    pub async fn checkpoint(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(exact: bool) -> MatchedLyrics {
        MatchedLyrics {
            document: LyricDocument::parse("[00:01.00]hello").with_translation("[00:01.00]你好"),
            provider: "netease",
            song_id: "42".to_string(),
            exact,
        }
    }

    #[tokio::test]
    async fn test_store_and_get_normalized_key() {
        let cache = LyricsCache::open_in_memory().await.unwrap();
        cache
            .store("auto", "Blue Zenith (TV Size)", "xi", &matched(true))
            .await
            .unwrap();

        let cached = cache
            .get("auto", "blue zenith", "XI", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.provider, "netease");
        assert_eq!(cached.song_id, "42");
        assert_eq!(cached.document.lines[0].translation.as_deref(), Some("你好"));
    }

    #[tokio::test]
    async fn test_strict_lookup_skips_fuzzy_entries() {
        let cache = LyricsCache::open_in_memory().await.unwrap();
        cache.store("auto", "Song", "Artist", &matched(false)).await.unwrap();

        assert!(cache.get("auto", "Song", "Artist", true).await.unwrap().is_none());
        assert!(cache.get("auto", "Song", "Artist", false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sources_are_separate_namespaces() {
        let cache = LyricsCache::open_in_memory().await.unwrap();
        cache.store("kugou", "Song", "Artist", &matched(true)).await.unwrap();

        assert!(cache.get("netease", "Song", "Artist", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_replaces_previous_entry() {
        let cache = LyricsCache::open_in_memory().await.unwrap();
        cache.store("auto", "Song", "Artist", &matched(false)).await.unwrap();
        cache.store("auto", "Song", "Artist", &matched(true)).await.unwrap();

        let cached = cache.get("auto", "Song", "Artist", true).await.unwrap().unwrap();
        assert!(cached.exact);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_fresh_entries() {
        let cache = LyricsCache::open_in_memory().await.unwrap();
        cache.store("auto", "Song", "Artist", &matched(true)).await.unwrap();

        assert_eq!(cache.cleanup(30).await.unwrap(), 0);
        assert!(cache.get("auto", "Song", "Artist", true).await.unwrap().is_some());
    }
}
