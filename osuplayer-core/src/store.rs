//! SQLite-backed user data: collections, recent plays and the export queue.
//!
//! Rows reference beatmaps only by [`BeatmapIdentity`]; nothing here depends on
//! the library index being loaded.

use crate::error::{CoreError, Result};
use crate::identity::BeatmapIdentity;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::store";

/// VM steps between deadline checks on a running statement
const PROGRESS_OPS: std::ffi::c_int = 1000;

/// Name of the locked collection created on first run
pub const DEFAULT_COLLECTION_NAME: &str = "Favorites";

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    locked INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS collection_members (
    id INTEGER PRIMARY KEY,
    collection_id INTEGER NOT NULL,
    folder_name TEXT NOT NULL,
    version TEXT NOT NULL,
    added_at INTEGER NOT NULL,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE,
    UNIQUE(collection_id, folder_name, version)
);

-- Append-only play log; one row per play
CREATE TABLE IF NOT EXISTS recent_plays (
    id INTEGER PRIMARY KEY,
    folder_name TEXT NOT NULL,
    version TEXT NOT NULL,
    played_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS export_queue (
    id INTEGER PRIMARY KEY,
    folder_name TEXT NOT NULL,
    version TEXT NOT NULL,
    queued_at INTEGER NOT NULL,
    UNIQUE(folder_name, version)
);

CREATE INDEX IF NOT EXISTS idx_members_identity ON collection_members(folder_name, version);
CREATE INDEX IF NOT EXISTS idx_recent_identity ON recent_plays(folder_name, version);
CREATE INDEX IF NOT EXISTS idx_recent_played_at ON recent_plays(played_at);
";

/// A named group of beatmaps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    /// Locked collections can be renamed but not removed
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub member_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentPlay {
    pub identity: BeatmapIdentity,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub identity: BeatmapIdentity,
    pub queued_at: DateTime<Utc>,
}

enum RemoveOutcome {
    Removed,
    Locked(String),
    NotFound,
}

fn to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

fn identity_from_row(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<BeatmapIdentity> {
    Ok(BeatmapIdentity::new(
        row.get::<_, String>(start)?,
        row.get::<_, String>(start + 1)?,
    ))
}

fn collection_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        name: row.get(1)?,
        locked: row.get(2)?,
        created_at: to_datetime(row.get(3)?),
        member_count: usize::try_from(row.get::<_, i64>(4)?).unwrap_or_default(),
    })
}

fn collection_exists(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM collections WHERE id = ?1", [id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}

/// Durable user state on a dedicated SQLite thread.
///
/// Every public operation is a single closure on the connection; operations
/// that touch more than one statement run inside a transaction, so a call
/// either applies completely or fails with [`CoreError::Persistence`].
pub struct UserDataStore {
    conn: Connection,
    timeout: Duration,
}

impl UserDataStore {
    /// Open the store at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub async fn new(timeout: Duration) -> Result<Self> {
        Self::open(&crate::paths::user_db_path(), timeout).await
    }

    /// Open a store at a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path, timeout: Duration) -> Result<Self> {
        info!(target: LOG_TARGET, "Opening user data database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| CoreError::persistence("open", e))?;
        Self::init(conn, timeout).await
    }

    /// Open a throwaway in-memory store
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory(timeout: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| CoreError::persistence("open", e))?;
        Self::init(conn, timeout).await
    }

    async fn init(conn: Connection, timeout: Duration) -> Result<Self> {
        let store = Self { conn, timeout };
        store
            .call("initialize schema", move |conn| {
                conn.busy_timeout(timeout)?;
                conn.execute_batch(SCHEMA_SQL)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                Ok(())
            })
            .await?;
        debug!(target: LOG_TARGET, "User data schema ready");
        Ok(store)
    }

    /// Run `function` on the connection thread within the store timeout.
    ///
    /// The deadline is enforced on the connection itself: a call still queued
    /// when it passes never runs, and a statement running past it is
    /// interrupted, which rolls back any open transaction.
    async fn call<T, F>(&self, operation: &'static str, function: F) -> Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> std::result::Result<T, tokio_rusqlite::Error>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let result = self
            .conn
            .call(move |conn| {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
                let result = function(conn);
                conn.progress_handler(0, None::<fn() -> bool>);
                result.map(Some)
            })
            .await;

        match result {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(self.timed_out(operation)),
            Err(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Err(self.timed_out(operation))
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "User data operation '{}' failed: {}", operation, e);
                Err(CoreError::persistence(operation, e))
            }
        }
    }

    fn timed_out(&self, operation: &'static str) -> CoreError {
        warn!(target: LOG_TARGET, "User data operation '{}' timed out", operation);
        CoreError::persistence(operation, format!("timed out after {:?}", self.timeout))
    }

    // ---- collections ----

    /// Return the locked default collection, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query or insert fails.
    pub async fn ensure_default_collection(&self) -> Result<Collection> {
        let now = Utc::now().timestamp_millis();
        let (collection, created) = self
            .call("ensure default collection", move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM collections WHERE locked = 1 ORDER BY id LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                let id = if let Some(id) = existing {
                    id
                } else {
                    tx.execute(
                        "INSERT INTO collections (name, locked, created_at) VALUES (?1, 1, ?2)",
                        rusqlite::params![DEFAULT_COLLECTION_NAME, now],
                    )?;
                    tx.last_insert_rowid()
                };
                let collection = tx.query_row(
                    r"
                    SELECT c.id, c.name, c.locked, c.created_at, COUNT(m.id)
                    FROM collections c
                    LEFT JOIN collection_members m ON m.collection_id = c.id
                    WHERE c.id = ?1
                    GROUP BY c.id
                ",
                    [id],
                    collection_from_row,
                )?;
                tx.commit()?;
                Ok((collection, existing.is_none()))
            })
            .await?;

        if created {
            info!(target: LOG_TARGET, "Created default collection \"{}\"", collection.name);
        }
        Ok(collection)
    }

    /// Create a collection and return its id.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the insert fails.
    pub async fn add_collection(&self, name: &str, locked: bool) -> Result<i64> {
        let name = name.to_string();
        let now = Utc::now().timestamp_millis();
        let id = self
            .call("add collection", move |conn| {
                conn.execute(
                    "INSERT INTO collections (name, locked, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![name, locked, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        debug!(target: LOG_TARGET, "Added collection {}", id);
        Ok(id)
    }

    /// Remove an unlocked collection and its memberships.
    ///
    /// # Errors
    ///
    /// Returns `CollectionLocked` for a locked collection (nothing is changed),
    /// `CollectionNotFound` for an unknown id and `Persistence` on storage failure.
    pub async fn remove_collection(&self, id: i64) -> Result<()> {
        let outcome = self
            .call("remove collection", move |conn| {
                let tx = conn.transaction()?;
                let row: Option<(String, bool)> = tx
                    .query_row(
                        "SELECT name, locked FROM collections WHERE id = ?1",
                        [id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let outcome = match row {
                    None => RemoveOutcome::NotFound,
                    Some((name, true)) => RemoveOutcome::Locked(name),
                    Some((_, false)) => {
                        tx.execute("DELETE FROM collection_members WHERE collection_id = ?1", [id])?;
                        tx.execute("DELETE FROM collections WHERE id = ?1", [id])?;
                        RemoveOutcome::Removed
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            RemoveOutcome::Removed => {
                debug!(target: LOG_TARGET, "Removed collection {}", id);
                Ok(())
            }
            RemoveOutcome::Locked(name) => {
                warn!(target: LOG_TARGET, "Refusing to remove locked collection \"{}\"", name);
                Err(CoreError::CollectionLocked { id, name })
            }
            RemoveOutcome::NotFound => Err(CoreError::CollectionNotFound { id }),
        }
    }

    /// Rename a collection; locked collections may be renamed.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` for an unknown id and `Persistence` on storage failure.
    pub async fn rename_collection(&self, id: i64, name: &str) -> Result<()> {
        let name = name.to_string();
        let updated = self
            .call("rename collection", move |conn| {
                Ok(conn.execute(
                    "UPDATE collections SET name = ?1 WHERE id = ?2",
                    rusqlite::params![name, id],
                )?)
            })
            .await?;
        if updated == 0 {
            return Err(CoreError::CollectionNotFound { id });
        }
        Ok(())
    }

    /// All collections, locked ones first, then in creation order.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        self.call("list collections", |conn| {
            let mut stmt = conn.prepare_cached(
                r"
                SELECT c.id, c.name, c.locked, c.created_at, COUNT(m.id)
                FROM collections c
                LEFT JOIN collection_members m ON m.collection_id = c.id
                GROUP BY c.id
                ORDER BY c.locked DESC, c.id ASC
            ",
            )?;
            let rows = stmt
                .query_map([], collection_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Add a beatmap to a collection. Returns `false` if it was already a member.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` for an unknown id and `Persistence` on storage failure.
    pub async fn add_to_collection(&self, id: i64, identity: &BeatmapIdentity) -> Result<bool> {
        let folder = identity.folder_name().to_string();
        let version = identity.version().to_string();
        let now = Utc::now().timestamp_millis();
        let added = self
            .call("add to collection", move |conn| {
                if !collection_exists(conn, id)? {
                    return Ok(None);
                }
                let inserted = conn.execute(
                    r"
                    INSERT OR IGNORE INTO collection_members (collection_id, folder_name, version, added_at)
                    VALUES (?1, ?2, ?3, ?4)
                ",
                    rusqlite::params![id, folder, version, now],
                )?;
                Ok(Some(inserted > 0))
            })
            .await?;
        added.ok_or(CoreError::CollectionNotFound { id })
    }

    /// Remove a beatmap from a collection. Returns `false` if it was not a member.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` on storage failure.
    pub async fn remove_from_collection(&self, id: i64, identity: &BeatmapIdentity) -> Result<bool> {
        let folder = identity.folder_name().to_string();
        let version = identity.version().to_string();
        let removed = self
            .call("remove from collection", move |conn| {
                Ok(conn.execute(
                    "DELETE FROM collection_members WHERE collection_id = ?1 AND folder_name = ?2 AND version = ?3",
                    rusqlite::params![id, folder, version],
                )?)
            })
            .await?;
        Ok(removed > 0)
    }

    /// Members of a collection in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` for an unknown id and `Persistence` on storage failure.
    pub async fn collection_members(&self, id: i64) -> Result<Vec<BeatmapIdentity>> {
        let members = self
            .call("list collection members", move |conn| {
                if !collection_exists(conn, id)? {
                    return Ok(None);
                }
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT folder_name, version FROM collection_members
                    WHERE collection_id = ?1
                    ORDER BY added_at ASC, id ASC
                ",
                )?;
                let rows = stmt
                    .query_map([id], |row| identity_from_row(row, 0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(Some(rows))
            })
            .await?;
        members.ok_or(CoreError::CollectionNotFound { id })
    }

    /// Collections that contain `identity`.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    pub async fn collections_containing(&self, identity: &BeatmapIdentity) -> Result<Vec<Collection>> {
        let folder = identity.folder_name().to_string();
        let version = identity.version().to_string();
        self.call("find collections containing", move |conn| {
            let mut stmt = conn.prepare_cached(
                r"
                SELECT c.id, c.name, c.locked, c.created_at,
                       (SELECT COUNT(*) FROM collection_members x WHERE x.collection_id = c.id)
                FROM collections c
                INNER JOIN collection_members m ON m.collection_id = c.id
                WHERE m.folder_name = ?1 AND m.version = ?2
                ORDER BY c.locked DESC, c.id ASC
            ",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![folder, version], collection_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    // ---- recent plays ----

    /// Append a play record stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the insert fails.
    pub async fn record_recent_play(&self, identity: &BeatmapIdentity) -> Result<()> {
        self.record_recent_play_at(identity, Utc::now()).await
    }

    /// Append a play record with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the insert fails.
    pub async fn record_recent_play_at(
        &self,
        identity: &BeatmapIdentity,
        played_at: DateTime<Utc>,
    ) -> Result<()> {
        let folder = identity.folder_name().to_string();
        let version = identity.version().to_string();
        let millis = played_at.timestamp_millis();
        self.call("record recent play", move |conn| {
            conn.execute(
                "INSERT INTO recent_plays (folder_name, version, played_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![folder, version, millis],
            )?;
            Ok(())
        })
        .await
    }

    /// Delete every play record of `identity`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the delete fails.
    pub async fn remove_from_recent(&self, identity: &BeatmapIdentity) -> Result<usize> {
        let folder = identity.folder_name().to_string();
        let version = identity.version().to_string();
        self.call("remove from recent", move |conn| {
            Ok(conn.execute(
                "DELETE FROM recent_plays WHERE folder_name = ?1 AND version = ?2",
                rusqlite::params![folder, version],
            )?)
        })
        .await
    }

    /// Delete the whole play log. Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the delete fails.
    pub async fn clear_recent(&self) -> Result<usize> {
        let removed = self
            .call("clear recent", |conn| Ok(conn.execute("DELETE FROM recent_plays", [])?))
            .await?;
        info!(target: LOG_TARGET, "Cleared {} recent play records", removed);
        Ok(removed)
    }

    /// Raw play log, newest first, one entry per play.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    pub async fn recent_log(&self) -> Result<Vec<RecentPlay>> {
        self.call("read recent log", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT folder_name, version, played_at FROM recent_plays ORDER BY played_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(RecentPlay {
                        identity: identity_from_row(row, 0)?,
                        played_at: to_datetime(row.get(2)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// One entry per identity carrying its latest play, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    pub async fn recent_plays(&self) -> Result<Vec<RecentPlay>> {
        self.call("read recent plays", |conn| {
            let mut stmt = conn.prepare_cached(
                r"
                SELECT folder_name, version, MAX(played_at) AS last_played, MAX(id) AS last_id
                FROM recent_plays
                GROUP BY folder_name, version
                ORDER BY last_played DESC, last_id DESC
            ",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(RecentPlay {
                        identity: identity_from_row(row, 0)?,
                        played_at: to_datetime(row.get(2)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    // ---- export queue ----

    /// Queue a beatmap for export. Returns `false` if it was already queued.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the insert fails.
    pub async fn enqueue_export(&self, identity: &BeatmapIdentity) -> Result<bool> {
        let folder = identity.folder_name().to_string();
        let version = identity.version().to_string();
        let now = Utc::now().timestamp_millis();
        let inserted = self
            .call("enqueue export", move |conn| {
                Ok(conn.execute(
                    "INSERT OR IGNORE INTO export_queue (folder_name, version, queued_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![folder, version, now],
                )?)
            })
            .await?;
        Ok(inserted > 0)
    }

    /// Export queue in the order entries were queued.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    pub async fn list_export_queue(&self) -> Result<Vec<ExportRequest>> {
        self.call("list export queue", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT folder_name, version, queued_at FROM export_queue ORDER BY queued_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ExportRequest {
                        identity: identity_from_row(row, 0)?,
                        queued_at: to_datetime(row.get(2)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `Persistence` if the delete fails.
    pub async fn remove_from_export_queue(&self, identity: &BeatmapIdentity) -> Result<bool> {
        let folder = identity.folder_name().to_string();
        let version = identity.version().to_string();
        let removed = self
            .call("remove from export queue", move |conn| {
                Ok(conn.execute(
                    "DELETE FROM export_queue WHERE folder_name = ?1 AND version = ?2",
                    rusqlite::params![folder, version],
                )?)
            })
            .await?;
        Ok(removed > 0)
    }

    /// # Errors
    ///
    /// Returns `Persistence` if the delete fails.
    pub async fn clear_export_queue(&self) -> Result<usize> {
        self.call("clear export queue", |conn| {
            Ok(conn.execute("DELETE FROM export_queue", [])?)
        })
        .await
    }

    /// Drop the play log table so recording plays fails
    #[cfg(test)]
    pub(crate) async fn drop_recent_plays(&self) {
        self.call("drop recent plays", |conn| {
            conn.execute_batch("DROP TABLE recent_plays")?;
            Ok(())
        })
        .await
        .unwrap();
    }

    /// Checkpoint WAL for clean shutdown
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the WAL checkpoint fails.
    pub async fn checkpoint(&self) -> Result<()> {
        self.call("checkpoint", |conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    async fn store() -> UserDataStore {
        UserDataStore::open_in_memory(Duration::from_secs(5))
            .await
            .unwrap()
    }

    fn id(folder: &str, version: &str) -> BeatmapIdentity {
        BeatmapIdentity::new(folder, version)
    }

    #[tokio::test]
    async fn test_default_collection_is_created_once() {
        let store = store().await;

        let first = store.ensure_default_collection().await.unwrap();
        let second = store.ensure_default_collection().await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.locked);
        assert_eq!(first.name, DEFAULT_COLLECTION_NAME);
        assert_eq!(store.list_collections().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_removing_locked_collection_fails_and_keeps_list() {
        let store = store().await;
        let favorites = store.ensure_default_collection().await.unwrap();
        store.add_collection("Stream maps", false).await.unwrap();
        store
            .add_to_collection(favorites.id, &id("1 A - B", "Hard"))
            .await
            .unwrap();
        let before = store.list_collections().await.unwrap();

        let err = store.remove_collection(favorites.id).await.unwrap_err();
        assert!(matches!(err, CoreError::CollectionLocked { id, .. } if id == favorites.id));

        let after = store.list_collections().await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_locked_collection_can_be_renamed() {
        let store = store().await;
        let favorites = store.ensure_default_collection().await.unwrap();

        store.rename_collection(favorites.id, "Loved").await.unwrap();

        let collections = store.list_collections().await.unwrap();
        assert_eq!(collections[0].name, "Loved");
        assert!(collections[0].locked);
    }

    #[tokio::test]
    async fn test_remove_unlocked_collection_drops_members() {
        let store = store().await;
        let id_a = store.add_collection("Tech", false).await.unwrap();
        store.add_to_collection(id_a, &id("1 A - B", "Hard")).await.unwrap();

        store.remove_collection(id_a).await.unwrap();

        assert!(store.list_collections().await.unwrap().is_empty());
        assert!(matches!(
            store.collection_members(id_a).await.unwrap_err(),
            CoreError::CollectionNotFound { .. }
        ));
        assert!(store
            .collections_containing(&id("1 A - B", "Hard"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_collection_errors() {
        let store = store().await;
        assert!(matches!(
            store.remove_collection(99).await.unwrap_err(),
            CoreError::CollectionNotFound { id: 99 }
        ));
        assert!(matches!(
            store.add_to_collection(99, &id("x", "y")).await.unwrap_err(),
            CoreError::CollectionNotFound { id: 99 }
        ));
        assert!(matches!(
            store.rename_collection(99, "name").await.unwrap_err(),
            CoreError::CollectionNotFound { id: 99 }
        ));
    }

    #[tokio::test]
    async fn test_membership_is_idempotent() {
        let store = store().await;
        let tech = store.add_collection("Tech", false).await.unwrap();
        let beatmap = id("1 A - B", "Hard");

        assert!(store.add_to_collection(tech, &beatmap).await.unwrap());
        assert!(!store.add_to_collection(tech, &beatmap).await.unwrap());
        store.add_to_collection(tech, &id("1 A - B", "Insane")).await.unwrap();

        let members = store.collection_members(tech).await.unwrap();
        assert_eq!(members, vec![beatmap.clone(), id("1 A - B", "Insane")]);
        assert_eq!(store.list_collections().await.unwrap()[0].member_count, 2);

        assert!(store.remove_from_collection(tech, &beatmap).await.unwrap());
        assert!(!store.remove_from_collection(tech, &beatmap).await.unwrap());
        assert_eq!(store.collection_members(tech).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_collections_containing() {
        let store = store().await;
        let favorites = store.ensure_default_collection().await.unwrap();
        let tech = store.add_collection("Tech", false).await.unwrap();
        let other = store.add_collection("Other", false).await.unwrap();
        let beatmap = id("1 A - B", "Hard");

        store.add_to_collection(tech, &beatmap).await.unwrap();
        store.add_to_collection(favorites.id, &beatmap).await.unwrap();
        store.add_to_collection(other, &id("2 C - D", "Easy")).await.unwrap();

        let containing: Vec<i64> = store
            .collections_containing(&beatmap)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(containing, vec![favorites.id, tech]);
    }

    #[tokio::test]
    async fn test_recent_plays_are_not_deduplicated_in_log() {
        let store = store().await;
        let beatmap = id("1 A - B", "Hard");
        let base = Utc::now();

        for minutes in [1, 2, 3] {
            store
                .record_recent_play_at(&beatmap, base + TimeDelta::minutes(minutes))
                .await
                .unwrap();
        }

        let log = store.recent_log().await.unwrap();
        assert_eq!(log.len(), 3);

        let recent = store.recent_plays().await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].identity, beatmap);
        assert_eq!(
            recent[0].played_at.timestamp_millis(),
            (base + TimeDelta::minutes(3)).timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_recent_plays_newest_first() {
        let store = store().await;
        let base = Utc::now();
        let a = id("1 A - B", "Hard");
        let b = id("2 C - D", "Hard");

        store.record_recent_play_at(&a, base).await.unwrap();
        store
            .record_recent_play_at(&b, base + TimeDelta::seconds(10))
            .await
            .unwrap();
        store
            .record_recent_play_at(&a, base + TimeDelta::seconds(20))
            .await
            .unwrap();

        let recent: Vec<_> = store
            .recent_plays()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(recent, vec![a, b]);
    }

    #[tokio::test]
    async fn test_remove_from_recent_removes_all_records() {
        let store = store().await;
        let a = id("1 A - B", "Hard");
        let b = id("2 C - D", "Hard");
        store.record_recent_play(&a).await.unwrap();
        store.record_recent_play(&a).await.unwrap();
        store.record_recent_play(&b).await.unwrap();

        assert_eq!(store.remove_from_recent(&a).await.unwrap(), 2);

        let log = store.recent_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].identity, b);

        assert_eq!(store.clear_recent().await.unwrap(), 1);
        assert!(store.recent_plays().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_queue() {
        let store = store().await;
        let a = id("1 A - B", "Hard");
        let b = id("2 C - D", "Hard");

        assert!(store.enqueue_export(&a).await.unwrap());
        assert!(!store.enqueue_export(&a).await.unwrap());
        assert!(store.enqueue_export(&b).await.unwrap());

        let queued: Vec<_> = store
            .list_export_queue()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(queued, vec![a.clone(), b]);

        assert!(store.remove_from_export_queue(&a).await.unwrap());
        assert_eq!(store.clear_export_queue().await.unwrap(), 1);
        assert!(store.list_export_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.db");
        let beatmap = id("1 A - B", "Hard");

        {
            let store = UserDataStore::open(&path, Duration::from_secs(5)).await.unwrap();
            let favorites = store.ensure_default_collection().await.unwrap();
            store.add_to_collection(favorites.id, &beatmap).await.unwrap();
            store.checkpoint().await.unwrap();
        }

        let store = UserDataStore::open(&path, Duration::from_secs(5)).await.unwrap();
        let favorites = store.ensure_default_collection().await.unwrap();
        assert_eq!(store.collection_members(favorites.id).await.unwrap(), vec![beatmap]);
    }

    #[tokio::test]
    async fn test_timed_out_write_is_rolled_back() {
        let mut store = store().await;
        store.timeout = Duration::from_millis(200);

        let result = store
            .call("slow export", |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO export_queue (folder_name, version, queued_at) VALUES ('1 A - B', 'Hard', 0)",
                    [],
                )?;
                // Never terminates on its own
                let rows: i64 = tx.query_row(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n",
                    [],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(rows)
            })
            .await;

        assert!(matches!(result, Err(CoreError::Persistence { ref reason, .. }) if reason.contains("timed out")));
        store.timeout = Duration::from_secs(5);
        assert!(store.list_export_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_call_never_runs() {
        let mut store = store().await;
        store.timeout = Duration::ZERO;

        let err = store.enqueue_export(&id("1 A - B", "Hard")).await.unwrap_err();
        assert!(matches!(err, CoreError::Persistence { .. }));

        store.timeout = Duration::from_secs(5);
        assert!(store.list_export_queue().await.unwrap().is_empty());
    }
}
