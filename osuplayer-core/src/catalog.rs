//! Joins identities kept by the user data store with the current library.

use crate::error::Result;
use crate::identity::BeatmapIdentity;
use crate::library::{BeatmapEntry, LibraryIndex};
use crate::store::UserDataStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

const LOG_TARGET: &str = "osuplayer::catalog";

/// Ordering of the recent-play list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecentSort {
    #[default]
    PlayTimeDesc,
    PlayTimeAsc,
    Title,
    Artist,
}

/// A stored identity and, when the library still has it, its entry
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub identity: BeatmapIdentity,
    pub entry: Option<Arc<BeatmapEntry>>,
    pub played_at: Option<DateTime<Utc>>,
}

impl CatalogItem {
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.entry.is_some()
    }

    /// Title for display; the folder name stands in for unavailable beatmaps
    #[must_use]
    pub fn title(&self) -> &str {
        self.entry
            .as_ref()
            .map_or_else(|| self.identity.folder_name(), |entry| entry.display_title())
    }

    #[must_use]
    pub fn artist(&self) -> &str {
        self.entry
            .as_ref()
            .map_or("", |entry| entry.display_artist())
    }
}

/// Read side for lists that mix user data with library metadata
pub struct Catalog {
    library: Arc<LibraryIndex>,
    store: Arc<UserDataStore>,
}

impl Catalog {
    #[must_use]
    pub fn new(library: Arc<LibraryIndex>, store: Arc<UserDataStore>) -> Self {
        Self { library, store }
    }

    fn item(&self, identity: BeatmapIdentity, played_at: Option<DateTime<Utc>>) -> CatalogItem {
        let entry = self.library.lookup(&identity);
        CatalogItem {
            identity,
            entry,
            played_at,
        }
    }

    /// Recently played beatmaps, one item per identity carrying its latest play.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store cannot be read.
    pub async fn recent_list(&self, sort: RecentSort) -> Result<Vec<CatalogItem>> {
        let mut items: Vec<_> = self
            .store
            .recent_plays()
            .await?
            .into_iter()
            .map(|play| self.item(play.identity, Some(play.played_at)))
            .collect();

        let by_time_desc = |a: &CatalogItem, b: &CatalogItem| b.played_at.cmp(&a.played_at);
        match sort {
            RecentSort::PlayTimeDesc => items.sort_by(by_time_desc),
            RecentSort::PlayTimeAsc => items.sort_by(|a, b| a.played_at.cmp(&b.played_at)),
            RecentSort::Title => items.sort_by(|a, b| {
                compare_text(a.title(), b.title()).then_with(|| by_time_desc(a, b))
            }),
            RecentSort::Artist => items.sort_by(|a, b| {
                compare_text(a.artist(), b.artist())
                    .then_with(|| compare_text(a.title(), b.title()))
                    .then_with(|| by_time_desc(a, b))
            }),
        }

        debug!(
            target: LOG_TARGET,
            "Recent list: {} items ({} unavailable)",
            items.len(),
            items.iter().filter(|item| !item.is_available()).count()
        );
        Ok(items)
    }

    /// Identities of the recent list in the requested order
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store cannot be read.
    pub async fn recent_identities(&self, sort: RecentSort) -> Result<Vec<BeatmapIdentity>> {
        Ok(self
            .recent_list(sort)
            .await?
            .into_iter()
            .map(|item| item.identity)
            .collect())
    }

    /// Members of a collection in insertion order
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` for an unknown id, or a persistence error.
    pub async fn collection_items(&self, collection_id: i64) -> Result<Vec<CatalogItem>> {
        Ok(self
            .store
            .collection_members(collection_id)
            .await?
            .into_iter()
            .map(|identity| self.item(identity, None))
            .collect())
    }

    /// Beatmaps waiting in the export queue, oldest request first
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store cannot be read.
    pub async fn export_items(&self) -> Result<Vec<CatalogItem>> {
        Ok(self
            .store
            .list_export_queue()
            .await?
            .into_iter()
            .map(|request| self.item(request.identity, None))
            .collect())
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}
