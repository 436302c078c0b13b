//! Copies queued beatmaps' audio out of the game folder.

use crate::error::Result;
use crate::identity::BeatmapIdentity;
use crate::library::{BeatmapEntry, LibraryIndex};
use crate::store::UserDataStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const LOG_TARGET: &str = "osuplayer::export";

/// What happened to each queued beatmap
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Exported beatmaps and the audio file written for each
    pub exported: Vec<(BeatmapIdentity, PathBuf)>,
    /// Not in the library or without an audio file; dropped from the queue
    pub missing: Vec<BeatmapIdentity>,
    /// Copy failures; these stay queued
    pub failed: Vec<(BeatmapIdentity, String)>,
}

impl ExportReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Exporter {
    library: Arc<LibraryIndex>,
    store: Arc<UserDataStore>,
    directory: PathBuf,
}

impl Exporter {
    #[must_use]
    pub fn new(library: Arc<LibraryIndex>, store: Arc<UserDataStore>, directory: PathBuf) -> Self {
        Self {
            library,
            store,
            directory,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Export everything in the export queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the export directory cannot be created or the
    /// queue cannot be read. Per-beatmap failures are collected in the report.
    pub async fn export_queued(&self) -> Result<ExportReport> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let queued = self.store.list_export_queue().await?;
        info!(
            target: LOG_TARGET,
            "Exporting {} beatmaps to {}",
            queued.len(),
            self.directory.display()
        );

        let mut report = ExportReport::default();
        let mut written = HashMap::new();
        for request in queued {
            let identity = request.identity;
            let Some(entry) = self.library.lookup(&identity) else {
                warn!(target: LOG_TARGET, "{} is no longer in the library, dropping", identity);
                self.store.remove_from_export_queue(&identity).await?;
                report.missing.push(identity);
                continue;
            };

            match self.export_entry(&entry, &mut written).await {
                Ok(Some(target)) => {
                    self.store.remove_from_export_queue(&identity).await?;
                    report.exported.push((identity, target));
                }
                Ok(None) => {
                    warn!(target: LOG_TARGET, "{} has no audio file on disk, dropping", identity);
                    self.store.remove_from_export_queue(&identity).await?;
                    report.missing.push(identity);
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, "Failed to export {}: {}", identity, e);
                    report.failed.push((identity, e.to_string()));
                }
            }
        }

        info!(
            target: LOG_TARGET,
            "Export finished: {} exported, {} missing, {} failed",
            report.exported.len(),
            report.missing.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Copy one entry's audio and background. `Ok(None)` when the audio file is gone.
    ///
    /// `written` maps targets of this run to their source audio. Difficulties
    /// sharing an audio file are copied once; different songs with the same
    /// name get distinct targets.
    async fn export_entry(
        &self,
        entry: &BeatmapEntry,
        written: &mut HashMap<PathBuf, PathBuf>,
    ) -> Result<Option<PathBuf>> {
        let Some(audio) = entry.audio_path() else {
            return Ok(None);
        };
        if !tokio::fs::try_exists(&audio).await.unwrap_or(false) {
            return Ok(None);
        }

        let (stem, target) = self.free_target(entry, &audio, written);
        if written.get(&target) == Some(&audio) {
            return Ok(Some(target));
        }
        tokio::fs::copy(&audio, &target).await?;
        written.insert(target.clone(), audio);

        if let Some(background) = entry.resolve_background().await {
            let background_target = self.directory.join(with_extension_of(&stem, &background));
            if background_target != target {
                if let Err(e) = tokio::fs::copy(&background, &background_target).await {
                    warn!(
                        target: LOG_TARGET,
                        "Skipping background of {}: {}",
                        entry.identity,
                        e
                    );
                }
            }
        }

        Ok(Some(target))
    }

    /// First target name that is unused in this run or already holds `audio`.
    fn free_target(
        &self,
        entry: &BeatmapEntry,
        audio: &Path,
        written: &HashMap<PathBuf, PathBuf>,
    ) -> (String, PathBuf) {
        let base = export_stem(entry);
        let is_free =
            |target: &PathBuf| !matches!(written.get(target), Some(source) if source != audio);

        let version = sanitize_file_name(entry.identity.version());
        let with_version = (!version.is_empty()).then(|| format!("{base} [{version}]"));
        for stem in std::iter::once(base.clone()).chain(with_version) {
            let target = self.directory.join(with_extension_of(&stem, audio));
            if is_free(&target) {
                return (stem, target);
            }
        }

        let mut n = 2;
        loop {
            let stem = format!("{base} ({n})");
            let target = self.directory.join(with_extension_of(&stem, audio));
            if is_free(&target) {
                return (stem, target);
            }
            n += 1;
        }
    }
}

/// `"{artist} - {title}"` made safe for file names
fn export_stem(entry: &BeatmapEntry) -> String {
    let artist = entry.display_artist().trim();
    let title = entry.display_title().trim();
    let raw = match (artist.is_empty(), title.is_empty()) {
        (false, false) => format!("{artist} - {title}"),
        (true, false) => title.to_string(),
        (false, true) => artist.to_string(),
        (true, true) => entry.identity.folder_name().to_string(),
    };
    let cleaned = sanitize_file_name(&raw);
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

fn with_extension_of(stem: &str, source: &Path) -> String {
    match source.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    }
}

/// Replace characters Windows and Unix file systems reject
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    replaced.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry, playable_entry};
    use std::time::Duration;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("AC/DC - What?"), "AC_DC - What_");
        assert_eq!(sanitize_file_name("  ...name.  "), "name");
        assert_eq!(sanitize_file_name("a\tb"), "a_b");
    }

    #[test]
    fn test_export_stem_fallbacks() {
        let full = entry("123 xi - Blue Zenith", "Normal").with_metadata("xi", "Blue Zenith");
        assert_eq!(export_stem(&full), "xi - Blue Zenith");

        let unicode = full.clone().with_unicode("xi", "ブルーゼニス");
        assert_eq!(export_stem(&unicode), "xi - ブルーゼニス");

        let bare = entry("123 folder", "Normal").with_metadata("", "");
        assert_eq!(export_stem(&bare), "123 folder");
    }

    #[tokio::test]
    async fn test_export_queued() {
        let songs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let mut with_bg = playable_entry(songs.path(), "a", "Normal").with_metadata("Artist", "Song: A");
        std::fs::write(songs.path().join("a").join("bg.jpg"), b"JPEG").unwrap();
        with_bg.background_file = Some("bg.jpg".to_string());
        let silent = entry_without_file(songs.path());

        let library = Arc::new(LibraryIndex::new());
        library.publish(None, vec![with_bg, silent]);
        let store = Arc::new(
            UserDataStore::open_in_memory(Duration::from_secs(5))
                .await
                .unwrap(),
        );
        let a = BeatmapIdentity::new("a", "Normal");
        let b = BeatmapIdentity::new("b", "Normal");
        let gone = BeatmapIdentity::new("gone", "Normal");
        for identity in [&a, &b, &gone] {
            store.enqueue_export(identity).await.unwrap();
        }

        let exporter = Exporter::new(library, Arc::clone(&store), out.path().join("exports"));
        let report = exporter.export_queued().await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.exported.len(), 1);
        let (identity, path) = &report.exported[0];
        assert_eq!(identity, &a);
        assert_eq!(path.file_name().unwrap(), "Artist - Song_ A.mp3");
        assert!(path.exists());
        assert!(out.path().join("exports").join("Artist - Song_ A.jpg").exists());

        assert_eq!(report.missing, vec![b, gone]);
        assert!(store.list_export_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_shared_audio_and_name_clash() {
        let songs = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        let normal = playable_entry(songs.path(), "a", "Normal").with_metadata("xi", "Zenith");
        let hard = playable_entry(songs.path(), "a", "Hard").with_metadata("xi", "Zenith");
        let other = playable_entry(songs.path(), "b", "Normal").with_metadata("xi", "Zenith");
        std::fs::write(songs.path().join("b").join("audio.mp3"), b"OTHER").unwrap();

        let library = Arc::new(LibraryIndex::new());
        library.publish(None, vec![normal, hard, other]);
        let store = Arc::new(
            UserDataStore::open_in_memory(Duration::from_secs(5))
                .await
                .unwrap(),
        );
        for identity in [
            BeatmapIdentity::new("a", "Normal"),
            BeatmapIdentity::new("a", "Hard"),
            BeatmapIdentity::new("b", "Normal"),
        ] {
            store.enqueue_export(&identity).await.unwrap();
        }

        let exporter = Exporter::new(library, store, out.path().to_path_buf());
        let report = exporter.export_queued().await.unwrap();

        let targets: Vec<_> = report
            .exported
            .iter()
            .map(|(_, path)| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            targets,
            vec!["xi - Zenith.mp3", "xi - Zenith.mp3", "xi - Zenith [Normal].mp3"]
        );
        assert_eq!(std::fs::read(out.path().join("xi - Zenith.mp3")).unwrap(), b"ID3");
        assert_eq!(
            std::fs::read(out.path().join("xi - Zenith [Normal].mp3")).unwrap(),
            b"OTHER"
        );
    }

    fn entry_without_file(songs_dir: &Path) -> BeatmapEntry {
        crate::testing::entry_in(songs_dir, "b", "Normal").with_audio("missing.mp3")
    }
}
