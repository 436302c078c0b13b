//! Reloads the library index when the game rewrites its database.

use crate::error::{CoreError, Result};
use crate::hub::SessionHub;
use crate::library::LibraryIndex;
use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode, DebounceEventResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::library::watcher";

/// The game writes `osu!.db` in several passes on exit
const DEBOUNCE: Duration = Duration::from_millis(1500);

pub struct LibraryWatcher;

impl LibraryWatcher {
    /// Watch `db_path` and reload `library` after each burst of writes.
    ///
    /// Reload failures are reported on the hub and leave the previous index
    /// published. The task ends when `cancel_token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `Watcher` if the file system watcher cannot be set up.
    pub fn spawn(
        db_path: PathBuf,
        library: Arc<LibraryIndex>,
        hub: Arc<SessionHub>,
        cancel_token: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let watch_error = |e: &dyn std::fmt::Display| CoreError::Watcher {
            path: db_path.clone(),
            reason: e.to_string(),
        };

        let (tx, mut rx) = mpsc::channel::<()>(4);
        let file_name = db_path.file_name().map(ToOwned::to_owned);
        let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
            Ok(events) => {
                let touched = events
                    .iter()
                    .any(|event| event.path.file_name() == file_name.as_deref());
                if touched {
                    let _ = tx.try_send(());
                }
            }
            Err(e) => warn!(target: LOG_TARGET, "File watcher error: {}", e),
        })
        .map_err(|e| watch_error(&e))?;

        let watch_dir = watch_dir(&db_path);
        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(&e))?;
        info!(target: LOG_TARGET, "Watching beatmap database for changes: {:?}", db_path);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!(target: LOG_TARGET, "Library watcher shutting down");
                        break;
                    }
                    Some(()) = rx.recv() => {
                        info!(target: LOG_TARGET, "Beatmap database changed, reloading");
                        match library.load(&db_path).await {
                            Ok(count) => hub.emit_library_reloaded(count),
                            Err(e) => {
                                warn!(target: LOG_TARGET, "Library reload failed, keeping previous index: {}", e);
                                hub.emit_error(e.to_string());
                            }
                        }
                    }
                }
            }

            // Keep debouncer alive until we exit the loop
            drop(debouncer);
        }))
    }
}

/// Parent directory of the database; watching the directory survives the file being replaced
fn watch_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}
