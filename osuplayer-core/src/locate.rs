//! Finding `osu!.db`: configured path, running game client, then the user.

use crate::error::{CoreError, Result};
use crate::paths::OSU_DB_FILE_NAME;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sysinfo::{ProcessExt, ProcessRefreshKind, RefreshKind, System, SystemExt};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::library::locate";

/// Asks the user to pick the database file when automatic discovery fails
#[async_trait]
pub trait DatabasePrompt: Send + Sync {
    async fn choose_database(&self) -> Option<PathBuf>;
}

/// Where a database path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseOrigin {
    Configured,
    RunningClient,
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedDatabase {
    pub path: PathBuf,
    pub origin: DatabaseOrigin,
}

/// Installation directories of running game clients
#[must_use]
pub fn running_client_dirs() -> Vec<PathBuf> {
    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    system
        .processes()
        .values()
        .filter(|process| is_client_process(process.name()))
        .filter_map(|process| process.exe().parent().map(Path::to_path_buf))
        .collect()
}

fn is_client_process(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "osu!" || name == "osu!.exe"
}

pub struct DatabaseLocator<'a> {
    configured: Option<PathBuf>,
    client_dirs: fn() -> Vec<PathBuf>,
    prompt: Option<&'a dyn DatabasePrompt>,
}

impl<'a> DatabaseLocator<'a> {
    #[must_use]
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            client_dirs: running_client_dirs,
            prompt: None,
        }
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: &'a dyn DatabasePrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    #[must_use]
    pub fn with_client_dirs(mut self, client_dirs: fn() -> Vec<PathBuf>) -> Self {
        self.client_dirs = client_dirs;
        self
    }

    /// Try each discovery step in order and return the first existing file.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnavailable` when no step yields an existing file.
    pub async fn locate(&self) -> Result<LocatedDatabase> {
        if let Some(path) = &self.configured {
            if path.is_file() {
                debug!(target: LOG_TARGET, "Using configured database {:?}", path);
                return Ok(LocatedDatabase {
                    path: path.clone(),
                    origin: DatabaseOrigin::Configured,
                });
            }
            warn!(target: LOG_TARGET, "Configured database {:?} does not exist", path);
        }

        for dir in (self.client_dirs)() {
            let candidate = dir.join(OSU_DB_FILE_NAME);
            if candidate.is_file() {
                info!(target: LOG_TARGET, "Found database next to running client: {:?}", candidate);
                return Ok(LocatedDatabase {
                    path: candidate,
                    origin: DatabaseOrigin::RunningClient,
                });
            }
        }

        let mut last_tried = self.configured.clone();
        if let Some(prompt) = self.prompt {
            match prompt.choose_database().await {
                Some(path) if path.is_file() => {
                    info!(target: LOG_TARGET, "User selected database {:?}", path);
                    return Ok(LocatedDatabase {
                        path,
                        origin: DatabaseOrigin::Prompt,
                    });
                }
                Some(path) => {
                    warn!(target: LOG_TARGET, "Selected database {:?} does not exist", path);
                    last_tried = Some(path);
                }
                None => debug!(target: LOG_TARGET, "Database selection cancelled"),
            }
        }

        Err(CoreError::SourceUnavailable {
            path: last_tried.unwrap_or_else(|| PathBuf::from(OSU_DB_FILE_NAME)),
            reason: "no configured path, running client or user selection".to_string(),
        })
    }
}
