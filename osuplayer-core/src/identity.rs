//! The `(folder, version)` key shared by the library and the user data store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one beatmap difficulty independent of where it was loaded from.
///
/// The library index and the user data store are populated separately, so they
/// agree on "the same beatmap" through this pair rather than through object
/// identity. Equality and hashing only consider the two fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BeatmapIdentity {
    folder_name: String,
    version: String,
}

impl BeatmapIdentity {
    pub fn new(folder_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            folder_name: folder_name.into(),
            version: version.into(),
        }
    }

    /// Beatmap-set directory name under the game's `Songs` folder
    #[must_use]
    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// Difficulty name
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for BeatmapIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.folder_name, self.version)
    }
}
