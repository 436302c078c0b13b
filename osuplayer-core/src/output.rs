//! Seam between the session controller and the audio device.

use crate::error::{CoreError, Result};
use crate::identity::BeatmapIdentity;
use crate::library::BeatmapEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const LOG_TARGET: &str = "osuplayer::output";

/// A track the output has opened and can start immediately
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTrack {
    pub identity: BeatmapIdentity,
    pub audio_path: PathBuf,
    pub duration: Option<Duration>,
}

/// Opaque playback device.
///
/// `prepare` does the slow work (opening and decoding headers) and must not
/// disturb whatever is currently audible; only `start` switches tracks.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open the audio file of `entry` without starting it.
    async fn prepare(&self, entry: &BeatmapEntry) -> Result<PreparedTrack>;

    /// Replace the current track with `track` and play it from the beginning.
    async fn start(&self, track: &PreparedTrack) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DeviceState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Output that validates files and tracks transport state without producing sound.
#[derive(Debug, Default)]
pub struct SilentOutput {
    state: Mutex<(DeviceState, Option<PreparedTrack>)>,
}

impl SilentOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track currently loaded on the device
    #[must_use]
    pub fn current(&self) -> Option<PreparedTrack> {
        self.state.lock().1.clone()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state.lock().0 == DeviceState::Playing
    }
}

#[async_trait]
impl AudioOutput for SilentOutput {
    fn name(&self) -> &'static str {
        "silent"
    }

    async fn prepare(&self, entry: &BeatmapEntry) -> Result<PreparedTrack> {
        let audio_path = entry
            .audio_path()
            .ok_or_else(|| CoreError::unavailable(&entry.identity, "beatmap has no audio file"))?;

        let metadata = tokio::fs::metadata(&audio_path)
            .await
            .map_err(|e| CoreError::unavailable(&entry.identity, format!("{}: {e}", audio_path.display())))?;
        if !metadata.is_file() {
            return Err(CoreError::unavailable(
                &entry.identity,
                format!("{} is not a file", audio_path.display()),
            ));
        }

        Ok(PreparedTrack {
            identity: entry.identity.clone(),
            audio_path,
            duration: (!entry.length.is_zero()).then_some(entry.length),
        })
    }

    async fn start(&self, track: &PreparedTrack) -> Result<()> {
        debug!(target: LOG_TARGET, "Starting {:?}", track.audio_path);
        *self.state.lock() = (DeviceState::Playing, Some(track.clone()));
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.0 == DeviceState::Playing {
            state.0 = DeviceState::Paused;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.0 == DeviceState::Paused {
            state.0 = DeviceState::Playing;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.state.lock() = (DeviceState::Stopped, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::entry_in;

    #[tokio::test]
    async fn test_prepare_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let entry = entry_in(dir.path(), "1 A - B", "Hard").with_audio("audio.mp3");

        let err = SilentOutput::new().prepare(&entry).await.unwrap_err();
        assert!(matches!(err, CoreError::TrackUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_prepare_without_audio_reference() {
        let dir = tempfile::tempdir().unwrap();
        let entry = entry_in(dir.path(), "1 A - B", "Hard");

        let err = SilentOutput::new().prepare(&entry).await.unwrap_err();
        assert!(matches!(err, CoreError::TrackUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_transport() {
        let dir = tempfile::tempdir().unwrap();
        let entry = crate::testing::playable_entry(dir.path(), "1 A - B", "Hard");
        let output = SilentOutput::new();

        let track = output.prepare(&entry).await.unwrap();
        assert!(output.current().is_none());

        output.start(&track).await.unwrap();
        assert!(output.is_playing());

        output.pause().await.unwrap();
        assert!(!output.is_playing());
        output.resume().await.unwrap();
        assert!(output.is_playing());

        output.stop().await.unwrap();
        assert!(output.current().is_none());
    }
}
