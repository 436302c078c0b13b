//! Playback state machine and play queue.
//!
//! ```text
//! Idle -> Loading -> Playing <-> Paused -> Idle
//!            \-> Idle (load failure)
//! ```

use crate::config::PlaybackConfig;
use crate::error::{CoreError, Result};
use crate::hub::{PlaybackState, SessionHub};
use crate::identity::BeatmapIdentity;
use crate::library::{BeatmapEntry, LibraryIndex};
use crate::output::{AudioOutput, PreparedTrack};
use crate::queue::{Direction, PlayMode, PlayQueue};
use crate::store::UserDataStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::session";

/// Result of a request that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The track is now playing
    Started(BeatmapIdentity),
    /// A newer request took over before this one finished; the session reflects the newer one
    Superseded,
    /// Nothing to do: empty queue, end of a sequential queue or wrong state
    Unchanged,
    /// The last track of a non-repeating queue ended and the session is idle
    Finished,
}

/// How a successful load moves the queue cursor
enum QueueUpdate {
    /// Put the cursor on the identity if it is in the queue
    Seek,
    /// Move the cursor to a play position
    Move(usize),
    /// Install a new queue with the cursor at a play position
    Replace(Arc<PlayQueue>, usize),
}

enum Attempt {
    Done(PlayOutcome),
    Exhausted(Vec<(BeatmapIdentity, CoreError)>),
}

struct LoadRequest {
    seq: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct RequestSlot {
    seq: u64,
    token: Option<CancellationToken>,
}

struct SessionInner {
    state: PlaybackState,
    /// Last state other than `Loading`; what the device is doing while a load runs
    settled: PlaybackState,
    current: Option<BeatmapIdentity>,
    queue: PlayQueue,
}

/// Sole owner and mutator of the playback session.
///
/// Requests are last-request-wins: each one bumps a sequence number and cancels
/// the load in flight. A load only commits if its sequence number is still
/// the latest when it re-acquires the session lock.
pub struct SessionController {
    library: Arc<LibraryIndex>,
    store: Arc<UserDataStore>,
    output: Arc<dyn AudioOutput>,
    hub: Arc<SessionHub>,
    load_timeout: Duration,
    inner: tokio::sync::Mutex<SessionInner>,
    requests: Mutex<RequestSlot>,
}

impl SessionController {
    pub fn new(
        library: Arc<LibraryIndex>,
        store: Arc<UserDataStore>,
        output: Arc<dyn AudioOutput>,
        hub: Arc<SessionHub>,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            library,
            store,
            output,
            hub,
            load_timeout: config.load_timeout(),
            inner: tokio::sync::Mutex::new(SessionInner {
                state: PlaybackState::Idle,
                settled: PlaybackState::Idle,
                current: None,
                queue: PlayQueue::new(config.play_mode),
            }),
            requests: Mutex::new(RequestSlot::default()),
        }
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub async fn state(&self) -> PlaybackState {
        self.inner.lock().await.state
    }

    pub async fn current(&self) -> Option<BeatmapIdentity> {
        self.inner.lock().await.current.clone()
    }

    /// Copy of the play queue
    pub async fn queue(&self) -> PlayQueue {
        self.inner.lock().await.queue.clone()
    }

    pub async fn play_mode(&self) -> PlayMode {
        self.inner.lock().await.queue.mode()
    }

    // ---- request bookkeeping ----

    fn begin_request(&self) -> LoadRequest {
        let mut slot = self.requests.lock();
        slot.seq += 1;
        let token = CancellationToken::new();
        if let Some(previous) = slot.token.replace(token.clone()) {
            previous.cancel();
        }
        LoadRequest {
            seq: slot.seq,
            token,
        }
    }

    fn is_current(&self, request: &LoadRequest) -> bool {
        self.requests.lock().seq == request.seq
    }

    fn end_request(&self, request: &LoadRequest) {
        let mut slot = self.requests.lock();
        if slot.seq == request.seq {
            slot.token = None;
        }
    }

    async fn apply_state(&self, inner: &mut SessionInner, state: PlaybackState) {
        inner.state = state;
        if state != PlaybackState::Loading {
            inner.settled = state;
        }
        self.hub.set_state(state).await;
    }

    fn emit_queue(&self, inner: &SessionInner) {
        self.hub
            .emit_queue_changed(inner.queue.len(), inner.queue.cursor(), inner.queue.mode());
    }

    async fn enter_loading(&self, request: &LoadRequest) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.is_current(request) {
            return false;
        }
        self.apply_state(&mut inner, PlaybackState::Loading).await;
        true
    }

    // ---- loading ----

    /// Resolve and prepare a track without touching session state.
    ///
    /// `Ok(None)` means the request was cancelled by a newer one.
    async fn load(
        &self,
        request: &LoadRequest,
        identity: &BeatmapIdentity,
    ) -> Result<Option<(Arc<BeatmapEntry>, PreparedTrack)>> {
        let entry = self
            .library
            .lookup(identity)
            .ok_or_else(|| CoreError::unavailable(identity, "not in the beatmap library"))?;

        let audio_path = entry
            .audio_path()
            .ok_or_else(|| CoreError::unavailable(identity, "beatmap has no audio file"))?;
        if !tokio::fs::try_exists(&audio_path).await.unwrap_or(false) {
            return Err(CoreError::unavailable(
                identity,
                format!("audio file missing: {}", audio_path.display()),
            ));
        }

        let prepared = tokio::select! {
            biased;
            () = request.token.cancelled() => return Ok(None),
            prepared = tokio::time::timeout(self.load_timeout, self.output.prepare(&entry)) => prepared,
        };

        match prepared {
            Ok(Ok(track)) => Ok(Some((entry, track))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CoreError::unavailable(
                identity,
                format!("audio output timed out after {:?}", self.load_timeout),
            )),
        }
    }

    /// Switch the device to `track` and commit it as the current track.
    ///
    /// An error means the device refused to start and nothing was committed.
    async fn commit(
        &self,
        request: &LoadRequest,
        identity: BeatmapIdentity,
        entry: Arc<BeatmapEntry>,
        track: PreparedTrack,
        update: QueueUpdate,
    ) -> Result<PlayOutcome> {
        let mut inner = self.inner.lock().await;
        if !self.is_current(request) {
            debug!(target: LOG_TARGET, "Dropping superseded load of {}", identity);
            return Ok(PlayOutcome::Superseded);
        }

        self.output.start(&track).await?;

        match update {
            QueueUpdate::Seek => {
                if inner.queue.current() != Some(&identity) {
                    inner.queue.seek_to(&identity);
                }
            }
            QueueUpdate::Move(position) => {
                if inner.queue.at(position) == Some(&identity) {
                    inner.queue.commit(position);
                } else {
                    inner.queue.seek_to(&identity);
                }
            }
            QueueUpdate::Replace(queue, position) => {
                inner.queue = Arc::try_unwrap(queue).unwrap_or_else(|shared| (*shared).clone());
                inner.queue.commit(position);
            }
        }

        inner.current = Some(identity.clone());
        self.hub.begin_track(identity.clone(), entry).await;
        self.apply_state(&mut inner, PlaybackState::Playing).await;
        self.emit_queue(&inner);
        drop(inner);
        self.end_request(request);

        info!(target: LOG_TARGET, "Now playing {}", identity);

        if let Err(e) = self.store.record_recent_play(&identity).await {
            warn!(target: LOG_TARGET, "Could not record recent play of {}: {}", identity, e);
            self.hub.emit_error(e.to_string());
        }

        Ok(PlayOutcome::Started(identity))
    }

    /// Load candidates in order and commit the first one that works.
    async fn play_first_available(
        &self,
        request: &LoadRequest,
        candidates: Vec<(BeatmapIdentity, QueueUpdate)>,
    ) -> Attempt {
        let mut failed = Vec::new();

        for (identity, update) in candidates {
            let loaded = match self.load(request, &identity).await {
                Ok(Some(loaded)) => loaded,
                Ok(None) => return Attempt::Done(PlayOutcome::Superseded),
                Err(e) => {
                    warn!(target: LOG_TARGET, "Cannot play {}: {}", identity, e);
                    self.hub.emit_load_failed(identity.clone(), e.to_string());
                    failed.push((identity, e));
                    continue;
                }
            };

            let (entry, track) = loaded;
            match self.commit(request, identity.clone(), entry, track, update).await {
                Ok(outcome) => return Attempt::Done(outcome),
                Err(e) => {
                    warn!(target: LOG_TARGET, "Audio output refused {}: {}", identity, e);
                    self.hub.emit_load_failed(identity.clone(), e.to_string());
                    failed.push((identity, e));
                }
            }
        }

        Attempt::Exhausted(failed)
    }

    /// Leave `Loading` after every candidate failed.
    ///
    /// The previous track keeps its audible state unless it is one of the
    /// failed identities, in which case playback stops. Returns `false` when a
    /// newer request owns the session.
    async fn settle_after_failure(&self, request: &LoadRequest, failed: &[BeatmapIdentity]) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.is_current(request) {
            return false;
        }
        self.end_request(request);

        let active_failed = inner
            .current
            .as_ref()
            .is_some_and(|current| failed.contains(current));
        if active_failed {
            warn!(target: LOG_TARGET, "Active track became unplayable, stopping playback");
            if let Err(e) = self.output.stop().await {
                warn!(target: LOG_TARGET, "Audio output failed to stop: {}", e);
            }
            inner.current = None;
            self.hub.clear_track().await;
            self.apply_state(&mut inner, PlaybackState::Idle).await;
        } else {
            let settled = inner.settled;
            self.apply_state(&mut inner, settled).await;
        }
        true
    }

    // ---- operations ----

    /// Play `identity` now, replacing whatever is playing.
    ///
    /// Calling it for the track that is already playing restarts it.
    ///
    /// # Errors
    ///
    /// Returns `TrackUnavailable` when the identity is not in the library, its
    /// audio file is missing, or the output cannot open it. The previously
    /// playing track is left as it was unless it is the one that failed.
    pub async fn play_new(&self, identity: &BeatmapIdentity) -> Result<PlayOutcome> {
        let request = self.begin_request();
        debug!(target: LOG_TARGET, "Play request #{} for {}", request.seq, identity);
        if !self.enter_loading(&request).await {
            return Ok(PlayOutcome::Superseded);
        }

        match self
            .play_first_available(&request, vec![(identity.clone(), QueueUpdate::Seek)])
            .await
        {
            Attempt::Done(outcome) => Ok(outcome),
            Attempt::Exhausted(mut failed) => {
                let identities: Vec<_> = failed.iter().map(|(id, _)| id.clone()).collect();
                if !self.settle_after_failure(&request, &identities).await {
                    return Ok(PlayOutcome::Superseded);
                }
                Err(failed.pop().map_or(CoreError::EmptyQueue, |(_, e)| e))
            }
        }
    }

    /// Replace the play queue and reset the cursor.
    ///
    /// With `auto_play_first` the first playable entry in play order starts,
    /// skipping unavailable ones; otherwise the cursor rests on the first entry
    /// present in the library and playback is untouched.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQueue` if no entry is playable; the previous queue is kept.
    pub async fn set_song_list(
        &self,
        identities: Vec<BeatmapIdentity>,
        auto_play_first: bool,
    ) -> Result<PlayOutcome> {
        let mode = self.inner.lock().await.queue.mode();
        let mut queue = PlayQueue::with_items(identities, mode);
        let positions = queue.candidates(Direction::Forward, false);
        info!(
            target: LOG_TARGET,
            "New song list with {} entries (auto play: {})",
            queue.len(),
            auto_play_first
        );

        if !auto_play_first {
            let first = positions
                .into_iter()
                .find(|&p| queue.at(p).is_some_and(|id| self.library.lookup(id).is_some()));
            let Some(position) = first else {
                return Err(CoreError::EmptyQueue);
            };
            queue.commit(position);

            // The new list replaces whatever a pending load would have installed
            let mut inner = self.inner.lock().await;
            let request = self.begin_request();
            self.end_request(&request);
            inner.queue = queue;
            if inner.state == PlaybackState::Loading {
                let settled = inner.settled;
                self.apply_state(&mut inner, settled).await;
            }
            self.emit_queue(&inner);
            return Ok(PlayOutcome::Unchanged);
        }

        if positions.is_empty() {
            return Err(CoreError::EmptyQueue);
        }
        let request = self.begin_request();
        if !self.enter_loading(&request).await {
            return Ok(PlayOutcome::Superseded);
        }

        let queue = Arc::new(queue);
        let candidates = positions
            .into_iter()
            .filter_map(|p| {
                queue
                    .at(p)
                    .cloned()
                    .map(|id| (id, QueueUpdate::Replace(Arc::clone(&queue), p)))
            })
            .collect();
        drop(queue);

        match self.play_first_available(&request, candidates).await {
            Attempt::Done(outcome) => Ok(outcome),
            Attempt::Exhausted(failed) => {
                let identities: Vec<_> = failed.into_iter().map(|(id, _)| id).collect();
                if !self.settle_after_failure(&request, &identities).await {
                    return Ok(PlayOutcome::Superseded);
                }
                Err(CoreError::EmptyQueue)
            }
        }
    }

    /// Skip to the next playable entry according to the play mode.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQueue` if every remaining candidate is unplayable.
    pub async fn next(&self) -> Result<PlayOutcome> {
        self.advance(Direction::Forward, false).await
    }

    /// Go back to the previous playable entry according to the play mode.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQueue` if every remaining candidate is unplayable.
    pub async fn previous(&self) -> Result<PlayOutcome> {
        self.advance(Direction::Backward, false).await
    }

    /// The audio output reached the end of the current track.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQueue` if every remaining candidate is unplayable.
    pub async fn track_finished(&self) -> Result<PlayOutcome> {
        self.advance(Direction::Forward, true).await
    }

    /// Requests that end up with nothing to load leave a pending load alone.
    async fn advance(&self, direction: Direction, finished: bool) -> Result<PlayOutcome> {
        let (request, candidates) = {
            let mut inner = self.inner.lock().await;
            if inner.queue.is_empty() || (finished && inner.state != PlaybackState::Playing) {
                return Ok(PlayOutcome::Unchanged);
            }

            let positions = inner.queue.candidates(direction, finished);
            if positions.is_empty() {
                if !finished {
                    return Ok(PlayOutcome::Unchanged);
                }
                info!(target: LOG_TARGET, "Reached the end of the queue");
                if let Err(e) = self.output.stop().await {
                    warn!(target: LOG_TARGET, "Audio output failed to stop: {}", e);
                }
                self.apply_state(&mut inner, PlaybackState::Idle).await;
                return Ok(PlayOutcome::Finished);
            }

            let candidates: Vec<_> = positions
                .into_iter()
                .filter_map(|p| inner.queue.at(p).cloned().map(|id| (id, QueueUpdate::Move(p))))
                .collect();
            let request = self.begin_request();
            self.apply_state(&mut inner, PlaybackState::Loading).await;
            (request, candidates)
        };

        match self.play_first_available(&request, candidates).await {
            Attempt::Done(outcome) => Ok(outcome),
            Attempt::Exhausted(failed) => {
                let identities: Vec<_> = failed.into_iter().map(|(id, _)| id).collect();
                if !self.settle_after_failure(&request, &identities).await {
                    return Ok(PlayOutcome::Superseded);
                }
                Err(CoreError::EmptyQueue)
            }
        }
    }

    /// Pause playback. Does nothing unless playing.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio output fails to pause.
    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != PlaybackState::Playing {
            debug!(target: LOG_TARGET, "Ignoring pause while {}", inner.state);
            return Ok(());
        }
        self.output.pause().await?;
        self.apply_state(&mut inner, PlaybackState::Paused).await;
        Ok(())
    }

    /// Resume playback. Does nothing unless paused.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio output fails to resume.
    pub async fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != PlaybackState::Paused {
            debug!(target: LOG_TARGET, "Ignoring resume while {}", inner.state);
            return Ok(());
        }
        self.output.resume().await?;
        self.apply_state(&mut inner, PlaybackState::Playing).await;
        Ok(())
    }

    /// Stop playback from any state, cancelling a pending load. Queue and cursor are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio output fails to stop; the session is idle regardless.
    pub async fn stop(&self) -> Result<()> {
        let request = self.begin_request();
        self.end_request(&request);

        let mut inner = self.inner.lock().await;
        let stopped = self.output.stop().await;
        self.apply_state(&mut inner, PlaybackState::Idle).await;
        stopped
    }

    /// Change the order mode, keeping the current entry under the cursor.
    pub async fn set_play_mode(&self, mode: PlayMode) {
        let mut inner = self.inner.lock().await;
        inner.queue.set_mode(mode);
        info!(target: LOG_TARGET, "Play mode set to {}", mode);
        self.emit_queue(&inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::SessionEvent;
    use crate::testing::{playable_entry, FakeOutput};

    struct Fixture {
        dir: tempfile::TempDir,
        library: Arc<LibraryIndex>,
        store: Arc<UserDataStore>,
        output: Arc<FakeOutput>,
        hub: Arc<SessionHub>,
        controller: Arc<SessionController>,
    }

    fn id(folder: &str) -> BeatmapIdentity {
        BeatmapIdentity::new(folder, "Normal")
    }

    async fn fixture(playable: &[&str], mode: PlayMode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let entries = playable
            .iter()
            .map(|folder| playable_entry(dir.path(), folder, "Normal"))
            .collect();
        let library = Arc::new(LibraryIndex::new());
        library.publish(None, entries);

        let store = Arc::new(
            UserDataStore::open_in_memory(Duration::from_secs(5))
                .await
                .unwrap(),
        );
        let output = FakeOutput::new();
        let hub = SessionHub::new();
        let config = PlaybackConfig {
            play_mode: mode,
            load_timeout_ms: 5_000,
        };
        let controller = Arc::new(SessionController::new(
            Arc::clone(&library),
            Arc::clone(&store),
            output.clone(),
            Arc::clone(&hub),
            &config,
        ));

        Fixture {
            dir,
            library,
            store,
            output,
            hub,
            controller,
        }
    }

    async fn wait_for_state(controller: &SessionController, state: PlaybackState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.state().await != state {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_play_new_commits_and_records() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        let mut rx = f.hub.subscribe();

        let outcome = f.controller.play_new(&id("a")).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Started(id("a")));
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
        assert_eq!(f.controller.current().await, Some(id("a")));
        assert_eq!(f.output.started(), vec![id("a")]);
        assert_eq!(f.store.recent_log().await.unwrap().len(), 1);

        let mut saw_track_change = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::TrackChanged { identity, .. } = event {
                assert_eq!(identity, id("a"));
                saw_track_change = true;
            }
        }
        assert!(saw_track_change);
    }

    #[tokio::test]
    async fn test_play_unknown_identity_while_idle() {
        let f = fixture(&["a"], PlayMode::Sequential).await;

        let err = f.controller.play_new(&id("missing")).await.unwrap_err();

        assert!(matches!(err, CoreError::TrackUnavailable { .. }));
        assert_eq!(f.controller.state().await, PlaybackState::Idle);
        assert!(f.output.started().is_empty());
        assert!(f.store.recent_log().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_track_playing() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        f.controller.play_new(&id("a")).await.unwrap();
        f.output.fail(&id("b"));

        let err = f.controller.play_new(&id("b")).await.unwrap_err();

        assert!(matches!(err, CoreError::TrackUnavailable { .. }));
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
        assert_eq!(f.controller.current().await, Some(id("a")));
        assert_eq!(f.output.stops(), 0);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_track_paused() {
        let f = fixture(&["a"], PlayMode::Sequential).await;
        f.controller.play_new(&id("a")).await.unwrap();
        f.controller.pause().await.unwrap();

        f.controller.play_new(&id("missing")).await.unwrap_err();

        assert_eq!(f.controller.state().await, PlaybackState::Paused);
    }

    #[tokio::test]
    async fn test_failed_reload_of_active_track_stops() {
        let f = fixture(&["a"], PlayMode::Sequential).await;
        f.controller.play_new(&id("a")).await.unwrap();
        std::fs::remove_file(f.dir.path().join("a").join("audio.mp3")).unwrap();

        let err = f.controller.play_new(&id("a")).await.unwrap_err();

        assert!(matches!(err, CoreError::TrackUnavailable { .. }));
        assert_eq!(f.controller.state().await, PlaybackState::Idle);
        assert_eq!(f.controller.current().await, None);
        assert_eq!(f.output.stops(), 1);
        assert!(f.hub.current_track().await.is_none());
    }

    #[tokio::test]
    async fn test_newer_play_supersedes_pending_load() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        let gate = f.output.gate(&id("a"));

        let controller = Arc::clone(&f.controller);
        let first = tokio::spawn(async move { controller.play_new(&id("a")).await });
        wait_for_state(&f.controller, PlaybackState::Loading).await;

        let second = f.controller.play_new(&id("b")).await.unwrap();
        gate.notify_one();
        let first = first.await.unwrap().unwrap();

        assert_eq!(second, PlayOutcome::Started(id("b")));
        assert_eq!(first, PlayOutcome::Superseded);
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
        assert_eq!(f.controller.current().await, Some(id("b")));
        assert_eq!(f.output.started(), vec![id("b")]);

        let log = f.store.recent_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].identity, id("b"));
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_load() {
        let f = fixture(&["a"], PlayMode::Sequential).await;
        let _gate = f.output.gate(&id("a"));

        let controller = Arc::clone(&f.controller);
        let pending = tokio::spawn(async move { controller.play_new(&id("a")).await });
        wait_for_state(&f.controller, PlaybackState::Loading).await;

        f.controller.stop().await.unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), PlayOutcome::Superseded);
        assert_eq!(f.controller.state().await, PlaybackState::Idle);
        assert!(f.output.started().is_empty());
    }

    #[tokio::test]
    async fn test_replay_restarts_current_track() {
        let f = fixture(&["a"], PlayMode::Sequential).await;
        f.controller.play_new(&id("a")).await.unwrap();

        let outcome = f.controller.play_new(&id("a")).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Started(id("a")));
        assert_eq!(f.output.started(), vec![id("a"), id("a")]);
        assert_eq!(f.store.recent_log().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_song_list_skips_unavailable_first_entry() {
        let f = fixture(&["b", "c"], PlayMode::Sequential).await;

        let outcome = f
            .controller
            .set_song_list(vec![id("a"), id("b"), id("c")], true)
            .await
            .unwrap();

        assert_eq!(outcome, PlayOutcome::Started(id("b")));
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
        assert_eq!(f.controller.queue().await.cursor(), Some(1));
    }

    #[tokio::test]
    async fn test_song_list_without_playable_entries() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        f.controller
            .set_song_list(vec![id("a"), id("b")], true)
            .await
            .unwrap();

        let err = f
            .controller
            .set_song_list(vec![id("x"), id("y")], true)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::EmptyQueue));
        let queue = f.controller.queue().await;
        assert_eq!(queue.items(), &[id("a"), id("b")]);
        assert_eq!(queue.cursor(), Some(0));
        assert_eq!(f.controller.state().await, PlaybackState::Playing);

        assert!(matches!(
            f.controller.set_song_list(Vec::new(), false).await,
            Err(CoreError::EmptyQueue)
        ));
    }

    #[tokio::test]
    async fn test_song_list_without_autoplay_positions_cursor() {
        let f = fixture(&["b"], PlayMode::Sequential).await;

        let outcome = f
            .controller
            .set_song_list(vec![id("a"), id("b")], false)
            .await
            .unwrap();

        assert_eq!(outcome, PlayOutcome::Unchanged);
        assert_eq!(f.controller.state().await, PlaybackState::Idle);
        assert_eq!(f.controller.queue().await.cursor(), Some(1));
        assert!(f.output.started().is_empty());
    }

    #[tokio::test]
    async fn test_next_and_previous_sequential() {
        let f = fixture(&["a", "b", "c"], PlayMode::Sequential).await;
        f.controller
            .set_song_list(vec![id("a"), id("b"), id("c")], true)
            .await
            .unwrap();

        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Started(id("b")));
        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Started(id("c")));
        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Unchanged);
        assert_eq!(f.controller.current().await, Some(id("c")));

        assert_eq!(f.controller.previous().await.unwrap(), PlayOutcome::Started(id("b")));
        assert_eq!(f.controller.queue().await.cursor(), Some(1));
    }

    #[tokio::test]
    async fn test_next_skips_unavailable_and_wraps_in_repeat_all() {
        let f = fixture(&["a", "c"], PlayMode::RepeatAll).await;
        f.controller
            .set_song_list(vec![id("a"), id("b"), id("c")], true)
            .await
            .unwrap();

        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Started(id("c")));
        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Started(id("a")));
        assert_eq!(f.controller.queue().await.cursor(), Some(0));
    }

    #[tokio::test]
    async fn test_next_on_empty_queue_is_noop() {
        let f = fixture(&["a"], PlayMode::RepeatAll).await;

        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Unchanged);
        assert_eq!(f.controller.previous().await.unwrap(), PlayOutcome::Unchanged);
        assert_eq!(f.controller.state().await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_pause_resume_state_rules() {
        let f = fixture(&["a"], PlayMode::Sequential).await;

        f.controller.pause().await.unwrap();
        assert_eq!(f.controller.state().await, PlaybackState::Idle);
        f.controller.resume().await.unwrap();
        assert_eq!(f.controller.state().await, PlaybackState::Idle);

        f.controller.play_new(&id("a")).await.unwrap();
        f.controller.resume().await.unwrap();
        assert_eq!(f.output.resumes(), 0);

        f.controller.pause().await.unwrap();
        f.controller.pause().await.unwrap();
        assert_eq!(f.controller.state().await, PlaybackState::Paused);
        assert_eq!(f.output.pauses(), 1);

        f.controller.resume().await.unwrap();
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_stop_preserves_queue() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        f.controller
            .set_song_list(vec![id("a"), id("b")], true)
            .await
            .unwrap();
        f.controller.next().await.unwrap();

        f.controller.stop().await.unwrap();

        assert_eq!(f.controller.state().await, PlaybackState::Idle);
        let queue = f.controller.queue().await;
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.cursor(), Some(1));

        assert_eq!(f.controller.previous().await.unwrap(), PlayOutcome::Started(id("a")));
    }

    #[tokio::test]
    async fn test_track_finished_repeat_one_replays() {
        let f = fixture(&["a", "b"], PlayMode::RepeatOne).await;
        f.controller
            .set_song_list(vec![id("a"), id("b")], true)
            .await
            .unwrap();

        assert_eq!(
            f.controller.track_finished().await.unwrap(),
            PlayOutcome::Started(id("a"))
        );
        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Started(id("b")));
    }

    #[tokio::test]
    async fn test_track_finished_at_end_goes_idle() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        f.controller
            .set_song_list(vec![id("a"), id("b")], true)
            .await
            .unwrap();

        assert_eq!(
            f.controller.track_finished().await.unwrap(),
            PlayOutcome::Started(id("b"))
        );
        assert_eq!(f.controller.track_finished().await.unwrap(), PlayOutcome::Finished);
        assert_eq!(f.controller.state().await, PlaybackState::Idle);
        assert_eq!(f.controller.queue().await.cursor(), Some(1));
    }

    #[tokio::test]
    async fn test_set_play_mode_keeps_current() {
        let f = fixture(&["a", "b", "c", "d"], PlayMode::Sequential).await;
        f.controller
            .set_song_list(vec![id("a"), id("b"), id("c"), id("d")], true)
            .await
            .unwrap();
        f.controller.next().await.unwrap();

        f.controller.set_play_mode(PlayMode::Shuffle).await;

        let queue = f.controller.queue().await;
        assert_eq!(queue.mode(), PlayMode::Shuffle);
        assert_eq!(queue.current(), Some(&id("b")));

        let outcome = f.controller.next().await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Started(ref next) if *next != id("b")));
    }

    #[tokio::test]
    async fn test_library_reload_does_not_break_current_session() {
        let f = fixture(&["a"], PlayMode::Sequential).await;
        f.controller.play_new(&id("a")).await.unwrap();

        f.library.publish(None, Vec::new());

        assert_eq!(f.controller.state().await, PlaybackState::Playing);
        assert!(matches!(
            f.controller.play_new(&id("a")).await,
            Err(CoreError::TrackUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_track_finished_during_pending_load_keeps_request() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        f.controller.play_new(&id("a")).await.unwrap();
        f.controller.pause().await.unwrap();
        let gate = f.output.gate(&id("b"));

        let controller = Arc::clone(&f.controller);
        let pending = tokio::spawn(async move { controller.play_new(&id("b")).await });
        wait_for_state(&f.controller, PlaybackState::Loading).await;

        assert_eq!(f.controller.track_finished().await.unwrap(), PlayOutcome::Unchanged);
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), PlayOutcome::Started(id("b")));
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
        assert_eq!(f.controller.current().await, Some(id("b")));
    }

    #[tokio::test]
    async fn test_next_at_queue_end_during_pending_load_keeps_request() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        f.controller.set_song_list(vec![id("a")], true).await.unwrap();
        let gate = f.output.gate(&id("b"));

        let controller = Arc::clone(&f.controller);
        let pending = tokio::spawn(async move { controller.play_new(&id("b")).await });
        wait_for_state(&f.controller, PlaybackState::Loading).await;

        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Unchanged);
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), PlayOutcome::Started(id("b")));
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_next_on_empty_queue_during_pending_load_keeps_request() {
        let f = fixture(&["a"], PlayMode::Sequential).await;
        let gate = f.output.gate(&id("a"));

        let controller = Arc::clone(&f.controller);
        let pending = tokio::spawn(async move { controller.play_new(&id("a")).await });
        wait_for_state(&f.controller, PlaybackState::Loading).await;

        assert_eq!(f.controller.next().await.unwrap(), PlayOutcome::Unchanged);
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), PlayOutcome::Started(id("a")));
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_song_list_without_autoplay_settles_pending_load() {
        let f = fixture(&["a", "b"], PlayMode::Sequential).await;
        let _gate = f.output.gate(&id("a"));

        let controller = Arc::clone(&f.controller);
        let pending = tokio::spawn(async move { controller.play_new(&id("a")).await });
        wait_for_state(&f.controller, PlaybackState::Loading).await;

        let outcome = f.controller.set_song_list(vec![id("b")], false).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Unchanged);
        assert_eq!(pending.await.unwrap().unwrap(), PlayOutcome::Superseded);
        assert_eq!(f.controller.state().await, PlaybackState::Idle);
        assert_eq!(f.controller.queue().await.current(), Some(&id("b")));
        assert!(f.output.started().is_empty());
    }

    #[tokio::test]
    async fn test_song_list_without_autoplay_restores_paused_track() {
        let f = fixture(&["a", "b", "c"], PlayMode::Sequential).await;
        f.controller.play_new(&id("a")).await.unwrap();
        f.controller.pause().await.unwrap();
        let _gate = f.output.gate(&id("b"));

        let controller = Arc::clone(&f.controller);
        let pending = tokio::spawn(async move { controller.play_new(&id("b")).await });
        wait_for_state(&f.controller, PlaybackState::Loading).await;

        f.controller.set_song_list(vec![id("c")], false).await.unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), PlayOutcome::Superseded);
        assert_eq!(f.controller.state().await, PlaybackState::Paused);

        f.controller.resume().await.unwrap();
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
        assert_eq!(f.controller.current().await, Some(id("a")));
    }

    #[tokio::test]
    async fn test_recent_play_failure_does_not_abort_playback() {
        let f = fixture(&["a"], PlayMode::Sequential).await;
        f.store.drop_recent_plays().await;
        let mut rx = f.hub.subscribe();

        let outcome = f.controller.play_new(&id("a")).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Started(id("a")));
        assert_eq!(f.controller.state().await, PlaybackState::Playing);
        assert_eq!(f.controller.current().await, Some(id("a")));

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
