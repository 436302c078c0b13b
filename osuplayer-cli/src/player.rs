//! Interactive playback session driven by stdin commands.

use crate::ModeArg;
use clap::ValueEnum;
use osuplayer_core::{
    BeatmapIdentity, CoreError, LyricSlot, PlayMode, PlayOutcome, PlaybackState, PlayerContext,
    Result, SessionController, SessionEvent, SessionHub,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const HELP: &str = "commands: next | prev | pause | resume | stop | play <keyword> | \
mode <sequential|shuffle|repeat-one|repeat-all> | strict <on|off> | lyrics | now | fav | export | quit";

pub async fn run(
    context: &mut PlayerContext,
    keyword: Option<&str>,
    collection: Option<i64>,
    mode: Option<PlayMode>,
) -> Result<()> {
    let controller = Arc::clone(context.controller());
    if let Some(mode) = mode {
        controller.set_play_mode(mode).await;
    }

    let identities = match collection {
        Some(id) => context.store().collection_members(id).await?,
        None => search(context, keyword.unwrap_or_default()),
    };
    if identities.is_empty() {
        return Err(CoreError::EmptyQueue);
    }
    report(controller.set_song_list(identities, true).await);

    let cancel = context.cancel_token();
    let session_token = cancel.child_token();
    let logger = tokio::spawn(log_session_events(
        Arc::clone(context.hub()),
        session_token.clone(),
    ));
    let clock = tokio::spawn(track_clock(
        Arc::clone(context.hub()),
        Arc::clone(&controller),
        session_token.clone(),
    ));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let (command, argument) = line
            .trim()
            .split_once(' ')
            .map_or((line.trim(), ""), |(c, a)| (c, a.trim()));

        match command {
            "" => {}
            "next" | "n" => report(controller.next().await),
            "prev" | "p" => report(controller.previous().await),
            "pause" => report(controller.pause().await),
            "resume" | "r" => report(controller.resume().await),
            "stop" => report(controller.stop().await),
            "play" => {
                let identities = search(context, argument);
                if identities.is_empty() {
                    println!("Nothing matches \"{argument}\"");
                } else {
                    report(controller.set_song_list(identities, true).await);
                }
            }
            "mode" => match ModeArg::from_str(argument, true) {
                Ok(mode) => controller.set_play_mode(mode.into()).await,
                Err(_) => println!("Unknown mode \"{argument}\""),
            },
            "strict" => {
                let strict = match argument {
                    "on" => true,
                    "off" => false,
                    _ => {
                        println!("strict <on|off>");
                        continue;
                    }
                };
                report(context.set_strict_mode(strict));
                context.fetcher().refresh().await;
            }
            "lyrics" | "l" => print_lyrics(context.hub()).await,
            "now" => print_now(context).await,
            "fav" => {
                if let Some(identity) = controller.current().await {
                    report(add_to_default_collection(context, &identity).await);
                }
            }
            "export" => {
                if let Some(identity) = controller.current().await {
                    report(context.store().enqueue_export(&identity).await.map(|_| ()));
                }
            }
            "quit" | "q" => break,
            _ => println!("{HELP}"),
        }
    }

    session_token.cancel();
    let _ = tokio::join!(logger, clock);
    Ok(())
}

fn search(context: &PlayerContext, keyword: &str) -> Vec<BeatmapIdentity> {
    let entries = if keyword.trim().is_empty() {
        context.library().all().iter().cloned().collect()
    } else {
        context.library().search(keyword)
    };
    entries.iter().map(|e| e.identity.clone()).collect()
}

async fn add_to_default_collection(context: &PlayerContext, identity: &BeatmapIdentity) -> Result<()> {
    let collection = context.store().ensure_default_collection().await?;
    if context.store().add_to_collection(collection.id, identity).await? {
        println!("Added to {}", collection.name);
    }
    Ok(())
}

fn report<T>(result: Result<T>) {
    if let Err(e) = result {
        error!("{e}");
    }
}

async fn print_now(context: &PlayerContext) {
    let snapshot = context.hub().snapshot().await;
    let queue = context.controller().queue().await;
    match snapshot.entry {
        Some(entry) => println!(
            "[{}] {} - {} ({}/{}, {})",
            snapshot.state,
            entry.display_artist(),
            entry.display_title(),
            queue.cursor().map_or(0, |c| c + 1),
            queue.len(),
            queue.mode()
        ),
        None => println!("[{}] nothing playing", snapshot.state),
    }
}

async fn print_lyrics(hub: &SessionHub) {
    match hub.lyrics().await {
        LyricSlot::Empty => println!("Nothing playing"),
        LyricSlot::Pending => println!("Looking for lyrics..."),
        LyricSlot::NotFound => println!("No lyrics for this track"),
        LyricSlot::Loaded(document) => {
            for line in &document.lines {
                match &line.translation {
                    Some(translation) => println!("{}  /  {}", line.text, translation),
                    None => println!("{}", line.text),
                }
            }
        }
    }
}

/// Stands in for the end-of-track signal of a real device: counts down the
/// beatmap length while playing and reports completion to the controller.
async fn track_clock(
    hub: Arc<SessionHub>,
    controller: Arc<SessionController>,
    cancel: CancellationToken,
) {
    let mut rx = hub.subscribe();
    let mut generation = 0;
    let mut deadline: Option<Instant> = None;
    let mut remaining: Option<Duration> = None;

    loop {
        let wake = deadline;
        let sleep = async move {
            match wake {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            () = sleep => {
                deadline = None;
                if hub.snapshot().await.generation != generation {
                    continue;
                }
                match controller.track_finished().await {
                    Ok(PlayOutcome::Finished) => println!("End of queue"),
                    Ok(_) => {}
                    Err(e) => warn!("Could not continue after track end: {}", e),
                }
            }
            event = rx.recv() => match event {
                Ok(SessionEvent::TrackChanged { generation: g, entry, .. }) => {
                    generation = g;
                    remaining = None;
                    deadline = (!entry.length.is_zero()).then(|| Instant::now() + entry.length);
                }
                Ok(SessionEvent::StateChanged { state: PlaybackState::Paused }) => {
                    remaining = deadline.take().map(|d| d.saturating_duration_since(Instant::now()));
                }
                Ok(SessionEvent::StateChanged { state: PlaybackState::Playing }) => {
                    if let Some(left) = remaining.take() {
                        deadline = Some(Instant::now() + left);
                    }
                }
                Ok(SessionEvent::StateChanged { state: PlaybackState::Idle }) => {
                    deadline = None;
                    remaining = None;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn log_session_events(hub: Arc<SessionHub>, cancel: CancellationToken) {
    let mut rx = hub.subscribe();

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => match &event {
                SessionEvent::StateChanged { state } => {
                    info!("Playback {}", state);
                }
                SessionEvent::TrackChanged { entry, .. } => {
                    info!(
                        "Now playing: {} - {} [{}] ({:?})",
                        entry.display_artist(),
                        entry.display_title(),
                        entry.identity.version(),
                        entry.length
                    );
                }
                SessionEvent::LoadFailed { identity, reason } => {
                    warn!("Could not play {}: {}", identity, reason);
                }
                SessionEvent::QueueChanged { len, cursor, mode } => {
                    info!(
                        "Queue: {} tracks, at {}, mode {}",
                        len,
                        cursor.map_or_else(|| "-".to_string(), |c| (c + 1).to_string()),
                        mode
                    );
                }
                SessionEvent::LyricsLoaded { lyrics, .. } => {
                    info!("Lyrics loaded: {} lines", lyrics.lines.len());
                }
                SessionEvent::LyricsNotFound { .. } => {
                    info!("No lyrics found for current track");
                }
                SessionEvent::LibraryReloaded { count } => {
                    info!("Library reloaded: {} beatmaps", count);
                }
                SessionEvent::Error { message } => {
                    error!("Session error: {}", message);
                }
            },
            Err(RecvError::Closed) => {
                info!("Session event channel closed");
                break;
            }
            Err(RecvError::Lagged(n)) => {
                info!("Missed {} session events", n);
            }
        }
    }
}
