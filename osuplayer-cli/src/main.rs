mod commands;
mod player;
mod prompt;

use clap::{Args, Parser, Subcommand, ValueEnum};
use osuplayer_core::{
    BeatmapIdentity, ContextPaths, CoreError, LyricSource, LyricSourceKind, LyricsProvider,
    PlayMode, PlayerConfig, PlayerContext, RecentSort, SilentOutput,
};
use osuplayer_lyrics_kugou::KugouProvider;
use osuplayer_lyrics_netease::NeteaseProvider;
use osuplayer_lyrics_qqmusic::QqMusicProvider;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "osuplayer", version, about = "Play the music of your osu! beatmaps")]
struct Cli {
    /// Path to osu!.db, overriding the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Overwrite a malformed config file with the default template
    #[arg(long, global = true)]
    reset_config: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List beatmaps, optionally filtered by keyword
    Library {
        keyword: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Play beatmaps matching a keyword, a collection, or the whole library
    Play {
        keyword: Option<String>,
        /// Play the members of a collection instead of a search
        #[arg(long, conflicts_with = "keyword")]
        collection: Option<i64>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Manage collections
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Show or edit the recent-play history
    Recent {
        #[command(subcommand)]
        action: Option<RecentAction>,
        #[arg(long, value_enum, default_value_t = SortArg::Latest)]
        sort: SortArg,
    },
    /// Manage the export queue
    Export {
        #[command(subcommand)]
        action: ExportAction,
    },
    /// Look up lyrics for a beatmap without playing it
    Lyrics {
        #[command(flatten)]
        beatmap: BeatmapArg,
        /// Accept fuzzy title/artist matches
        #[arg(long)]
        fuzzy: bool,
    },
}

#[derive(Debug, Clone, Args)]
struct BeatmapArg {
    /// Beatmap-set folder name
    folder: String,
    /// Difficulty name
    version: String,
}

impl BeatmapArg {
    fn identity(&self) -> BeatmapIdentity {
        BeatmapIdentity::new(&self.folder, &self.version)
    }
}

#[derive(Debug, Subcommand)]
enum CollectionAction {
    List,
    Show { id: i64 },
    Create { name: String },
    Rename { id: i64, name: String },
    Remove { id: i64 },
    AddTrack {
        id: i64,
        #[command(flatten)]
        beatmap: BeatmapArg,
    },
    RemoveTrack {
        id: i64,
        #[command(flatten)]
        beatmap: BeatmapArg,
    },
}

#[derive(Debug, Subcommand)]
enum RecentAction {
    /// Delete every record of a beatmap
    Remove {
        #[command(flatten)]
        beatmap: BeatmapArg,
    },
    Clear,
}

#[derive(Debug, Subcommand)]
enum ExportAction {
    List,
    Add {
        #[command(flatten)]
        beatmap: BeatmapArg,
    },
    Remove {
        #[command(flatten)]
        beatmap: BeatmapArg,
    },
    Clear,
    /// Copy every queued beatmap to the export directory
    Run,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Sequential,
    Shuffle,
    RepeatOne,
    RepeatAll,
}

impl From<ModeArg> for PlayMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => Self::Sequential,
            ModeArg::Shuffle => Self::Shuffle,
            ModeArg::RepeatOne => Self::RepeatOne,
            ModeArg::RepeatAll => Self::RepeatAll,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Latest,
    Oldest,
    Title,
    Artist,
}

impl From<SortArg> for RecentSort {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Latest => Self::PlayTimeDesc,
            SortArg::Oldest => Self::PlayTimeAsc,
            SortArg::Title => Self::Title,
            SortArg::Artist => Self::Artist,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Check config for logging.enabled before full config load
    let file_logging_enabled = check_file_logging_enabled();
    init_tracing(file_logging_enabled);

    let config_path = PlayerConfig::config_path();
    let mut config = match PlayerConfig::load_or_create_at(&config_path) {
        Ok(config) => config,
        Err(CoreError::ConfigParse(parse_error)) if cli.reset_config => {
            info!("Resetting malformed config: {parse_error}");
            match PlayerConfig::reset_at(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to reset config: {e}");
                    std::process::exit(1);
                }
            }
        }
        Err(CoreError::ConfigParse(parse_error)) => {
            error!(
                "Config file {} has a syntax error: {parse_error}\n\
                Fix it, or run again with --reset-config to start from the template.",
                config_path.display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    if let Some(db) = cli.db.clone() {
        config.general.db_path = Some(db);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(cli.command, config));
    std::process::exit(code);
}

async fn run(command: Command, config: PlayerConfig) -> i32 {
    let source = create_source(config.lyrics.source);
    let prompt = prompt::StdinPrompt::for_terminal();
    let mut context = match PlayerContext::start(
        config,
        ContextPaths::default(),
        source,
        Arc::new(SilentOutput::new()),
        prompt.as_ref().map(|p| p as &dyn osuplayer_core::DatabasePrompt),
    )
    .await
    {
        Ok(context) => context,
        Err(e) => {
            error!("Failed to start: {e}");
            return 1;
        }
    };

    // Set up Ctrl+C handler to trigger graceful shutdown
    let ctrlc_token = context.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    let result = match command {
        Command::Library { keyword, limit } => {
            commands::library(&context, keyword.as_deref(), limit);
            Ok(())
        }
        Command::Play {
            keyword,
            collection,
            mode,
        } => player::run(&mut context, keyword.as_deref(), collection, mode.map(Into::into)).await,
        Command::Collections { action } => commands::collections(&context, action).await,
        Command::Recent { action, sort } => commands::recent(&context, action, sort.into()).await,
        Command::Export { action } => commands::export(&context, action).await,
        Command::Lyrics { beatmap, fuzzy } => {
            commands::lyrics(&context, &beatmap.identity(), fuzzy).await
        }
    };

    context.shutdown().await;
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            1
        }
    }
}

/// Build the configured lyric source
fn create_source(kind: LyricSourceKind) -> LyricSource {
    match kind {
        LyricSourceKind::Auto => {
            let providers = [
                create_provider(LyricSourceKind::Netease),
                create_provider(LyricSourceKind::Kugou),
                create_provider(LyricSourceKind::QqMusic),
            ];
            LyricSource::Auto(providers.into_iter().flatten().collect())
        }
        single => create_provider(single).map_or_else(
            || LyricSource::Auto(Vec::new()),
            LyricSource::Single,
        ),
    }
}

fn create_provider(kind: LyricSourceKind) -> Option<Arc<dyn LyricsProvider>> {
    let provider: Result<Arc<dyn LyricsProvider>, CoreError> = match kind {
        LyricSourceKind::Netease => NeteaseProvider::new().map(|p| Arc::new(p) as _),
        LyricSourceKind::Kugou => KugouProvider::new().map(|p| Arc::new(p) as _),
        LyricSourceKind::QqMusic => QqMusicProvider::new().map(|p| Arc::new(p) as _),
        LyricSourceKind::Auto => return None,
    };
    match provider {
        Ok(provider) => {
            info!("Initialized {} lyrics provider", provider.name());
            Some(provider)
        }
        Err(e) => {
            error!("Failed to create {} lyrics provider: {}", kind, e);
            None
        }
    }
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled() -> bool {
    // Minimal structs to parse just the logging.enabled field
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }
    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        enabled: bool,
    }

    let Ok(content) = std::fs::read_to_string(PlayerConfig::config_path()) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.enabled)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest_retry=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if file_logging_enabled {
        let log_path = osuplayer_core::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
