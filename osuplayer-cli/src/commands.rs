//! One-shot subcommands that print and exit.

use crate::{CollectionAction, ExportAction, RecentAction};
use osuplayer_core::{
    BeatmapEntry, BeatmapIdentity, CatalogItem, CoreError, LyricsQuery, PlayerContext,
    RecentSort, Result, StrictMatch,
};

pub fn library(context: &PlayerContext, keyword: Option<&str>, limit: usize) {
    let entries: Vec<_> = match keyword {
        Some(keyword) => context.library().search(keyword),
        None => context.library().all().iter().cloned().collect(),
    };
    for entry in entries.iter().take(limit) {
        print_entry(entry);
    }
    if entries.len() > limit {
        println!("... {} more", entries.len() - limit);
    }
}

pub async fn collections(context: &PlayerContext, action: CollectionAction) -> Result<()> {
    let store = context.store();
    match action {
        CollectionAction::List => {
            for collection in store.list_collections().await? {
                let lock = if collection.locked { " (locked)" } else { "" };
                println!(
                    "{:>4}  {}{}  [{} tracks]",
                    collection.id, collection.name, lock, collection.member_count
                );
            }
        }
        CollectionAction::Show { id } => {
            for item in context.catalog().collection_items(id).await? {
                print_item(&item);
            }
        }
        CollectionAction::Create { name } => {
            let id = store.add_collection(&name, false).await?;
            println!("Created collection {id}");
        }
        CollectionAction::Rename { id, name } => store.rename_collection(id, &name).await?,
        CollectionAction::Remove { id } => store.remove_collection(id).await?,
        CollectionAction::AddTrack { id, beatmap } => {
            let identity = beatmap.identity();
            if !store.add_to_collection(id, &identity).await? {
                println!("{identity} is already in collection {id}");
            }
        }
        CollectionAction::RemoveTrack { id, beatmap } => {
            let identity = beatmap.identity();
            if !store.remove_from_collection(id, &identity).await? {
                println!("{identity} is not in collection {id}");
            }
        }
    }
    Ok(())
}

pub async fn recent(
    context: &PlayerContext,
    action: Option<RecentAction>,
    sort: RecentSort,
) -> Result<()> {
    let store = context.store();
    match action {
        None => {
            for item in context.catalog().recent_list(sort).await? {
                let played = item
                    .played_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                print!("{played}  ");
                print_item(&item);
            }
        }
        Some(RecentAction::Remove { beatmap }) => {
            let removed = store.remove_from_recent(&beatmap.identity()).await?;
            println!("Removed {removed} records");
        }
        Some(RecentAction::Clear) => {
            let removed = store.clear_recent().await?;
            println!("Removed {removed} records");
        }
    }
    Ok(())
}

pub async fn export(context: &PlayerContext, action: ExportAction) -> Result<()> {
    let store = context.store();
    match action {
        ExportAction::List => {
            for item in context.catalog().export_items().await? {
                print_item(&item);
            }
        }
        ExportAction::Add { beatmap } => {
            let identity = beatmap.identity();
            if !store.enqueue_export(&identity).await? {
                println!("{identity} is already queued");
            }
        }
        ExportAction::Remove { beatmap } => {
            store.remove_from_export_queue(&beatmap.identity()).await?;
        }
        ExportAction::Clear => {
            let removed = store.clear_export_queue().await?;
            println!("Removed {removed} queued beatmaps");
        }
        ExportAction::Run => {
            let exporter = context.exporter();
            let report = exporter.export_queued().await?;
            println!(
                "Exported {} to {}",
                report.exported.len(),
                exporter.directory().display()
            );
            for identity in &report.missing {
                println!("Missing from library: {identity}");
            }
            for (identity, reason) in &report.failed {
                println!("Failed {identity}: {reason}");
            }
        }
    }
    Ok(())
}

pub async fn lyrics(context: &PlayerContext, identity: &BeatmapIdentity, fuzzy: bool) -> Result<()> {
    let entry = context
        .library()
        .lookup(identity)
        .ok_or_else(|| CoreError::TrackUnavailable {
            identity: identity.clone(),
            reason: "not in library".to_string(),
        })?;

    let source = context.fetcher().source();
    let found = source
        .search(
            &LyricsQuery::for_entry(&entry),
            &StrictMatch::new(!fuzzy),
            context.config().lyrics.request_timeout(),
        )
        .await;

    match found {
        Some(found) => {
            println!("# {} (song {}, exact: {})", found.provider, found.song_id, found.exact);
            for line in &found.document.lines {
                let secs = line.start_time.as_secs();
                println!("[{:02}:{:02}] {}", secs / 60, secs % 60, line.text);
                if let Some(translation) = &line.translation {
                    println!("        {translation}");
                }
            }
        }
        None => println!("No lyrics found for {} - {}", entry.display_artist(), entry.display_title()),
    }
    Ok(())
}

fn print_entry(entry: &BeatmapEntry) {
    println!(
        "{} - {}  [{}]  ({})",
        entry.display_artist(),
        entry.display_title(),
        entry.identity.version(),
        entry.identity.folder_name()
    );
}

fn print_item(item: &CatalogItem) {
    match &item.entry {
        Some(entry) => print_entry(entry),
        None => println!("{} (unavailable)", item.identity),
    }
}
