use async_trait::async_trait;
use osuplayer_core::DatabasePrompt;
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;

/// Asks on the terminal for the path of `osu!.db`
pub struct StdinPrompt;

impl StdinPrompt {
    /// `None` when stdin is not interactive
    pub fn for_terminal() -> Option<Self> {
        std::io::stdin().is_terminal().then_some(Self)
    }
}

#[async_trait]
impl DatabasePrompt for StdinPrompt {
    async fn choose_database(&self) -> Option<PathBuf> {
        tokio::task::spawn_blocking(|| {
            eprint!("osu!.db not found. Enter its path (empty to skip): ");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).ok()?;
            let trimmed = line.trim().trim_matches('"');
            (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
        })
        .await
        .ok()
        .flatten()
    }
}
