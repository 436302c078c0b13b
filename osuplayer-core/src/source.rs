//! Lyric source selection: one provider, or several tried in priority order.

use crate::provider::{LyricsProvider, LyricsQuery, MatchedLyrics, StrictMatch};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "osuplayer::lyrics::source";

/// The configured lyric source.
///
/// `Auto` holds the concrete providers in the order they are asked.
#[derive(Clone)]
pub enum LyricSource {
    Single(Arc<dyn LyricsProvider>),
    Auto(Vec<Arc<dyn LyricsProvider>>),
}

impl LyricSource {
    /// Name used in logs and as the lyric cache namespace
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Single(provider) => provider.name(),
            Self::Auto(_) => "auto",
        }
    }

    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn LyricsProvider>] {
        match self {
            Self::Single(provider) => std::slice::from_ref(provider),
            Self::Auto(providers) => providers,
        }
    }

    /// Ask each provider in turn and return the first non-empty result.
    ///
    /// Provider errors and timeouts are logged and treated as "no lyrics".
    /// The strict flag is read separately for every provider lookup.
    pub async fn search(
        &self,
        query: &LyricsQuery,
        strict: &StrictMatch,
        timeout: Duration,
    ) -> Option<MatchedLyrics> {
        for provider in self.providers() {
            let strict_now = strict.get();
            debug!(
                target: LOG_TARGET,
                "Trying provider {} (strict: {})",
                provider.name(),
                strict_now
            );

            match tokio::time::timeout(timeout, provider.search(query, strict_now)).await {
                Ok(Ok(Some(found))) => {
                    info!(
                        target: LOG_TARGET,
                        "Found lyrics from {} ({} lines, song id: {}, exact: {})",
                        found.provider,
                        found.document.lines.len(),
                        found.song_id,
                        found.exact
                    );
                    return Some(found);
                }
                Ok(Ok(None)) => {
                    info!(target: LOG_TARGET, "Provider {} returned no lyrics", provider.name());
                }
                Ok(Err(e)) => {
                    warn!(target: LOG_TARGET, "Provider {} failed with error: {}", provider.name(), e);
                }
                Err(_) => {
                    warn!(
                        target: LOG_TARGET,
                        "Provider {} timed out after {:?}",
                        provider.name(),
                        timeout
                    );
                }
            }
        }
        None
    }
}

impl fmt::Debug for LyricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.providers().iter().map(|p| p.name()).collect();
        f.debug_struct("LyricSource")
            .field("name", &self.name())
            .field("providers", &names)
            .finish()
    }
}
