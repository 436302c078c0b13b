use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::time::DurationExt;

/// Synced lyric document: ordered lines plus LRC ID tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricDocument {
    pub metadata: LyricMetadata,
    pub lines: Vec<LyricLine>,
}

/// LRC metadata from ID tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub author: Option<String>,
    pub offset: i64, // milliseconds, can be negative
}

/// A single line of lyrics with timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricLine {
    pub start_time: Duration,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl LyricDocument {
    /// Parse an LRC string. Lines that are neither tags nor timed lyrics are skipped.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut metadata = LyricMetadata::default();
        let mut lines = Vec::new();

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((tag, value)) = parse_id_tag(line) {
                match tag.to_lowercase().as_str() {
                    "ti" => metadata.title = Some(value),
                    "ar" => metadata.artist = Some(value),
                    "al" => metadata.album = Some(value),
                    "au" | "by" => metadata.author = Some(value),
                    "offset" => {
                        if let Ok(offset) = value.parse::<i64>() {
                            metadata.offset = offset;
                        }
                    }
                    _ => {}
                }
                continue;
            }

            if let Some(parsed_lines) = parse_lyric_line(line) {
                lines.extend(parsed_lines);
            }
        }

        if metadata.offset != 0 {
            for line in &mut lines {
                line.start_time = apply_offset(line.start_time, metadata.offset);
            }
        }

        // stable sort keeps source order for equal timestamps
        lines.sort_by_key(|l| l.start_time);

        Self { metadata, lines }
    }

    /// Attach a translation LRC to the lines that share its timestamps.
    #[must_use]
    pub fn with_translation(mut self, translation: &str) -> Self {
        let translated = Self::parse(translation);
        let by_time: HashMap<u64, String> = translated
            .lines
            .into_iter()
            .filter(|l| !l.text.is_empty())
            .map(|l| (l.start_time.as_millis_u64(), l.text))
            .collect();

        if by_time.is_empty() {
            return self;
        }

        for line in &mut self.lines {
            if line.text.is_empty() {
                continue;
            }
            if let Some(text) = by_time.get(&line.start_time.as_millis_u64()) {
                if *text != line.text {
                    line.translation = Some(text.clone());
                }
            }
        }
        self
    }

    /// No line carries any text
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.text.trim().is_empty())
    }

    #[must_use]
    pub fn has_translation(&self) -> bool {
        self.lines.iter().any(|l| l.translation.is_some())
    }

    /// Find the current line for a given playback position
    #[must_use]
    pub fn current_line(&self, position: Duration) -> Option<&LyricLine> {
        self.lines
            .iter()
            .rev()
            .find(|line| line.start_time <= position)
    }
}

/// Parse an ID tag like [ti:Title] or [ar:Artist]
fn parse_id_tag(line: &str) -> Option<(String, String)> {
    if !line.starts_with('[') || !line.contains(':') {
        return None;
    }

    let end = line.find(']')?;
    let content = &line[1..end];

    let first_colon = content.find(':')?;
    let tag = &content[..first_colon];

    // a numeric tag is a timestamp
    if tag.is_empty() || tag.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let value = content[first_colon + 1..].trim().to_string();
    Some((tag.to_string(), value))
}

/// Parse a lyric line like [00:12.34]Hello world or [00:12.34][00:15.67]Same lyrics
fn parse_lyric_line(line: &str) -> Option<Vec<LyricLine>> {
    let mut remaining = line;
    let mut timestamps = Vec::new();

    while remaining.starts_with('[') {
        let Some(end) = remaining.find(']') else {
            break;
        };
        let Some(time) = parse_timestamp(&remaining[1..end]) else {
            break;
        };
        timestamps.push(time);
        remaining = &remaining[end + 1..];
    }

    if timestamps.is_empty() {
        return None;
    }

    let text = remaining.trim();
    Some(
        timestamps
            .into_iter()
            .map(|start_time| LyricLine {
                start_time,
                text: text.to_string(),
                translation: None,
            })
            .collect(),
    )
}

/// Parse a timestamp string like "00:12.34", "00:12.345", "00:12:34" or "00:12"
fn parse_timestamp(s: &str) -> Option<Duration> {
    let parts: Vec<&str> = s.trim().split(':').collect();

    let (minutes, seconds, fraction) = match parts.as_slice() {
        [minutes, rest] => match rest.split_once('.') {
            Some((seconds, fraction)) => (*minutes, seconds, Some(fraction)),
            None => (*minutes, *rest, None),
        },
        [minutes, seconds, fraction] => (*minutes, *seconds, Some(*fraction)),
        _ => return None,
    };

    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    let millis = match fraction {
        None => 0,
        Some(f) if f.is_empty() || f.len() > 3 || !f.chars().all(|c| c.is_ascii_digit()) => {
            return None
        }
        // "5" -> 500ms, "34" -> 340ms, "345" -> 345ms
        Some(f) => f.parse::<u64>().ok()? * 10u64.pow(3 - u32::try_from(f.len()).ok()?),
    };

    Some(Duration::from_millis(minutes * 60_000 + seconds * 1000 + millis))
}

/// Apply a millisecond offset to a duration (can be negative)
fn apply_offset(duration: Duration, offset_ms: i64) -> Duration {
    let delta = Duration::from_millis(offset_ms.unsigned_abs());
    if offset_ms >= 0 {
        duration + delta
    } else {
        duration.saturating_sub(delta)
    }
}
