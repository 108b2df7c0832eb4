//! Matching log text against what a wait is looking for.
//!
//! A [`Lookup`] is either a literal marker searched line by line, or a
//! matcher function over the whole text. The QR-code matcher is the only
//! matcher function the monitor ships with.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::logs::LogLine;

/// Block glyphs a terminal QR renderer draws with.
const QR_GLYPHS: [char; 3] = ['█', '▄', '▀'];

/// What a lookup found and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// The literal marker, or the reconstructed QR art.
    pub content: String,
    /// Timestamp of the anchor line; `None` if it failed to parse.
    pub date: Option<DateTime<Utc>>,
}

pub type MatcherFn = Arc<dyn Fn(&str) -> Option<MatchResult> + Send + Sync>;

/// The thing a wait is looking for.
#[derive(Clone)]
pub enum Lookup {
    /// First line containing this substring.
    Literal(String),
    /// Arbitrary function over the full (scoped) log text.
    Matcher(MatcherFn),
}

impl Lookup {
    pub fn literal(marker: impl Into<String>) -> Self {
        Lookup::Literal(marker.into())
    }

    pub fn matcher<F>(f: F) -> Self
    where
        F: Fn(&str) -> Option<MatchResult> + Send + Sync + 'static,
    {
        Lookup::Matcher(Arc::new(f))
    }

    /// Lookup for the most recent QR-art block.
    pub fn qr_code() -> Self {
        Self::matcher(find_qr_code)
    }

    pub fn find(&self, text: &str) -> Option<MatchResult> {
        match self {
            Lookup::Literal(marker) => find_literal(text, marker),
            Lookup::Matcher(f) => f(text),
        }
    }
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Literal(marker) => f.debug_tuple("Literal").field(marker).finish(),
            Lookup::Matcher(_) => f.write_str("Matcher(..)"),
        }
    }
}

/// Scan top to bottom for the first line containing `marker`.
pub fn find_literal(text: &str, marker: &str) -> Option<MatchResult> {
    text.lines()
        .find(|line| line.contains(marker))
        .map(|line| MatchResult {
            content: marker.to_string(),
            date: LogLine::parse(line).timestamp,
        })
}

fn is_qr_glyph(c: char) -> bool {
    QR_GLYPHS.contains(&c)
}

/// Content made only of glyphs and whitespace, with at least one glyph.
fn is_qr_row(content: &str) -> bool {
    content.chars().any(is_qr_glyph)
        && content.chars().all(|c| is_qr_glyph(c) || c.is_whitespace())
}

fn is_blank(content: &str) -> bool {
    content.trim().is_empty()
}

/// Find the last QR-art block in `text` and rebuild it.
///
/// Starting from the end, skip lines until one is a QR row, then extend the
/// block upwards across QR rows and blank lines. Rows are stripped of their
/// timestamp and of anything that is not a glyph or a space, trimmed, and
/// joined top to bottom. The anchor is the first surviving row.
pub fn find_qr_code(text: &str) -> Option<MatchResult> {
    let lines: Vec<LogLine<'_>> = text.lines().map(LogLine::parse).collect();

    let end = lines.iter().rposition(|line| is_qr_row(line.content))?;
    let start = lines[..end]
        .iter()
        .rposition(|line| !is_qr_row(line.content) && !is_blank(line.content))
        .map_or(0, |idx| idx + 1);

    let rows: Vec<(&LogLine<'_>, String)> = lines[start..=end]
        .iter()
        .map(|line| {
            let cleaned: String = line
                .content
                .chars()
                .filter(|&c| is_qr_glyph(c) || c == ' ')
                .collect();
            (line, cleaned.trim().to_string())
        })
        .filter(|(_, row)| !row.is_empty())
        .collect();

    let (anchor, _) = rows.first()?;
    let date = anchor.timestamp;
    let content = rows
        .iter()
        .map(|(_, row)| row.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Some(MatchResult { content, date })
}
