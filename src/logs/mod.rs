//! Timestamped log text.
//!
//! Every log line is expected to start with an ISO-8601 timestamp followed by
//! whitespace, the way `docker logs --timestamps` prints them:
//!
//! ```text
//! 2024-05-01T10:00:00.123456789Z Scan the QR code below
//! ```

pub mod source;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

// Date, time, optional fraction (dot or comma) and optional zone.
static TIMESTAMP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s?")
        .unwrap()
});

/// One log line split into its timestamp and its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLine<'a> {
    /// `None` when the line has no timestamp or it failed to parse.
    pub timestamp: Option<DateTime<Utc>>,
    /// Everything after the timestamp prefix.
    pub content: &'a str,
}

impl<'a> LogLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match TIMESTAMP_PREFIX.captures(line) {
            Some(caps) => {
                let prefix_len = caps.get(0).map_or(0, |m| m.end());
                Self {
                    timestamp: caps.get(1).and_then(|m| parse_timestamp(m.as_str())),
                    content: &line[prefix_len..],
                }
            }
            None => Self {
                timestamp: None,
                content: line,
            },
        }
    }
}

/// Parse a log timestamp. Zone-less timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.trim().replacen(' ', "T", 1).replacen(',', ".", 1);

    if let Ok(ts) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(ts.with_timezone(&Utc));
    }
    // RFC 3339 wants a colon in the offset; accept "+0200" as well
    if let Ok(ts) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Return the part of `text` starting at the first line stamped at or after
/// `cutoff`.
///
/// A cutoff before the first line keeps the whole text, a cutoff after the
/// last line yields an empty string. Lines without a usable timestamp never
/// start the returned suffix, but are kept when they follow its first line.
pub fn logs_since(text: &str, cutoff: DateTime<Utc>) -> &str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let stripped = line.strip_suffix('\n').unwrap_or(line);
        if let Some(ts) = LogLine::parse(stripped).timestamp
            && ts >= cutoff
        {
            return &text[offset..];
        }
        offset += line.len();
    }
    ""
}
