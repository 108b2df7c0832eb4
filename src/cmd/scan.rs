//! One-shot QR extraction — `pairwatch scan`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use pairwatch::logs::logs_since;
use pairwatch::matcher::find_qr_code;

pub fn cmd_scan(file: &Path, since: Option<DateTime<Utc>>) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let scoped = match since {
        Some(cutoff) => logs_since(&text, cutoff),
        None => text.as_str(),
    };

    let Some(found) = find_qr_code(scoped) else {
        anyhow::bail!("No QR code found in {}", file.display());
    };

    match found.date {
        Some(date) => tracing::info!(%date, "QR code found"),
        None => tracing::info!("QR code found (no usable timestamp)"),
    }
    println!("{}", found.content);
    Ok(())
}
