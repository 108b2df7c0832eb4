use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Timing configuration for a pairing monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Delay between two log polls of the same wait.
    pub poll_interval: Duration,
    /// How many trailing log lines each poll requests.
    pub tail_lines: usize,
    /// Default distance between `start` and the first relevant log line.
    pub lookback: Duration,
    /// Budget for the first QR code to show up.
    pub qr_timeout: Duration,
    /// Budget for the "paired" marker after a QR code was shown.
    pub paired_timeout: Duration,
    /// Budget for the "scan timed out" marker after a QR code was shown.
    pub scan_timeout: Duration,
    /// Budget for each refreshed QR code.
    pub refresh_timeout: Duration,
    /// How far past a QR anchor the next waits start looking.
    pub cutoff_shift: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            tail_lines: 100,
            lookback: Duration::from_secs(60),
            qr_timeout: Duration::from_secs(60),
            paired_timeout: Duration::from_secs(300),
            scan_timeout: Duration::from_secs(1000),
            refresh_timeout: Duration::from_secs(300),
            cutoff_shift: Duration::from_secs(2),
        }
    }
}

/// Raw TOML structure for `.pairwatch/monitor.toml`
#[derive(Debug, Deserialize)]
struct MonitorToml {
    monitor: Option<MonitorSection>,
}

#[derive(Debug, Deserialize)]
struct MonitorSection {
    poll_interval_ms: Option<u64>,
    tail_lines: Option<usize>,
    lookback_secs: Option<u64>,
    qr_timeout_secs: Option<u64>,
    paired_timeout_secs: Option<u64>,
    scan_timeout_secs: Option<u64>,
    refresh_timeout_secs: Option<u64>,
    cutoff_shift_secs: Option<u64>,
}

impl MonitorConfig {
    /// Load monitor config from `.pairwatch/monitor.toml` in the project directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load(project_path: &Path) -> Result<Self> {
        let config_path = project_path.join(".pairwatch").join("monitor.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml: MonitorToml = toml::from_str(content)?;

        let mut config = Self::default();
        if let Some(section) = toml.monitor {
            if let Some(ms) = section.poll_interval_ms {
                anyhow::ensure!(ms > 0, "poll_interval_ms must be greater than zero");
                config.poll_interval = Duration::from_millis(ms);
            }
            if let Some(lines) = section.tail_lines {
                anyhow::ensure!(lines > 0, "tail_lines must be greater than zero");
                config.tail_lines = lines;
            }
            if let Some(secs) = section.lookback_secs {
                config.lookback = Duration::from_secs(secs);
            }
            if let Some(secs) = section.qr_timeout_secs {
                config.qr_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = section.paired_timeout_secs {
                config.paired_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = section.scan_timeout_secs {
                config.scan_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = section.refresh_timeout_secs {
                config.refresh_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = section.cutoff_shift_secs {
                config.cutoff_shift = Duration::from_secs(secs);
            }
        }

        Ok(config)
    }
}
