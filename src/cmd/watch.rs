//! Live pairing monitor — `pairwatch watch`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use pairwatch::logs::source::{DockerLogSource, FileLogSource, LogSource};
use pairwatch::{MonitorConfig, MonitorRegistry, PairingState, StartOptions};

use crate::WatchTarget;

pub async fn cmd_watch(
    project_dir: &Path,
    server_id: &str,
    provider: &str,
    target: &WatchTarget,
    since: Option<DateTime<Utc>>,
) -> Result<()> {
    let config = MonitorConfig::load(project_dir)?;
    let (tx, mut rx) = broadcast::channel::<String>(64);
    let registry = MonitorRegistry::with_defaults(config, tx);

    let source: Arc<dyn LogSource> = match (&target.container, &target.file) {
        (Some(container), _) => Arc::new(DockerLogSource::connect(container.clone())?),
        (None, Some(path)) => Arc::new(FileLogSource::new(path)),
        (None, None) => anyhow::bail!("Either --container or --file is required"),
    };

    let handle = registry
        .start(provider, server_id, source, StartOptions { start_at: since })
        .context("Failed to start setup monitor")?;
    let cancel = handle.cancel_token();
    let mut join = std::pin::pin!(handle.join());

    let state = loop {
        tokio::select! {
            state = &mut join => {
                // events published right before the monitor settled
                loop {
                    match rx.try_recv() {
                        Ok(json) => println!("{json}"),
                        Err(TryRecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Dropped setup events");
                        }
                        Err(_) => break,
                    }
                }
                break state;
            }
            received = rx.recv() => match received {
                Ok(json) => println!("{json}"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Dropped setup events"),
                Err(RecvError::Closed) => break (&mut join).await,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling monitor");
                cancel.cancel();
            }
        }
    };

    match state {
        PairingState::Paired => tracing::info!("Device paired"),
        other => tracing::info!(state = ?other, "Monitor finished without pairing"),
    }
    Ok(())
}
