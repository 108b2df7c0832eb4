//! Log-driven pairing monitor.
//!
//! ## Flow
//!
//! ```text
//!  AwaitingQrCode ──(QR block found)──> QrCodePending ──("Successfully paired")──> Paired
//!        │                                 │   ▲      ──("Timeout waiting ...")──> TimedOut
//!        │ qr_timeout                      │   │ refreshed QR
//!        v                                 └───┘
//!     NoQrCode                        all waits exhausted ──> Expired
//! ```
//!
//! After the first QR code is published, three waits run as independent
//! tasks: the "paired" marker, the "scan timed out" marker, and a loop that
//! picks up refreshed QR codes. They report to a single coordinator over an
//! mpsc channel. Only the coordinator changes state and publishes events, so
//! at most one terminal event goes out per attempt; once one does, the
//! remaining waits are cancelled.

pub mod wait;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::events::{Provider, SetupMessage, broadcast_message};
use crate::logs::source::LogSource;
use crate::matcher::{Lookup, MatchResult};
use wait::{LogWaiter, WaitSpec};

/// Printed once the phone confirmed the pairing.
pub const PAIRED_MARKER: &str = "Successfully paired";
/// Printed when nobody scanned the QR code in time.
pub const SCAN_TIMEOUT_MARKER: &str = "Timeout waiting for QR code scan";

/// Where a pairing attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    AwaitingQrCode,
    /// A QR code was published; `refreshes` counts replacements since.
    QrCodePending { refreshes: u32 },
    Paired,
    TimedOut,
    /// No QR code showed up within the first wait.
    NoQrCode,
    /// A QR code was shown but every follow-up wait ran dry.
    Expired,
    Cancelled,
}

impl PairingState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            PairingState::AwaitingQrCode | PairingState::QrCodePending { .. }
        )
    }
}

/// Options for a single `start` call.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Ignore log lines stamped before this; defaults to `lookback` before now.
    pub start_at: Option<DateTime<Utc>>,
}

/// Handle to a running monitor. Dropping it leaves the monitor running.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<PairingState>,
}

impl MonitorHandle {
    /// Stop every outstanding poll of this monitor.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this monitor, for callers that hand `join` off.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the monitor to settle and return its final state.
    pub async fn join(self) -> PairingState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Pairing monitor task failed");
                PairingState::Cancelled
            }
        }
    }
}

/// Watches a connector's logs for its device-pairing handshake.
#[derive(Debug, Clone)]
pub struct PairingMonitor {
    provider: Provider,
    config: MonitorConfig,
    tx: broadcast::Sender<String>,
}

impl PairingMonitor {
    pub fn new(provider: Provider, config: MonitorConfig, tx: broadcast::Sender<String>) -> Self {
        Self {
            provider,
            config,
            tx,
        }
    }

    pub fn whatsapp(config: MonitorConfig, tx: broadcast::Sender<String>) -> Self {
        Self::new(Provider::Whatsapp, config, tx)
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Spawn the monitor for one installation attempt.
    ///
    /// Must be called from within a tokio runtime. Results are only ever
    /// reported through the broadcast channel.
    pub fn start(
        &self,
        server_id: impl Into<String>,
        source: Arc<dyn LogSource>,
        options: StartOptions,
    ) -> MonitorHandle {
        let start_at = options
            .start_at
            .unwrap_or_else(|| Utc::now() - to_delta(self.config.lookback));
        let cancel = CancellationToken::new();

        let run = PairingRun {
            server_id: server_id.into(),
            provider: self.provider,
            waiter: LogWaiter::new(source, &self.config),
            config: self.config.clone(),
            tx: self.tx.clone(),
            cancel: cancel.clone(),
            state: PairingState::AwaitingQrCode,
        };
        let task = tokio::spawn(run.execute(start_at));

        MonitorHandle { cancel, task }
    }
}

/// What a post-QR wait reports back to the coordinator.
#[derive(Debug)]
enum Outcome {
    Paired,
    ScanTimedOut,
    QrRefreshed(MatchResult),
    Exhausted(&'static str),
}

struct PairingRun {
    server_id: String,
    provider: Provider,
    waiter: LogWaiter,
    config: MonitorConfig,
    tx: broadcast::Sender<String>,
    cancel: CancellationToken,
    state: PairingState,
}

impl PairingRun {
    async fn execute(mut self, start_at: DateTime<Utc>) -> PairingState {
        tracing::info!(server_id = %self.server_id, provider = %self.provider, %start_at, "Waiting for pairing QR code");

        let first_qr = WaitSpec::new(Lookup::qr_code(), self.config.qr_timeout).after(start_at);
        let qr = match self.waiter.wait_for(&first_qr, &self.cancel).await {
            Ok(qr) => qr,
            Err(MonitorError::Cancelled) => return self.settle(PairingState::Cancelled),
            Err(e) => {
                tracing::warn!(server_id = %self.server_id, error = %e, "No QR code found");
                return self.settle(PairingState::NoQrCode);
            }
        };
        if qr.content.is_empty() {
            return self.settle(PairingState::NoQrCode);
        }

        self.publish(SetupMessage::pending(&self.server_id, self.provider, qr.content.clone()));
        self.state = PairingState::QrCodePending { refreshes: 0 };

        let cutoff = self.cutoff_after(&qr);
        let inner = self.cancel.child_token();
        let (outcome_tx, mut outcome_rx) = mpsc::channel(16);

        self.spawn_marker_wait(
            PAIRED_MARKER,
            self.config.paired_timeout,
            cutoff,
            Outcome::Paired,
            &inner,
            outcome_tx.clone(),
        );
        self.spawn_marker_wait(
            SCAN_TIMEOUT_MARKER,
            self.config.scan_timeout,
            cutoff,
            Outcome::ScanTimedOut,
            &inner,
            outcome_tx.clone(),
        );
        self.spawn_refresh_loop(cutoff, &inner, outcome_tx);

        let mut current_qr = qr.content;
        let final_state = loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break PairingState::Cancelled,
                outcome = outcome_rx.recv() => outcome,
            };

            match outcome {
                Some(Outcome::Paired) => {
                    self.publish(SetupMessage::success(&self.server_id, self.provider));
                    break PairingState::Paired;
                }
                Some(Outcome::ScanTimedOut) => {
                    self.publish(SetupMessage::error(&self.server_id, self.provider));
                    break PairingState::TimedOut;
                }
                Some(Outcome::QrRefreshed(refreshed)) => {
                    if refreshed.content == current_qr {
                        continue;
                    }
                    current_qr = refreshed.content;
                    self.publish(SetupMessage::pending(&self.server_id, self.provider, current_qr.clone()));
                    if let PairingState::QrCodePending { refreshes } = &mut self.state {
                        *refreshes += 1;
                    }
                }
                Some(Outcome::Exhausted(wait)) => {
                    tracing::warn!(server_id = %self.server_id, wait, "Wait exhausted");
                }
                // cancelled waits drop their senders too
                None if self.cancel.is_cancelled() => break PairingState::Cancelled,
                // every wait has finished without a terminal marker
                None => break PairingState::Expired,
            }
        };

        inner.cancel();
        self.settle(final_state)
    }

    fn settle(mut self, state: PairingState) -> PairingState {
        tracing::info!(server_id = %self.server_id, from = ?self.state, to = ?state, "Pairing monitor settled");
        self.state = state;
        state
    }

    fn publish(&self, msg: SetupMessage) {
        tracing::info!(server_id = %self.server_id, status = ?msg.payload().status, "Publishing setup event");
        broadcast_message(&self.tx, &msg);
    }

    /// Cutoff for waits that must not see `qr` again.
    fn cutoff_after(&self, qr: &MatchResult) -> DateTime<Utc> {
        shifted_cutoff(qr, self.config.cutoff_shift)
    }

    fn spawn_marker_wait(
        &self,
        marker: &'static str,
        timeout: Duration,
        cutoff: DateTime<Utc>,
        on_match: Outcome,
        cancel: &CancellationToken,
        outcome_tx: mpsc::Sender<Outcome>,
    ) {
        let waiter = self.waiter.clone();
        let cancel = cancel.clone();
        let spec = WaitSpec::new(Lookup::literal(marker), timeout).after(cutoff);

        tokio::spawn(async move {
            let outcome = match waiter.wait_for(&spec, &cancel).await {
                Ok(_) => on_match,
                Err(MonitorError::Cancelled) => return,
                Err(e) => {
                    tracing::debug!(marker, error = %e, "Marker wait ended");
                    Outcome::Exhausted(marker)
                }
            };
            let _ = outcome_tx.send(outcome).await;
        });
    }

    fn spawn_refresh_loop(
        &self,
        mut cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
        outcome_tx: mpsc::Sender<Outcome>,
    ) {
        let waiter = self.waiter.clone();
        let cancel = cancel.clone();
        let timeout = self.config.refresh_timeout;
        let shift = self.config.cutoff_shift;

        tokio::spawn(async move {
            loop {
                let spec = WaitSpec::new(Lookup::qr_code(), timeout).after(cutoff);
                match waiter.wait_for(&spec, &cancel).await {
                    Ok(refreshed) => {
                        cutoff = shifted_cutoff(&refreshed, shift);
                        if outcome_tx.send(Outcome::QrRefreshed(refreshed)).await.is_err() {
                            return;
                        }
                    }
                    Err(MonitorError::Cancelled) => return,
                    Err(e) => {
                        tracing::debug!(error = %e, "No further QR refresh");
                        let _ = outcome_tx.send(Outcome::Exhausted("qr-refresh")).await;
                        return;
                    }
                }
            }
        });
    }
}

/// The anchor of `qr` pushed forward by `shift`. A QR code without a usable
/// timestamp is anchored at the current time instead.
fn shifted_cutoff(qr: &MatchResult, shift: Duration) -> DateTime<Utc> {
    qr.date.unwrap_or_else(Utc::now) + to_delta(shift)
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::zero())
}
