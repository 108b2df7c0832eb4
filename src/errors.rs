//! Typed errors for the pairing monitor.
//!
//! Waits fail with `WaitTimeout` or `Cancelled`; both are expected outcomes
//! that the monitor logs and absorbs. `UnknownProvider` is the only error a
//! caller of the registry can observe.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("No match within {timeout:?}")]
    WaitTimeout { timeout: Duration },

    #[error("Wait cancelled")]
    Cancelled,

    #[error("No setup monitor registered for provider '{provider}'")]
    UnknownProvider { provider: String },

    #[error("Log source error: {0}")]
    LogSource(#[source] anyhow::Error),
}

impl MonitorError {
    /// True for failures that simply mean "nothing showed up in time".
    pub fn is_timeout(&self) -> bool {
        matches!(self, MonitorError::WaitTimeout { .. })
    }
}
