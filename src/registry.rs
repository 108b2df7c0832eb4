//! Provider key → setup monitor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::events::Provider;
use crate::logs::source::LogSource;
use crate::monitor::{MonitorHandle, PairingMonitor, StartOptions};

/// Anything that can watch a connector's setup from its logs.
pub trait SetupMonitor: Send + Sync {
    fn provider(&self) -> &str;

    fn start(
        &self,
        server_id: &str,
        source: Arc<dyn LogSource>,
        options: StartOptions,
    ) -> MonitorHandle;
}

impl SetupMonitor for PairingMonitor {
    fn provider(&self) -> &str {
        PairingMonitor::provider(self).as_str()
    }

    fn start(
        &self,
        server_id: &str,
        source: Arc<dyn LogSource>,
        options: StartOptions,
    ) -> MonitorHandle {
        PairingMonitor::start(self, server_id, source, options)
    }
}

#[derive(Default)]
pub struct MonitorRegistry {
    monitors: HashMap<String, Arc<dyn SetupMonitor>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in monitor publishing to `tx`.
    pub fn with_defaults(config: MonitorConfig, tx: broadcast::Sender<String>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PairingMonitor::new(Provider::Whatsapp, config, tx)));
        registry
    }

    /// Register a monitor under its provider key, replacing any previous one.
    pub fn register(&mut self, monitor: Arc<dyn SetupMonitor>) {
        self.monitors.insert(monitor.provider().to_string(), monitor);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn SetupMonitor>> {
        self.monitors.get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.monitors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Start the monitor registered for `provider`.
    pub fn start(
        &self,
        provider: &str,
        server_id: &str,
        source: Arc<dyn LogSource>,
        options: StartOptions,
    ) -> Result<MonitorHandle, MonitorError> {
        let monitor = self
            .get(provider)
            .ok_or_else(|| MonitorError::UnknownProvider {
                provider: provider.to_string(),
            })?;
        tracing::debug!(provider, server_id, "Dispatching setup monitor");
        Ok(monitor.start(server_id, source, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::source::FnLogSource;
    use crate::monitor::PairingState;

    fn empty_source() -> Arc<dyn LogSource> {
        Arc::new(FnLogSource::new(|_: usize| async { Ok::<_, anyhow::Error>(String::new()) }))
    }

    #[test]
    fn test_defaults_register_whatsapp() {
        let (tx, _) = broadcast::channel(4);
        let registry = MonitorRegistry::with_defaults(MonitorConfig::default(), tx);
        assert_eq!(registry.providers(), vec!["whatsapp"]);
        assert!(registry.get("whatsapp").is_some());
        assert!(registry.get("telegram").is_none());
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let (tx, _) = broadcast::channel(4);
        let registry = MonitorRegistry::with_defaults(MonitorConfig::default(), tx);

        let err = registry
            .start("telegram", "srv-1", empty_source(), StartOptions::default())
            .unwrap_err();
        assert!(matches!(err, MonitorError::UnknownProvider { ref provider } if provider == "telegram"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_dispatches_to_registered_monitor() {
        let (tx, _) = broadcast::channel(4);
        let registry = MonitorRegistry::with_defaults(MonitorConfig::default(), tx);

        let handle = registry
            .start("whatsapp", "srv-1", empty_source(), StartOptions::default())
            .unwrap();
        handle.cancel();
        assert_eq!(handle.join().await, PairingState::Cancelled);
    }
}
