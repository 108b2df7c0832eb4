//! The wait-for primitive: poll a log source until a lookup matches.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::errors::MonitorError;
use crate::logs::logs_since;
use crate::logs::source::LogSource;
use crate::matcher::{Lookup, MatchResult};

/// Parameters of one outstanding wait.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub lookup: Lookup,
    pub timeout: Duration,
    /// Log content stamped before this instant is ignored.
    pub cutoff: Option<DateTime<Utc>>,
}

impl WaitSpec {
    pub fn new(lookup: Lookup, timeout: Duration) -> Self {
        Self {
            lookup,
            timeout,
            cutoff: None,
        }
    }

    pub fn after(mut self, cutoff: DateTime<Utc>) -> Self {
        self.cutoff = Some(cutoff);
        self
    }
}

/// Polls one log source, pausing `poll_interval` between polls.
#[derive(Clone)]
pub struct LogWaiter {
    source: Arc<dyn LogSource>,
    poll_interval: Duration,
    tail_lines: usize,
}

impl LogWaiter {
    pub fn new(source: Arc<dyn LogSource>, config: &MonitorConfig) -> Self {
        Self {
            source,
            poll_interval: config.poll_interval,
            tail_lines: config.tail_lines,
        }
    }

    /// Poll until `spec.lookup` matches, `spec.timeout` elapses or `cancel`
    /// fires. The first poll happens immediately; each later one starts a
    /// full `poll_interval` after the previous fetch returned, however long
    /// that fetch took.
    ///
    /// Fetch failures count as "no match yet"; there is no backoff.
    pub async fn wait_for(
        &self,
        spec: &WaitSpec,
        cancel: &CancellationToken,
    ) -> Result<MatchResult, MonitorError> {
        let polling = async {
            loop {
                match self.poll_once(spec).await {
                    Ok(Some(found)) => return found,
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "Log fetch failed, retrying"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(MonitorError::Cancelled),
            result = tokio::time::timeout(spec.timeout, polling) => {
                result.map_err(|_| MonitorError::WaitTimeout { timeout: spec.timeout })
            }
        }
    }

    async fn poll_once(&self, spec: &WaitSpec) -> Result<Option<MatchResult>, MonitorError> {
        let text = self
            .source
            .fetch(self.tail_lines)
            .await
            .map_err(MonitorError::LogSource)?;

        let scoped = match spec.cutoff {
            Some(cutoff) => logs_since(&text, cutoff),
            None => text.as_str(),
        };
        Ok(spec.lookup.find(scoped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::source::FnLogSource;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_source(
        calls: Arc<AtomicUsize>,
        respond: impl Fn(usize) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Arc<dyn LogSource> {
        Arc::new(FnLogSource::new(move |_lines: usize| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            let response = respond(call);
            async move { response }
        }))
    }

    fn waiter(source: Arc<dyn LogSource>) -> LogWaiter {
        LogWaiter::new(source, &MonitorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_on_first_match() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls), |_| {
            Ok("2024-05-01T10:00:00Z Successfully paired".to_string())
        });

        let spec = WaitSpec::new(Lookup::literal("Successfully paired"), Duration::from_secs(5));
        let found = waiter(source)
            .wait_for(&spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(found.content, "Successfully paired");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_keeps_polling_until_match() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls), |call| {
            if call < 3 {
                Ok("2024-05-01T10:00:00Z booting".to_string())
            } else {
                Ok("2024-05-01T10:00:03Z Successfully paired".to_string())
            }
        });

        let spec = WaitSpec::new(Lookup::literal("Successfully paired"), Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        waiter(source)
            .wait_for(&spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_still_gets_full_pause() {
        let started = Arc::new(std::sync::Mutex::new(Vec::new()));
        let started_in_source = Arc::clone(&started);
        let source: Arc<dyn LogSource> = Arc::new(FnLogSource::new(move |_lines: usize| {
            started_in_source
                .lock()
                .unwrap()
                .push(tokio::time::Instant::now());
            async move {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Ok::<_, anyhow::Error>(String::new())
            }
        }));

        let spec = WaitSpec::new(Lookup::literal("never"), Duration::from_secs(10));
        let err = waiter(source)
            .wait_for(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let started = started.lock().unwrap();
        assert!(started.len() >= 4);
        for pair in started.windows(2) {
            // 1.5s fetch followed by the 1s pause
            assert_eq!(pair[1] - pair[0], Duration::from_millis(2500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls), |_| Ok(String::new()));

        let spec = WaitSpec::new(Lookup::literal("never"), Duration::from_secs(5));
        let err = waiter(source)
            .wait_for(&spec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::WaitTimeout { timeout } if timeout == Duration::from_secs(5)));
        assert!(calls.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls), |call| {
            if call < 2 {
                Err(anyhow::anyhow!("container restarting"))
            } else {
                Ok("2024-05-01T10:00:00Z Successfully paired".to_string())
            }
        });

        let spec = WaitSpec::new(Lookup::literal("Successfully paired"), Duration::from_secs(30));
        let found = waiter(source).wait_for(&spec, &CancellationToken::new()).await;

        assert!(found.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cutoff_hides_older_lines() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls), |_| {
            Ok("2024-05-01T10:00:00Z Successfully paired\n2024-05-01T10:00:10Z idle".to_string())
        });

        let cutoff = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 5).unwrap();
        let spec = WaitSpec::new(Lookup::literal("Successfully paired"), Duration::from_secs(3))
            .after(cutoff);
        let err = waiter(source)
            .wait_for(&spec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(Arc::clone(&calls), |_| Ok(String::new()));
        let cancel = CancellationToken::new();

        let spec = WaitSpec::new(Lookup::literal("never"), Duration::from_secs(600));
        let waiter = waiter(source);
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { waiter.wait_for(&spec, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(MonitorError::Cancelled)));

        let polled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), polled);
    }
}
