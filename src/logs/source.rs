//! Where log text comes from.
//!
//! The monitor only ever asks for "the last N lines"; each poll re-fetches
//! instead of following a stream, so a source may be stateless.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::query_parameters::LogsOptions;
use futures_util::{Stream, StreamExt};

/// Abstraction over log retrieval for testability.
/// Real implementations: `DockerLogSource`, `FileLogSource`.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Return up to `lines` most recent lines, newline-joined.
    async fn fetch(&self, lines: usize) -> Result<String>;
}

/// Adapts an async callback `Fn(lines) -> Future<Output = Result<String>>`.
pub struct FnLogSource<F> {
    fetch: F,
}

impl<F> FnLogSource<F> {
    pub fn new(fetch: F) -> Self {
        Self { fetch }
    }
}

#[async_trait]
impl<F, Fut> LogSource for FnLogSource<F>
where
    F: Fn(usize) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    async fn fetch(&self, lines: usize) -> Result<String> {
        (self.fetch)(lines).await
    }
}

/// Reads the tail of a local log file on every fetch.
#[derive(Debug, Clone)]
pub struct FileLogSource {
    path: PathBuf,
}

impl FileLogSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl LogSource for FileLogSource {
    async fn fetch(&self, lines: usize) -> Result<String> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(tail_lines(&content, lines).to_string())
    }
}

/// Fetches container stdout/stderr through the Docker API, with Docker's
/// own timestamps prefixed to every line.
pub struct DockerLogSource {
    docker: Docker,
    container: String,
}

impl DockerLogSource {
    pub fn connect(container: impl Into<String>) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            container: container.into(),
        })
    }
}

#[async_trait]
impl LogSource for DockerLogSource {
    async fn fetch(&self, lines: usize) -> Result<String> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: lines.to_string(),
            ..Default::default()
        };

        let stream = self
            .docker
            .logs(&self.container, Some(options))
            .map(|chunk| chunk.map(|output| output.into_bytes()));
        read_log_stream(stream)
            .await
            .with_context(|| format!("Failed to read logs of container {}", self.container))
    }
}

/// Concatenate a stream of raw log frames and decode the result once.
/// Frames may split a multi-byte character.
async fn read_log_stream<S, B, E>(stream: S) -> Result<String>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut stream = std::pin::pin!(stream);
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        bytes.extend_from_slice(chunk?.as_ref());
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// The last `n` lines of `text`, preserving a trailing newline if present.
fn tail_lines(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    match body.rmatch_indices('\n').nth(n - 1) {
        Some((idx, _)) => &text[idx + 1..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tail_lines_takes_last_n() {
        assert_eq!(tail_lines("a\nb\nc\n", 2), "b\nc\n");
        assert_eq!(tail_lines("a\nb\nc", 2), "b\nc");
    }

    #[test]
    fn test_tail_lines_short_text_is_untouched() {
        assert_eq!(tail_lines("a\nb\n", 10), "a\nb\n");
        assert_eq!(tail_lines("", 10), "");
        assert_eq!(tail_lines("a\n", 0), "");
    }

    #[tokio::test]
    async fn test_fn_log_source_forwards_line_count() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_closure = Arc::clone(&seen);
        let source = FnLogSource::new(move |lines: usize| {
            seen_in_closure.store(lines, Ordering::SeqCst);
            async move { Ok::<_, anyhow::Error>(format!("asked for {lines}")) }
        });

        assert_eq!(source.fetch(100).await.unwrap(), "asked for 100");
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_log_stream_keeps_glyphs_split_across_frames() {
        let text = "2024-05-01T10:00:01.000Z █▀▀▀▀▀█ ▄▀▄\n";
        let bytes = text.as_bytes();
        // cut inside the 3-byte encoding of the first █
        let split = text.find('█').unwrap() + 1;
        let frames = vec![
            Ok::<_, std::io::Error>(bytes[..split].to_vec()),
            Ok(bytes[split..].to_vec()),
        ];

        let decoded = read_log_stream(futures_util::stream::iter(frames))
            .await
            .unwrap();
        assert_eq!(decoded, text);
        assert!(!decoded.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_log_stream_error_is_propagated() {
        let frames = vec![
            Ok(b"partial".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ];
        let err = read_log_stream(futures_util::stream::iter(frames))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_file_log_source_reads_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.log");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let source = FileLogSource::new(&path);
        assert_eq!(source.fetch(2).await.unwrap(), "two\nthree\n");
    }

    #[tokio::test]
    async fn test_file_log_source_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileLogSource::new(dir.path().join("absent.log"));
        let err = source.fetch(10).await.unwrap_err();
        assert!(err.to_string().contains("absent.log"));
    }
}
