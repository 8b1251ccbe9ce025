//! Retry helpers for Bot API calls and small path utilities.

use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

/// Exponential backoff with jitter, capped at `max_ms` and `attempts` retries.
pub fn backoff_strategy(
    initial_ms: u64,
    max_ms: u64,
    attempts: usize,
) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(initial_ms)
        .max_delay(Duration::from_millis(max_ms))
        .map(jitter) // Add jitter to prevent thundering herd
        .take(attempts)
}

/// Execute a Telegram API operation with exponential backoff, retrying only
/// errors accepted by `is_transient`.
///
/// # Examples
///
/// ```no_run
/// use tg_media_saver::backend::BackendError;
/// use tg_media_saver::utils::retry_telegram_operation;
///
/// async fn send() -> Result<(), BackendError> {
///     Ok(())
/// }
///
/// # async fn example() -> Result<(), BackendError> {
/// retry_telegram_operation(|| async { send().await }, BackendError::is_transient).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the first permanent error, or the last transient one once all
/// retries are exhausted.
pub async fn retry_telegram_operation<F, Fut, T, E, C>(operation: F, is_transient: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = backoff_strategy(
        TELEGRAM_API_INITIAL_BACKOFF_MS,
        TELEGRAM_API_MAX_BACKOFF_MS,
        TELEGRAM_API_MAX_RETRIES,
    );

    retry_transient(retry_strategy, operation, is_transient)
        .await
        .map_err(|e| {
            warn!("Telegram API operation failed: {}", e);
            e
        })
}

/// Retry `operation` along `strategy` while `is_transient` accepts its error.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient one after all retries.
pub async fn retry_transient<F, Fut, T, E, C>(
    strategy: impl Iterator<Item = Duration>,
    operation: F,
    is_transient: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
{
    RetryIf::spawn(strategy, operation, is_transient).await
}

/// Final component of a server-side or user-supplied path, if it is a usable file name.
#[must_use]
pub fn file_name_of(path: &str) -> Option<String> {
    // Both separators: names may come from Windows clients
    let last = path.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last.chars().all(|c| c == '.') {
        return None;
    }
    Some(last.to_string())
}

/// Whether `path` points at an existing regular file on this host.
pub async fn is_local_file(path: &str) -> bool {
    let path = Path::new(path);
    if !path.is_absolute() {
        return false;
    }
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of("photos/file_12.jpg").as_deref(), Some("file_12.jpg"));
        assert_eq!(file_name_of("/var/lib/tg/videos/a.mp4").as_deref(), Some("a.mp4"));
        assert_eq!(file_name_of(r"C:\Users\me\pic.png").as_deref(), Some("pic.png"));
        assert_eq!(file_name_of("dir/"), None);
        assert_eq!(file_name_of(".."), None);
        assert_eq!(file_name_of(""), None);
    }

    #[test]
    fn test_backoff_strategy_is_bounded() {
        let delays: Vec<_> = backoff_strategy(10, 40, 5).collect();
        assert_eq!(delays.len(), 5);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_stops_on_permanent_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), &str> = retry_transient(
            backoff_strategy(1, 10, 5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
            |e: &&str| *e == "transient",
        )
        .await;

        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result: Result<usize, &str> = retry_transient(
            backoff_strategy(1, 10, 5),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            },
            |e: &&str| *e == "transient",
        )
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
