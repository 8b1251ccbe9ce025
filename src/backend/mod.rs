//! Media backend seam
//!
//! The ingestion engine only talks to the bot platform through [`MediaBackend`]:
//! fetching file content for a file reference and delivering replies.
//! [`telegram::TelegramBackend`] is the production implementation.

/// Telegram Bot API implementation
pub mod telegram;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Errors surfaced by the media backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend could not be reached (retried by the client before surfacing)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    /// The file reference is no longer valid on the backend
    #[error("File expired: {0}")]
    FileExpired(String),
    /// Any other failure while resolving or streaming file content
    #[error("Fetch failed: {0}")]
    FetchFailed(String),
}

impl BackendError {
    /// Whether retrying the same call may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Content of a file as delivered by the backend
pub struct FetchedMedia {
    /// File name reported by the backend (final component of its storage path)
    pub file_name: Option<String>,
    /// Chunked file content
    pub body: BoxStream<'static, Result<Bytes, BackendError>>,
}

impl std::fmt::Debug for FetchedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedMedia")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Transport to the bot platform used by the batch processor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Resolve a file reference and open its content stream
    async fn fetch(&self, file_ref: &str) -> Result<FetchedMedia, BackendError>;

    /// Send a text reply into a chat, anchored to `reply_to` when given
    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to: Option<i32>,
        text: &str,
    ) -> Result<(), BackendError>;

    /// Show the "uploading" indicator in a chat; best-effort
    async fn notify_saving(&self, chat_id: i64);
}
