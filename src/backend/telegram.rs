//! Telegram Bot API backend built on teloxide.
//!
//! Supports both the public Bot API and a self-hosted `telegram-bot-api` server.
//! In local mode the server hands out absolute paths on a shared volume, which are
//! streamed straight from disk instead of over HTTP.

use super::{BackendError, FetchedMedia, MediaBackend};
use crate::config::{
    Settings, BACKEND_CONNECT_INITIAL_BACKOFF_MS, BACKEND_CONNECT_MAX_BACKOFF_MS,
    BACKEND_CONNECT_MAX_RETRIES,
};
use crate::utils::{
    backoff_strategy, file_name_of, is_local_file, retry_telegram_operation, retry_transient,
};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use std::time::Duration;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId, Me, MessageId, ReplyParameters};
use teloxide::RequestError;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Production [`MediaBackend`] backed by a teloxide [`Bot`]
#[derive(Clone)]
pub struct TelegramBackend {
    bot: Bot,
    local_mode: bool,
}

impl TelegramBackend {
    /// Build a backend from settings without touching the network.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Unavailable` if the configured API URL is malformed.
    pub fn new(settings: &Settings) -> Result<Self, BackendError> {
        let mut bot = Bot::new(settings.bot_token.clone());
        if let Some(url) = settings.telegram_api_url.as_deref() {
            let url = reqwest::Url::parse(url).map_err(|e| {
                BackendError::Unavailable(format!("invalid Bot API URL {url}: {e}"))
            })?;
            bot = bot.set_api_url(url);
        }

        Ok(Self {
            bot,
            local_mode: settings.telegram_local_mode,
        })
    }

    /// Build a backend and wait until the Bot API answers `getMe`.
    ///
    /// The Bot API server may still be starting when the bot boots, so the
    /// handshake is retried with exponential backoff before giving up.
    ///
    /// # Errors
    ///
    /// Returns the last handshake error once retries are exhausted, or
    /// immediately for non-transient failures such as a rejected token.
    pub async fn connect(settings: &Settings) -> Result<Self, BackendError> {
        let backend = Self::new(settings)?;
        let me = backend.wait_until_ready(connect_strategy()).await?;
        info!(
            username = ?me.user.username,
            local_mode = backend.local_mode,
            "Bot API reachable"
        );
        Ok(backend)
    }

    /// Underlying teloxide bot, used by the dispatcher
    #[must_use]
    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    async fn wait_until_ready(
        &self,
        strategy: impl Iterator<Item = Duration>,
    ) -> Result<Me, BackendError> {
        let mut attempt = 0usize;
        retry_transient(
            strategy,
            || {
                attempt += 1;
                let n = attempt;
                let bot = self.bot.clone();
                async move {
                    bot.get_me().await.map_err(|e| {
                        let err = classify_request_error(&e);
                        warn!(attempt = n, error = %err, "Bot API not ready yet");
                        err
                    })
                }
            },
            BackendError::is_transient,
        )
        .await
    }
}

/// Backoff schedule of the startup handshake
fn connect_strategy() -> impl Iterator<Item = Duration> {
    backoff_strategy(
        BACKEND_CONNECT_INITIAL_BACKOFF_MS,
        BACKEND_CONNECT_MAX_BACKOFF_MS,
        BACKEND_CONNECT_MAX_RETRIES,
    )
}

#[async_trait]
impl MediaBackend for TelegramBackend {
    async fn fetch(&self, file_ref: &str) -> Result<FetchedMedia, BackendError> {
        let file = retry_telegram_operation(
            || async {
                self.bot
                    .get_file(FileId(file_ref.to_owned()))
                    .await
                    .map_err(|e| classify_request_error(&e))
            },
            BackendError::is_transient,
        )
        .await?;

        let file_name = file_name_of(&file.path);

        if self.local_mode && is_local_file(&file.path).await {
            debug!(path = %file.path, "Reading file from shared Bot API volume");
            let handle = tokio::fs::File::open(&file.path)
                .await
                .map_err(|e| BackendError::FetchFailed(format!("{}: {e}", file.path)))?;
            let body = ReaderStream::new(handle)
                .map_err(|e| BackendError::FetchFailed(e.to_string()))
                .boxed();
            return Ok(FetchedMedia { file_name, body });
        }

        let body = self
            .bot
            .download_file_stream(&file.path)
            .map_err(|e| BackendError::FetchFailed(e.to_string()))
            .boxed();

        Ok(FetchedMedia { file_name, body })
    }

    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to: Option<i32>,
        text: &str,
    ) -> Result<(), BackendError> {
        send_text(&self.bot, ChatId(chat_id), reply_to.map(MessageId), text)
            .await
            .map(|_| ())
    }

    async fn notify_saving(&self, chat_id: i64) {
        if let Err(e) = self
            .bot
            .send_chat_action(ChatId(chat_id), ChatAction::UploadDocument)
            .await
        {
            debug!(chat_id, error = %e, "Failed to send chat action");
        }
    }
}

/// Send `text`, quoting `reply_to` when it still exists.
///
/// Only transient failures are retried; a deleted anchor message does not
/// prevent delivery.
///
/// # Errors
///
/// Returns the classified error once retries are exhausted or on the first
/// permanent failure.
pub async fn send_text(
    bot: &Bot,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
    text: &str,
) -> Result<Message, BackendError> {
    let reply_parameters = reply_to.map(reply_anchor);
    retry_telegram_operation(
        || async {
            let mut req = bot.send_message(chat_id, text);
            if let Some(params) = reply_parameters.clone() {
                req = req.reply_parameters(params);
            }
            req.await.map_err(|e| classify_request_error(&e))
        },
        BackendError::is_transient,
    )
    .await
}

fn reply_anchor(message_id: MessageId) -> ReplyParameters {
    ReplyParameters::new(message_id).allow_sending_without_reply()
}

/// Map a teloxide request error onto the backend taxonomy
fn classify_request_error(e: &RequestError) -> BackendError {
    let text = e.to_string();
    match e {
        RequestError::Network(_) | RequestError::Io(_) | RequestError::RetryAfter(_) => {
            BackendError::Unavailable(text)
        }
        RequestError::Api(_) if is_expired_file_message(&text) => BackendError::FileExpired(text),
        _ => BackendError::FetchFailed(text),
    }
}

/// Bot API phrases used for file ids that can no longer be resolved
fn is_expired_file_message(text: &str) -> bool {
    const EXPIRED_MARKERS: &[&str] = &[
        "wrong file_id",
        "invalid file_id",
        "file_id_invalid",
        "file is temporarily unavailable",
    ];
    let lower = text.to_lowercase();
    EXPIRED_MARKERS.iter().any(|m| lower.contains(m))
}
