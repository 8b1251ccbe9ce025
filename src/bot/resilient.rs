//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Command replies go through [`reply_resilient`] so that a flaky network does
//! not swallow the answer to `/newfolder` or `/status`.

use crate::backend::telegram::send_text;
use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::Message;
use tracing::debug;

/// Reply to `msg`, retrying transient network failures.
///
/// Delegates to [`send_text`], which retries with exponential backoff and still
/// delivers the text if `msg` was deleted in the meantime.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted, or the first
/// permanent API error.
pub async fn reply_resilient(bot: &Bot, msg: &Message, text: impl Into<String>) -> Result<Message> {
    let text = text.into();
    let sent = send_text(bot, msg.chat.id, Some(msg.id), &text).await?;
    debug!(chat_id = msg.chat.id.0, "Command reply sent");
    Ok(sent)
}
