use crate::bot::resilient::reply_resilient;
use crate::bot::Processor;
use crate::ingest::{FileWriter, FolderError, FolderStore};
use anyhow::Result;
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};
use tracing::{error, info, warn};

/// Bot commands
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    /// Show usage help
    #[command(description = "Show help.")]
    Start,
    /// Create and switch to a folder
    #[command(description = "Create and switch to a folder.")]
    NewFolder(String),
    /// Show the current folder and file count
    #[command(description = "Show current folder and file count.")]
    Status,
}

const HELP_TEXT: &str = "Send me photos, videos or GIFs and I will save them.\n\n\
    Albums are saved together with a single confirmation.\n\n\
    /newfolder <name> - create and switch to a folder\n\
    /status - show current folder and file count";

const USAGE_NEWFOLDER: &str = "Usage: /newfolder <name>";

/// Help text shown by `/start`
#[must_use]
pub const fn help_text() -> &'static str {
    HELP_TEXT
}

/// Validate, create and select a folder; returns the reply for the user.
///
/// The directory is created before the selection changes, so a chat never
/// points at a folder that could not be made.
pub async fn new_folder_reply(
    folders: &FolderStore,
    writer: &FileWriter,
    chat_id: i64,
    requested: &str,
) -> String {
    let name = match folders.validate(requested) {
        Ok(name) => name,
        Err(FolderError::Empty) => return USAGE_NEWFOLDER.to_string(),
        Err(e) => {
            info!(chat_id, error = %e, "Rejected folder name");
            return format!("Invalid folder name: {e}");
        }
    };

    if let Err(e) = writer.ensure_folder(&name).await {
        error!(chat_id, folder = %name, error = %e, "Failed to create folder");
        return format!("Failed to create folder {name}");
    }

    match folders.set(chat_id, &name) {
        Ok(name) => format!("Switched to folder: {name}"),
        Err(e) => {
            warn!(chat_id, error = %e, "Folder rejected after creation");
            USAGE_NEWFOLDER.to_string()
        }
    }
}

/// Status summary for a chat: folder, files on disk and files saved this session
pub async fn status_text(
    folders: &FolderStore,
    writer: &FileWriter,
    processor: &Processor,
    chat_id: i64,
) -> String {
    let folder = folders.get(chat_id);
    let files = match writer.count_files(&folder).await {
        Ok(n) => n.to_string(),
        Err(e) => {
            warn!(chat_id, folder = %folder, error = %e, "Failed to count files");
            "unknown".to_string()
        }
    };
    format!(
        "Current folder: {folder}\nFiles: {files}\nSaved this session: {}",
        processor.saved_count(chat_id)
    )
}

/// `/start` handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    info!(chat_id = msg.chat.id.0, "Received /start");
    reply_resilient(&bot, &msg, help_text()).await?;
    Ok(())
}

/// `/newfolder <name>` handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn new_folder(
    bot: Bot,
    msg: Message,
    name: String,
    folders: Arc<FolderStore>,
    writer: Arc<FileWriter>,
) -> Result<()> {
    let reply = new_folder_reply(&folders, &writer, msg.chat.id.0, &name).await;
    reply_resilient(&bot, &msg, reply).await?;
    Ok(())
}

/// `/status` handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn status(
    bot: Bot,
    msg: Message,
    folders: Arc<FolderStore>,
    writer: Arc<FileWriter>,
    processor: Arc<Processor>,
) -> Result<()> {
    let text = status_text(&folders, &writer, &processor, msg.chat.id.0).await;
    reply_resilient(&bot, &msg, text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FOLDER_NAME_PATTERN;
    use regex::Regex;

    fn store() -> FolderStore {
        FolderStore::new(Regex::new(DEFAULT_FOLDER_NAME_PATTERN).expect("valid pattern"))
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(
            Command::parse("/newfolder trip_2024", "saver_bot").expect("parses"),
            Command::NewFolder("trip_2024".to_string())
        );
        assert_eq!(
            Command::parse("/status", "saver_bot").expect("parses"),
            Command::Status
        );
        assert_eq!(
            Command::parse("/start", "saver_bot").expect("parses"),
            Command::Start
        );
    }

    #[tokio::test]
    async fn test_new_folder_creates_and_switches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = FileWriter::new(dir.path());
        let folders = store();

        let reply = new_folder_reply(&folders, &writer, 5, "trip").await;
        assert_eq!(reply, "Switched to folder: trip");
        assert_eq!(folders.get(5), "trip");
        assert!(dir.path().join("trip").is_dir());
    }

    #[tokio::test]
    async fn test_new_folder_without_name_shows_usage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = FileWriter::new(dir.path());
        let folders = store();

        assert_eq!(
            new_folder_reply(&folders, &writer, 5, "  ").await,
            USAGE_NEWFOLDER
        );
        assert_eq!(folders.get(5), "default");
    }

    #[tokio::test]
    async fn test_rejection_follows_configured_pattern() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = FileWriter::new(dir.path());
        let folders = FolderStore::new(Regex::new("^[a-z]+$").expect("valid pattern"));

        let reply = new_folder_reply(&folders, &writer, 5, "Trip2024").await;
        assert_eq!(
            reply,
            "Invalid folder name: Folder name \"Trip2024\" contains characters that are not allowed"
        );
        assert_eq!(
            new_folder_reply(&folders, &writer, 5, "trip").await,
            "Switched to folder: trip"
        );
    }

    #[tokio::test]
    async fn test_new_folder_rejects_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = FileWriter::new(dir.path());
        let folders = store();
        folders.set(5, "kept").expect("valid name");

        let reply = new_folder_reply(&folders, &writer, 5, "../outside").await;
        assert!(reply.starts_with("Invalid folder name"));
        assert_eq!(folders.get(5), "kept");
        assert!(!dir.path().join("../outside").exists());
    }
}
