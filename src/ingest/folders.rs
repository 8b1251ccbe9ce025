//! Per-chat folder selection.

use crate::config::DEFAULT_FOLDER;
use dashmap::DashMap;
use regex::Regex;
use thiserror::Error;
use tracing::info;

/// Longest folder name accepted, in bytes (common filesystem limit)
pub const MAX_FOLDER_NAME_BYTES: usize = 255;

/// Folder name rejected by validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FolderError {
    /// Name is empty after trimming
    #[error("Folder name is empty")]
    Empty,
    /// Name could escape the download root
    #[error("Folder name {0:?} contains a path traversal sequence")]
    Traversal(String),
    /// Name is longer than the filesystem allows
    #[error("Folder name is longer than {MAX_FOLDER_NAME_BYTES} bytes")]
    TooLong,
    /// Name contains characters outside the allowed set
    #[error("Folder name {0:?} contains characters that are not allowed")]
    InvalidCharacters(String),
}

/// Concurrency-safe mapping of chat id to selected folder name
#[derive(Debug)]
pub struct FolderStore {
    folders: DashMap<i64, String>,
    allowed: Regex,
}

impl FolderStore {
    /// Create an empty store enforcing `allowed` on every name
    #[must_use]
    pub fn new(allowed: Regex) -> Self {
        Self {
            folders: DashMap::new(),
            allowed,
        }
    }

    /// Folder currently selected for `chat_id`, `"default"` when unset
    #[must_use]
    pub fn get(&self, chat_id: i64) -> String {
        self.folders
            .get(&chat_id)
            .map_or_else(|| DEFAULT_FOLDER.to_string(), |f| f.value().clone())
    }

    /// Select a folder for `chat_id`. Invalid names leave the current selection untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`FolderError`] describing why the name was rejected.
    pub fn set(&self, chat_id: i64, name: &str) -> Result<String, FolderError> {
        let name = self.validate(name)?;
        info!(chat_id, folder = %name, "Folder switched");
        self.folders.insert(chat_id, name.clone());
        Ok(name)
    }

    /// Check a candidate name and return its normalized form.
    ///
    /// Traversal and separator checks apply regardless of the configured pattern.
    ///
    /// # Errors
    ///
    /// Returns a [`FolderError`] describing why the name was rejected.
    pub fn validate(&self, name: &str) -> Result<String, FolderError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FolderError::Empty);
        }
        if name == "." || name.contains("..") || name.contains(['/', '\\', '\0']) {
            return Err(FolderError::Traversal(name.to_string()));
        }
        if name.len() > MAX_FOLDER_NAME_BYTES {
            return Err(FolderError::TooLong);
        }
        if !self.allowed.is_match(name) {
            return Err(FolderError::InvalidCharacters(name.to_string()));
        }
        Ok(name.to_string())
    }
}
