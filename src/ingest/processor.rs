//! Batch processing: download, store and summarize one finalized batch.

use super::aggregator::BatchSink;
use super::folders::FolderStore;
use super::notification::{Batch, BatchOrigin, MediaNotification};
use super::writer::{FileWriter, WriteError};
use crate::backend::{BackendError, MediaBackend};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a single item of a batch was not saved
#[derive(Error, Debug)]
pub enum ItemFailure {
    /// Content could not be fetched from the backend
    #[error("fetch failed: {0}")]
    Fetch(BackendError),
    /// Content could not be written to disk
    #[error("write failed: {0}")]
    Write(WriteError),
}

impl From<BackendError> for ItemFailure {
    fn from(e: BackendError) -> Self {
        Self::Fetch(e)
    }
}

impl From<WriteError> for ItemFailure {
    fn from(e: WriteError) -> Self {
        match e {
            // Stream broke mid-download: that is a fetch problem
            WriteError::Source(e) => Self::Fetch(e),
            other => Self::Write(other),
        }
    }
}

/// Outcome of processing one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBatchResult {
    /// Conversation the batch belongs to
    pub chat_id: i64,
    /// Folder the batch was saved to
    pub folder: String,
    /// Absolute destination directory
    pub directory: PathBuf,
    /// Stored paths relative to the download root
    pub saved: Vec<PathBuf>,
    /// Number of items that could not be saved
    pub failed: usize,
    /// How the batch was formed
    pub origin: BatchOrigin,
}

impl SavedBatchResult {
    /// Number of files written
    #[must_use]
    pub fn saved_count(&self) -> usize {
        self.saved.len()
    }

    /// Whether no item of the batch was saved
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.saved.is_empty()
    }

    /// The single reply sent for this batch
    #[must_use]
    pub fn reply_text(&self) -> String {
        let folder = &self.folder;
        let saved = self.saved_count();
        let single = self.origin != BatchOrigin::Album;

        match (saved, self.failed) {
            (0, failed) if single || failed <= 1 => format!("Failed to save file to {folder}/"),
            (0, failed) => format!("Failed to save all {failed} file(s) to {folder}/"),
            (1, 0) if single => {
                let name = self.saved[0]
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("Saved to {folder}/{name}")
            }
            (saved, 0) => format!("Saved {saved} file(s) to {folder}/"),
            (saved, failed) => format!("Saved {saved} file(s) to {folder}/, {failed} failed"),
        }
    }
}

/// Downloads and stores every item of a finalized batch, then replies once
pub struct BatchProcessor<B: MediaBackend> {
    backend: Arc<B>,
    folders: Arc<FolderStore>,
    writer: FileWriter,
    max_concurrent: usize,
    saved_counts: DashMap<i64, u64>,
}

impl<B: MediaBackend> BatchProcessor<B> {
    /// Create a processor; `max_concurrent` bounds parallel downloads per batch
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        folders: Arc<FolderStore>,
        writer: FileWriter,
        max_concurrent: usize,
    ) -> Self {
        Self {
            backend,
            folders,
            writer,
            max_concurrent: max_concurrent.max(1),
            saved_counts: DashMap::new(),
        }
    }

    /// Files saved for `chat_id` since the process started
    #[must_use]
    pub fn saved_count(&self, chat_id: i64) -> u64 {
        self.saved_counts.get(&chat_id).map_or(0, |c| *c)
    }

    /// Save every item of `batch` without replying.
    ///
    /// The folder is resolved once, now, so a folder switch made while an album
    /// was still collecting applies to the whole album.
    pub async fn process(&self, batch: Batch) -> SavedBatchResult {
        let chat_id = batch.chat_id;
        let folder = self.folders.get(chat_id);
        let directory = self.writer.folder_path(&folder);

        self.backend.notify_saving(chat_id).await;

        let outcomes: Vec<Result<PathBuf, ItemFailure>> = stream::iter(batch.items)
            .map(|item| self.save_item(&folder, item))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut saved = Vec::with_capacity(outcomes.len());
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                Ok(path) => saved.push(path),
                Err(e) => {
                    warn!(chat_id, folder = %folder, error = %e, "Item not saved");
                    failed += 1;
                }
            }
        }

        if !saved.is_empty() {
            *self.saved_counts.entry(chat_id).or_insert(0) += saved.len() as u64;
        }

        info!(
            chat_id,
            album = ?batch.album_id,
            folder = %folder,
            saved = saved.len(),
            failed,
            "Batch processed"
        );

        SavedBatchResult {
            chat_id,
            folder,
            directory,
            saved,
            failed,
            origin: batch.origin,
        }
    }

    /// Process `batch` and send its single summary reply
    pub async fn process_and_reply(&self, batch: Batch) -> SavedBatchResult {
        let anchor = batch.reply_anchor();
        let result = self.process(batch).await;

        if let Err(e) = self
            .backend
            .send_reply(result.chat_id, anchor, &result.reply_text())
            .await
        {
            error!(chat_id = result.chat_id, error = %e, "Failed to deliver batch reply");
        }
        result
    }

    async fn save_item(&self, folder: &str, item: MediaNotification) -> Result<PathBuf, ItemFailure> {
        let media = self.backend.fetch(&item.file_ref).await?;
        let suggested = item.file_name.as_deref().or(media.file_name.as_deref());
        let path = self
            .writer
            .write_stream(folder, suggested, media.body)
            .await?;
        Ok(path)
    }
}

#[async_trait]
impl<B: MediaBackend + 'static> BatchSink for BatchProcessor<B> {
    async fn finalize(&self, batch: Batch) {
        self.process_and_reply(batch).await;
    }
}
