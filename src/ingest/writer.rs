//! Collision-free, atomic file placement under the download root.
//!
//! Content is streamed into a hidden temporary file inside the target folder and
//! then hard-linked to its final name. `link` refuses to overwrite, so two
//! writers racing for the same name both succeed under distinct names and no
//! reader ever sees a partially written file at a final path. Filesystems
//! without hard links reserve the final name with an exclusive create and
//! rename the temporary file over that reservation.

use crate::backend::BackendError;
use crate::utils::file_name_of;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Name used when the backend and the client supply none
pub const FALLBACK_FILE_NAME: &str = "file";

/// Upper bound on `_N` suffixes tried before giving up
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Keep final names comfortably under the usual 255-byte limit
const MAX_FILE_NAME_BYTES: usize = 200;

const TEMP_SUFFIX: &str = ".part";

/// Errors while writing one file
#[derive(Error, Debug)]
pub enum WriteError {
    /// Filesystem operation failed
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path being written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The content stream failed before it was fully written
    #[error("Content stream failed: {0}")]
    Source(BackendError),
    /// Every candidate name is taken
    #[error("No free file name for {0}")]
    NamesExhausted(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes media into `<root>/<folder>/<name>`
#[derive(Debug, Clone)]
pub struct FileWriter {
    root: PathBuf,
}

impl FileWriter {
    /// Writer rooted at the download directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Download root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directory of a folder
    #[must_use]
    pub fn folder_path(&self, folder: &str) -> PathBuf {
        self.root.join(folder)
    }

    /// Create the folder directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `WriteError::Io` if the directory cannot be created.
    pub async fn ensure_folder(&self, folder: &str) -> Result<PathBuf, WriteError> {
        let dir = self.folder_path(folder);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        Ok(dir)
    }

    /// Number of saved files in a folder (temporary files excluded).
    ///
    /// # Errors
    ///
    /// Returns `WriteError::Io` if the folder cannot be listed.
    pub async fn count_files(&self, folder: &str) -> Result<usize, WriteError> {
        let dir = self.ensure_folder(folder).await?;
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err(&dir))?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file && !is_temp_name(&entry.file_name().to_string_lossy()) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Stream `body` into `folder` under a name derived from `suggested`.
    ///
    /// Returns the final path relative to the download root.
    ///
    /// # Errors
    ///
    /// Returns `WriteError::Source` if the stream fails and `WriteError::Io` /
    /// `WriteError::NamesExhausted` if the file cannot be placed. The temporary
    /// file is removed in every error case.
    pub async fn write_stream<S>(
        &self,
        folder: &str,
        suggested: Option<&str>,
        body: S,
    ) -> Result<PathBuf, WriteError>
    where
        S: Stream<Item = Result<Bytes, BackendError>> + Unpin,
    {
        let dir = self.ensure_folder(folder).await?;
        let name = sanitize_file_name(suggested);
        let tmp = dir.join(format!(".{}{TEMP_SUFFIX}", Uuid::new_v4()));

        let placed = match write_temp(&tmp, body).await {
            Ok(()) => place(&dir, &tmp, &name).await,
            Err(e) => Err(e),
        };

        match placed {
            Ok(final_name) => {
                debug!(folder, file = %final_name, "File stored");
                Ok(PathBuf::from(folder).join(final_name))
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&tmp).await {
                    if rm.kind() != ErrorKind::NotFound {
                        warn!(path = %tmp.display(), error = %rm, "Failed to remove temp file");
                    }
                }
                Err(e)
            }
        }
    }

    /// Convenience wrapper for in-memory content
    ///
    /// # Errors
    ///
    /// Same as [`FileWriter::write_stream`].
    pub async fn write_bytes(
        &self,
        folder: &str,
        suggested: Option<&str>,
        content: Bytes,
    ) -> Result<PathBuf, WriteError> {
        let body = futures_util::stream::iter([Ok::<_, BackendError>(content)]);
        self.write_stream(folder, suggested, body).await
    }
}

async fn write_temp<S>(tmp: &Path, mut body: S) -> Result<(), WriteError>
where
    S: Stream<Item = Result<Bytes, BackendError>> + Unpin,
{
    let mut file = tokio::fs::File::create(tmp).await.map_err(io_err(tmp))?;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(WriteError::Source)?;
        file.write_all(&chunk).await.map_err(io_err(tmp))?;
    }
    file.flush().await.map_err(io_err(tmp))?;
    file.sync_all().await.map_err(io_err(tmp))?;
    Ok(())
}

/// Move `tmp` to the first free candidate name in `dir`
async fn place(dir: &Path, tmp: &Path, name: &str) -> Result<String, WriteError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = candidate_name(name, attempt);
        let target = dir.join(&candidate);

        match tokio::fs::hard_link(tmp, &target).await {
            Ok(()) => {
                tokio::fs::remove_file(tmp).await.map_err(io_err(tmp))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) if matches!(e.kind(), ErrorKind::Unsupported | ErrorKind::PermissionDenied) => {
                debug!(dir = %dir.display(), error = %e, "Hard links unavailable, reserving names");
                return place_reserving(dir, tmp, name, attempt).await;
            }
            Err(e) => return Err(io_err(&target)(e)),
        }
    }
    Err(WriteError::NamesExhausted(name.to_string()))
}

/// Claim a candidate with `create_new`, then rename `tmp` over the claimed file
async fn place_reserving(
    dir: &Path,
    tmp: &Path,
    name: &str,
    first_attempt: usize,
) -> Result<String, WriteError> {
    for attempt in first_attempt..MAX_NAME_ATTEMPTS {
        let candidate = candidate_name(name, attempt);
        let target = dir.join(&candidate);

        let reserved = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await;
        match reserved {
            Ok(placeholder) => {
                drop(placeholder);
                if let Err(e) = tokio::fs::rename(tmp, &target).await {
                    if let Err(rm) = tokio::fs::remove_file(&target).await {
                        warn!(path = %target.display(), error = %rm, "Failed to release reserved name");
                    }
                    return Err(io_err(&target)(e));
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(io_err(&target)(e)),
        }
    }
    Err(WriteError::NamesExhausted(name.to_string()))
}

/// `name` for the first attempt, then `stem_N.ext`
fn candidate_name(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned());
    match path.extension() {
        Some(ext) => format!("{stem}_{attempt}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{attempt}"),
    }
}

/// Reduce a suggested name to a safe single path component
fn sanitize_file_name(suggested: Option<&str>) -> String {
    let cleaned: Option<String> = suggested
        .and_then(file_name_of)
        .map(|n| n.chars().filter(|c| !c.is_control()).collect())
        .filter(|n: &String| !n.is_empty() && !is_temp_name(n));

    let name = cleaned.unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
    truncate_name(&name, MAX_FILE_NAME_BYTES)
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// Shorten the stem so the whole name fits in `max` bytes, keeping the extension
fn truncate_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let path = Path::new(name);
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .filter(|e| e.len() < max / 2)
        .unwrap_or_default();
    let stem_budget = max - ext.len();
    let mut stem = String::new();
    for c in name[..name.len() - ext.len()].chars() {
        if stem.len() + c.len_utf8() > stem_budget {
            break;
        }
        stem.push(c);
    }
    format!("{stem}{ext}")
}
