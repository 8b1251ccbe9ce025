//! Media ingestion engine
//!
//! Turns the stream of per-message media notifications into batches (one per
//! album or standalone item), saves every item into the chat's folder and
//! replies once per batch.

/// Album grouping with quiescence timers
pub mod aggregator;
/// Per-chat folder selection
pub mod folders;
/// Notification and batch types
pub mod notification;
/// Batch download, storage and summary
pub mod processor;
/// Collision-free file placement
pub mod writer;

pub use aggregator::{AlbumAggregator, BatchSink, IngestOutcome};
pub use folders::{FolderError, FolderStore};
pub use notification::{AlbumKey, Batch, BatchOrigin, MediaKind, MediaNotification};
pub use processor::{BatchProcessor, ItemFailure, SavedBatchResult};
pub use writer::{FileWriter, WriteError};
