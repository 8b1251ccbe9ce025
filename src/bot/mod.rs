/// Command handlers
pub mod handlers;
/// Saveable media extraction
pub mod media;
/// Command replies with retry
pub mod resilient;

use crate::backend::telegram::TelegramBackend;
use crate::ingest::{AlbumAggregator, BatchProcessor};

/// Batch processor used in production
pub type Processor = BatchProcessor<TelegramBackend>;
/// Album aggregator used in production
pub type Aggregator = AlbumAggregator<Processor>;

pub use handlers::Command;
