#![deny(missing_docs)]
//! Telegram bot that saves incoming photos, videos and GIFs into per-chat
//! folders, grouping albums into a single confirmation.

/// Media transfer backends
pub mod backend;
/// Telegram commands and message extraction
pub mod bot;
/// Configuration management
pub mod config;
/// Album aggregation, folder selection and file storage
pub mod ingest;
/// Telegram runtime entrypoint
pub mod runner;
/// Retry helpers and path utilities
pub mod utils;
