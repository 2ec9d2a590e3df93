//! DriveHub application layer.
//!
//! Wires the account store, token manager, and Drive client into the
//! user-facing operations, and holds the presentation helpers that turn
//! cached listings and errors into something to show.

pub mod catalog;
pub mod config;
pub mod notices;
pub mod service;
pub mod upload_log;

pub use catalog::{format_bytes, CatalogEntry, FileQuery, TypeFilter, ViewMode};
pub use config::{AppConfig, TokenSettings};
pub use notices::notice_for;
pub use service::{DriveHub, RefreshOutcome, UploadOutcome};
pub use upload_log::{UploadLogEntry, UploadLogSink, UploadTags};
