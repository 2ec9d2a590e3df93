//! Account storage and Google Drive access for DriveHub.
//!
//! This crate owns everything between a user action and the Drive REST API:
//! the durable account records, the per-account token lifecycle, the
//! authenticated request executor, and the Drive operations built on it.
//!
//! # Design Principles
//! - One store object: every component receives the [`AccountStore`] instead of sharing globals
//! - Write-through persistence: every account mutation is saved before the call returns
//! - Single retry: an auth failure triggers one renewal and one retried request, never more
//! - Seams as traits: identity provider, HTTP transport, and store backend can be swapped in tests

pub mod account;
pub mod gdrive;
pub mod local;
pub mod memory;
pub mod notify;
pub mod preview;
pub mod store;
pub mod usage;

pub use account::{Account, AccessToken, StorageQuota};
pub use local::FileBackend;
pub use memory::MemoryBackend;
pub use notify::{CollectingNotifier, Notice, Notifier, TracingNotifier};
pub use preview::{PreviewCache, PreviewHandle};
pub use store::{AccountBackend, AccountStore};
pub use usage::UsageTotals;
