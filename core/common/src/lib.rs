//! Common utilities and types shared across DriveHub crates.
//!
//! This module provides the error taxonomy every layer reports through and
//! the identifier types used to address linked accounts.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::AccountId;
