//! Google Drive access for DriveHub.
//!
//! This module provides:
//! - An identity provider seam with an OAuth2 loopback implementation
//! - Per-account token lifecycle (silent renewal, interactive consent, timeouts)
//! - An authenticated request executor with a single retry on auth failure
//! - Drive operations (quota, listing, download/export, upload, sharing, previews)

pub mod auth;
pub mod client;
pub mod executor;
pub mod oauth;
pub mod scripted;
pub mod transport;

pub use auth::{IdentityProvider, Prompt, TokenGrant, TokenManager, TokenPolicy, TokenRequest};
pub use client::{Download, DriveClient, DriveFile, Upload};
pub use executor::{is_auth_failure, CallOptions, RequestExecutor};
pub use oauth::{LoopbackIdentityProvider, OAuthConfig};
pub use scripted::{ScriptedGrant, ScriptedIdentityProvider, ScriptedTransport};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
