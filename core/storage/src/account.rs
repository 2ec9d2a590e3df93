//! Linked account records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use drivehub_common::AccountId;

use crate::gdrive::client::DriveFile;
use crate::preview::PreviewHandle;

/// Bearer credential together with its absolute expiry.
///
/// Token and expiry live in one value so they can only change together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Create a credential that expires at `expires_at`.
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// The bearer token.
    pub fn secret(&self) -> &str {
        &self.token
    }

    /// When the provider stops accepting the token.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check if the token is still usable at `now`, keeping `margin` in reserve.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now <= self.expires_at - margin
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Last-fetched quota snapshot.
///
/// Byte counts stay as decimal strings because they can exceed 2^53.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    /// Total capacity. Absent for unlimited plans.
    #[serde(default)]
    pub limit: Option<String>,
    /// Bytes used across all services.
    #[serde(default)]
    pub usage: Option<String>,
    /// Bytes used by Drive files.
    #[serde(default)]
    pub usage_in_drive: Option<String>,
    /// Bytes used by trashed Drive files.
    #[serde(default)]
    pub usage_in_drive_trash: Option<String>,
}

/// One linked Drive identity with its credential and cached data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Stable identifier, never reused.
    pub id: AccountId,
    /// Email address when known, otherwise a positional placeholder.
    pub label: String,
    #[serde(default)]
    credential: Option<AccessToken>,
    /// Set when the account can only recover through an interactive prompt.
    #[serde(default)]
    pub needs_reconnect: bool,
    /// Last quota snapshot.
    #[serde(default)]
    pub storage: Option<StorageQuota>,
    /// Last full listing. `None` until the first listing completes.
    #[serde(default)]
    pub files_cache: Option<Vec<DriveFile>>,
    /// Preview handles keyed by file id.
    #[serde(default)]
    pub thumb_cache: HashMap<String, PreviewHandle>,
}

impl Account {
    /// Create an account with a fresh id and no credential.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: AccountId::generate(),
            label: label.into(),
            credential: None,
            needs_reconnect: false,
            storage: None,
            files_cache: None,
            thumb_cache: HashMap::new(),
        }
    }

    /// Placeholder label for the account at 1-based `position`.
    pub fn placeholder_label(position: usize) -> String {
        format!("Account {}", position)
    }

    /// Current credential, if any.
    pub fn credential(&self) -> Option<&AccessToken> {
        self.credential.as_ref()
    }

    /// Current bearer token, if any.
    pub fn access_token(&self) -> Option<&str> {
        self.credential.as_ref().map(AccessToken::secret)
    }

    /// Expiry of the current token, if any.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credential.as_ref().map(AccessToken::expires_at)
    }

    /// Whether the stored token can be used at `now` with `margin` in reserve.
    pub fn has_fresh_token(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.credential
            .as_ref()
            .is_some_and(|c| c.is_fresh(now, margin))
    }

    /// Replace the credential.
    pub fn set_credential(&mut self, credential: AccessToken) {
        self.credential = Some(credential);
    }

    /// Drop the credential so the next call must renew it.
    pub fn clear_credential(&mut self) {
        self.credential = None;
    }

    /// Label to pass as a login hint. Only email-shaped labels qualify.
    pub fn login_hint(&self) -> Option<&str> {
        self.label.contains('@').then_some(self.label.as_str())
    }

    /// Store a new listing and return the preview handles of files that are gone.
    pub fn replace_files(&mut self, files: Vec<DriveFile>) -> Vec<PreviewHandle> {
        let present: HashSet<&str> = files.iter().map(|f| f.id.as_str()).collect();
        let stale: Vec<String> = self
            .thumb_cache
            .keys()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();

        let released = stale
            .iter()
            .filter_map(|id| self.thumb_cache.remove(id))
            .collect();

        self.files_cache = Some(files);
        released
    }

    /// Look up a cached file by id.
    pub fn cached_file(&self, file_id: &str) -> Option<&DriveFile> {
        self.files_cache
            .as_deref()
            .and_then(|files| files.iter().find(|f| f.id == file_id))
    }

    /// Take every preview handle out of the cache.
    pub fn take_previews(&mut self) -> Vec<PreviewHandle> {
        self.thumb_cache.drain().map(|(_, handle)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(id: &str) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: format!("{}.png", id),
            mime_type: "image/png".to_string(),
            size: None,
            modified_time: None,
            parents: vec![],
            icon_link: None,
            web_view_link: None,
        }
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Utc::now();
        let margin = Duration::seconds(30);

        let fresh = AccessToken::new("t", now + Duration::seconds(31));
        assert!(fresh.is_fresh(now, margin));

        let within_margin = AccessToken::new("t", now + Duration::seconds(29));
        assert!(!within_margin.is_fresh(now, margin));

        let expired = AccessToken::new("t", now - Duration::seconds(1));
        assert!(!expired.is_fresh(now, margin));
    }

    #[test]
    fn test_account_without_token_is_not_fresh() {
        let account = Account::new("Account 1");
        assert!(!account.has_fresh_token(Utc::now(), Duration::seconds(30)));
        assert!(account.access_token().is_none());
    }

    #[test]
    fn test_login_hint_requires_email() {
        assert_eq!(Account::new("Account 1").login_hint(), None);
        assert_eq!(
            Account::new("me@example.com").login_hint(),
            Some("me@example.com")
        );
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let token = AccessToken::new("super-secret", Utc::now());
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_replace_files_returns_stale_previews() {
        let mut account = Account::new("a@example.com");
        account
            .thumb_cache
            .insert("keep".to_string(), PreviewHandle::new(PathBuf::from("/p/keep")));
        account
            .thumb_cache
            .insert("gone".to_string(), PreviewHandle::new(PathBuf::from("/p/gone")));

        let released = account.replace_files(vec![file("keep"), file("new")]);

        assert_eq!(released, vec![PreviewHandle::new(PathBuf::from("/p/gone"))]);
        assert!(account.thumb_cache.contains_key("keep"));
        assert_eq!(account.files_cache.as_ref().map(Vec::len), Some(2));
        assert!(account.cached_file("new").is_some());
    }

    #[test]
    fn test_record_uses_camel_case_fields() {
        let mut account = Account::new("a@example.com");
        account.needs_reconnect = true;
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["needsReconnect"], true);
        assert!(json.get("thumbCache").is_some());
    }
}
