//! Upload log entries and the sink that posts them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use drivehub_common::{Error, Result};
use drivehub_storage::gdrive::{ApiRequest, DriveFile, HttpTransport};
use drivehub_storage::Account;

/// Value of the `source` field of every entry.
const SOURCE: &str = "drivehub";

/// Free-form classification attached to an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadTags {
    /// Top-level category.
    pub category: String,
    /// Saga the file belongs to.
    pub saga: String,
    /// Series the file belongs to.
    pub series: String,
    /// Season number or name.
    pub season: String,
    /// Episode number or name.
    pub episode: String,
    /// Comma-separated tags.
    pub tags: String,
}

impl UploadTags {
    /// Copy with every field trimmed.
    pub fn trimmed(&self) -> Self {
        Self {
            category: self.category.trim().to_string(),
            saga: self.saga.trim().to_string(),
            series: self.series.trim().to_string(),
            season: self.season.trim().to_string(),
            episode: self.episode.trim().to_string(),
            tags: self.tags.trim().to_string(),
        }
    }

    /// Grouping key: category, then series (or saga), then `T<season>`,
    /// skipping empty parts.
    pub fn group_key(&self) -> String {
        let tags = self.trimmed();
        let title = if tags.series.is_empty() {
            tags.saga
        } else {
            tags.series
        };
        let season = if tags.season.is_empty() {
            String::new()
        } else {
            format!("T{}", tags.season)
        };

        [tags.category, title, season]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// One record sent to the upload log endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLogEntry {
    pub source: String,
    pub uploaded_at: String,
    pub account_id: String,
    pub account_label: String,
    pub folder_id: String,
    pub file_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: String,
    pub modified_time: String,
    pub web_view_link: String,
    pub public_link: String,
    pub category: String,
    pub saga: String,
    pub series: String,
    pub season: String,
    pub episode: String,
    pub tags: String,
    pub group_key: String,
}

impl UploadLogEntry {
    /// Describe `created`, uploaded by `account` into `folder_id`.
    ///
    /// Missing values are sent as empty strings.
    pub fn new(
        account: &Account,
        folder_id: Option<&str>,
        created: &DriveFile,
        tags: &UploadTags,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        let trimmed = tags.trimmed();
        Self {
            source: SOURCE.to_string(),
            uploaded_at: uploaded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            account_id: account.id.to_string(),
            account_label: account.label.clone(),
            folder_id: folder_id.map(str::trim).unwrap_or_default().to_string(),
            file_id: created.id.clone(),
            name: created.name.clone(),
            mime_type: created.mime_type.clone(),
            size: created.size.clone().unwrap_or_default(),
            modified_time: created
                .modified_time
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_default(),
            web_view_link: created.web_view_link.clone().unwrap_or_default(),
            public_link: created.public_link(),
            group_key: tags.group_key(),
            category: trimmed.category,
            saga: trimmed.saga,
            series: trimmed.series,
            season: trimmed.season,
            episode: trimmed.episode,
            tags: trimmed.tags,
        }
    }
}

/// Posts upload log entries to a user-configured endpoint.
///
/// Entries are sent as JSON text with a `text/plain` content type.
pub struct UploadLogSink {
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
}

impl UploadLogSink {
    /// Create a sink posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
        }
    }

    /// Target URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post one entry. No credential is attached.
    ///
    /// # Errors
    /// - Transport failure
    /// - `RequestFailed` for a non-success status
    pub async fn post(&self, entry: &UploadLogEntry) -> Result<()> {
        let body = serde_json::to_vec(entry)?;
        let request =
            ApiRequest::post(self.endpoint.as_str()).body("text/plain;charset=utf-8", body);

        let response = self.transport.send(&request, None).await?;
        if !response.is_success() {
            return Err(Error::RequestFailed {
                status: response.status,
                body: response.text(),
            });
        }

        debug!(file_id = %entry.file_id, "Upload logged");
        Ok(())
    }
}
