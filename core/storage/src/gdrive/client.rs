//! Google Drive API client.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use drivehub_common::{Error, Result};

use crate::account::{Account, StorageQuota};
use crate::preview::{PreviewCache, PreviewHandle};

use super::executor::{CallOptions, RequestExecutor};
use super::transport::{ApiRequest, HttpTransport};

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
/// OpenID Connect user-info endpoint.
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Field set requested for every listed file.
const LIST_FIELDS: &str =
    "nextPageToken,files(id,name,mimeType,size,modifiedTime,parents,iconLink,webViewLink)";
/// Field set returned for an uploaded file.
const UPLOAD_FIELDS: &str = "id,name,mimeType,size,modifiedTime,webViewLink,parents";

/// Characters escaped in path segments, matching `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const NATIVE_PREFIX: &str = "application/vnd.google-apps.";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// File size in bytes (absent for folders and native documents).
    #[serde(default)]
    pub size: Option<String>,
    /// Modified time.
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder IDs.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Icon for the file type.
    #[serde(default)]
    pub icon_link: Option<String>,
    /// Link to open the file in a browser.
    #[serde(default)]
    pub web_view_link: Option<String>,
}

impl DriveFile {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    /// Check if this is a provider-native document that must be exported.
    pub fn is_native_document(&self) -> bool {
        self.mime_type.starts_with(NATIVE_PREFIX)
    }

    /// Check if this is an image.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }

    /// Shareable link: the web view link if the API returned one, otherwise
    /// a URL built from the file type.
    pub fn public_link(&self) -> String {
        if let Some(link) = self.web_view_link.as_deref().filter(|l| !l.is_empty()) {
            return link.to_string();
        }

        let id = &self.id;
        match self.mime_type.as_str() {
            "application/vnd.google-apps.document" => {
                format!("https://docs.google.com/document/d/{}/edit?usp=sharing", id)
            }
            "application/vnd.google-apps.spreadsheet" => {
                format!("https://docs.google.com/spreadsheets/d/{}/edit?usp=sharing", id)
            }
            "application/vnd.google-apps.presentation" => {
                format!("https://docs.google.com/presentation/d/{}/edit?usp=sharing", id)
            }
            _ => format!("https://drive.google.com/file/d/{}/view?usp=sharing", id),
        }
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutResponse {
    #[serde(default)]
    storage_quota: StorageQuota,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

/// Bytes fetched by [`DriveClient::download`].
#[derive(Debug, Clone)]
pub struct Download {
    /// Suggested file name, with an extension added for exports.
    pub file_name: String,
    /// MIME type of the bytes.
    pub mime_type: String,
    /// File content.
    pub data: Bytes,
}

/// A file to upload.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Name of the created file.
    pub name: String,
    /// Content type of the payload. Defaults to `application/octet-stream`.
    pub mime_type: Option<String>,
    /// Destination folder. `None` or blank uploads to the root.
    pub folder_id: Option<String>,
    /// File content.
    pub data: Bytes,
}

impl Upload {
    /// Create an upload to the root folder.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            folder_id: None,
            data: data.into(),
        }
    }

    /// Set the content type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the destination folder.
    pub fn with_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    /// Trimmed destination folder, if one was given.
    pub fn folder(&self) -> Option<&str> {
        self.folder_id
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    fn content_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or("application/octet-stream")
    }
}

/// Build a `multipart/related` body with a metadata part and a media part.
pub fn multipart_body(
    boundary: &str,
    metadata: &serde_json::Value,
    content_type: &str,
    file_name: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\r\n",
            utf8_percent_encode(file_name, COMPONENT)
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--", boundary).as_bytes());

    body
}

/// File-name extension for an export format.
pub fn export_extension(mime_type: &str) -> &str {
    match mime_type {
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "text/html" => "html",
        "application/zip" => "zip",
        "application/rtf" => "rtf",
        "application/epub+zip" => "epub",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/vnd.oasis.opendocument.text" => "odt",
        "application/vnd.oasis.opendocument.spreadsheet" => "ods",
        "application/vnd.oasis.opendocument.presentation" => "odp",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/svg+xml" => "svg",
        other => other.rsplit('/').next().unwrap_or("bin"),
    }
}

fn encode_id(id: &str) -> String {
    utf8_percent_encode(id, COMPONENT).to_string()
}

/// Google Drive API client.
///
/// Every call goes through the [`RequestExecutor`], so tokens are renewed
/// and auth failures retried the same way for all operations.
pub struct DriveClient {
    executor: Arc<RequestExecutor>,
    page_size: u32,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(executor: Arc<RequestExecutor>, page_size: u32) -> Self {
        Self {
            executor,
            page_size: page_size.clamp(1, 1000),
        }
    }

    /// The executor behind this client.
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    /// Fetch the account's storage quota.
    pub async fn storage_quota(
        &self,
        account: &mut Account,
        allow_interactive: bool,
    ) -> Result<StorageQuota> {
        let request = ApiRequest::get(format!("{}/about", DRIVE_API_BASE))
            .query("fields", "storageQuota");

        let response = self
            .executor
            .call(account, &request, CallOptions::with_interaction(allow_interactive))
            .await?;

        let about: AboutResponse = response.json()?;
        Ok(about.storage_quota)
    }

    /// List every non-trashed file, following continuation tokens.
    pub async fn list_all_files(
        &self,
        account: &mut Account,
        allow_interactive: bool,
    ) -> Result<Vec<DriveFile>> {
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut request = ApiRequest::get(format!("{}/files", DRIVE_API_BASE))
                .query("q", "trashed=false")
                .query("pageSize", self.page_size.to_string())
                .query("fields", LIST_FIELDS);

            if let Some(token) = &page_token {
                request = request.query("pageToken", token.as_str());
            }

            let response = self
                .executor
                .call(account, &request, CallOptions::with_interaction(allow_interactive))
                .await?;

            let list_response: FileListResponse = response.json()?;
            all_files.extend(list_response.files);
            pages += 1;

            match list_response.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            account = %account.label,
            files = all_files.len(),
            pages,
            "Listed files"
        );

        Ok(all_files)
    }

    /// Fetch a file's bytes.
    ///
    /// Native documents are exported to `export_mime`; everything else is
    /// downloaded as stored.
    ///
    /// # Errors
    /// - `InvalidInput` for folders
    /// - Any executor error
    pub async fn download(
        &self,
        account: &mut Account,
        file: &DriveFile,
        export_mime: &str,
    ) -> Result<Download> {
        if file.is_folder() {
            return Err(Error::InvalidInput(format!(
                "'{}' is a folder and cannot be downloaded",
                file.name
            )));
        }

        let (request, file_name, mime_type) = if file.is_native_document() {
            let request = ApiRequest::get(format!(
                "{}/files/{}/export",
                DRIVE_API_BASE,
                encode_id(&file.id)
            ))
            .query("mimeType", export_mime);
            let name = format!("{}.{}", file.name, export_extension(export_mime));
            (request, name, export_mime.to_string())
        } else {
            let request = ApiRequest::get(format!("{}/files/{}", DRIVE_API_BASE, encode_id(&file.id)))
                .query("alt", "media");
            (request, file.name.clone(), file.mime_type.clone())
        };

        let response = self
            .executor
            .call(account, &request, CallOptions::interactive())
            .await?;

        Ok(Download {
            file_name,
            mime_type,
            data: response.body,
        })
    }

    /// Upload a file with a multipart request.
    pub async fn upload(&self, account: &mut Account, upload: &Upload) -> Result<DriveFile> {
        let mut metadata = serde_json::json!({ "name": upload.name });
        if let Some(folder) = upload.folder() {
            metadata["parents"] = serde_json::json!([folder]);
        }

        let boundary = format!("drivehub-{}", Uuid::new_v4().simple());
        let body = multipart_body(
            &boundary,
            &metadata,
            upload.content_type(),
            &upload.name,
            &upload.data,
        );

        let request = ApiRequest::post(format!("{}/files", DRIVE_UPLOAD_BASE))
            .query("uploadType", "multipart")
            .query("fields", UPLOAD_FIELDS)
            .body(format!("multipart/related; boundary={}", boundary), body);

        let response = self
            .executor
            .call(account, &request, CallOptions::interactive())
            .await?;

        let created: DriveFile = response.json()?;
        info!(
            account = %account.label,
            file_id = %created.id,
            bytes = upload.data.len(),
            "Uploaded file"
        );
        Ok(created)
    }

    /// Let anyone with the link read the file, without making it discoverable.
    pub async fn share_publicly(&self, account: &mut Account, file_id: &str) -> Result<()> {
        let request = ApiRequest::post(format!(
            "{}/files/{}/permissions",
            DRIVE_API_BASE,
            encode_id(file_id)
        ))
        .json(&serde_json::json!({
            "role": "reader",
            "type": "anyone",
            "allowFileDiscovery": false
        }))?;

        self.executor
            .call(account, &request, CallOptions::interactive())
            .await?;
        Ok(())
    }

    /// Preview handle for an image file, fetched once and then served from
    /// the account's cache.
    ///
    /// Never prompts; a missing session surfaces as `ReauthRequired`.
    pub async fn fetch_thumbnail(
        &self,
        account: &mut Account,
        file: &DriveFile,
        previews: &PreviewCache,
    ) -> Result<PreviewHandle> {
        if !file.is_image() {
            return Err(Error::InvalidInput(format!(
                "'{}' is not an image",
                file.name
            )));
        }

        if let Some(handle) = account.thumb_cache.get(&file.id) {
            if previews.is_live(handle) {
                return Ok(handle.clone());
            }
        }

        let request = ApiRequest::get(format!("{}/files/{}", DRIVE_API_BASE, encode_id(&file.id)))
            .query("alt", "media");
        let response = self
            .executor
            .call(account, &request, CallOptions::background())
            .await?;

        let handle = previews.acquire(&response.body).await?;
        account.thumb_cache.insert(file.id.clone(), handle.clone());
        self.executor.store().save_account(account).await?;

        Ok(handle)
    }

    /// Email address behind a freshly issued token, if the provider reveals it.
    pub async fn account_email(&self, access_token: &str) -> Result<Option<String>> {
        let response = self
            .executor
            .transport()
            .send(&ApiRequest::get(USERINFO_URL), Some(access_token))
            .await?;

        if !response.is_success() {
            debug!(status = response.status, "User info unavailable");
            return Ok(None);
        }

        let info: UserInfo = response.json()?;
        Ok(info.email.filter(|e| !e.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccessToken;
    use crate::gdrive::auth::{TokenManager, TokenPolicy};
    use crate::gdrive::scripted::{ScriptedIdentityProvider, ScriptedTransport};
    use crate::gdrive::transport::ApiResponse;
    use crate::memory::MemoryBackend;
    use crate::notify::CollectingNotifier;
    use crate::store::AccountStore;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        transport: Arc<ScriptedTransport>,
        store: Arc<AccountStore>,
        client: DriveClient,
    }

    async fn harness() -> Harness {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(AccountStore::load(Arc::new(MemoryBackend::new())).await);
        let tokens = Arc::new(TokenManager::new(identity, store.clone(), TokenPolicy::default()));
        let executor = Arc::new(RequestExecutor::new(
            tokens,
            store.clone(),
            transport.clone(),
            Arc::new(CollectingNotifier::new()),
        ));
        Harness {
            transport,
            store,
            client: DriveClient::new(executor, 1000),
        }
    }

    async fn linked_account(h: &Harness) -> Account {
        let mut account = Account::new("me@example.com");
        account.set_credential(AccessToken::new("t", Utc::now() + Duration::minutes(30)));
        h.store.insert(account.clone()).await.unwrap();
        account
    }

    fn drive_file(id: &str, mime_type: &str) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: format!("file-{}", id),
            mime_type: mime_type.to_string(),
            size: None,
            modified_time: None,
            parents: vec![],
            icon_link: None,
            web_view_link: None,
        }
    }

    #[test]
    fn test_file_kinds() {
        assert!(drive_file("1", FOLDER_MIME).is_folder());
        assert!(drive_file("1", "application/vnd.google-apps.document").is_native_document());
        assert!(!drive_file("1", "application/pdf").is_native_document());
        assert!(drive_file("1", "image/jpeg").is_image());
    }

    #[test]
    fn test_public_link_fallbacks() {
        let mut doc = drive_file("abc", "application/vnd.google-apps.spreadsheet");
        assert_eq!(
            doc.public_link(),
            "https://docs.google.com/spreadsheets/d/abc/edit?usp=sharing"
        );

        doc.web_view_link = Some("https://drive.google.com/view/abc".to_string());
        assert_eq!(doc.public_link(), "https://drive.google.com/view/abc");

        assert_eq!(
            drive_file("xyz", "video/mp4").public_link(),
            "https://drive.google.com/file/d/xyz/view?usp=sharing"
        );
    }

    #[test]
    fn test_export_extension() {
        assert_eq!(export_extension("application/pdf"), "pdf");
        assert_eq!(export_extension("text/csv"), "csv");
        assert_eq!(export_extension("application/x-unknown"), "x-unknown");
    }

    #[test]
    fn test_multipart_body_has_two_parts() {
        let boundary = "b0undary";
        let body = multipart_body(boundary, &json!({"name": "a.txt"}), "text/plain", "a.txt", b"0123456789");
        let text = String::from_utf8(body).unwrap();

        assert_eq!(text.matches("--b0undary\r\n").count(), 2);
        assert!(text.ends_with("\r\n--b0undary--"));
        assert!(text.contains("0123456789"));
    }

    #[tokio::test]
    async fn test_storage_quota_is_stable() {
        let h = harness().await;
        h.transport
            .always(
                "/about",
                ApiResponse::json_body(
                    200,
                    &json!({"storageQuota": {"limit": "16106127360", "usageInDrive": "1024"}}),
                ),
            )
            .await;
        let mut account = linked_account(&h).await;

        let first = h.client.storage_quota(&mut account, false).await.unwrap();
        let second = h.client.storage_quota(&mut account, false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.limit.as_deref(), Some("16106127360"));
        assert_eq!(first.usage_in_drive.as_deref(), Some("1024"));

        let requests = h.transport.requests().await;
        assert_eq!(requests[0].request.query_value("fields"), Some("storageQuota"));
    }

    #[tokio::test]
    async fn test_listing_follows_every_page() {
        let h = harness().await;
        h.transport
            .enqueue(
                "/files",
                ApiResponse::json_body(
                    200,
                    &json!({"files": [{"id": "1", "name": "a", "mimeType": "text/plain"}], "nextPageToken": "p2"}),
                ),
            )
            .await;
        h.transport
            .enqueue(
                "/files",
                ApiResponse::json_body(
                    200,
                    &json!({"files": [{"id": "2", "name": "b", "mimeType": "text/plain"}], "nextPageToken": "p3"}),
                ),
            )
            .await;
        h.transport
            .enqueue(
                "/files",
                ApiResponse::json_body(200, &json!({"files": [{"id": "3", "name": "c", "mimeType": "image/png"}]})),
            )
            .await;
        let mut account = linked_account(&h).await;

        let files = h.client.list_all_files(&mut account, false).await.unwrap();

        assert_eq!(files.len(), 3);
        let requests = h.transport.requests().await;
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].request.query_value("q"), Some("trashed=false"));
        assert_eq!(requests[0].request.query_value("fields"), Some(LIST_FIELDS));
        assert_eq!(requests[0].request.query_value("pageToken"), None);
        assert_eq!(requests[1].request.query_value("pageToken"), Some("p2"));
        assert_eq!(requests[2].request.query_value("pageToken"), Some("p3"));
    }

    #[tokio::test]
    async fn test_upload_without_folder_omits_parents() {
        let h = harness().await;
        h.transport
            .enqueue(
                "/upload/drive/v3/files",
                ApiResponse::json_body(200, &json!({"id": "new-id", "name": "a.txt", "mimeType": "text/plain", "size": "10"})),
            )
            .await;
        let mut account = linked_account(&h).await;

        let upload = Upload::new("a.txt", &b"0123456789"[..]).with_mime_type("text/plain");
        let created = h.client.upload(&mut account, &upload).await.unwrap();
        assert_eq!(created.id, "new-id");

        let sent = &h.transport.requests().await[0].request;
        assert_eq!(sent.query_value("uploadType"), Some("multipart"));
        let content_type = sent.content_type.clone().unwrap();
        let boundary = content_type
            .strip_prefix("multipart/related; boundary=")
            .unwrap()
            .to_string();

        let body = String::from_utf8(sent.body.clone().unwrap().to_vec()).unwrap();
        assert_eq!(body.matches(&format!("--{}\r\n", boundary)).count(), 2);
        assert!(body.contains(r#"{"name":"a.txt"}"#));
        assert!(!body.contains("parents"));
        assert!(body.contains("\r\n\r\n0123456789\r\n"));
    }

    #[tokio::test]
    async fn test_upload_with_folder_sets_parents() {
        let h = harness().await;
        h.transport
            .enqueue(
                "/upload/drive/v3/files",
                ApiResponse::json_body(200, &json!({"id": "new-id", "name": "a.txt", "mimeType": "text/plain"})),
            )
            .await;
        let mut account = linked_account(&h).await;

        let upload = Upload::new("a.txt", &b"x"[..]).with_folder("  folder-1 ");
        h.client.upload(&mut account, &upload).await.unwrap();

        let sent = &h.transport.requests().await[0].request;
        let body = String::from_utf8(sent.body.clone().unwrap().to_vec()).unwrap();
        assert!(body.contains(r#""parents":["folder-1"]"#));
        assert!(body.contains("Content-Type: application/octet-stream"));
    }

    #[tokio::test]
    async fn test_native_document_is_exported() {
        let h = harness().await;
        h.transport
            .enqueue("/files/doc-1/export", ApiResponse::new(200, "%PDF"))
            .await;
        let mut account = linked_account(&h).await;

        let mut doc = drive_file("doc-1", "application/vnd.google-apps.document");
        doc.name = "Notes".to_string();
        let download = h
            .client
            .download(&mut account, &doc, "application/pdf")
            .await
            .unwrap();

        assert_eq!(download.file_name, "Notes.pdf");
        assert_eq!(download.data, Bytes::from_static(b"%PDF"));
        let sent = &h.transport.requests().await[0].request;
        assert_eq!(sent.query_value("mimeType"), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_binary_file_is_downloaded_as_media() {
        let h = harness().await;
        h.transport
            .enqueue("/files/bin-1", ApiResponse::new(200, "raw"))
            .await;
        let mut account = linked_account(&h).await;

        let file = drive_file("bin-1", "application/zip");
        let download = h
            .client
            .download(&mut account, &file, "application/pdf")
            .await
            .unwrap();

        assert_eq!(download.file_name, "file-bin-1");
        let sent = &h.transport.requests().await[0].request;
        assert_eq!(sent.query_value("alt"), Some("media"));
    }

    #[tokio::test]
    async fn test_folder_download_is_rejected() {
        let h = harness().await;
        let mut account = linked_account(&h).await;

        let result = h
            .client
            .download(&mut account, &drive_file("f", FOLDER_MIME), "application/pdf")
            .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(h.transport.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_share_posts_anyone_reader() {
        let h = harness().await;
        h.transport
            .enqueue("/permissions", ApiResponse::json_body(200, &json!({"id": "anyoneWithLink"})))
            .await;
        let mut account = linked_account(&h).await;

        h.client.share_publicly(&mut account, "file-1").await.unwrap();

        let sent = &h.transport.requests().await[0].request;
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"role": "reader", "type": "anyone", "allowFileDiscovery": false}));
    }

    #[tokio::test]
    async fn test_thumbnail_is_fetched_once() {
        let h = harness().await;
        h.transport
            .always("/files/img-1", ApiResponse::new(200, "png"))
            .await;
        let temp = TempDir::new().unwrap();
        let previews = PreviewCache::new(temp.path()).unwrap();
        let mut account = linked_account(&h).await;
        let image = drive_file("img-1", "image/png");

        let first = h.client.fetch_thumbnail(&mut account, &image, &previews).await.unwrap();
        let second = h.client.fetch_thumbnail(&mut account, &image, &previews).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.transport.request_count().await, 1);
        let stored = h.store.get(&account.id).await.unwrap();
        assert_eq!(stored.thumb_cache.get("img-1"), Some(&first));
    }

    #[tokio::test]
    async fn test_thumbnail_requires_image() {
        let h = harness().await;
        let temp = TempDir::new().unwrap();
        let previews = PreviewCache::new(temp.path()).unwrap();
        let mut account = linked_account(&h).await;

        let result = h
            .client
            .fetch_thumbnail(&mut account, &drive_file("d", "application/pdf"), &previews)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_account_email_from_userinfo() {
        let h = harness().await;
        h.transport
            .enqueue("/userinfo", ApiResponse::json_body(200, &json!({"email": "me@example.com"})))
            .await;
        h.transport.enqueue("/userinfo", ApiResponse::new(401, "")).await;

        assert_eq!(
            h.client.account_email("t").await.unwrap().as_deref(),
            Some("me@example.com")
        );
        assert_eq!(h.client.account_email("t").await.unwrap(), None);
    }
}
