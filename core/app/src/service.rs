//! Application service tying the store, token manager, and Drive client together.

use bytes::Bytes;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use drivehub_common::{AccountId, Error, Result};
use drivehub_storage::gdrive::{
    DriveClient, DriveFile, HttpTransport, IdentityProvider, LoopbackIdentityProvider,
    RequestExecutor, ReqwestTransport, TokenManager, Upload,
};
use drivehub_storage::{
    Account, AccountBackend, AccountStore, FileBackend, Notice, Notifier, PreviewCache,
    PreviewHandle, UsageTotals,
};

use crate::config::AppConfig;
use crate::notices::notice_for;
use crate::upload_log::{UploadLogEntry, UploadLogSink, UploadTags};

/// Result of refreshing one account during [`DriveHub::refresh_all`].
#[derive(Debug)]
pub struct RefreshOutcome {
    pub account_id: AccountId,
    pub label: String,
    /// Number of files listed, or why the refresh failed.
    pub result: Result<usize>,
}

/// Result of [`DriveHub::upload`].
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// The created file.
    pub file: DriveFile,
    /// Link that opens the file for anyone who has it.
    pub public_link: String,
    /// Whether anonymous read access was granted.
    pub shared: bool,
    /// Whether the upload log accepted the entry. `false` when logging is off.
    pub logged: bool,
    /// Secondary steps that failed without undoing the upload.
    pub warnings: Vec<String>,
}

/// The multi-account Drive aggregator.
///
/// Every operation works on a copy of the stored account and writes changes
/// back through the [`AccountStore`] before returning.
pub struct DriveHub {
    config: AppConfig,
    store: Arc<AccountStore>,
    tokens: Arc<TokenManager>,
    client: DriveClient,
    previews: PreviewCache,
    upload_log: Option<UploadLogSink>,
    notifier: Arc<dyn Notifier>,
}

impl DriveHub {
    /// Open the application with the browser-based identity provider and the
    /// file-backed account store named in `config`.
    pub async fn open(config: AppConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let backend = Arc::new(FileBackend::new(&config.accounts_path));
        let identity = Arc::new(LoopbackIdentityProvider::new(config.oauth.clone())?);
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::with_parts(config, backend, identity, transport, notifier).await
    }

    /// Assemble the application from explicit collaborators.
    pub async fn with_parts(
        config: AppConfig,
        backend: Arc<dyn AccountBackend>,
        identity: Arc<dyn IdentityProvider>,
        transport: Arc<dyn HttpTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(AccountStore::load(backend).await);
        let tokens = Arc::new(TokenManager::new(
            identity,
            store.clone(),
            config.token.policy(),
        ));
        let executor = Arc::new(RequestExecutor::new(
            tokens.clone(),
            store.clone(),
            transport.clone(),
            notifier.clone(),
        ));
        let client = DriveClient::new(executor, config.page_size);
        let previews = PreviewCache::new(&config.previews_dir)?;
        let upload_log = config
            .upload_log_endpoint()
            .map(|endpoint| UploadLogSink::new(endpoint, transport.clone()));

        Ok(Self {
            config,
            store,
            tokens,
            client,
            previews,
            upload_log,
            notifier,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The account store.
    pub fn store(&self) -> &Arc<AccountStore> {
        &self.store
    }

    /// The preview cache.
    pub fn previews(&self) -> &PreviewCache {
        &self.previews
    }

    /// Snapshot of every linked account.
    pub async fn accounts(&self) -> Vec<Account> {
        self.store.list().await
    }

    /// Find an account by id, label, or 1-based position.
    pub async fn resolve_account(&self, key: &str) -> Result<Account> {
        if let Some(account) = self.store.find(key).await {
            return Ok(account);
        }

        if let Ok(position) = key.trim().parse::<usize>() {
            let accounts = self.store.list().await;
            if let Some(account) = position.checked_sub(1).and_then(|i| accounts.get(i)) {
                return Ok(account.clone());
            }
        }

        Err(Error::NotFound(format!("Account '{}'", key)))
    }

    async fn account(&self, id: &AccountId) -> Result<Account> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Account '{}'", id)))
    }

    /// Link a new account through the consent prompt.
    ///
    /// The account is stored only after its quota was fetched.
    pub async fn add_account(&self) -> Result<Account> {
        let grant = self.tokens.authorize_new().await?;

        let position = self.store.len().await + 1;
        let mut account = Account::new(Account::placeholder_label(position));
        account.set_credential(grant.into_credential());

        if let Some(token) = account.access_token().map(str::to_string) {
            match self.client.account_email(&token).await {
                Ok(Some(email)) => account.label = email,
                Ok(None) => debug!("No email in user info, keeping placeholder label"),
                Err(e) => warn!("Failed to fetch user info: {}", e),
            }
        }

        let quota = self.client.storage_quota(&mut account, true).await?;
        account.storage = Some(quota);

        self.store.insert(account.clone()).await?;
        info!(account = %account.label, id = %account.id, "Account added");
        self.notifier
            .notify(Notice::Info(format!("Account added: {}", account.label)));

        Ok(account)
    }

    /// Force a consent prompt for an existing account and refresh its quota.
    pub async fn reconnect_account(&self, id: &AccountId) -> Result<Account> {
        let mut account = self.account(id).await?;

        self.tokens.reconnect(&mut account).await?;
        let quota = self.client.storage_quota(&mut account, true).await?;
        account.storage = Some(quota);
        self.store.save_account(&account).await?;

        info!(account = %account.label, "Account reconnected");
        self.notifier
            .notify(Notice::Info(format!("Reconnected: {}", account.label)));
        Ok(account)
    }

    /// Unlink an account and release its previews. Returns how many were released.
    pub async fn remove_account(&self, id: &AccountId) -> Result<usize> {
        let mut removed = self.store.remove(id).await?;
        let released = self.previews.release_all(removed.take_previews()).await;
        self.tokens.forget(id).await;

        info!(account = %removed.label, released, "Account removed");
        self.notifier
            .notify(Notice::Info(format!("Account removed: {}", removed.label)));
        Ok(released)
    }

    /// Fetch quota and the full listing for one account.
    ///
    /// Previews of files that are no longer listed are released.
    pub async fn refresh_account(&self, id: &AccountId, allow_interactive: bool) -> Result<Account> {
        let mut account = self.account(id).await?;

        let quota = self
            .client
            .storage_quota(&mut account, allow_interactive)
            .await?;
        let files = self
            .client
            .list_all_files(&mut account, allow_interactive)
            .await?;

        account.storage = Some(quota);
        let stale = account.replace_files(files);
        self.store.save_account(&account).await?;

        if !stale.is_empty() {
            let released = self.previews.release_all(stale).await;
            debug!(account = %account.label, released, "Released previews of removed files");
        }

        Ok(account)
    }

    /// Refresh every account one after another.
    ///
    /// A failing account does not stop the others; each outcome is reported.
    pub async fn refresh_all(&self, allow_interactive: bool) -> Vec<RefreshOutcome> {
        let mut outcomes = Vec::new();

        for account in self.store.list().await {
            let result = self
                .refresh_account(&account.id, allow_interactive)
                .await
                .map(|refreshed| refreshed.files_cache.as_ref().map_or(0, Vec::len));

            if let Err(e) = &result {
                warn!(account = %account.label, "Refresh failed: {}", e);
                if !e.is_reauth_required() {
                    self.notifier.notify(notice_for(e));
                }
            }

            outcomes.push(RefreshOutcome {
                account_id: account.id,
                label: account.label,
                result,
            });
        }

        outcomes
    }

    /// Summed quota across all accounts.
    pub async fn usage(&self) -> UsageTotals {
        UsageTotals::from_accounts(&self.store.list().await)
    }

    /// Save a file from an account's last listing into `dest_dir`.
    ///
    /// Native documents are exported to the configured format.
    pub async fn download(&self, id: &AccountId, file_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        let mut account = self.account(id).await?;
        let file = cached_file(&account, file_id)?;

        let download = self
            .client
            .download(&mut account, &file, &self.config.export_mime_type)
            .await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(safe_file_name(&download.file_name));
        tokio::fs::write(&path, &download.data).await?;

        info!(
            account = %account.label,
            path = %path.display(),
            bytes = download.data.len(),
            "Saved file"
        );
        Ok(path)
    }

    /// Upload a file, share it, log it, and refresh the account.
    ///
    /// Only the upload itself can fail the operation; sharing, logging, and
    /// the refresh report problems as warnings.
    pub async fn upload(
        &self,
        id: &AccountId,
        name: &str,
        mime_type: Option<&str>,
        folder_id: Option<&str>,
        data: Bytes,
        tags: &UploadTags,
    ) -> Result<UploadOutcome> {
        let mut account = self.account(id).await?;

        let mut upload = Upload::new(name, data);
        if let Some(mime_type) = mime_type {
            upload = upload.with_mime_type(mime_type);
        }
        if let Some(folder) = folder_id {
            upload = upload.with_folder(folder);
        }

        let created = self.client.upload(&mut account, &upload).await?;
        let mut warnings = Vec::new();

        let shared = match self.client.share_publicly(&mut account, &created.id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(file_id = %created.id, "Failed to share uploaded file: {}", e);
                warnings.push(format!("Uploaded, but could not make the file public: {}", e));
                false
            }
        };

        let logged = match &self.upload_log {
            Some(sink) => {
                let entry =
                    UploadLogEntry::new(&account, upload.folder(), &created, tags, Utc::now());
                match sink.post(&entry).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(endpoint = sink.endpoint(), "Failed to log upload: {}", e);
                        warnings.push(format!("Uploaded, but could not record the upload: {}", e));
                        false
                    }
                }
            }
            None => false,
        };

        if let Err(e) = self.refresh_account(id, true).await {
            warnings.push(format!("Uploaded, but refreshing the listing failed: {}", e));
        }

        for warning in &warnings {
            self.notifier.notify(Notice::Warning(warning.clone()));
        }

        Ok(UploadOutcome {
            public_link: created.public_link(),
            file: created,
            shared,
            logged,
            warnings,
        })
    }

    /// Preview handle for an image from an account's last listing.
    pub async fn thumbnail(&self, id: &AccountId, file_id: &str) -> Result<PreviewHandle> {
        let mut account = self.account(id).await?;
        let file = cached_file(&account, file_id)?;
        self.client
            .fetch_thumbnail(&mut account, &file, &self.previews)
            .await
    }

    /// Fetch previews for every listed image of an account.
    ///
    /// Stops at the first error that affects the whole account. Returns the
    /// number of live previews afterwards.
    pub async fn prefetch_thumbnails(&self, id: &AccountId) -> Result<usize> {
        let mut account = self.account(id).await?;
        let images: Vec<DriveFile> = account
            .files_cache
            .iter()
            .flatten()
            .filter(|f| f.is_image())
            .cloned()
            .collect();

        let mut live = 0;
        for image in &images {
            match self
                .client
                .fetch_thumbnail(&mut account, image, &self.previews)
                .await
            {
                Ok(_) => live += 1,
                Err(e) if e.is_reauth_required() || e.is_cancelled() => return Err(e),
                Err(e) => debug!(file_id = %image.id, "Skipping preview: {}", e),
            }
        }

        Ok(live)
    }
}

fn cached_file(account: &Account, file_id: &str) -> Result<DriveFile> {
    account.cached_file(file_id).cloned().ok_or_else(|| {
        Error::NotFound(format!(
            "File '{}' is not in the listing of {}; refresh the account first",
            file_id, account.label
        ))
    })
}

/// File name safe to join onto a directory.
fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "download".to_string(),
        trimmed => trimmed.to_string(),
    }
}
