//! Authenticated request execution.

use std::sync::Arc;
use tracing::{debug, warn};

use drivehub_common::{Error, Result};

use crate::account::Account;
use crate::notify::{Notice, Notifier};
use crate::store::AccountStore;

use super::auth::TokenManager;
use super::transport::{ApiRequest, ApiResponse, HttpTransport};

/// Per-call behaviour of [`RequestExecutor::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Whether token renewal may show a consent prompt.
    pub allow_interactive: bool,
    /// Whether an auth failure triggers one renewal and one retry.
    pub retry_on_auth_error: bool,
}

impl CallOptions {
    /// User-initiated call: prompts allowed, one retry.
    pub fn interactive() -> Self {
        Self {
            allow_interactive: true,
            retry_on_auth_error: true,
        }
    }

    /// Background call: no prompts, one retry.
    pub fn background() -> Self {
        Self {
            allow_interactive: false,
            retry_on_auth_error: true,
        }
    }

    /// Prompts allowed or not depending on `allow_interactive`.
    pub fn with_interaction(allow_interactive: bool) -> Self {
        Self {
            allow_interactive,
            retry_on_auth_error: true,
        }
    }

    /// Disable the retry.
    pub fn without_retry(mut self) -> Self {
        self.retry_on_auth_error = false;
        self
    }
}

/// Check whether a failed response means the credential was rejected.
///
/// 401 always qualifies. Drive also answers 403 for scope and credential
/// problems; those are recognised by their message text. Other 403s
/// (quota, rate limits, file permissions) do not qualify.
pub fn is_auth_failure(status: u16, body: &str) -> bool {
    match status {
        401 => true,
        403 => body.contains("insufficient") || body.contains("Invalid Credentials"),
        _ => false,
    }
}

/// Sends Drive requests on behalf of an account.
///
/// Every call makes sure the account has a usable token first, attaches it,
/// and on an auth failure renews the token and retries exactly once.
/// Non-auth failures are returned unchanged and never retried.
pub struct RequestExecutor {
    tokens: Arc<TokenManager>,
    store: Arc<AccountStore>,
    transport: Arc<dyn HttpTransport>,
    notifier: Arc<dyn Notifier>,
}

impl RequestExecutor {
    /// Create an executor.
    pub fn new(
        tokens: Arc<TokenManager>,
        store: Arc<AccountStore>,
        transport: Arc<dyn HttpTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tokens,
            store,
            transport,
            notifier,
        }
    }

    /// Token manager used for renewals.
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Store that receives account changes.
    pub fn store(&self) -> &Arc<AccountStore> {
        &self.store
    }

    /// Underlying transport.
    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Issue `request` as `account`.
    ///
    /// # Postconditions
    /// - At most two HTTP attempts are made
    /// - A successful response clears `needs_reconnect`
    /// - A failed retry, or an auth failure without retry, sets `needs_reconnect`
    /// - A prompt cancelled while renewing for the retry leaves the token cleared
    ///
    /// # Errors
    /// - `ReauthRequired` / `UserCancelled` from token renewal
    /// - `RequestFailed` with the status and body of the failed response
    pub async fn call(
        &self,
        account: &mut Account,
        request: &ApiRequest,
        options: CallOptions,
    ) -> Result<ApiResponse> {
        if let Err(err) = self
            .tokens
            .ensure_valid(account, options.allow_interactive)
            .await
        {
            if err.is_reauth_required() {
                self.notify_reconnect(account);
            }
            return Err(err);
        }

        let response = self.send(account, request).await?;
        if response.is_success() {
            self.mark_healthy(account).await?;
            return Ok(response);
        }

        let body = response.text();
        if !is_auth_failure(response.status, &body) {
            debug!(
                account = %account.label,
                status = response.status,
                url = %request.url,
                "Request failed"
            );
            return Err(Error::RequestFailed {
                status: response.status,
                body,
            });
        }

        if !options.retry_on_auth_error {
            return Err(self.give_up(account, response.status, body).await);
        }

        debug!(
            account = %account.label,
            status = response.status,
            "Credential rejected, renewing and retrying once"
        );

        self.tokens.invalidate(account).await?;
        if let Err(err) = self
            .tokens
            .ensure_valid(account, options.allow_interactive)
            .await
        {
            if err.is_reauth_required() {
                self.notify_reconnect(account);
            }
            return Err(err);
        }

        let retried = self.send(account, request).await?;
        if retried.is_success() {
            self.mark_healthy(account).await?;
            return Ok(retried);
        }

        let body = retried.text();
        Err(self.give_up(account, retried.status, body).await)
    }

    async fn send(&self, account: &Account, request: &ApiRequest) -> Result<ApiResponse> {
        let token = account.access_token().ok_or_else(|| Error::ReauthRequired {
            account: account.label.clone(),
        })?;
        self.transport.send(request, Some(token)).await
    }

    async fn mark_healthy(&self, account: &mut Account) -> Result<()> {
        if account.needs_reconnect {
            account.needs_reconnect = false;
            self.store.save_account(account).await?;
        }
        Ok(())
    }

    /// Flag the account, tell the user, and build the error for the failed response.
    async fn give_up(&self, account: &mut Account, status: u16, body: String) -> Error {
        account.needs_reconnect = true;
        if let Err(e) = self.store.save_account(account).await {
            warn!(account = %account.label, "Failed to persist reconnect flag: {}", e);
        }
        self.notify_reconnect(account);
        Error::RequestFailed { status, body }
    }

    fn notify_reconnect(&self, account: &Account) {
        self.notifier.notify(Notice::ReconnectNeeded {
            account: account.label.clone(),
        });
    }
}
