//! Token lifecycle for linked accounts.
//!
//! The identity provider never hands out refresh tokens, so every renewal
//! asks it again: first silently, then (when the caller allows it) with a
//! consent prompt. Each attempt is bounded by a timeout because a closed or
//! stalled prompt would otherwise never complete.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use drivehub_common::{AccountId, Error, Result};

use crate::account::{AccessToken, Account};
use crate::store::AccountStore;

/// How the identity provider may interact with the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// No visible prompt; fails if consent is needed.
    Silent,
    /// Force the consent screen.
    Consent,
}

/// A request for a new bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// Prompt behaviour.
    pub prompt: Prompt,
    /// Account to preselect. Only email addresses are passed on.
    pub login_hint: Option<String>,
}

impl TokenRequest {
    /// Silent renewal for the identity named by `hint`.
    pub fn silent(hint: Option<&str>) -> Self {
        Self::with_prompt(Prompt::Silent, hint)
    }

    /// Interactive consent for the identity named by `hint`.
    pub fn consent(hint: Option<&str>) -> Self {
        Self::with_prompt(Prompt::Consent, hint)
    }

    fn with_prompt(prompt: Prompt, hint: Option<&str>) -> Self {
        Self {
            prompt,
            login_hint: hint.filter(|h| h.contains('@')).map(str::to_string),
        }
    }
}

/// A token issued by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Bearer token.
    pub access_token: String,
    /// Lifetime relative to issue time.
    pub expires_in: std::time::Duration,
}

impl TokenGrant {
    /// Create a grant.
    pub fn new(access_token: impl Into<String>, expires_in: std::time::Duration) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
        }
    }

    /// Convert to a credential with an absolute expiry computed from now.
    pub fn into_credential(self) -> AccessToken {
        let lifetime = Duration::from_std(self.expires_in).unwrap_or_else(|_| Duration::hours(1));
        AccessToken::new(self.access_token, Utc::now() + lifetime)
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of bearer tokens.
///
/// Implementations report a dismissed prompt as [`Error::UserCancelled`] and
/// any other refusal as [`Error::Authentication`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Obtain a token for `request`.
    async fn request_token(&self, request: &TokenRequest) -> Result<TokenGrant>;
}

/// Timing rules for token renewal.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    /// Tokens this close to expiry are renewed before use.
    pub expiry_margin: Duration,
    /// Upper bound for a single acquisition attempt.
    pub acquisition_timeout: std::time::Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            expiry_margin: Duration::seconds(30),
            acquisition_timeout: std::time::Duration::from_secs(45),
        }
    }
}

/// Keeps per-account bearer tokens usable.
///
/// Renewals for one account are serialized: a caller that finds another
/// renewal in flight waits for it and reuses its token instead of opening a
/// second prompt.
pub struct TokenManager {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<AccountStore>,
    policy: TokenPolicy,
    gates: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl TokenManager {
    /// Create a token manager.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<AccountStore>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            identity,
            store,
            policy,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// The timing rules in effect.
    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Check whether the account's token can be used right now.
    pub fn is_fresh(&self, account: &Account) -> bool {
        account.has_fresh_token(Utc::now(), self.policy.expiry_margin)
    }

    /// Make sure `account` carries a usable token.
    ///
    /// # Postconditions
    /// - On success the account holds a fresh token and `needs_reconnect` is cleared if renewed
    /// - Every change to the account is persisted
    ///
    /// # Errors
    /// - `ReauthRequired` when silent renewal fails and no prompt is allowed,
    ///   or when the account is flagged for reconnection
    /// - `UserCancelled` when the consent prompt is dismissed or times out
    pub async fn ensure_valid(&self, account: &mut Account, allow_interactive: bool) -> Result<()> {
        if self.is_fresh(account) {
            return Ok(());
        }

        let gate = self.gate(&account.id).await;
        let _guard = gate.lock().await;

        // Another caller may have renewed this account while we waited.
        if let Some(stored) = self.store.get(&account.id).await {
            if let Some(credential) = stored.credential().filter(|_| self.is_fresh(&stored)) {
                debug!(account = %account.label, "Reusing token renewed by a concurrent caller");
                account.set_credential(credential.clone());
                account.needs_reconnect = stored.needs_reconnect;
                return Ok(());
            }
        }

        if !account.needs_reconnect {
            match self.acquire(TokenRequest::silent(account.login_hint())).await {
                Ok(grant) => {
                    debug!(account = %account.label, "Silent token renewal succeeded");
                    return self.apply_grant(account, grant).await;
                }
                Err(e) => debug!(account = %account.label, "Silent token renewal failed: {}", e),
            }
        }

        if !allow_interactive {
            return Err(self.flag_reconnect(account).await);
        }

        match self.acquire(TokenRequest::consent(account.login_hint())).await {
            Ok(grant) => {
                info!(account = %account.label, "Interactive token renewal succeeded");
                self.apply_grant(account, grant).await
            }
            Err(Error::UserCancelled) => Err(Error::UserCancelled),
            Err(e) => {
                warn!(account = %account.label, "Interactive token renewal failed: {}", e);
                Err(self.flag_reconnect(account).await)
            }
        }
    }

    /// Force a consent prompt for an existing account and store the result.
    ///
    /// A cancelled prompt leaves the account untouched.
    pub async fn reconnect(&self, account: &mut Account) -> Result<()> {
        let gate = self.gate(&account.id).await;
        let _guard = gate.lock().await;

        let grant = self
            .acquire(TokenRequest::consent(account.login_hint()))
            .await?;
        self.apply_grant(account, grant).await
    }

    /// Obtain a token for an identity that is not linked yet.
    pub async fn authorize_new(&self) -> Result<TokenGrant> {
        self.acquire(TokenRequest::consent(None)).await
    }

    /// Discard the account's token, e.g. after the API rejected it.
    pub async fn invalidate(&self, account: &mut Account) -> Result<()> {
        account.clear_credential();
        self.store.save_account(account).await?;
        Ok(())
    }

    /// One bounded acquisition attempt. A timeout counts as a cancelled prompt.
    async fn acquire(&self, request: TokenRequest) -> Result<TokenGrant> {
        match tokio::time::timeout(
            self.policy.acquisition_timeout,
            self.identity.request_token(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    prompt = ?request.prompt,
                    "Token acquisition timed out after {:?}",
                    self.policy.acquisition_timeout
                );
                Err(Error::UserCancelled)
            }
        }
    }

    async fn apply_grant(&self, account: &mut Account, grant: TokenGrant) -> Result<()> {
        account.set_credential(grant.into_credential());
        account.needs_reconnect = false;
        self.store.save_account(account).await?;
        Ok(())
    }

    /// Mark the account for reconnection and build the matching error.
    async fn flag_reconnect(&self, account: &mut Account) -> Error {
        account.needs_reconnect = true;
        if let Err(e) = self.store.save_account(account).await {
            warn!(account = %account.label, "Failed to persist reconnect flag: {}", e);
        }
        Error::ReauthRequired {
            account: account.label.clone(),
        }
    }

    /// Drop the per-account renewal gate of a removed account.
    pub async fn forget(&self, id: &AccountId) {
        self.gates.lock().await.remove(id);
    }

    async fn gate(&self, id: &AccountId) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().await;
        gates.entry(id.clone()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdrive::scripted::{ScriptedGrant, ScriptedIdentityProvider};
    use crate::memory::MemoryBackend;
    use proptest::prelude::*;

    fn grant(token: &str) -> ScriptedGrant {
        ScriptedGrant::Grant(TokenGrant::new(token, std::time::Duration::from_secs(3600)))
    }

    async fn setup(
        identity: Arc<ScriptedIdentityProvider>,
        policy: TokenPolicy,
    ) -> (Arc<AccountStore>, TokenManager) {
        let store = Arc::new(AccountStore::load(Arc::new(MemoryBackend::new())).await);
        let manager = TokenManager::new(identity, store.clone(), policy);
        (store, manager)
    }

    fn expired_account(label: &str) -> Account {
        let mut account = Account::new(label);
        account.set_credential(AccessToken::new(
            "old",
            Utc::now() - Duration::milliseconds(1000),
        ));
        account
    }

    #[test]
    fn test_hint_only_for_email_labels() {
        assert_eq!(TokenRequest::silent(Some("Account 2")).login_hint, None);
        assert_eq!(
            TokenRequest::consent(Some("me@example.com")).login_hint.as_deref(),
            Some("me@example.com")
        );
    }

    #[tokio::test]
    async fn test_fresh_token_makes_no_request() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        let (_, manager) = setup(identity.clone(), TokenPolicy::default()).await;

        let mut account = Account::new("me@example.com");
        account.set_credential(AccessToken::new("t", Utc::now() + Duration::minutes(10)));

        manager.ensure_valid(&mut account, true).await.unwrap();

        assert_eq!(identity.request_count().await, 0);
        assert_eq!(account.access_token(), Some("t"));
    }

    #[tokio::test]
    async fn test_silent_renewal_with_hint() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        identity.push_silent(grant("renewed")).await;
        let (store, manager) = setup(identity.clone(), TokenPolicy::default()).await;

        let mut account = expired_account("me@example.com");
        store.insert(account.clone()).await.unwrap();

        manager.ensure_valid(&mut account, false).await.unwrap();

        assert_eq!(account.access_token(), Some("renewed"));
        let requests = identity.requests().await;
        assert_eq!(requests, vec![TokenRequest::silent(Some("me@example.com"))]);
        assert_eq!(
            store.get(&account.id).await.unwrap().access_token(),
            Some("renewed")
        );
    }

    #[tokio::test]
    async fn test_silent_failure_without_interaction_requires_reauth() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        identity
            .push_silent(ScriptedGrant::Fail("interaction_required".to_string()))
            .await;
        let (store, manager) = setup(identity.clone(), TokenPolicy::default()).await;

        let mut account = expired_account("me@example.com");
        store.insert(account.clone()).await.unwrap();

        let err = manager.ensure_valid(&mut account, false).await.unwrap_err();

        assert!(err.is_reauth_required());
        assert!(account.needs_reconnect);
        assert!(store.get(&account.id).await.unwrap().needs_reconnect);
        let requests = identity.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, Prompt::Silent);
    }

    #[tokio::test]
    async fn test_interactive_fallback_clears_reconnect_flag() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        identity
            .push_silent(ScriptedGrant::Fail("login_required".to_string()))
            .await;
        identity.push_consent(grant("consented")).await;
        let (_, manager) = setup(identity.clone(), TokenPolicy::default()).await;

        let mut account = expired_account("me@example.com");

        manager.ensure_valid(&mut account, true).await.unwrap();

        assert_eq!(account.access_token(), Some("consented"));
        assert!(!account.needs_reconnect);
        let prompts: Vec<Prompt> = identity.requests().await.iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec![Prompt::Silent, Prompt::Consent]);
    }

    #[tokio::test]
    async fn test_interactive_failure_flags_reconnect() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        identity
            .push_silent(ScriptedGrant::Fail("login_required".to_string()))
            .await;
        identity
            .push_consent(ScriptedGrant::Fail("server_error".to_string()))
            .await;
        let (store, manager) = setup(identity.clone(), TokenPolicy::default()).await;

        let mut account = expired_account("me@example.com");
        store.insert(account.clone()).await.unwrap();

        let err = manager.ensure_valid(&mut account, true).await.unwrap_err();

        assert!(err.is_reauth_required());
        assert!(account.needs_reconnect);
        assert!(store.get(&account.id).await.unwrap().needs_reconnect);
        let prompts: Vec<Prompt> = identity.requests().await.iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec![Prompt::Silent, Prompt::Consent]);
    }

    #[tokio::test]
    async fn test_cancelled_prompt_is_distinguishable() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        identity
            .push_silent(ScriptedGrant::Fail("login_required".to_string()))
            .await;
        identity.push_consent(ScriptedGrant::Cancel).await;
        let (_, manager) = setup(identity, TokenPolicy::default()).await;

        let mut account = expired_account("me@example.com");
        let err = manager.ensure_valid(&mut account, true).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(!account.needs_reconnect);
        assert_eq!(account.access_token(), Some("old"));
    }

    #[tokio::test]
    async fn test_flagged_account_skips_silent_attempt() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        let (_, manager) = setup(identity.clone(), TokenPolicy::default()).await;

        let mut account = expired_account("me@example.com");
        account.needs_reconnect = true;

        let err = manager.ensure_valid(&mut account, false).await.unwrap_err();

        assert!(err.is_reauth_required());
        assert_eq!(identity.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_stalled_prompt_times_out() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        identity.push_silent(ScriptedGrant::Hang).await;
        identity.push_consent(ScriptedGrant::Hang).await;
        let policy = TokenPolicy {
            acquisition_timeout: std::time::Duration::from_millis(50),
            ..TokenPolicy::default()
        };
        let (_, manager) = setup(identity, policy).await;

        let mut account = expired_account("me@example.com");
        let err = manager.ensure_valid(&mut account, true).await.unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_renewals_share_one_prompt() {
        let identity = Arc::new(
            ScriptedIdentityProvider::new().with_delay(std::time::Duration::from_millis(50)),
        );
        identity.push_silent(grant("shared")).await;
        let (store, manager) = setup(identity.clone(), TokenPolicy::default()).await;

        let account = expired_account("me@example.com");
        store.insert(account.clone()).await.unwrap();

        let mut first = account.clone();
        let mut second = account.clone();
        let (a, b) = futures::join!(
            manager.ensure_valid(&mut first, false),
            manager.ensure_valid(&mut second, false)
        );

        a.unwrap();
        b.unwrap();
        assert_eq!(identity.request_count().await, 1);
        assert_eq!(first.access_token(), Some("shared"));
        assert_eq!(second.access_token(), Some("shared"));
    }

    #[tokio::test]
    async fn test_invalidate_clears_stored_token() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        let (store, manager) = setup(identity, TokenPolicy::default()).await;

        let mut account = Account::new("me@example.com");
        account.set_credential(AccessToken::new("t", Utc::now() + Duration::minutes(10)));
        store.insert(account.clone()).await.unwrap();

        manager.invalidate(&mut account).await.unwrap();

        assert!(account.access_token().is_none());
        assert!(store.get(&account.id).await.unwrap().access_token().is_none());
    }

    #[tokio::test]
    async fn test_forget_drops_renewal_gate() {
        let identity = Arc::new(ScriptedIdentityProvider::new());
        identity.push_silent(grant("renewed")).await;
        let (_, manager) = setup(identity, TokenPolicy::default()).await;

        let mut account = expired_account("me@example.com");
        manager.ensure_valid(&mut account, false).await.unwrap();
        assert_eq!(manager.gates.lock().await.len(), 1);

        manager.forget(&account.id).await;
        assert!(manager.gates.lock().await.is_empty());
    }

    proptest! {
        #[test]
        fn prop_no_renewal_outside_margin(seconds_left in 31i64..86_400) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let identity = Arc::new(ScriptedIdentityProvider::new());
                let (_, manager) = setup(identity.clone(), TokenPolicy::default()).await;

                let mut account = Account::new("me@example.com");
                account.set_credential(AccessToken::new(
                    "t",
                    Utc::now() + Duration::seconds(seconds_left),
                ));

                manager.ensure_valid(&mut account, false).await.unwrap();
                assert_eq!(identity.request_count().await, 0);
            });
        }
    }
}
