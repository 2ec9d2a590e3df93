//! Durable account store.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use drivehub_common::{AccountId, Error, Result};

use crate::account::Account;

/// Backend holding the serialized account record.
///
/// The record is one JSON array of accounts. Backends only move bytes; the
/// store owns encoding and the fallback for unreadable data.
#[async_trait]
pub trait AccountBackend: Send + Sync {
    /// Get the backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read the stored record. `None` if nothing was ever written.
    async fn read(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored record.
    async fn write(&self, data: &[u8]) -> Result<()>;
}

/// The set of linked accounts, persisted on every mutation.
///
/// Loaded once at startup. Every method that changes an account writes the
/// whole record through to the backend before returning.
pub struct AccountStore {
    backend: Arc<dyn AccountBackend>,
    accounts: RwLock<Vec<Account>>,
}

impl AccountStore {
    /// Load the store from a backend.
    ///
    /// Missing or corrupt data yields an empty store instead of an error.
    pub async fn load(backend: Arc<dyn AccountBackend>) -> Self {
        let accounts = match backend.read().await {
            Ok(Some(data)) => match serde_json::from_slice::<Vec<Account>>(&data) {
                Ok(accounts) => accounts,
                Err(e) => {
                    warn!(backend = backend.name(), "Discarding unreadable account record: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(backend = backend.name(), "Failed to read account record: {}", e);
                Vec::new()
            }
        };

        debug!(count = accounts.len(), "Loaded accounts");

        Self {
            backend,
            accounts: RwLock::new(accounts),
        }
    }

    /// Snapshot of every account in insertion order.
    pub async fn list(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    /// Number of linked accounts.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Check if no account is linked.
    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// Copy of one account.
    pub async fn get(&self, id: &AccountId) -> Option<Account> {
        self.accounts
            .read()
            .await
            .iter()
            .find(|a| &a.id == id)
            .cloned()
    }

    /// Find an account by id or by label.
    pub async fn find(&self, key: &str) -> Option<Account> {
        let accounts = self.accounts.read().await;
        accounts
            .iter()
            .find(|a| a.id.as_str() == key)
            .or_else(|| accounts.iter().find(|a| a.label == key))
            .cloned()
    }

    /// Append a new account.
    ///
    /// # Errors
    /// - An account with the same id already exists
    /// - Persisting failed
    pub async fn insert(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.iter().any(|a| a.id == account.id) {
            return Err(Error::InvalidInput(format!(
                "Account '{}' already exists",
                account.id
            )));
        }
        accounts.push(account);
        self.persist(&accounts).await
    }

    /// Replace the stored copy of `account`.
    ///
    /// Returns `false` without writing when the account is not in the store,
    /// which happens while an account is still being linked or after it was removed.
    pub async fn save_account(&self, account: &Account) -> Result<bool> {
        let mut accounts = self.accounts.write().await;
        let Some(slot) = accounts.iter_mut().find(|a| a.id == account.id) else {
            return Ok(false);
        };
        *slot = account.clone();
        self.persist(&accounts).await?;
        Ok(true)
    }

    /// Mutate one account in place and persist.
    ///
    /// # Errors
    /// - Account not found
    /// - Persisting failed
    pub async fn update<F, T>(&self, id: &AccountId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Account) -> T,
    {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| Error::NotFound(format!("Account '{}'", id)))?;
        let result = f(account);
        self.persist(&accounts).await?;
        Ok(result)
    }

    /// Remove an account and return its last state.
    ///
    /// # Errors
    /// - Account not found
    /// - Persisting failed
    pub async fn remove(&self, id: &AccountId) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        let index = accounts
            .iter()
            .position(|a| &a.id == id)
            .ok_or_else(|| Error::NotFound(format!("Account '{}'", id)))?;
        let removed = accounts.remove(index);
        self.persist(&accounts).await?;
        Ok(removed)
    }

    async fn persist(&self, accounts: &[Account]) -> Result<()> {
        let data = serde_json::to_vec(accounts)?;
        self.backend.write(&data).await
    }
}
