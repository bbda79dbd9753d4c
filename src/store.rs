//! Account persistence
//!
//! The checker treats storage as a key-value store keyed by account id:
//! backoff state is read before a check and the result plus new backoff
//! state are written together after it. Nothing is written for checks that
//! did not finish.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::check::backoff::BackoffState;
use crate::models::{Account, CheckResult};

/// Persistence collaborator used by the orchestrator
pub trait AccountStore: Send + Sync + 'static {
    /// Every stored account
    fn accounts(&self) -> impl Future<Output = Result<Vec<Account>>> + Send;

    /// Backoff state for an account; unknown accounts start clean
    fn load_backoff(&self, account_id: &str) -> impl Future<Output = Result<BackoffState>> + Send;

    /// Persist a finished check and the backoff state it produced
    fn save_outcome(
        &self,
        account_id: &str,
        result: &CheckResult,
        backoff: BackoffState,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Account with its persisted check state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    pub account: Account,
    #[serde(default)]
    pub backoff: BackoffState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<CheckResult>,
}

impl StoredAccount {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            backoff: BackoffState::default(),
            last_result: None,
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Volatile store, mainly for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredAccount>>,
    order: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: Account) {
        self.insert_with_backoff(account, BackoffState::default())
            .await;
    }

    pub async fn insert_with_backoff(&self, account: Account, backoff: BackoffState) {
        let id = account.id.clone();
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(&id) {
            self.order.lock().await.push(id.clone());
        }
        let mut stored = StoredAccount::new(account);
        stored.backoff = backoff;
        entries.insert(id, stored);
    }

    pub async fn get(&self, account_id: &str) -> Option<StoredAccount> {
        self.entries.lock().await.get(account_id).cloned()
    }
}

impl AccountStore for MemoryStore {
    async fn accounts(&self) -> Result<Vec<Account>> {
        let entries = self.entries.lock().await;
        let order = self.order.lock().await;
        Ok(order
            .iter()
            .filter_map(|id| entries.get(id).map(|e| e.account.clone()))
            .collect())
    }

    async fn load_backoff(&self, account_id: &str) -> Result<BackoffState> {
        Ok(self
            .entries
            .lock()
            .await
            .get(account_id)
            .map(|e| e.backoff)
            .unwrap_or_default())
    }

    async fn save_outcome(
        &self,
        account_id: &str,
        result: &CheckResult,
        backoff: BackoffState,
    ) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(account_id)
            .with_context(|| format!("unknown account {}", account_id))?;
        entry.backoff = backoff;
        entry.last_result = Some(result.clone());
        Ok(())
    }
}

// =============================================================================
// JSON file store
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    accounts: Vec<StoredAccount>,
}

/// Single JSON document on disk, rewritten atomically on every save
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Default location (~/.local/share/stalkercheck/accounts.json)
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("stalkercheck").join("accounts.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add or replace an account, keeping its stored state when replacing
    pub async fn upsert(&self, account: Account) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        match doc.accounts.iter_mut().find(|e| e.account.id == account.id) {
            Some(existing) => existing.account = account,
            None => doc.accounts.push(StoredAccount::new(account)),
        }
        self.write(&doc).await
    }

    /// Stored accounts including their last results
    pub async fn entries(&self) -> Result<Vec<StoredAccount>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.accounts)
    }

    async fn read(&self) -> Result<StoreDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("corrupt store {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    async fn write(&self, doc: &StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

impl AccountStore for JsonFileStore {
    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|e| e.account)
            .collect())
    }

    async fn load_backoff(&self, account_id: &str) -> Result<BackoffState> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read()
            .await?
            .accounts
            .iter()
            .find(|e| e.account.id == account_id)
            .map(|e| e.backoff)
            .unwrap_or_default())
    }

    async fn save_outcome(
        &self,
        account_id: &str,
        result: &CheckResult,
        backoff: BackoffState,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        let entry = doc
            .accounts
            .iter_mut()
            .find(|e| e.account.id == account_id)
            .with_context(|| format!("unknown account {}", account_id))?;
        entry.backoff = backoff;
        entry.last_result = Some(result.clone());
        self.write(&doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckStatus;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store
            .insert(Account::stalker("a", "http://p", "00:1A:79:00:00:01"))
            .await;

        assert_eq!(store.load_backoff("a").await.unwrap(), BackoffState::default());
        assert_eq!(store.load_backoff("missing").await.unwrap(), BackoffState::default());

        let backoff = BackoffState {
            failure_count: 2,
            frozen_until: 99,
        };
        let result = CheckResult::new(CheckStatus::NetworkError, 10);
        store.save_outcome("a", &result, backoff).await.unwrap();

        let stored = store.get("a").await.unwrap();
        assert_eq!(stored.backoff, backoff);
        assert_eq!(stored.last_result, Some(result));
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("accounts.json");

        let store = JsonFileStore::new(&path);
        store
            .upsert(Account::xtream("x", "http://panel", "u", "p"))
            .await
            .unwrap();
        let backoff = BackoffState {
            failure_count: 1,
            frozen_until: 1234,
        };
        store
            .save_outcome("x", &CheckResult::new(CheckStatus::AuthFailed, 5), backoff)
            .await
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.accounts().await.unwrap().len(), 1);
        assert_eq!(reopened.load_backoff("x").await.unwrap(), backoff);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_unknown_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("s.json"));
        let err = store
            .save_outcome("nope", &CheckResult::new(CheckStatus::Active, 0), BackoffState::default())
            .await;
        assert!(err.is_err());
    }
}
