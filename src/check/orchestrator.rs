//! Batch account verification
//!
//! Each account runs `CheckingAPI -> [CheckingStream] -> backoff update`
//! strictly in sequence. Accounts run concurrently under a global cap, at
//! most one check per account at a time. Cancelled checks are reported as
//! `NotChecked` and leave the store untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, BackoffState, FreezeSchedule};
use super::expiry::extract_expiry;
use crate::api::session::MAG_USER_AGENT;
use crate::api::{
    ContentResolver, DeviceIdentity, LinkResolver, PortalError, PortalSettings, SessionManager,
    XtreamClient,
};
use crate::models::{
    Account, AccountId, CheckResult, CheckStatus, ContentKind, Credentials, ErrorKind,
    ErrorReport, StreamCheck, StreamStatus, VerificationMode,
};
use crate::store::AccountStore;
use crate::stream::StreamProber;

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct CheckSettings {
    /// Accounts checked simultaneously
    pub concurrency: usize,
    pub probe_budget: Duration,
    pub backoff: BackoffPolicy,
    pub portal: PortalSettings,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            probe_budget: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
            portal: PortalSettings::default(),
        }
    }
}

/// Progress notifications for the presentation layer
#[derive(Debug, Clone)]
pub enum CheckEvent {
    Progress { completed: usize, total: usize },
    Finished { account_id: AccountId, result: CheckResult },
}

impl CheckEvent {
    /// Completed fraction for progress events
    pub fn fraction(&self) -> Option<f64> {
        match self {
            CheckEvent::Progress { completed, total } if *total > 0 => {
                Some(*completed as f64 / *total as f64)
            }
            CheckEvent::Progress { .. } => Some(1.0),
            CheckEvent::Finished { .. } => None,
        }
    }
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn status_for(error: &PortalError) -> CheckStatus {
    match error.kind() {
        ErrorKind::HandshakeFailed | ErrorKind::AuthInvalid => CheckStatus::AuthFailed,
        ErrorKind::NetworkError | ErrorKind::StreamUnplayable => CheckStatus::NetworkError,
    }
}

fn not_checked(message: &str) -> CheckResult {
    let mut result = CheckResult::new(CheckStatus::NotChecked, unix_now());
    result.error = Some(ErrorReport {
        kind: ErrorKind::NetworkError,
        message: message.to_string(),
    });
    result
}

/// Drives two-tier checks with per-account backoff
pub struct CheckOrchestrator<S, P> {
    http: reqwest::Client,
    settings: CheckSettings,
    store: Arc<S>,
    prober: Arc<P>,
    account_locks: StdMutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl<S: AccountStore, P: StreamProber> CheckOrchestrator<S, P> {
    pub fn new(
        http: reqwest::Client,
        settings: CheckSettings,
        store: Arc<S>,
        prober: Arc<P>,
    ) -> Self {
        Self {
            http,
            settings,
            store,
            prober,
            account_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .account_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, account_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .account_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Map entry plus ours means nobody else is queued
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(account_id);
        }
    }

    // -------------------------------------------------------------------------
    // Single account
    // -------------------------------------------------------------------------

    /// Check one account, queueing behind any check already running for it
    pub async fn check_account(
        &self,
        account: &Account,
        mode: VerificationMode,
        cancel: &CancellationToken,
    ) -> CheckResult {
        let lock = self.account_lock(&account.id);
        let result = {
            let guard = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                guard = lock.lock() => Some(guard),
            };
            match guard {
                Some(_guard) => self.check_exclusive(account, mode, cancel).await,
                None => not_checked("cancelled while queued"),
            }
        };
        self.release_lock(&account.id, lock);
        result
    }

    async fn check_exclusive(
        &self,
        account: &Account,
        mode: VerificationMode,
        cancel: &CancellationToken,
    ) -> CheckResult {
        let backoff = match self.store.load_backoff(&account.id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(account = %account.id, error = %e, "could not load backoff state, assuming clean");
                BackoffState::default()
            }
        };

        let now = unix_now();
        if backoff.is_frozen(now) {
            info!(
                account = %account.id,
                remaining_secs = backoff.remaining(now).as_secs(),
                "account frozen, skipping"
            );
            let mut result = CheckResult::new(CheckStatus::Frozen, now);
            result.frozen_until = Some(backoff.frozen_until);
            return result;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.run_check(account, mode) => Some(result),
        };
        let Some(mut result) = outcome else {
            debug!(account = %account.id, "check cancelled in flight");
            return not_checked("cancelled");
        };

        let next = if result.counts_as_failure() {
            let next = self.settings.backoff.on_failure(&backoff, unix_now());
            info!(
                account = %account.id,
                failures = next.failure_count,
                frozen_until = next.frozen_until,
                "check failed, backing off"
            );
            next
        } else {
            self.settings.backoff.on_success()
        };
        if next.frozen_until > 0 {
            result.frozen_until = Some(next.frozen_until);
        }

        if let Err(e) = self.store.save_outcome(&account.id, &result, next).await {
            warn!(account = %account.id, error = %e, "could not persist check result");
        }
        result
    }

    async fn run_check(&self, account: &Account, mode: VerificationMode) -> CheckResult {
        match &account.credentials {
            Credentials::Stalker { mac } => self.check_stalker(account, mac, mode).await,
            Credentials::Xtream { username, password } => {
                self.check_xtream(account, username, password, mode).await
            }
        }
    }

    async fn check_stalker(
        &self,
        account: &Account,
        mac: &str,
        mode: VerificationMode,
    ) -> CheckResult {
        let session = SessionManager::new(
            self.http.clone(),
            &account.portal_url,
            DeviceIdentity::derive(mac),
            self.settings.portal.clone(),
        );

        let api = async {
            session.handshake().await?;
            session.get_profile().await
        };
        let profile = match api.await {
            Ok(profile) => profile,
            Err(e) => {
                info!(account = %account.id, error = %e, "API check failed");
                return CheckResult::failed(status_for(&e), e.report(), unix_now());
            }
        };

        let expiry = extract_expiry(&profile);
        let mut result = CheckResult::new(api_status(expiry), unix_now());
        result.expiry = expiry;
        result.profile = Some(profile);

        if mode == VerificationMode::ApiAndStream {
            result.stream = Some(self.verify_stalker_stream(&session).await);
        }
        result
    }

    async fn verify_stalker_stream(&self, session: &SessionManager) -> StreamCheck {
        let url = match first_channel_link(session).await {
            Ok(Some(url)) => url,
            Ok(None) => return verified_without_streams(),
            Err(e) => return unplayable(None, format!("link resolution failed: {}", e)),
        };
        let headers = vec![("User-Agent".to_string(), MAG_USER_AGENT.to_string())];
        self.probe(url, &headers).await
    }

    async fn check_xtream(
        &self,
        account: &Account,
        username: &str,
        password: &str,
        mode: VerificationMode,
    ) -> CheckResult {
        let client = XtreamClient::new(self.http.clone(), &account.portal_url, username, password);

        let info = match client.account_info().await {
            Ok(info) => info,
            Err(e) => {
                info!(account = %account.id, error = %e, "API check failed");
                return CheckResult::failed(status_for(&e), e.report(), unix_now());
            }
        };

        let expiry = extract_expiry(&info.user_info);
        let status = if info.marked_expired() {
            CheckStatus::Expired
        } else {
            api_status(expiry)
        };
        let mut result = CheckResult::new(status, unix_now());
        result.expiry = expiry;
        result.profile = Some(info.profile());
        result.counts = Some(client.counts().await);

        if mode == VerificationMode::ApiAndStream {
            let stream = match client.first_stream_id().await {
                Ok(Some(id)) => self.probe(client.stream_url(&id), &client.stream_headers()).await,
                Ok(None) => verified_without_streams(),
                Err(e) => unplayable(None, format!("stream listing failed: {}", e)),
            };
            result.stream = Some(stream);
        }
        result
    }

    async fn probe(&self, url: String, headers: &[(String, String)]) -> StreamCheck {
        let report = self
            .prober
            .probe(&url, headers, self.settings.probe_budget)
            .await;
        StreamCheck {
            status: if report.playable {
                StreamStatus::Verified
            } else {
                StreamStatus::StreamUnplayable
            },
            url: Some(url),
            message: report.message,
            metrics: report.metrics,
        }
    }

    // -------------------------------------------------------------------------
    // Batches
    // -------------------------------------------------------------------------

    /// Check many accounts; one result per requested account, in request order
    pub async fn run_batch(
        self: &Arc<Self>,
        accounts: Vec<Account>,
        mode: VerificationMode,
        cancel: CancellationToken,
        events: Option<mpsc::UnboundedSender<CheckEvent>>,
    ) -> Vec<(AccountId, CheckResult)> {
        let total = accounts.len();
        let ids: Vec<AccountId> = accounts.iter().map(|a| a.id.clone()).collect();
        let mut results: Vec<Option<CheckResult>> = vec![None; total];

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        info!(total, ?mode, "starting batch");
        for (index, account) in accounts.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let this = Arc::clone(self);
            let cancel = cancel.clone();
            let events = events.clone();
            let completed = Arc::clone(&completed);
            tasks.spawn(async move {
                let _permit = permit;
                let result = this.check_account(&account, mode, &cancel).await;
                report(&events, &completed, total, &account.id, &result);
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "check task failed"),
            }
        }

        if cancel.is_cancelled() {
            info!("batch cancelled");
        }
        ids.into_iter()
            .zip(results)
            .map(|(id, result)| {
                let result = match result {
                    Some(result) => result,
                    None => {
                        let result = not_checked("not dispatched");
                        report(&events, &completed, total, &id, &result);
                        result
                    }
                };
                (id, result)
            })
            .collect()
    }

    /// Run a batch, then re-check frozen accounts as they thaw until cancelled
    pub async fn watch(
        self: &Arc<Self>,
        accounts: Vec<Account>,
        mode: VerificationMode,
        cancel: CancellationToken,
        events: Option<mpsc::UnboundedSender<CheckEvent>>,
    ) -> HashMap<AccountId, CheckResult> {
        let by_id: HashMap<AccountId, Account> =
            accounts.iter().map(|a| (a.id.clone(), a.clone())).collect();
        let mut latest = HashMap::new();
        let mut schedule = FreezeSchedule::new();
        let mut pending = accounts;

        loop {
            let results = self
                .run_batch(pending, mode, cancel.clone(), events.clone())
                .await;
            for (id, result) in results {
                if let Some(until) = result.frozen_until.filter(|t| *t > unix_now()) {
                    schedule.push(id.clone(), until);
                }
                latest.insert(id, result);
            }

            if cancel.is_cancelled() || schedule.is_empty() {
                return latest;
            }
            debug!(frozen = schedule.len(), next = ?schedule.next_thaw(), "waiting for thaw");

            let due = tokio::select! {
                _ = cancel.cancelled() => return latest,
                due = schedule.wait_due() => due,
            };
            pending = due
                .into_iter()
                .filter_map(|id| by_id.get(&id).cloned())
                .collect();
        }
    }
}

fn report(
    events: &Option<mpsc::UnboundedSender<CheckEvent>>,
    completed: &AtomicUsize,
    total: usize,
    account_id: &str,
    result: &CheckResult,
) {
    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(tx) = events {
        let _ = tx.send(CheckEvent::Finished {
            account_id: account_id.to_string(),
            result: result.clone(),
        });
        let _ = tx.send(CheckEvent::Progress {
            completed: done,
            total,
        });
    }
}

/// Expired overrides Active when the expiry is in the past
fn api_status(expiry: Option<i64>) -> CheckStatus {
    match expiry {
        Some(ts) if ts < unix_now() => CheckStatus::Expired,
        _ => CheckStatus::Active,
    }
}

/// First live channel with a command, resolved to a playable URL
async fn first_channel_link(session: &SessionManager) -> Result<Option<String>, PortalError> {
    let content = ContentResolver::new(session);
    let categories = content.list_categories(ContentKind::Live).await?;
    let Some(category) = categories.first() else {
        return Ok(None);
    };
    let (items, _) = content
        .list_items_page(ContentKind::Live, &category.id, 1)
        .await?;
    let Some(item) = items.into_iter().find(|i| i.has_cmd()) else {
        return Ok(None);
    };
    let url = LinkResolver::new(session)
        .create_link(&item.cmd, ContentKind::Live)
        .await?;
    Ok(Some(url))
}

fn verified_without_streams() -> StreamCheck {
    StreamCheck {
        status: StreamStatus::Verified,
        url: None,
        message: "No streams to test".to_string(),
        metrics: None,
    }
}

fn unplayable(url: Option<String>, message: String) -> StreamCheck {
    StreamCheck {
        status: StreamStatus::StreamUnplayable,
        url,
        message,
        metrics: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_status_expiry_override() {
        assert_eq!(api_status(None), CheckStatus::Active);
        assert_eq!(api_status(Some(1_700_000_000)), CheckStatus::Expired);
        assert_eq!(api_status(Some(unix_now() + 86_400)), CheckStatus::Active);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&PortalError::HandshakeFailed("x".into())),
            CheckStatus::AuthFailed
        );
        assert_eq!(
            status_for(&PortalError::AuthInvalid("x".into())),
            CheckStatus::AuthFailed
        );
        assert_eq!(
            status_for(&PortalError::Network("x".into())),
            CheckStatus::NetworkError
        );
    }

    #[test]
    fn test_progress_fraction() {
        let event = CheckEvent::Progress {
            completed: 1,
            total: 4,
        };
        assert_eq!(event.fraction(), Some(0.25));
    }
}
