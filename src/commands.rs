//! CLI Command Handlers
//!
//! Implements all CLI commands on top of the portal client, the checker and
//! the account store. Each handler takes CLI args, the shared context and
//! Output, and returns ExitCode.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::link::episode_command;
use crate::api::{
    build_http_client, ContentResolver, DeviceIdentity, LinkResolver, PortalError, SessionManager,
};
use crate::check::{CheckEvent, CheckOrchestrator};
use crate::cli::{
    validate_mac, AddStalkerCmd, AddXtreamCmd, CategoriesCmd, CheckCmd, EpisodesCmd, ExitCode,
    IdentityCmd, ItemsCmd, LinkCmd, Output, SeasonsCmd,
};
use crate::config::Config;
use crate::models::{Account, AccountId, CheckResult, ContentKind, Credentials};
use crate::store::{AccountStore, JsonFileStore};
use crate::stream::HttpProbe;

// =============================================================================
// Shared Context
// =============================================================================

/// Configuration and store shared by every command
pub struct Context {
    pub config: Config,
    pub store: Arc<JsonFileStore>,
    /// Pooled client, configured with the portal request timeout
    pub http: reqwest::Client,
}

impl Context {
    /// Resolve config and store locations (flags win over the config file)
    pub fn new(config_path: Option<PathBuf>, store_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => Config::load_from(&path),
            None => Config::load(),
        };
        let store_path = store_path
            .or_else(|| config.store_path.clone())
            .or_else(JsonFileStore::default_path)
            .ok_or_else(|| anyhow::anyhow!("Could not determine account store path"))?;
        debug!(store = %store_path.display(), "using account store");
        let http = build_http_client(config.request_timeout())
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            store: Arc::new(JsonFileStore::new(store_path)),
            http,
        })
    }

    /// Look an account up by id, falling back to its display name
    async fn find_account(&self, key: &str) -> anyhow::Result<Option<Account>> {
        let accounts = self.store.accounts().await?;
        Ok(accounts
            .iter()
            .find(|a| a.id == key)
            .or_else(|| accounts.iter().find(|a| a.name == key))
            .cloned())
    }
}

fn portal_exit_code(error: &PortalError) -> ExitCode {
    match error {
        PortalError::HandshakeFailed(_) | PortalError::AuthInvalid(_) => ExitCode::AuthFailed,
        _ => ExitCode::NetworkError,
    }
}

/// Host part of a URL, or the raw input when it does not parse
fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.trim().to_string())
}

// =============================================================================
// Account Commands
// =============================================================================

pub async fn add_stalker_cmd(cmd: AddStalkerCmd, ctx: &Context, output: &Output) -> ExitCode {
    if let Err(e) = validate_mac(&cmd.mac) {
        return output.error(e, ExitCode::InvalidArgs);
    }

    let mac = cmd.mac.trim().to_uppercase();
    let id = format!("{}-{}", host_of(&cmd.portal_url), mac.replace(':', "").to_lowercase());
    let mut account = Account::stalker(id, cmd.portal_url.trim(), mac);
    if let Some(name) = cmd.name {
        account.name = name;
    }

    save_account(account, ctx, output).await
}

pub async fn add_xtream_cmd(cmd: AddXtreamCmd, ctx: &Context, output: &Output) -> ExitCode {
    if cmd.username.trim().is_empty() || cmd.password.is_empty() {
        return output.error("Username and password are required", ExitCode::InvalidArgs);
    }

    let id = format!("{}@{}", cmd.username.trim(), host_of(&cmd.server_url));
    let mut account = Account::xtream(
        id,
        cmd.server_url.trim(),
        cmd.username.trim(),
        cmd.password,
    );
    if let Some(name) = cmd.name {
        account.name = name;
    }

    save_account(account, ctx, output).await
}

async fn save_account(account: Account, ctx: &Context, output: &Output) -> ExitCode {
    match ctx.store.upsert(account.clone()).await {
        Ok(()) => {
            output.info(format!("Saved {}", account));
            if let Err(e) = output.print(&account) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e) => output.error(format!("Failed to save account: {:#}", e), ExitCode::Error),
    }
}

pub async fn accounts_cmd(ctx: &Context, output: &Output) -> ExitCode {
    match ctx.store.entries().await {
        Ok(entries) => {
            if let Err(e) = output.print(&entries) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e) => output.error(format!("Failed to read store: {:#}", e), ExitCode::Error),
    }
}

// =============================================================================
// Check Command
// =============================================================================

#[derive(Debug, Serialize)]
struct CheckRow {
    account_id: AccountId,
    #[serde(flatten)]
    result: CheckResult,
}

pub async fn check_cmd(cmd: CheckCmd, ctx: &Context, output: &Output) -> ExitCode {
    let mut accounts = match ctx.store.accounts().await {
        Ok(accounts) => accounts,
        Err(e) => return output.error(format!("Failed to read store: {:#}", e), ExitCode::Error),
    };

    if !cmd.accounts.is_empty() {
        let mut selected = Vec::with_capacity(cmd.accounts.len());
        for key in &cmd.accounts {
            match accounts.iter().find(|a| &a.id == key || &a.name == key) {
                Some(account) => selected.push(account.clone()),
                None => {
                    return output.error(format!("Unknown account: {}", key), ExitCode::AccountNotFound)
                }
            }
        }
        accounts = selected;
    }

    if accounts.is_empty() {
        return output.error("No accounts to check", ExitCode::AccountNotFound);
    }

    let http = ctx.http.clone();
    let orchestrator = Arc::new(CheckOrchestrator::new(
        http.clone(),
        ctx.config.check_settings(),
        Arc::clone(&ctx.store),
        Arc::new(HttpProbe::new(http)),
    ));

    // Ctrl-C stops dispatching and abandons in-flight checks
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling checks");
            interrupt.cancel();
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx, output.quiet || output.json));

    output.info(format!(
        "Checking {} account(s) [{:?}]",
        accounts.len(),
        cmd.mode()
    ));
    let rows: Vec<CheckRow> = if cmd.watch {
        let latest = orchestrator
            .watch(accounts.clone(), cmd.mode(), cancel, Some(tx))
            .await;
        accounts
            .iter()
            .filter_map(|a| {
                latest.get(&a.id).map(|result| CheckRow {
                    account_id: a.id.clone(),
                    result: result.clone(),
                })
            })
            .collect()
    } else {
        orchestrator
            .run_batch(accounts, cmd.mode(), cancel, Some(tx))
            .await
            .into_iter()
            .map(|(account_id, result)| CheckRow { account_id, result })
            .collect()
    };
    let _ = printer.await;

    if let Err(e) = output.print(&rows) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }

    if rows.iter().any(|r| r.result.counts_as_failure()) {
        ExitCode::CheckFailed
    } else {
        ExitCode::Success
    }
}

/// Human-readable progress on stderr until the orchestrator drops its sender
async fn print_events(mut rx: mpsc::UnboundedReceiver<CheckEvent>, silent: bool) {
    while let Some(event) = rx.recv().await {
        if silent {
            continue;
        }
        match event {
            CheckEvent::Finished { account_id, result } => {
                let detail = result
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .or_else(|| result.stream.as_ref().map(|s| s.message.clone()))
                    .unwrap_or_default();
                eprintln!("  {:<32} {:<14} {}", account_id, result.status, detail);
            }
            event @ CheckEvent::Progress { completed, total } => {
                let percent = event.fraction().unwrap_or(1.0) * 100.0;
                eprintln!("[{}/{}] {:.0}%", completed, total, percent);
            }
        }
    }
}

// =============================================================================
// Identity Command
// =============================================================================

pub async fn identity_cmd(cmd: IdentityCmd, output: &Output) -> ExitCode {
    if let Err(e) = validate_mac(&cmd.mac) {
        return output.error(e, ExitCode::InvalidArgs);
    }
    let identity = DeviceIdentity::derive(&cmd.mac);
    if let Err(e) = output.print(&identity) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}

// =============================================================================
// Browse Commands
// =============================================================================

/// Authenticated session for a stored Stalker account
async fn open_session(
    key: &str,
    ctx: &Context,
    output: &Output,
) -> Result<SessionManager, ExitCode> {
    let account = match ctx.find_account(key).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            return Err(output.error(format!("Unknown account: {}", key), ExitCode::AccountNotFound))
        }
        Err(e) => return Err(output.error(format!("Failed to read store: {:#}", e), ExitCode::Error)),
    };

    let Credentials::Stalker { mac } = &account.credentials else {
        return Err(output.error(
            format!("{} is not a Stalker portal account", account.id),
            ExitCode::InvalidArgs,
        ));
    };

    let session = SessionManager::new(
        ctx.http.clone(),
        &account.portal_url,
        DeviceIdentity::derive(mac),
        ctx.config.portal_settings(),
    );
    output.info(format!("Connecting to {}", session.portal_url()));

    let login = async {
        session.handshake().await?;
        session.get_profile().await
    };
    match login.await {
        Ok(_) => Ok(session),
        Err(e) => Err(output.error(format!("Login failed: {}", e), portal_exit_code(&e))),
    }
}

fn print_or_fail<T: Serialize>(result: Result<T, PortalError>, what: &str, output: &Output) -> ExitCode {
    match result {
        Ok(data) => {
            if let Err(e) = output.print(&data) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        Err(e) => output.error(format!("{} failed: {}", what, e), portal_exit_code(&e)),
    }
}

pub async fn categories_cmd(cmd: CategoriesCmd, ctx: &Context, output: &Output) -> ExitCode {
    let session = match open_session(&cmd.account, ctx, output).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let result = ContentResolver::new(&session)
        .list_categories(cmd.kind.into())
        .await;
    print_or_fail(result, "Category listing", output)
}

#[derive(Debug, Serialize)]
struct ItemsPage {
    page: u32,
    total_items: u64,
    items: Vec<crate::models::ContentItem>,
}

pub async fn items_cmd(cmd: ItemsCmd, ctx: &Context, output: &Output) -> ExitCode {
    let session = match open_session(&cmd.account, ctx, output).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let content = ContentResolver::new(&session);
    let kind: ContentKind = cmd.kind.into();

    match cmd.page {
        Some(page) => {
            let result = content
                .list_items_page(kind, &cmd.category, page.max(1))
                .await
                .map(|(items, total_items)| ItemsPage {
                    page: page.max(1),
                    total_items,
                    items,
                });
            print_or_fail(result, "Item listing", output)
        }
        None => {
            let result = content.fetch_all_pages(kind, &cmd.category).await;
            print_or_fail(result, "Item listing", output)
        }
    }
}

pub async fn seasons_cmd(cmd: SeasonsCmd, ctx: &Context, output: &Output) -> ExitCode {
    let session = match open_session(&cmd.account, ctx, output).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let result = ContentResolver::new(&session)
        .list_seasons(&cmd.series_id)
        .await;
    print_or_fail(result, "Season listing", output)
}

pub async fn episodes_cmd(cmd: EpisodesCmd, ctx: &Context, output: &Output) -> ExitCode {
    let session = match open_session(&cmd.account, ctx, output).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let result = ContentResolver::new(&session)
        .list_episodes(&cmd.series_id, &cmd.season_id)
        .await;
    print_or_fail(result, "Episode listing", output)
}

#[derive(Debug, Serialize)]
struct ResolvedLink {
    cmd: String,
    url: String,
}

pub async fn link_cmd(cmd: LinkCmd, ctx: &Context, output: &Output) -> ExitCode {
    let (command, kind) = match (&cmd.episode, &cmd.cmd) {
        (Some(id), _) => (episode_command(id), ContentKind::Series),
        (None, Some(raw)) => (raw.clone(), cmd.kind.into()),
        (None, None) => {
            return output.error("Either a command or --episode is required", ExitCode::InvalidArgs)
        }
    };

    let session = match open_session(&cmd.account, ctx, output).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let result = LinkResolver::new(&session)
        .create_link(&command, kind)
        .await
        .map(|url| ResolvedLink { cmd: command, url });
    print_or_fail(result, "Link resolution", output)
}
