//! stalkercheck - Stalker portal client and IPTV account checker
//!
//! Emulates a MAG set-top box against Stalker middleware portals, browses
//! their content, and verifies many accounts concurrently with per-account
//! exponential backoff.
//!
//! # Modules
//!
//! - `models` - Accounts, content items, check results
//! - `api` - Portal clients (Stalker session/content/links, Xtream)
//! - `check` - Expiry parsing, backoff and the batch orchestrator
//! - `stream` - Stream playability probing
//! - `store` - Account persistence
//! - `config` - Config file handling
//! - `cli` / `commands` - Command line surface

pub mod models;
pub mod api;
pub mod check;
pub mod stream;
pub mod store;
pub mod config;
pub mod logging;
pub mod cli;
pub mod commands;

// Re-export commonly used types
pub use models::{
    Account, AccountId, Category, CheckResult, CheckStatus, ContentItem, ContentKind,
    Credentials, ErrorKind, ItemType, VerificationMode,
};

pub use api::{ContentResolver, LinkResolver, PortalError, SessionManager, XtreamClient};
pub use check::{CheckEvent, CheckOrchestrator, CheckSettings};
pub use store::{AccountStore, JsonFileStore, MemoryStore};
