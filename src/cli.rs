//! CLI - Command Line Interface for stalkercheck
//!
//! Every operation is scriptable and all output is JSON-parseable.
//!
//! # Examples
//!
//! ```bash
//! # Register accounts
//! stalkercheck add-stalker http://portal.tv/c/ 00:1A:79:12:34:56 --name living-room
//! stalkercheck add-xtream http://panel.tv:8080 user pass
//!
//! # Check everything, including a stream probe
//! stalkercheck check --stream --json
//!
//! # Browse a portal
//! stalkercheck categories living-room --kind series
//! stalkercheck link living-room "ffmpeg http://localhost/ch/1"
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::models::{ContentKind, VerificationMode};

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Account not found in the store
    AccountNotFound = 4,
    /// Portal rejected the credentials
    AuthFailed = 5,
    /// At least one checked account is not usable
    CheckFailed = 6,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// stalkercheck - Stalker portal client and IPTV account checker
#[derive(Parser, Debug)]
#[command(
    name = "stalkercheck",
    version,
    about = "Stalker portal client and IPTV account checker",
    long_about = "Talks to MAG/Stalker middleware portals and Xtream panels, \
                  verifies accounts concurrently with per-account backoff, \
                  and browses portal content.",
    after_help = "EXAMPLES:\n\
                  stalkercheck add-stalker http://portal.tv/c/ 00:1A:79:00:00:01\n\
                  stalkercheck check --stream          Check all stored accounts\n\
                  stalkercheck categories <id> -k live List live TV genres"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Path to the account store (overrides config)
    #[arg(long, short = 's', global = true)]
    pub store: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a MAG/Stalker portal account
    #[command(visible_alias = "as")]
    AddStalker(AddStalkerCmd),

    /// Register an Xtream Codes account
    #[command(visible_alias = "ax")]
    AddXtream(AddXtreamCmd),

    /// List stored accounts and their last results
    #[command(visible_alias = "ls")]
    Accounts,

    /// Check stored accounts
    #[command(visible_alias = "c")]
    Check(CheckCmd),

    /// Show the device identity derived from a MAC address
    Identity(IdentityCmd),

    /// List portal categories
    #[command(visible_alias = "cat")]
    Categories(CategoriesCmd),

    /// List items in a category
    Items(ItemsCmd),

    /// List seasons of a series
    Seasons(SeasonsCmd),

    /// List episodes of a season
    Episodes(EpisodesCmd),

    /// Resolve a playable URL for a content command
    Link(LinkCmd),
}

// =============================================================================
// Account Commands
// =============================================================================

#[derive(Args, Debug)]
pub struct AddStalkerCmd {
    /// Portal URL (client paths like /c/ are accepted)
    pub portal_url: String,

    /// MAC address, e.g. 00:1A:79:12:34:56
    pub mac: String,

    /// Display name
    #[arg(long, short = 'n')]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct AddXtreamCmd {
    /// Server base URL
    pub server_url: String,

    pub username: String,

    pub password: String,

    /// Display name
    #[arg(long, short = 'n')]
    pub name: Option<String>,
}

// =============================================================================
// Check Command
// =============================================================================

#[derive(Args, Debug)]
pub struct CheckCmd {
    /// Also probe one stream per account
    #[arg(long)]
    pub stream: bool,

    /// Only check these account ids (repeatable)
    #[arg(long = "account", short = 'a')]
    pub accounts: Vec<String>,

    /// Keep running and re-check frozen accounts as they thaw
    #[arg(long, short = 'w')]
    pub watch: bool,
}

impl CheckCmd {
    pub fn mode(&self) -> VerificationMode {
        if self.stream {
            VerificationMode::ApiAndStream
        } else {
            VerificationMode::ApiOnly
        }
    }
}

// =============================================================================
// Browse Commands
// =============================================================================

#[derive(Args, Debug)]
pub struct IdentityCmd {
    pub mac: String,
}

/// Content kind filter
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindArg {
    /// Live TV
    #[default]
    Live,
    /// Movies
    Movie,
    /// Series
    Series,
}

impl From<KindArg> for ContentKind {
    fn from(kind: KindArg) -> ContentKind {
        match kind {
            KindArg::Live => ContentKind::Live,
            KindArg::Movie => ContentKind::Movie,
            KindArg::Series => ContentKind::Series,
        }
    }
}

#[derive(Args, Debug)]
pub struct CategoriesCmd {
    /// Account id
    pub account: String,

    #[arg(long, short = 'k', value_enum, default_value = "live")]
    pub kind: KindArg,
}

#[derive(Args, Debug)]
pub struct ItemsCmd {
    /// Account id
    pub account: String,

    /// Category id (`*` for all)
    pub category: String,

    #[arg(long, short = 'k', value_enum, default_value = "live")]
    pub kind: KindArg,

    /// Single page instead of the whole category
    #[arg(long, short = 'p')]
    pub page: Option<u32>,
}

#[derive(Args, Debug)]
pub struct SeasonsCmd {
    /// Account id
    pub account: String,

    pub series_id: String,
}

#[derive(Args, Debug)]
pub struct EpisodesCmd {
    /// Account id
    pub account: String,

    pub series_id: String,

    pub season_id: String,
}

#[derive(Args, Debug)]
pub struct LinkCmd {
    /// Account id
    pub account: String,

    /// Content command; omit when using --episode
    #[arg(required_unless_present = "episode")]
    pub cmd: Option<String>,

    /// Build the command for this episode id
    #[arg(long, short = 'e', conflicts_with = "cmd")]
    pub episode: Option<String>,

    #[arg(long, short = 'k', value_enum, default_value = "live")]
    pub kind: KindArg,
}

// =============================================================================
// JSON Output Format
// =============================================================================

/// Standard JSON envelope for CLI output
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl<T> JsonOutput<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error_msg(msg: &str, code: ExitCode) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.to_string()),
            code: Some(code.into()),
        }
    }
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// MAC Validation
// =============================================================================

/// Validate a MAC address (six colon-separated hex octets)
pub fn validate_mac(mac: &str) -> Result<&str, &'static str> {
    let parts: Vec<&str> = mac.trim().split(':').collect();
    if parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
    {
        Ok(mac)
    } else {
        Err("Invalid MAC address (expected six hex octets like 00:1A:79:12:34:56)")
    }
}

// =============================================================================
// Tests
// =============================================================================
