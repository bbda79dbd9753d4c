//! Data structures shared across the portal client and the checker
//!
//! Organized by domain:
//! - **Accounts**: portal accounts and their credentials
//! - **Content**: categories and listing items
//! - **Checks**: verification results, stream probe reports and error kinds

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::identity::DeviceIdentity;

// =============================================================================
// Account Models
// =============================================================================

/// Stable identifier used as the persistence key
pub type AccountId = String;

/// How an account authenticates against its portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// MAG-style portal, authenticated by MAC address
    Stalker { mac: String },
    /// Xtream Codes style panel
    Xtream { username: String, password: String },
}

/// A portal account supplied by the persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub portal_url: String,
    pub credentials: Credentials,
}

impl Account {
    pub fn stalker(
        id: impl Into<String>,
        portal_url: impl Into<String>,
        mac: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            portal_url: portal_url.into(),
            credentials: Credentials::Stalker { mac: mac.into() },
        }
    }

    pub fn xtream(
        id: impl Into<String>,
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            portal_url: server_url.into(),
            credentials: Credentials::Xtream {
                username: username.into(),
                password: password.into(),
            },
        }
    }

    /// Device identity for MAC-based accounts
    pub fn identity(&self) -> Option<DeviceIdentity> {
        match &self.credentials {
            Credentials::Stalker { mac } => Some(DeviceIdentity::derive(mac)),
            Credentials::Xtream { .. } => None,
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.credentials {
            Credentials::Stalker { mac } => write!(f, "{} [{} @ {}]", self.name, mac, self.portal_url),
            Credentials::Xtream { username, .. } => {
                write!(f, "{} [{} @ {}]", self.name, username, self.portal_url)
            }
        }
    }
}

// =============================================================================
// Content Models
// =============================================================================

/// Top-level content family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Live,
    Movie,
    Series,
}

impl ContentKind {
    /// Value of the portal `type` parameter for listings
    pub fn portal_type(&self) -> &'static str {
        match self {
            ContentKind::Live => "itv",
            ContentKind::Movie | ContentKind::Series => "vod",
        }
    }

    /// Query parameter carrying the category id in ordered lists
    pub fn category_param(&self) -> &'static str {
        match self {
            ContentKind::Live => "genre",
            ContentKind::Movie | ContentKind::Series => "category",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Live => write!(f, "Live TV"),
            ContentKind::Movie => write!(f, "Movies"),
            ContentKind::Series => write!(f, "Series"),
        }
    }
}

/// Portal category (genre for live TV)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub kind: ContentKind,
}

/// Kind of a listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Channel,
    Movie,
    Season,
    Episode,
}

/// Entry of an ordered list response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub stream_id: String,
    pub name: String,
    /// Playback command, empty when the portal did not supply one
    pub cmd: String,
    pub item_type: ItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_series_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_season_id: Option<String>,
}

impl ContentItem {
    pub fn has_cmd(&self) -> bool {
        !self.cmd.trim().is_empty()
    }
}

// =============================================================================
// Check Models
// =============================================================================

/// Requested depth of verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    #[default]
    ApiOnly,
    ApiAndStream,
}

/// API-tier status of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Active,
    Expired,
    AuthFailed,
    NetworkError,
    /// Skipped because the account is backing off
    Frozen,
    /// Batch was cancelled before this account finished
    NotChecked,
}

impl CheckStatus {
    /// Outcomes that drive a backoff transition
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::AuthFailed | CheckStatus::NetworkError)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Active => "Active",
            CheckStatus::Expired => "Expired",
            CheckStatus::AuthFailed => "Auth Failed",
            CheckStatus::NetworkError => "Network Error",
            CheckStatus::Frozen => "Frozen",
            CheckStatus::NotChecked => "Not Checked",
        };
        write!(f, "{}", s)
    }
}

/// Stable error kinds surfaced to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HandshakeFailed,
    AuthInvalid,
    NetworkError,
    StreamUnplayable,
}

/// Error kind plus free-text diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// How a probe decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    Download,
    Ffmpeg,
    None,
}

/// Quality metrics reported by a stream prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeMetrics {
    pub method: ProbeMethod,
    pub bytes_read: u64,
    /// Observed throughput in MB/s
    pub throughput_mbps: f64,
}

/// Stream prober verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub playable: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ProbeMetrics>,
}

impl ProbeReport {
    pub fn playable(message: impl Into<String>, metrics: Option<ProbeMetrics>) -> Self {
        Self {
            playable: true,
            message: message.into(),
            metrics,
        }
    }

    pub fn unplayable(message: impl Into<String>, metrics: Option<ProbeMetrics>) -> Self {
        Self {
            playable: false,
            message: message.into(),
            metrics,
        }
    }
}

/// Second-tier verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Verified,
    StreamUnplayable,
}

/// Stream tier outcome carried next to the API status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCheck {
    pub status: StreamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ProbeMetrics>,
}

/// Content totals reported by Xtream panels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCounts {
    pub live: usize,
    pub movies: usize,
    pub series: usize,
}

/// Final outcome of one account check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    /// Unix seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<ContentCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    /// Unix seconds; set once backoff has been applied or on frozen skips
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frozen_until: Option<i64>,
    pub checked_at: i64,
}

impl CheckResult {
    pub fn new(status: CheckStatus, checked_at: i64) -> Self {
        Self {
            status,
            expiry: None,
            profile: None,
            stream: None,
            counts: None,
            error: None,
            frozen_until: None,
            checked_at,
        }
    }

    pub fn failed(status: CheckStatus, error: ErrorReport, checked_at: i64) -> Self {
        Self {
            error: Some(error),
            ..Self::new(status, checked_at)
        }
    }

    /// Whether backoff should treat this result as a failure
    pub fn counts_as_failure(&self) -> bool {
        self.status.is_failure()
            || matches!(
                self.stream.as_ref().map(|s| s.status),
                Some(StreamStatus::StreamUnplayable)
            )
    }
}
