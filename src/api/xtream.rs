//! Xtream Codes panel client
//!
//! Username/password accounts are validated through `player_api.php`.
//! Only what the checker needs is implemented: account info, content
//! counts and one live stream URL for probing.

use regex::bytes::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::error::{PortalError, PortalResult};
use super::wire::value_as_string;
use crate::models::ContentCounts;

/// User-Agent sent to Xtream panels
pub const XTREAM_USER_AGENT: &str = "IPTV Manager Pro/0.3 (okhttp/3.12.1)";

/// Upper bound on bytes scanned while looking for a stream id
const STREAM_ID_SCAN_LIMIT: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct PlayerApiResponse {
    #[serde(default)]
    user_info: Value,
    #[serde(default)]
    server_info: Value,
}

/// Validated account data from `player_api.php`
#[derive(Debug, Clone)]
pub struct XtreamAccount {
    pub user_info: Value,
    pub server_info: Value,
    /// Panel-reported `user_info.status`, e.g. "Active" or "Expired"
    pub status: Option<String>,
}

impl XtreamAccount {
    /// Panel marks the subscription as lapsed, whatever the expiry says
    pub fn marked_expired(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("expired"))
    }

    /// Raw payload stored with the check result
    pub fn profile(&self) -> Value {
        serde_json::json!({
            "user_info": self.user_info,
            "server_info": self.server_info,
        })
    }
}

/// Xtream Codes API client
pub struct XtreamClient {
    http: reqwest::Client,
    server_url: String,
    username: String,
    password: String,
}

impl XtreamClient {
    pub fn new(
        http: reqwest::Client,
        server_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            server_url: server_url.trim().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn api_url(&self) -> String {
        format!("{}/player_api.php", self.server_url)
    }

    fn request(&self, action: Option<&str>) -> reqwest::RequestBuilder {
        let mut params = vec![
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        if let Some(action) = action {
            params.push(("action", action));
        }
        self.http
            .get(self.api_url())
            .query(&params)
            .header("User-Agent", XTREAM_USER_AGENT)
    }

    /// Validate credentials and read the panel's account status
    pub async fn account_info(&self) -> PortalResult<XtreamAccount> {
        if self.server_url.is_empty() || self.username.is_empty() {
            return Err(PortalError::AuthInvalid("missing URL or username".into()));
        }

        let response = self
            .request(None)
            .send()
            .await
            .map_err(|e| PortalError::Network(e.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(PortalError::Network(format!("HTTP {}", status)));
        }
        let body = response.text().await?;
        let data: PlayerApiResponse = serde_json::from_str(&body).map_err(|_| {
            let snippet: String = body.chars().take(50).collect();
            PortalError::InvalidResponse(format!("Invalid JSON response: {}", snippet))
        })?;

        let auth = data
            .user_info
            .get("auth")
            .and_then(value_as_string)
            .unwrap_or_else(|| "0".to_string());
        if auth == "0" {
            let message = data
                .user_info
                .get("message")
                .and_then(value_as_string)
                .unwrap_or_else(|| "Authentication failed".to_string());
            return Err(PortalError::AuthInvalid(message));
        }

        let status = data
            .user_info
            .get("status")
            .and_then(value_as_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        // Banned, Disabled and the like: credentials exist but are unusable
        if let Some(status) = status.as_deref() {
            if !status.eq_ignore_ascii_case("active") && !status.eq_ignore_ascii_case("expired") {
                return Err(PortalError::AuthInvalid(format!("Account {}", status)));
            }
        }

        Ok(XtreamAccount {
            user_info: data.user_info,
            server_info: data.server_info,
            status,
        })
    }

    /// Live, VOD and series totals fetched concurrently; failures count as zero
    pub async fn counts(&self) -> ContentCounts {
        let (live, movies, series) = futures::join!(
            self.count("get_live_streams"),
            self.count("get_vod_streams"),
            self.count("get_series"),
        );
        ContentCounts {
            live,
            movies,
            series,
        }
    }

    async fn count(&self, action: &str) -> usize {
        let response = match self.request(Some(action)).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return 0,
        };
        match response.json::<Value>().await {
            Ok(Value::Array(items)) => items.len(),
            _ => 0,
        }
    }

    /// First live stream id, scanning at most 64 KiB of the listing
    pub async fn first_stream_id(&self) -> PortalResult<Option<String>> {
        let pattern = Regex::new(r#""stream_id"\s*:\s*"?(\d+)"?"#)
            .map_err(|e| PortalError::InvalidResponse(e.to_string()))?;

        let mut response = self
            .request(Some("get_live_streams"))
            .send()
            .await
            .map_err(|e| PortalError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PortalError::Network(format!("HTTP {}", response.status())));
        }

        let mut buffer = Vec::new();
        while buffer.len() < STREAM_ID_SCAN_LIMIT {
            let Some(chunk) = response.chunk().await? else {
                break;
            };
            buffer.extend_from_slice(&chunk);
            if let Some(caps) = pattern.captures(&buffer) {
                let id = String::from_utf8_lossy(&caps[1]).to_string();
                debug!(stream_id = %id, "found stream to probe");
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Direct MPEG-TS URL for a live stream
    pub fn stream_url(&self, stream_id: &str) -> String {
        format!(
            "{}/{}/{}/{}.ts",
            self.server_url, self.username, self.password, stream_id
        )
    }

    /// Headers a player should send along with `stream_url`
    pub fn stream_headers(&self) -> Vec<(String, String)> {
        vec![
            ("User-Agent".to_string(), XTREAM_USER_AGENT.to_string()),
            ("Referer".to_string(), format!("{}/", self.server_url)),
        ]
    }
}
