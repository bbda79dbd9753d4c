//! Stalker session management
//!
//! Owns the handshake, token freshness and the profile fetch for one
//! account. A `SessionManager` is created per check and dropped with it, so
//! its `Session` never outlives the check that produced it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::error::{PortalError, PortalResult};
use super::identity::{generate_token, DeviceIdentity, PrehashStrategy, TokenSha1Prehash};
use super::wire::{value_as_string, Envelope, HandshakeJs};

/// User-Agent of a MAG250 running the stock portal client
pub const MAG_USER_AGENT: &str = "Mozilla/5.0 (QtEmbedded; U; Linux; C) AppleWebKit/533.3 (KHTML, like Gecko) MAG200 stbapp ver: 2 rev: 250 Safari/533.3";

/// API endpoints tried in order during the handshake
pub const API_ENDPOINTS: &[&str] = &[
    "/stalker_portal/server/load.php",
    "/server/load.php",
    "/portal.php",
    "/c/portal.php",
];

/// Client paths users paste instead of the portal root; longest first
const URL_SUFFIXES: &[&str] = &[
    "/stalker_portal/c/",
    "/stalker_portal/c",
    "/c/",
    "/c",
    "/portal.php",
    "/stalker_portal/server/load.php",
    "/server/load.php",
];

const FIRMWARE_VERSION: &str = "ImageDescription: 0.2.18-r23-250; ImageDate: Fri Jan 15 15:00:00 2021; PORTAL version: 5.6.1; API Version: JS API version: 343; STB API version: 146; Player Engine version: 0x58c";

/// Tunables for talking to one portal
#[derive(Debug, Clone)]
pub struct PortalSettings {
    /// Attempts per request for transport and malformed-body failures
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub token_freshness: Duration,
    /// Concurrent page fetches within one listing
    pub page_concurrency: usize,
    pub stb_lang: String,
    pub timezone: String,
    /// Merge `account_info/get_main_info` into the profile
    pub fetch_main_info: bool,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            token_freshness: Duration::from_secs(3600),
            page_concurrency: 4,
            stb_lang: "en".to_string(),
            timezone: "Europe/London".to_string(),
            fetch_main_info: true,
        }
    }
}

/// Strip client paths so endpoints can be appended to the portal root
pub fn normalize_portal_url(url: &str) -> String {
    let mut url = url.trim();
    for suffix in URL_SUFFIXES {
        if let Some(stripped) = url.strip_suffix(suffix) {
            url = stripped;
            break;
        }
    }
    let url = url.strip_suffix("/stalker_portal").unwrap_or(url);
    url.trim_end_matches('/').to_string()
}

/// Token state for one account's check
#[derive(Debug, Clone)]
pub struct Session {
    pub token: Option<String>,
    pub random: Option<String>,
    issued_at: Option<Instant>,
    pub api_url: String,
}

impl Session {
    fn new(api_url: String) -> Self {
        Self {
            token: None,
            random: None,
            issued_at: None,
            api_url,
        }
    }

    /// A token exists and is younger than the freshness window
    pub fn is_fresh(&self, window: Duration) -> bool {
        match (&self.token, self.issued_at) {
            (Some(_), Some(issued)) => issued.elapsed() < window,
            _ => false,
        }
    }

    fn install(&mut self, token: String, random: Option<String>, api_url: String) {
        self.token = Some(token);
        self.random = random;
        self.issued_at = Some(Instant::now());
        self.api_url = api_url;
    }
}

/// Raw HTTP answer after transport-level retries
struct RawResponse {
    status: StatusCode,
    body: String,
}

/// Handshake, token lifecycle and authenticated requests for one portal account
pub struct SessionManager {
    http: reqwest::Client,
    portal_url: String,
    identity: DeviceIdentity,
    settings: PortalSettings,
    prehash: Arc<dyn PrehashStrategy>,
    session: RwLock<Session>,
    handshake_gate: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        http: reqwest::Client,
        portal_url: &str,
        identity: DeviceIdentity,
        settings: PortalSettings,
    ) -> Self {
        let portal_url = normalize_portal_url(portal_url);
        let api_url = format!("{}{}", portal_url, API_ENDPOINTS[0]);
        Self {
            http,
            portal_url,
            identity,
            settings,
            prehash: Arc::new(TokenSha1Prehash),
            session: RwLock::new(Session::new(api_url)),
            handshake_gate: Mutex::new(()),
        }
    }

    /// Replace the fallback prehash derivation
    pub fn with_prehash(mut self, prehash: Arc<dyn PrehashStrategy>) -> Self {
        self.prehash = prehash;
        self
    }

    pub fn portal_url(&self) -> &str {
        &self.portal_url
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &PortalSettings {
        &self.settings
    }

    /// Snapshot of the current session
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    // -------------------------------------------------------------------------
    // Handshake
    // -------------------------------------------------------------------------

    /// Obtain a token, trying each known API endpoint in turn
    pub async fn handshake(&self) -> PortalResult<String> {
        let mut answered = false;
        let mut last_error = None;

        for endpoint in API_ENDPOINTS {
            let api_url = format!("{}{}", self.portal_url, endpoint);
            match self.handshake_at(&api_url).await {
                Ok((token, random)) => {
                    info!(endpoint = %endpoint, "handshake succeeded");
                    self.session
                        .write()
                        .await
                        .install(token.clone(), random, api_url);
                    return Ok(token);
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "handshake attempt failed");
                    if !matches!(e, PortalError::Network(_) | PortalError::Request(_)) {
                        answered = true;
                    }
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(PortalError::Network(format!(
                "no endpoint reachable: {}",
                e
            ))),
            Some(e) => Err(PortalError::HandshakeFailed(e.to_string())),
            None => Err(PortalError::HandshakeFailed("no endpoints".into())),
        }
    }

    /// Bare handshake, then at most one fallback with a local token
    async fn handshake_at(&self, api_url: &str) -> PortalResult<(String, Option<String>)> {
        let params = [
            ("type", "stb".to_string()),
            ("action", "handshake".to_string()),
            ("token", String::new()),
            ("JsHttpRequest", "1-xml".to_string()),
        ];
        let response = self.send(api_url, &params, None).await?;

        if response.status == StatusCode::OK {
            let js: HandshakeJs = parse_js(&response.body)?;
            if let Some(token) = js.token.filter(|t| !t.is_empty()) {
                return Ok((token, js.random));
            }
        } else if !matches!(
            response.status,
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN
        ) {
            return Err(PortalError::HandshakeFailed(format!(
                "HTTP {}",
                response.status
            )));
        }

        info!(api_url, status = %response.status, "standard handshake refused, trying generated token");
        let token = generate_token();
        let prehash = self.prehash.prehash(&token, &self.identity);
        let params = [
            ("type", "stb".to_string()),
            ("action", "handshake".to_string()),
            ("token", token.clone()),
            ("prehash", prehash),
            ("JsHttpRequest", "1-xml".to_string()),
        ];
        let response = self.send(api_url, &params, Some(&token)).await?;
        if response.status != StatusCode::OK {
            return Err(PortalError::HandshakeFailed(format!(
                "fallback answered HTTP {}",
                response.status
            )));
        }

        let js: HandshakeJs = parse_js(&response.body)?;
        let accepted = js.token.filter(|t| !t.is_empty()).unwrap_or(token);
        Ok((accepted, js.random))
    }

    /// Current token, re-handshaking when missing or stale
    pub async fn ensure_fresh_token(&self) -> PortalResult<String> {
        {
            let session = self.session.read().await;
            if session.is_fresh(self.settings.token_freshness) {
                if let Some(token) = &session.token {
                    return Ok(token.clone());
                }
            }
        }

        let _gate = self.handshake_gate.lock().await;
        {
            let session = self.session.read().await;
            if session.is_fresh(self.settings.token_freshness) {
                if let Some(token) = &session.token {
                    return Ok(token.clone());
                }
            }
        }
        debug!("token missing or stale, handshaking");
        self.handshake().await
    }

    /// Replace a token the portal rejected, unless a concurrent call already did
    async fn refresh(&self, rejected: &str) -> PortalResult<String> {
        let _gate = self.handshake_gate.lock().await;
        {
            let session = self.session.read().await;
            if let Some(token) = &session.token {
                if token != rejected && session.is_fresh(self.settings.token_freshness) {
                    return Ok(token.clone());
                }
            }
        }
        warn!("token rejected, re-handshaking");
        self.handshake().await
    }

    // -------------------------------------------------------------------------
    // Profile
    // -------------------------------------------------------------------------

    /// Fetch the STB profile; a profile without `id` is an auth failure
    pub async fn get_profile(&self) -> PortalResult<Value> {
        let identity = &self.identity;
        let params = vec![
            ("type", "stb".to_string()),
            ("action", "get_profile".to_string()),
            ("hd", "1".to_string()),
            ("ver", FIRMWARE_VERSION.to_string()),
            ("num_banks", "2".to_string()),
            ("sn", identity.serial.clone()),
            ("stb_type", "MAG250".to_string()),
            ("client_type", "STB".to_string()),
            ("image_version", "218".to_string()),
            ("video_out", "hdmi".to_string()),
            ("device_id", identity.device_id.clone()),
            ("device_id2", identity.device_id2.clone()),
            ("signature", identity.signature.clone()),
            ("auth_second_step", "1".to_string()),
            ("hw_version", "1.7-BD-00".to_string()),
            ("not_valid_token", "0".to_string()),
            ("timestamp", chrono::Utc::now().timestamp().to_string()),
            ("JsHttpRequest", "1-xml".to_string()),
        ];

        let mut profile: Value = self.authed_get(&params).await?;

        let has_identity = profile
            .get("id")
            .and_then(value_as_string)
            .is_some_and(|id| !id.is_empty());
        if !has_identity {
            return Err(PortalError::AuthInvalid(
                "profile has no identifying field".into(),
            ));
        }

        if let Some(rotated) = profile
            .get("token")
            .and_then(value_as_string)
            .filter(|t| !t.is_empty())
        {
            debug!("portal rotated the session token");
            let mut session = self.session.write().await;
            session.token = Some(rotated);
            session.issued_at = Some(Instant::now());
        }

        if self.settings.fetch_main_info {
            if let Some(info) = self.main_info().await {
                merge_missing(&mut profile, info);
            }
        }

        Ok(profile)
    }

    /// Best-effort `account_info/get_main_info`, single attempt
    async fn main_info(&self) -> Option<Value> {
        let session = self.session().await;
        let token = session.token.as_deref()?;
        let params = [
            ("type", "account_info".to_string()),
            ("action", "get_main_info".to_string()),
            ("JsHttpRequest", "1-xml".to_string()),
        ];
        let response = self
            .request(&session.api_url, &params, Some(token))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body = response.text().await.ok()?;
        serde_json::from_str::<Envelope>(&body)
            .ok()
            .map(|e| e.js)
            .filter(Value::is_object)
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Authenticated GET returning the parsed `js` payload
    ///
    /// Unauthorized or not-found answers trigger one re-handshake; a second
    /// rejection is reported as `AuthInvalid`.
    pub(crate) async fn authed_get<T: DeserializeOwned>(
        &self,
        params: &[(&str, String)],
    ) -> PortalResult<T> {
        let mut token = self.ensure_fresh_token().await?;
        let mut rehandshaked = false;

        loop {
            let api_url = self.session.read().await.api_url.clone();
            let response = self.send(&api_url, params, Some(&token)).await?;

            match response.status {
                StatusCode::OK => return parse_js(&response.body),
                StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND if !rehandshaked => {
                    rehandshaked = true;
                    token = self.refresh(&token).await?;
                }
                StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                    return Err(PortalError::AuthInvalid(format!(
                        "token rejected after re-handshake (HTTP {})",
                        response.status
                    )));
                }
                status => {
                    return Err(PortalError::Network(format!("HTTP {}", status)));
                }
            }
        }
    }

    /// GET with MAG headers, retrying transport errors, 5xx and malformed bodies
    async fn send(
        &self,
        url: &str,
        params: &[(&str, String)],
        token: Option<&str>,
    ) -> PortalResult<RawResponse> {
        let attempts = self.settings.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.settings.retry_delay).await;
            }

            match self.request(url, params, token).send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            last_error = format!("body read failed: {}", e);
                            debug!(url, attempt, error = %last_error, "retrying");
                            continue;
                        }
                    };

                    if status.is_server_error() {
                        last_error = format!("HTTP {}", status);
                    } else if status == StatusCode::OK && !is_json(&body) {
                        last_error = if body.trim().is_empty() {
                            "empty body".to_string()
                        } else {
                            "non-JSON body".to_string()
                        };
                    } else {
                        return Ok(RawResponse { status, body });
                    }
                    debug!(url, attempt, error = %last_error, "soft failure, retrying");
                }
                Err(e) => {
                    last_error = e.to_string();
                    debug!(url, attempt, error = %last_error, "transport failure, retrying");
                }
            }
        }

        Err(PortalError::Network(format!(
            "{} after {} attempts",
            last_error, attempts
        )))
    }

    fn request(
        &self,
        url: &str,
        params: &[(&str, String)],
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut cookie = format!(
            "mac={}; stb_lang={}; timezone={}",
            self.identity.mac, self.settings.stb_lang, self.settings.timezone
        );
        let mut builder = self
            .http
            .get(url)
            .query(params)
            .header("User-Agent", MAG_USER_AGENT)
            .header("Referer", format!("{}/stalker_portal/c/", self.portal_url));

        if let Some(token) = token {
            cookie.push_str(&format!("; token={}", token));
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.header("Cookie", cookie)
    }
}

fn is_json(body: &str) -> bool {
    serde_json::from_str::<Value>(body).is_ok()
}

/// Deserialize the `js` member of an envelope
fn parse_js<T: DeserializeOwned>(body: &str) -> PortalResult<T> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| PortalError::InvalidResponse(format!("JSON parse error: {}", e)))?;
    let js = if envelope.js.is_null() {
        Value::Object(Default::default())
    } else {
        envelope.js
    };
    serde_json::from_value(js)
        .map_err(|e| PortalError::InvalidResponse(format!("unexpected payload: {}", e)))
}

/// Copy keys from `extra` that `target` does not already have
fn merge_missing(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        for (key, value) in extra {
            target.entry(key).or_insert(value);
        }
    }
}
