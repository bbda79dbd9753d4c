//! Playback link resolution
//!
//! `create_link` answers with a command string that may carry a player
//! prefix (`ffmpeg http://...`) or a path relative to the portal's media
//! root. Both quirks are normalised here.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;

use super::error::{PortalError, PortalResult};
use super::session::SessionManager;
use super::wire::LinkJs;
use crate::models::ContentKind;

/// Path under the portal host where relative stream paths live
const MEDIA_PATH: &str = "/media/";

fn prefix_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\s*(?:(?:ffmpeg|ffrt[23]?|auto)\s+)+(\S.*)$").ok())
        .as_ref()
}

/// Remove leading player prefixes, however many are stacked; values without one are returned unchanged
pub fn strip_player_prefix(value: &str) -> String {
    match prefix_pattern().and_then(|re| re.captures(value)) {
        Some(caps) => caps[1].trim().to_string(),
        None => value.to_string(),
    }
}

/// Canonical command for an episode listed without one
pub fn episode_command(stream_id: &str) -> String {
    format!("/media/file_{}.mpg", stream_id)
}

/// `{scheme}://{host}[:port]/media/` for a portal URL
pub fn stream_base(portal_url: &str) -> PortalResult<Url> {
    let portal = Url::parse(portal_url)
        .map_err(|e| PortalError::InvalidResponse(format!("bad portal URL: {}", e)))?;
    let host = portal
        .host_str()
        .ok_or_else(|| PortalError::InvalidResponse("portal URL has no host".into()))?;
    let base = match portal.port() {
        Some(port) => format!("{}://{}:{}{}", portal.scheme(), host, port, MEDIA_PATH),
        None => format!("{}://{}{}", portal.scheme(), host, MEDIA_PATH),
    };
    Url::parse(&base).map_err(|e| PortalError::InvalidResponse(format!("bad stream base: {}", e)))
}

/// Strip prefixes and resolve relative values against the stream base
pub fn normalize_link(raw: &str, portal_url: &str) -> PortalResult<String> {
    let value = strip_player_prefix(raw.trim());
    if value.is_empty() {
        return Err(PortalError::InvalidResponse("empty playback link".into()));
    }
    if let Ok(url) = Url::parse(&value) {
        if url.has_host() {
            return Ok(value);
        }
    }
    let base = stream_base(portal_url)?;
    let relative = value.trim_start_matches('/');
    let relative = relative.strip_prefix("media/").unwrap_or(relative);
    base.join(relative)
        .map(|u| u.to_string())
        .map_err(|e| PortalError::InvalidResponse(format!("unresolvable link {}: {}", value, e)))
}

/// Exchanges content commands for playable URLs
pub struct LinkResolver<'a> {
    session: &'a SessionManager,
}

impl<'a> LinkResolver<'a> {
    pub fn new(session: &'a SessionManager) -> Self {
        Self { session }
    }

    /// Ask the portal for a playable URL for `cmd`
    pub async fn create_link(&self, cmd: &str, kind: ContentKind) -> PortalResult<String> {
        let params = [
            ("type", kind.portal_type().to_string()),
            ("action", "create_link".to_string()),
            ("cmd", cmd.to_string()),
            ("JsHttpRequest", "1-xml".to_string()),
        ];
        let js: LinkJs = self.session.authed_get(&params).await?;
        let raw = js
            .cmd
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PortalError::Network("create_link returned no URL".into()))?;
        normalize_link(&raw, self.session.portal_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_strip_case_insensitive() {
        assert_eq!(strip_player_prefix("ffmpeg http://x/y"), "http://x/y");
        assert_eq!(strip_player_prefix("FFMPEG   http://x/y"), "http://x/y");
        assert_eq!(strip_player_prefix("ffrt3 http://x/y"), "http://x/y");
    }

    #[test]
    fn test_prefix_strip_idempotent_and_passthrough() {
        let once = strip_player_prefix("ffmpeg http://x/y");
        assert_eq!(strip_player_prefix(&once), once);
        assert_eq!(strip_player_prefix("http://x/y"), "http://x/y");
        assert_eq!(strip_player_prefix("vlc http://x/y"), "vlc http://x/y");
        assert_eq!(strip_player_prefix("ffmpeg"), "ffmpeg");
    }

    #[test]
    fn test_stacked_prefixes_strip_in_one_pass() {
        assert_eq!(strip_player_prefix("ffmpeg ffmpeg http://x"), "http://x");
        assert_eq!(strip_player_prefix("auto ffrt2 http://x"), "http://x");
        let once = strip_player_prefix("ffmpeg ffmpeg http://x");
        assert_eq!(strip_player_prefix(&once), once);
    }

    #[test]
    fn test_relative_links_resolve_against_media_root() {
        let url = normalize_link("ffmpeg /file_12.mpg", "http://portal.tv:8080").unwrap();
        assert_eq!(url, "http://portal.tv:8080/media/file_12.mpg");

        let url = normalize_link("file_12.mpg", "https://portal.tv").unwrap();
        assert_eq!(url, "https://portal.tv/media/file_12.mpg");

        let url = normalize_link("auto /media/file_12.mpg", "http://portal.tv").unwrap();
        assert_eq!(url, "http://portal.tv/media/file_12.mpg");
    }

    #[test]
    fn test_absolute_links_untouched() {
        let url = normalize_link("ffmpeg http://cdn.tv/live/1.ts?t=abc", "http://portal.tv").unwrap();
        assert_eq!(url, "http://cdn.tv/live/1.ts?t=abc");
    }

    #[test]
    fn test_empty_link_rejected() {
        assert!(normalize_link("  ", "http://portal.tv").is_err());
    }

    #[test]
    fn test_episode_command() {
        assert_eq!(episode_command("42"), "/media/file_42.mpg");
    }
}
