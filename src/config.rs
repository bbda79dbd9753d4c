//! Configuration management for stalkercheck
//!
//! Handles config file loading and conversion into runtime settings.
//! Config is stored at ~/.config/stalkercheck/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::PortalSettings;
use crate::check::{BackoffPolicy, CheckSettings};

/// Portal protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub token_freshness_secs: u64,
    pub page_concurrency: usize,
    pub stb_lang: String,
    pub timezone: String,
    pub fetch_main_info: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            max_attempts: 3,
            retry_delay_ms: 500,
            token_freshness_secs: 3600,
            page_concurrency: 4,
            stb_lang: "en".to_string(),
            timezone: "Europe/London".to_string(),
            fetch_main_info: true,
        }
    }
}

/// Batch checker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub concurrency: usize,
    pub probe_budget_secs: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            probe_budget_secs: 20,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub portal: PortalConfig,
    pub checker: CheckerConfig,
    pub backoff: BackoffPolicy,
    /// Account store location; defaults to the data directory
    pub store_path: Option<PathBuf>,
}

impl Config {
    /// Get config file path (~/.config/stalkercheck/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stalkercheck").join("config.toml"))
    }

    /// Load config from the default location, or defaults if not found
    pub fn load() -> Self {
        Self::path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
    }

    /// Load config from a file, falling back to defaults when missing or malformed
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.portal.request_timeout_secs)
    }

    pub fn portal_settings(&self) -> PortalSettings {
        PortalSettings {
            max_attempts: self.portal.max_attempts,
            retry_delay: Duration::from_millis(self.portal.retry_delay_ms),
            token_freshness: Duration::from_secs(self.portal.token_freshness_secs),
            page_concurrency: self.portal.page_concurrency,
            stb_lang: self.portal.stb_lang.clone(),
            timezone: self.portal.timezone.clone(),
            fetch_main_info: self.portal.fetch_main_info,
        }
    }

    pub fn check_settings(&self) -> CheckSettings {
        CheckSettings {
            concurrency: self.checker.concurrency,
            probe_budget: Duration::from_secs(self.checker.probe_budget_secs),
            backoff: self.backoff,
            portal: self.portal_settings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.portal.max_attempts, 3);
        assert_eq!(config.portal.token_freshness_secs, 3600);
        assert_eq!(config.checker.concurrency, 8);
        assert_eq!(config.backoff.base_delay_secs, 60);
        assert_eq!(config.backoff.max_delay_secs, 86_400);
        assert!(config.store_path.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [checker]
            concurrency = 2

            [backoff]
            base_delay_secs = 30
            max_delay_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.checker.concurrency, 2);
        assert_eq!(config.checker.probe_budget_secs, 20);
        assert_eq!(config.portal.page_concurrency, 4);
        assert_eq!(config.check_settings().backoff.base_delay_secs, 30);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.portal.request_timeout_secs, 10);
    }

    #[test]
    fn test_settings_conversion() {
        let settings = Config::default().portal_settings();
        assert_eq!(settings.retry_delay, Duration::from_millis(500));
        assert_eq!(settings.timezone, "Europe/London");
    }
}
