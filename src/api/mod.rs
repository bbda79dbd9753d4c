//! Portal API clients
//!
//! - Stalker: session/handshake, content listings and link resolution
//! - Xtream: username/password panels

pub mod content;
pub mod error;
pub mod identity;
pub mod link;
pub mod session;
pub mod wire;
pub mod xtream;

use std::time::Duration;

pub use content::ContentResolver;
pub use error::{PortalError, PortalResult};
pub use identity::{DeviceIdentity, PrehashStrategy, TokenSha1Prehash};
pub use link::LinkResolver;
pub use session::{PortalSettings, Session, SessionManager};
pub use xtream::XtreamClient;

/// Shared HTTP client; sessions carry their own cookies so the pool is reusable
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .build()
}
