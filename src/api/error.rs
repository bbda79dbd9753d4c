//! Portal client error types

use thiserror::Error;

use crate::models::{ErrorKind, ErrorReport};

/// Errors from portal operations
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Authentication rejected: {0}")]
    AuthInvalid(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Stream unplayable: {0}")]
    StreamUnplayable(String),
}

impl PortalError {
    /// Stable kind for user-visible reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::HandshakeFailed(_) => ErrorKind::HandshakeFailed,
            PortalError::AuthInvalid(_) => ErrorKind::AuthInvalid,
            PortalError::Network(_)
            | PortalError::InvalidResponse(_)
            | PortalError::Request(_) => ErrorKind::NetworkError,
            PortalError::StreamUnplayable(_) => ErrorKind::StreamUnplayable,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

pub type PortalResult<T> = std::result::Result<T, PortalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(
            PortalError::HandshakeFailed("x".into()).kind(),
            ErrorKind::HandshakeFailed
        );
        assert_eq!(
            PortalError::InvalidResponse("x".into()).kind(),
            ErrorKind::NetworkError
        );
        let report = PortalError::AuthInvalid("no id".into()).report();
        assert_eq!(report.kind, ErrorKind::AuthInvalid);
        assert!(report.message.contains("no id"));
    }
}
