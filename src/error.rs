// =============================================================================
// Error taxonomy — classification used by the market data gateway (§7)
// =============================================================================
//
// Internal plumbing (config I/O, HTTP client setup) keeps using
// `anyhow::Result` with `.context(...)`, exactly as the rest of this crate
// does. This module exists only for the gateway's retry-policy decision:
// callers match on `GatewayError::kind()` to decide whether and how long to
// back off, which a bag of `anyhow::Error` cannot express.
// =============================================================================

use std::time::Duration;

use thiserror::Error;

/// Error bucket per §7. Only `Network`, `Timeout`, `RateLimit`, and
/// `ServerError` are retried; `AuthError` and `ClientError` are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    ServerError,
    AuthError,
    ClientError,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::ServerError
        )
    }

    /// Base backoff for this bucket. RateLimit backs off on a longer profile
    /// than a plain network blip, per §4.2/§7.
    pub fn base_backoff(&self) -> Duration {
        match self {
            ErrorKind::RateLimit => Duration::from_millis(1000),
            ErrorKind::ServerError => Duration::from_millis(750),
            _ => Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind:?} from {endpoint}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub endpoint: String,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Classify a `reqwest::Error` into our bucket taxonomy.
    pub fn from_reqwest(endpoint: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Network
        } else if let Some(status) = err.status() {
            classify_status(status)
        } else {
            ErrorKind::Unknown
        };
        Self::new(kind, endpoint, err.to_string())
    }

    pub fn from_status(endpoint: &str, status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::new(classify_status(status), endpoint, body.into())
    }
}

fn classify_status(status: reqwest::StatusCode) -> ErrorKind {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ErrorKind::RateLimit
    } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        ErrorKind::AuthError
    } else if status.is_client_error() {
        ErrorKind::ClientError
    } else if status.is_server_error() {
        ErrorKind::ServerError
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(!ErrorKind::AuthError.is_retryable());
        assert!(!ErrorKind::ClientError.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn classify_status_codes() {
        assert_eq!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::RateLimit
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED),
            ErrorKind::AuthError
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::BAD_REQUEST),
            ErrorKind::ClientError
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY),
            ErrorKind::ServerError
        );
    }

    #[test]
    fn rate_limit_backs_off_longer_than_network() {
        assert!(ErrorKind::RateLimit.base_backoff() > ErrorKind::Network.base_backoff());
    }
}
