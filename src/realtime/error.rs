//! Real-time channel error types
//!
//! Transport failures are handled by the supervisor's retry path and only
//! show up here so the connection task can log them; the one error returned
//! to callers is an endpoint that cannot be derived from the base URL.

use thiserror::Error;

/// Errors that can occur in the real-time channel
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The configured base URL cannot be turned into a WebSocket endpoint
    #[error("Invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// WebSocket transport failure (handshake, I/O, protocol)
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound frame could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The remote peer closed the connection
    #[error("Connection closed by peer{}", .reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Closed { reason: Option<String> },
}

impl RealtimeError {
    pub(crate) fn invalid_endpoint(url: &str, reason: impl Into<String>) -> Self {
        RealtimeError::InvalidEndpoint {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for real-time channel operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RealtimeError::invalid_endpoint("ftp://host", "unsupported scheme 'ftp'");
        assert_eq!(
            err.to_string(),
            "Invalid endpoint \"ftp://host\": unsupported scheme 'ftp'"
        );

        let err = RealtimeError::Closed { reason: None };
        assert_eq!(err.to_string(), "Connection closed by peer");

        let err = RealtimeError::Closed {
            reason: Some("going away".to_string()),
        };
        assert_eq!(err.to_string(), "Connection closed by peer: going away");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: RealtimeError = json_err.into();
        assert!(matches!(err, RealtimeError::Encode(_)));
    }
}
