//! Centralized error types for the MoodDeck core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to machine-readable codes for UI consumers
//! - Distinguishes transient remote faults (retryable) from hard failures

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for UI consumers.
    fn code(&self) -> &'static str;
}

/// obs-websocket RequestStatus code for "not ready to perform the request".
///
/// OBS reports this between Identify and full collection load; requests
/// hitting it are safe to retry after a short delay.
pub(crate) const OBS_STATUS_NOT_READY: u16 = 207;

/// Errors from the OBS WebSocket session and remote calls.
#[derive(Debug, Error)]
pub enum ObsError {
    /// Transport-level failure (connect, send, or receive).
    #[error("websocket transport error: {0}")]
    Transport(String),

    /// The server closed the connection.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Authentication was rejected during the Identify handshake.
    #[error("authentication failed")]
    AuthFailed,

    /// A remote call was attempted with no live session.
    #[error("not connected to OBS")]
    NotConnected,

    /// OBS rejected a request (RequestStatus.result == false).
    #[error("request {request_type} failed with code {code}: {comment}")]
    RequestFailed {
        /// The request type that failed (e.g. `GetInputVolume`).
        request_type: String,
        /// The obs-websocket RequestStatus code.
        code: u16,
        /// Human-readable comment supplied by OBS (may be empty).
        comment: String,
    },

    /// No response arrived within the request timeout.
    #[error("request {0} timed out")]
    Timeout(String),

    /// A frame could not be parsed as a protocol message.
    #[error("malformed protocol message: {0}")]
    Protocol(String),
}

impl ObsError {
    /// Returns true for faults worth retrying after a short delay.
    ///
    /// Currently only the not-ready RequestStatus qualifies: OBS answers it
    /// right after Identify while sources are still loading.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed {
                code: OBS_STATUS_NOT_READY,
                ..
            }
        )
    }
}

impl ErrorCode for ObsError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "ws_transport_error",
            Self::Closed(_) => "connection_closed",
            Self::AuthFailed => "authentication_failed",
            Self::NotConnected => "not_connected",
            Self::RequestFailed { .. } => "request_failed",
            Self::Timeout(_) => "request_timeout",
            Self::Protocol(_) => "protocol_error",
        }
    }
}

/// Application-wide error type for the MoodDeck bridge.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum BridgeError {
    /// Invalid configuration (rejected by `BridgeConfig::validate`).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Mapping persistence failed (read or write).
    #[error("Mapping store error: {0}")]
    Store(String),

    /// Learning session state conflict (e.g. a session is already active).
    #[error("Learn error: {0}")]
    Learn(String),

    /// An OBS session or remote call failed.
    #[error("OBS error: {0}")]
    Obs(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns a machine-readable error code for UI consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Store(_) => "mapping_store_error",
            Self::Learn(_) => "learn_error",
            Self::Obs(_) => "obs_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl ErrorCode for BridgeError {
    fn code(&self) -> &'static str {
        BridgeError::code(self)
    }
}

impl From<ObsError> for BridgeError {
    fn from(err: ObsError) -> Self {
        Self::Obs(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

/// Result alias for OBS session and remote-call operations.
pub type ObsResult<T> = Result<T, ObsError>;

/// Convenient Result alias for application-wide operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_request_failure_is_transient() {
        let err = ObsError::RequestFailed {
            request_type: "GetInputList".into(),
            code: OBS_STATUS_NOT_READY,
            comment: "OBS is not ready to perform the request.".into(),
        };
        assert!(err.is_transient());
        assert_eq!(err.code(), "request_failed");
    }

    #[test]
    fn other_request_failures_are_not_transient() {
        let err = ObsError::RequestFailed {
            request_type: "SetInputVolume".into(),
            code: 600,
            comment: "No source was found".into(),
        };
        assert!(!err.is_transient());
        assert!(!ObsError::AuthFailed.is_transient());
    }

    #[test]
    fn bridge_error_codes_are_stable() {
        assert_eq!(
            BridgeError::Configuration("bad".into()).code(),
            "configuration_error"
        );
        assert_eq!(BridgeError::Store("io".into()).code(), "mapping_store_error");
        let converted: BridgeError = ObsError::NotConnected.into();
        assert_eq!(converted.code(), "obs_error");
    }
}
