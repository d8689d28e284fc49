//! The client-facing failure taxonomy.
//!
//! Every public entry point returns `Result<T, Failure>`; expected failures
//! never panic and never throw. The `Display` impl doubles as the composed
//! diagnostic string for platforms that surface errors as exceptions.

use nwc_core::NwcError;
use thiserror::Error;

/// Result alias used across the engine.
pub type NwcResult<T> = Result<T, Failure>;

/// Terminal failure of a wallet operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Failure {
    /// Relay connection refused, stream failure, all relays failed, or no
    /// response subscriptions available.
    #[error("network failure: {msg}")]
    Network {
        msg: String,
        reason: Option<String>,
        close_code: Option<u16>,
        close_reason: Option<String>,
        cause: Option<String>,
    },

    /// Deadline elapsed before a response (or before readiness).
    #[error("timed out: {msg}")]
    Timeout { msg: String },

    /// The wallet answered with an error envelope.
    #[error("wallet error: {0}")]
    Wallet(NwcError),

    /// Malformed payload, missing required fields, or an unexpected event
    /// kind.
    #[error("protocol violation: {msg}")]
    Protocol { msg: String },

    /// The wallet advertises no encryption scheme this client supports.
    #[error("encryption unsupported: {msg}")]
    EncryptionUnsupported { msg: String },

    /// Anything that escaped categorization.
    #[error("unknown failure: {msg}")]
    Unknown { msg: String, cause: Option<String> },
}

impl Failure {
    pub fn network(msg: impl Into<String>) -> Self {
        Failure::Network {
            msg: msg.into(),
            reason: None,
            close_code: None,
            close_reason: None,
            cause: None,
        }
    }

    pub fn network_caused_by(msg: impl Into<String>, cause: impl Into<String>) -> Self {
        Failure::Network {
            msg: msg.into(),
            reason: None,
            close_code: None,
            close_reason: None,
            cause: Some(cause.into()),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Failure::Timeout { msg: msg.into() }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Failure::Protocol { msg: msg.into() }
    }

    pub fn encryption_unsupported(msg: impl Into<String>) -> Self {
        Failure::EncryptionUnsupported { msg: msg.into() }
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Failure::Unknown {
            msg: msg.into(),
            cause: None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Failure::Timeout { .. })
    }
}

impl From<nwc_core::CodecError> for Failure {
    fn from(err: nwc_core::CodecError) -> Self {
        Failure::protocol(err.to_string())
    }
}

impl From<nwc_core::EventError> for Failure {
    fn from(err: nwc_core::EventError) -> Self {
        Failure::Unknown {
            msg: "event signing failed".to_string(),
            cause: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_composes_diagnostics() {
        let failure = Failure::Wallet(NwcError {
            code: "INSUFFICIENT_BALANCE".to_string(),
            message: "not enough sats".to_string(),
        });
        assert_eq!(
            failure.to_string(),
            "wallet error: INSUFFICIENT_BALANCE: not enough sats"
        );
    }

    #[test]
    fn test_codec_error_maps_to_protocol() {
        let failure: Failure = nwc_core::CodecError::Malformed("bad".to_string()).into();
        assert!(matches!(failure, Failure::Protocol { .. }));
    }
}
