//! Error types shared across the workspace

use crate::protocol::RemoteError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single send or call on the wire transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request {request_id} timed out after {deadline:?}")]
    Timeout { request_id: u64, deadline: Duration },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("packet of {0} bytes exceeds the datagram limit")]
    Oversized(usize),
    #[error("connection closed")]
    Closed,
    #[error("remote error: {0}")]
    Remote(RemoteError),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Classification of a failed handoff attempt.
///
/// The variant tells the caller what to do next: retry later with backoff,
/// re-resolve the owner first, or drop this attempt.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("zone ownership changed while transferring entity")]
    AuthorityConflict,
    #[error("target server rejected the entity: capacity exceeded")]
    CapacityExceeded,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("stale connection to {0}")]
    StaleConnection(SocketAddr),
}

impl HandoffError {
    /// True for failures worth retrying on a later tick without
    /// re-resolving the target.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HandoffError::TransientNetwork(_)
                | HandoffError::CapacityExceeded
                | HandoffError::StaleConnection(_)
        )
    }

    /// Short label for logs and metric names.
    pub fn kind(&self) -> &'static str {
        match self {
            HandoffError::TransientNetwork(_) => "transient_network",
            HandoffError::AuthorityConflict => "authority_conflict",
            HandoffError::CapacityExceeded => "capacity_exceeded",
            HandoffError::Protocol(_) => "protocol",
            HandoffError::StaleConnection(_) => "stale_connection",
        }
    }
}

impl From<TransportError> for HandoffError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout { .. } | TransportError::Io(_) | TransportError::Closed => {
                HandoffError::TransientNetwork(error.to_string())
            }
            TransportError::Remote(RemoteError::AuthorityConflict) => {
                HandoffError::AuthorityConflict
            }
            TransportError::Remote(RemoteError::CapacityExceeded) => {
                HandoffError::CapacityExceeded
            }
            TransportError::Remote(RemoteError::NotRegistered) => {
                HandoffError::AuthorityConflict
            }
            TransportError::Remote(RemoteError::Persistence(reason))
            | TransportError::Remote(RemoteError::Internal(reason)) => {
                HandoffError::TransientNetwork(reason)
            }
            TransportError::Remote(RemoteError::Protocol(reason)) => HandoffError::Protocol(reason),
            TransportError::Remote(RemoteError::Unauthorized) => {
                HandoffError::Protocol("session rejected".to_string())
            }
            TransportError::Codec(_)
            | TransportError::Oversized(_)
            | TransportError::UnexpectedResponse(_) => HandoffError::Protocol(error.to_string()),
        }
    }
}

/// A configuration value failed validation at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Fails with `ConfigError` when `value` is zero.
pub fn require_nonzero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}
