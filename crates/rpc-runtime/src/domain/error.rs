//! Runtime error taxonomy.
//!
//! Per-request failures (service/method not found, invocation, coercion) end
//! up as failed [`Response`](shared_types::Response)s. Channel-level failures
//! (timeout, connection lost, protocol) resolve client tickets directly.

use shared_types::{CoercionError, FailureKind, RequestId, WireFailure};
use thiserror::Error;

/// Errors surfaced by the RPC runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Bad or unknown configuration, fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found service [{0}]")]
    ServiceNotFound(String),

    /// Carries the full requested signature
    #[error("not found method [{0}]")]
    MethodNotFound(String),

    /// The service method itself failed; the message is the original cause
    #[error("{0}")]
    Invocation(String),

    /// Bad payload shape or type mismatch
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// One message could not be encoded; the channel is unaffected
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("request [{request_id}] timed out after {timeout_ms}ms")]
    Timeout { request_id: RequestId, timeout_ms: u64 },

    #[error("connection lost: {peer}")]
    ConnectionLost { peer: String },

    #[error("request [{0}] cancelled")]
    Cancelled(RequestId),

    /// Bounded queue or worker pool refused the work
    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// A failed response delivered by the remote side
    #[error("remote failure: {0}")]
    Remote(WireFailure),
}

impl RpcError {
    pub fn connection_lost(peer: impl std::fmt::Display) -> Self {
        RpcError::ConnectionLost {
            peer: peer.to_string(),
        }
    }

    /// Wire category for this error when it has to be sent as a response.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RpcError::ServiceNotFound(_) => FailureKind::ServiceNotFound,
            RpcError::MethodNotFound(_) => FailureKind::MethodNotFound,
            RpcError::Invocation(_) => FailureKind::Invocation,
            RpcError::Deserialization(_) => FailureKind::Deserialization,
            RpcError::Overloaded(_) => FailureKind::Overloaded,
            RpcError::Remote(failure) => failure.kind,
            _ => FailureKind::Internal,
        }
    }

    pub fn to_wire(&self) -> WireFailure {
        match self {
            RpcError::Remote(failure) => failure.clone(),
            other => WireFailure::new(other.failure_kind(), other.to_string()),
        }
    }

    /// True for errors that mean the channel is gone rather than the call failed.
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            RpcError::ConnectionLost { .. } | RpcError::Transport(_) | RpcError::Protocol(_)
        )
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        RpcError::Transport(e.to_string())
    }
}

impl From<CoercionError> for RpcError {
    fn from(e: CoercionError) -> Self {
        RpcError::Deserialization(e.to_string())
    }
}

impl From<WireFailure> for RpcError {
    fn from(failure: WireFailure) -> Self {
        RpcError::Remote(failure)
    }
}

/// Result type for runtime operations
pub type RpcResult<T> = Result<T, RpcError>;
