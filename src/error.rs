//! Build-configuration server error types.
//!
//! # Failure Scopes
//!
//! Errors fall into two scopes:
//!
//! - **Session-fatal**: [`ServerError::NegotiationFailed`] and
//!   [`ServerError::ActivationFailed`]. No protocol is ever live after one of
//!   these; the session answers every later request with
//!   [`ServerError::NoActiveProtocol`].
//! - **Request-scoped**: everything a handler can hit
//!   ([`ServerError::StateViolation`], [`ServerError::UnknownRequest`],
//!   [`ServerError::Engine`], ...). These are recovered at the request
//!   boundary and surface as a sealed error response; the pipeline state is
//!   untouched.
//!
//! [`ServerError::InvalidState`] is neither: it marks misuse of the message
//! model by the server itself (reading data off an error response, sealing a
//! response twice) and is never meant to reach a client.

use thiserror::Error;

/// Build-configuration server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No registered protocol version matches, or the match is experimental
    /// and the client did not opt in.
    #[error("Protocol negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The negotiated protocol rejected the handshake data.
    #[error("Protocol activation failed: {0}")]
    ActivationFailed(String),

    /// A known request type arrived in a pipeline state that forbids it.
    #[error("{0}")]
    StateViolation(String),

    /// The active protocol version does not know this request type.
    #[error("Unknown request type \"{0}\"")]
    UnknownRequest(String),

    /// The build engine reported a failure.
    #[error("{0}")]
    Engine(String),

    /// Message model misuse by the server itself.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A request arrived before a successful handshake (or after a failed one).
    #[error("No active protocol: {0}")]
    NoActiveProtocol(String),

    /// A second handshake arrived on a session that already has a protocol.
    #[error("Protocol already active: {0}")]
    AlreadyActive(String),

    /// Malformed request envelope or payload.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Framing or channel failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Whether this error ends the session rather than a single request.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::NegotiationFailed(_) | ServerError::ActivationFailed(_)
        )
    }
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

impl From<toml::de::Error> for ServerError {
    fn from(err: toml::de::Error) -> Self {
        ServerError::Config(err.to_string())
    }
}
