//! Error types for the MQTT transport with fail-fast classification.
//!
//! Registration and connection errors surface immediately to the caller;
//! per-message errors are encoded into reply payloads and never tear down
//! the dispatch loop.

use thiserror::Error;

/// Structured business error carried inside an error reply.
///
/// Handlers build one of these for request-level failures; the error
/// encoder flattens it into `{id, code, reason, message}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("error {code} ({reason}): {message}")]
pub struct StatusError {
    /// Message id echoed from the request, empty when unknown
    pub id: String,

    /// Numeric error code, HTTP-style
    pub code: i32,

    /// Machine-readable reason token
    pub reason: String,

    /// Human-readable message
    pub message: String,
}

impl StatusError {
    pub fn new(code: i32, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Attach the request message id for reply correlation
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Transport-specific errors with detailed classification
#[derive(Debug, Error)]
pub enum TransportError {
    /// Route registration with an empty pattern
    #[error("route pattern must not be empty")]
    EmptyPattern,

    /// The same static route was registered twice
    #[error("duplicate route registration: {pattern}")]
    DuplicateRoute { pattern: String },

    /// Two patterns disagree on the wildcard at the same position
    #[error("wildcard conflict in {pattern}: segment already registered as {existing}")]
    WildcardConflict { pattern: String, existing: String },

    /// A catch-all segment was followed by more segments
    #[error("catch-all segment must be last: {pattern}")]
    CatchAllPosition { pattern: String },

    /// A `:name` / `*name` segment without a name
    #[error("wildcard segment missing a name: {pattern}")]
    UnnamedWildcard { pattern: String },

    /// `$share/` subscription without group and topic
    #[error("invalid shared subscription: {pattern}")]
    InvalidShare { pattern: String },

    /// Broker URL could not be parsed
    #[error("invalid broker url: {url}")]
    InvalidBrokerUrl { url: String },

    /// Route registration after the server already started
    #[error("routes must be registered before start")]
    AlreadyStarted,

    /// Initial connect did not complete within the bounded wait
    #[error("mqtt connect timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// Initial connect failed outright
    #[error("mqtt connect failed: {reason}")]
    ConnectFailed { reason: String },

    /// An operation that needs a live broker connection was called without one
    #[error("server is not connected")]
    NotConnected,

    /// Request payload failed to decode
    #[error("decode request: {0}")]
    Decode(String),

    /// Reply value failed to encode
    #[error("encode reply: {0}")]
    Encode(String),

    /// Topic parameters failed to bind onto the target struct
    #[error("bind vars: {0}")]
    BindVars(String),

    /// Underlying MQTT client error
    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),

    /// Business error carrying a structured reply body
    #[error(transparent)]
    Status(#[from] StatusError),
}

impl TransportError {
    /// Flatten into the structured reply body.
    ///
    /// Status carriers keep their fields; everything else becomes a 500
    /// with the display text as message.
    pub fn to_status(&self) -> StatusError {
        match self {
            TransportError::Status(s) => s.clone(),
            other => StatusError::new(500, "", other.to_string()),
        }
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::EmptyPattern
            | TransportError::DuplicateRoute { .. }
            | TransportError::WildcardConflict { .. }
            | TransportError::CatchAllPosition { .. }
            | TransportError::UnnamedWildcard { .. }
            | TransportError::InvalidShare { .. }
            | TransportError::InvalidBrokerUrl { .. }
            | TransportError::AlreadyStarted => "config",
            TransportError::ConnectTimeout { .. }
            | TransportError::ConnectFailed { .. }
            | TransportError::NotConnected
            | TransportError::Client(_) => "connectivity",
            TransportError::Decode(_) | TransportError::BindVars(_) => "decoding",
            TransportError::Encode(_) => "encoding",
            TransportError::Status(_) => "business",
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_passthrough() {
        let err = TransportError::Status(
            StatusError::new(400, "CODEC", "bad payload").with_id("17"),
        );
        let status = err.to_status();
        assert_eq!(status.code, 400);
        assert_eq!(status.reason, "CODEC");
        assert_eq!(status.id, "17");
    }

    #[test]
    fn test_opaque_error_becomes_500() {
        let status = TransportError::NotConnected.to_status();
        assert_eq!(status.code, 500);
        assert_eq!(status.reason, "");
        assert_eq!(status.message, "server is not connected");
    }

    #[test]
    fn test_categories() {
        assert_eq!(TransportError::EmptyPattern.category(), "config");
        assert_eq!(TransportError::NotConnected.category(), "connectivity");
        assert_eq!(TransportError::Decode("x".into()).category(), "decoding");
    }
}
