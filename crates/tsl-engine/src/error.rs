//! Error types for the TSL engine.
//!
//! Spec and value errors carry a dotted path to the offending field, built
//! up as validation unwinds, e.g.
//! `events[post].outputData.[countDown].(int).value err: value(2000) is out of range [0, 1440]`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TslError {
    /// A thing specification violates its own invariants
    #[error("{path} err: {message}")]
    Spec { path: String, message: String },

    /// An entity value does not conform to the specification
    #[error("{path} err: {message}")]
    Value { path: String, message: String },

    /// A method string does not parse
    #[error("method({method}) is invalid")]
    Method { method: String },

    /// A document failed to parse as JSON
    #[error("{message}")]
    Parse { message: String },

    /// Codec template rendering failed
    #[error("template err: {message}")]
    Template { message: String },
}

impl TslError {
    pub fn spec(path: impl Into<String>, message: impl Into<String>) -> Self {
        TslError::Spec {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn value(path: impl Into<String>, message: impl Into<String>) -> Self {
        TslError::Value {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn method(method: impl Into<String>) -> Self {
        TslError::Method {
            method: method.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        TslError::Parse {
            message: message.into(),
        }
    }

    /// Prepend a path segment, keeping the error's classification.
    /// Path-less errors gain the segment as their path.
    pub fn nest(self, segment: &str) -> Self {
        match self {
            TslError::Spec { path, message } => TslError::Spec {
                path: format!("{segment}.{path}"),
                message,
            },
            TslError::Value { path, message } => TslError::Value {
                path: format!("{segment}.{path}"),
                message,
            },
            other => TslError::Spec {
                path: segment.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for TslError {
    fn from(err: serde_json::Error) -> Self {
        TslError::parse(err.to_string())
    }
}
