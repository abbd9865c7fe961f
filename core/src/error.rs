//! Error types for the request-binding engine.
//!
//! # Design
//! Three categories never mix: [`ConstructionError`] (bad declarations or
//! bad arguments, raised before anything reaches the network),
//! [`TransportError`] (the wire failed) and the protocol variants of
//! [`ApiError`] (the server answered with a non-2xx status). Filter
//! rejections get their own [`FilterError`] since they name the filter
//! that refused.
//!
//! `NotFound` keeps a dedicated variant because fallback strategies and
//! callers routinely distinguish "the resource does not exist" from any
//! other failure.

use std::time::Duration;

use thiserror::Error;

/// A method declaration or a call's arguments cannot produce a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("{method}: no HTTP verb declared")]
    MissingVerb { method: String },

    #[error("{method}: placeholder {{{placeholder}}} has no binding")]
    UnboundPlaceholder { method: String, placeholder: String },

    #[error("{method}: payload is declared by both a raw body parameter and payload/form bindings")]
    AmbiguousPayload { method: String },

    #[error("{method}: a whole-request map binder cannot be combined with per-parameter binders")]
    MixedBinders { method: String },

    #[error("{method}: payload parameters declared without a map binder")]
    MissingMapBinder { method: String },

    #[error("{method}: {verb} requests cannot carry a payload")]
    PayloadNotAllowed { method: String, verb: String },

    #[error("{method}: expected {expected} arguments, got {actual}")]
    ArgumentCount {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("{method}: argument {index} ({name}) is required")]
    MissingArgument {
        method: String,
        index: usize,
        name: String,
    },

    #[error("{method}: argument {index} is not supported here: {reason}")]
    UnsupportedArgument {
        method: String,
        index: usize,
        reason: String,
    },

    #[error("argument serialization failed: {0}")]
    Serialization(String),

    #[error("binder {binder} failed: {message}")]
    Binder { binder: String, message: String },
}

/// A request filter refused to pass the request on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("{filter}: no credentials available")]
    MissingCredentials { filter: String },

    #[error("{filter}: {message}")]
    Rejected { filter: String, message: String },
}

/// The transport could not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("transport timed out")]
    Timeout,

    #[error("failed reading response body: {0}")]
    Body(String),
}

/// Errors returned to callers of a bound client method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The dispatcher gave up waiting; the in-flight send was dropped.
    #[error("invocation timed out after {0:?}")]
    TimedOut(Duration),

    /// The invocation was aborted before it produced an outcome.
    #[error("invocation cancelled")]
    Cancelled,

    /// The server returned 401 or 403.
    #[error("not authorized (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// The server returned 404.
    #[error("resource not found: {message}")]
    NotFound { message: String },

    /// The server returned 409.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Any other non-2xx status.
    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    /// A 2xx body could not be decoded into the declared return type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),
}

/// Client configuration could not be loaded or the client not built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(String),

    #[error("{var}: invalid value {value:?}")]
    InvalidValue { var: String, value: String },

    #[error("failed to start runtime: {0}")]
    Runtime(String),
}

impl ApiError {
    /// HTTP status behind a protocol error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { status, .. } | ApiError::HttpError { status, .. } => Some(*status),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Conflict { .. } => Some(409),
            _ => None,
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, ApiError::Construction(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::TimedOut(_))
    }
}
