//! Error types for subscription sessions.

use thiserror::Error;

/// A subscription could not be opened. No stream is produced.
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// The request itself is invalid (bad filter, zero heartbeat, ...).
    #[error("invalid subscription request: {0}")]
    InvalidRequest(String),

    /// The source could not be reached.
    #[error("could not connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The source answered but refused the subscription.
    #[error("subscription rejected by source (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// Any other transport setup failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SubscribeError {
    /// Returns `true` if opening again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidRequest(_) => false,
        }
    }
}

/// An error delivered on a live subscription's error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source sent an explicit error message.
    #[error("source error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The stream was closed with a non-normal close code.
    #[error("stream closed abnormally (code {code}): {reason}")]
    Abnormal { code: u16, reason: String },

    /// Receive-side transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message could not be decoded into a batch.
    #[error("malformed message: {0}")]
    Decode(String),
}

/// Failure reported by a user handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("handler '{handler}' failed at height {height}: {source}")]
    Handler {
        handler: String,
        height: u64,
        #[source]
        source: HandlerError,
    },
}

impl SessionError {
    /// Source failures are worth a new session; handler failures would
    /// replay the same batch into the same handler.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source(_))
    }
}

/// A block identifier string was not 32 bytes of hex.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid block id '{input}': {reason}")]
pub struct ParseBlockIdError {
    pub input: String,
    pub reason: String,
}
