//! Errors raised while configuring the Flow adapter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown network '{0}' (expected mainnet, testnet or previewnet)")]
    UnknownNetwork(String),

    #[error("invalid endpoint URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}
