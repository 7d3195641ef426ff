//! TOML configuration for `chainwatch watch`.
//!
//! ```toml
//! [source]
//! network = "mainnet"
//!
//! [subscription]
//! start_height = 85000000
//! event_types = ["evm.TransactionExecuted"]
//! heartbeat_interval = 20
//!
//! [reconnect]
//! enabled = true
//!
//! [reconnect.retry]
//! max_retries = 5
//! initial_backoff = 500
//! max_backoff = 30000
//!
//! [log]
//! level = "info"
//! ```
//!
//! Every section and field is optional.

use std::path::Path;
use std::time::Duration;

use chainwatch_core::request::DEFAULT_HEARTBEAT_INTERVAL;
use chainwatch_core::{
    RetryConfig, StartPosition, SubscribeError, SubscriptionRequest, SupervisorConfig,
};
use chainwatch_flow::{FlowClientConfig, FlowEndpoints, FlowError, FlowNetwork};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogConfig;

/// Event types watched when none are configured.
pub const DEFAULT_EVENT_TYPES: [&str; 2] = ["evm.BlockExecuted", "evm.TransactionExecuted"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("invalid config: {0}")]
    Parse(#[from] toml_edit::de::Error),

    #[error("rest_url and ws_url must be set together")]
    PartialEndpoints,

    #[error(transparent)]
    Endpoint(#[from] FlowError),

    #[error(transparent)]
    Request(#[from] SubscribeError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub source: SourceConfig,
    pub subscription: SubscriptionConfig,
    pub reconnect: ReconnectConfig,
    pub log: LogConfig,
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml_edit::de::from_str(content)?)
    }
}

/// Which access node to talk to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub network: FlowNetwork,
    /// Explicit REST base URL; overrides `network` together with `ws_url`.
    pub rest_url: Option<String>,
    pub ws_url: Option<String>,
    /// REST request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            network: FlowNetwork::default(),
            rest_url: None,
            ws_url: None,
            request_timeout_ms: 30_000,
        }
    }
}

impl SourceConfig {
    pub fn endpoints(&self) -> Result<FlowEndpoints, ConfigError> {
        match (&self.rest_url, &self.ws_url) {
            (Some(rest), Some(ws)) => Ok(FlowEndpoints::new(rest, ws)?),
            (None, None) => Ok(self.network.endpoints()?),
            _ => Err(ConfigError::PartialEndpoints),
        }
    }

    pub fn client_config(&self) -> FlowClientConfig {
        FlowClientConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..Default::default()
        }
    }
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Start height; the latest sealed height when absent.
    pub start_height: Option<u64>,
    pub event_types: Vec<String>,
    pub heartbeat_interval: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            start_height: None,
            event_types: DEFAULT_EVENT_TYPES.iter().map(|t| t.to_string()).collect(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl SubscriptionConfig {
    pub fn start_position(&self) -> StartPosition {
        self.start_height.into()
    }

    /// Build the request once the start height is known.
    pub fn request(&self, start_height: u64) -> Result<SubscriptionRequest, ConfigError> {
        Ok(SubscriptionRequest::builder()
            .start_height(start_height)
            .event_types(self.event_types.iter().cloned())
            .heartbeat_interval(self.heartbeat_interval)
            .build()?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reopen the stream after a disconnect or source error.
    pub enabled: bool,
    pub retry: RetryConfig,
}

impl ReconnectConfig {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect: self.enabled,
            retry: self.retry.clone(),
        }
    }
}
