//! Subscription requests and their fluent builder.
//!
//! # Example
//!
//! ```rust
//! use chainwatch_core::SubscriptionRequest;
//!
//! let request = SubscriptionRequest::builder()
//!     .start_height(100)
//!     .event_type("evm.BlockExecuted")
//!     .event_type("evm.TransactionExecuted")
//!     .heartbeat_interval(20)
//!     .build()
//!     .unwrap();
//! assert_eq!(request.start_height(), 100);
//! ```

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::SubscribeError;
use crate::source::EventSource;
use crate::types::EventFilter;

/// Heartbeat interval used when none is configured.
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 20;

/// Where a new subscription starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    /// The source's latest sealed height at the time of resolution.
    #[default]
    Latest,
    /// An explicit block height.
    Height(u64),
}

impl StartPosition {
    /// Turn this position into a concrete height, asking the source if needed.
    pub async fn resolve(&self, source: &dyn EventSource) -> Result<u64, SubscribeError> {
        match self {
            Self::Height(h) => Ok(*h),
            Self::Latest => {
                let height = source.latest_height().await?;
                tracing::info!(source = source.name(), height, "Resolved latest start height");
                Ok(height)
            }
        }
    }
}

impl From<Option<u64>> for StartPosition {
    fn from(height: Option<u64>) -> Self {
        height.map_or(Self::Latest, Self::Height)
    }
}

/// An immutable subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    start_height: u64,
    filter: EventFilter,
    heartbeat_interval: NonZeroU64,
}

impl SubscriptionRequest {
    pub fn builder() -> SubscriptionRequestBuilder {
        SubscriptionRequestBuilder::default()
    }

    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Number of blocks without matching events after which the source
    /// still emits an (empty) batch.
    pub fn heartbeat_interval(&self) -> NonZeroU64 {
        self.heartbeat_interval
    }

    /// A copy of this request starting at `height`; everything else unchanged.
    pub fn resume_from(&self, height: u64) -> Self {
        Self {
            start_height: height,
            ..self.clone()
        }
    }
}

/// Fluent builder for [`SubscriptionRequest`].
#[derive(Debug, Clone)]
pub struct SubscriptionRequestBuilder {
    start_height: u64,
    event_types: Vec<String>,
    heartbeat_interval: u64,
}

impl Default for SubscriptionRequestBuilder {
    fn default() -> Self {
        Self {
            start_height: 0,
            event_types: vec![],
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl SubscriptionRequestBuilder {
    /// Set the first block height to stream.
    pub fn start_height(mut self, height: u64) -> Self {
        self.start_height = height;
        self
    }

    /// Add an event type to the filter.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    /// Add several event types to the filter.
    pub fn event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types.extend(event_types.into_iter().map(Into::into));
        self
    }

    /// Set the heartbeat interval in blocks.
    pub fn heartbeat_interval(mut self, blocks: u64) -> Self {
        self.heartbeat_interval = blocks;
        self
    }

    /// Validate and build the request.
    pub fn build(self) -> Result<SubscriptionRequest, SubscribeError> {
        let heartbeat_interval = NonZeroU64::new(self.heartbeat_interval).ok_or_else(|| {
            SubscribeError::InvalidRequest("heartbeat interval must be positive".into())
        })?;

        if let Some(bad) = self
            .event_types
            .iter()
            .find(|t| t.trim().is_empty() || t.contains(','))
        {
            return Err(SubscribeError::InvalidRequest(format!(
                "invalid event type {bad:?}"
            )));
        }

        Ok(SubscriptionRequest {
            start_height: self.start_height,
            filter: EventFilter::new(self.event_types),
            heartbeat_interval,
        })
    }
}
