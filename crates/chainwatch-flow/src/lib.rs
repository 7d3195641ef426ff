//! Flow Access API event source for chainwatch.
//!
//! Implements [`chainwatch_core::EventSource`] over the access node REST API:
//! the latest sealed block for start positions and the `subscribe_events`
//! WebSocket stream for block-scoped event batches.
//!
//! ```no_run
//! use chainwatch_flow::{FlowAccessClient, FlowNetwork};
//!
//! let client = FlowAccessClient::for_network(FlowNetwork::Previewnet)?;
//! # Ok::<(), chainwatch_flow::FlowError>(())
//! ```

pub mod client;
pub mod endpoints;
pub mod error;
pub mod wire;

pub use client::{FlowAccessClient, FlowClientConfig};
pub use endpoints::{FlowEndpoints, FlowNetwork};
pub use error::FlowError;
