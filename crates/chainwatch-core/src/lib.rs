//! chainwatch-core — resilient consumer for block-scoped event subscriptions.
//!
//! # Architecture
//!
//! ```text
//! EventSource::subscribe ──► Subscription (data + error channels)
//!                                   │
//!                                   ▼
//!                        SubscriptionConsumer::run
//!                          ├── EventFilter       (redundant type check)
//!                          ├── HandlerRegistry   (per-type + per-batch handlers)
//!                          └── Telemetry         (explicit observability handle)
//!                                   │
//!                                   ▼
//!                        SessionReport { Cancelled | Disconnected | Failed }
//!
//! Supervisor ── reopens at cursor + 1 with bounded exponential backoff
//! ```
//!
//! The consumer never retries on its own: one session, one terminal outcome.
//! Reconnection is the [`Supervisor`]'s job and is opt-in.

pub mod consumer;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod memory;
pub mod policy;
pub mod request;
pub mod source;
pub mod supervisor;
pub mod telemetry;
pub mod types;

pub use consumer::{Session, SessionOutcome, SessionReport, StreamSignal, SubscriptionConsumer};
pub use cursor::Cursor;
pub use error::{HandlerError, ParseBlockIdError, SessionError, SourceError, SubscribeError};
pub use handler::{handler_fn, BatchHandler, EventHandler, HandlerRegistry};
pub use memory::MemorySource;
pub use policy::{RetryConfig, RetryPolicy};
pub use request::{StartPosition, SubscriptionRequest, SubscriptionRequestBuilder};
pub use source::{EventSource, Subscription, SubscriptionSender};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorOutcome, SupervisorReport};
pub use telemetry::{ConsumerMetrics, RecordingTelemetry, Telemetry, TracingTelemetry};
pub use types::{BatchContext, BlockId, Event, EventBatch, EventFilter};

// Re-exported so callers do not need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
