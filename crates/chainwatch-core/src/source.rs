//! `EventSource` trait, the abstraction over the upstream streaming API.
//!
//! A source hands out a [`Subscription`]: a pair of channels (data batches and
//! errors). Closing the data channel without an error is a clean end of stream
//! from the source's point of view; the consumer decides what that means.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{SourceError, SubscribeError};
use crate::request::SubscriptionRequest;
use crate::types::EventBatch;

/// Default buffer size for subscription channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Abstracts over different upstream event services.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Identifier used in logs (endpoint URL or network name).
    fn name(&self) -> &str;

    /// The latest sealed block height known to the source.
    async fn latest_height(&self) -> Result<u64, SubscribeError>;

    /// Open a streaming subscription. Errors are returned before any stream
    /// exists; the caller must not expect batches in that case.
    async fn subscribe(&self, request: &SubscriptionRequest)
        -> Result<Subscription, SubscribeError>;
}

/// A live subscription handle, owned exclusively by one consumer.
///
/// Dropping the handle aborts the producer task, if one was attached.
#[derive(Debug)]
pub struct Subscription {
    pub(crate) data: mpsc::Receiver<EventBatch>,
    pub(crate) errors: mpsc::Receiver<SourceError>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(data: mpsc::Receiver<EventBatch>, errors: mpsc::Receiver<SourceError>) -> Self {
        Self {
            data,
            errors,
            task: None,
        }
    }

    /// Create a connected sender/subscription pair.
    pub fn channel(capacity: usize) -> (SubscriptionSender, Self) {
        let (data_tx, data_rx) = mpsc::channel(capacity);
        let (err_tx, err_rx) = mpsc::channel(1);
        (
            SubscriptionSender {
                data: data_tx,
                errors: err_tx,
            },
            Self::new(data_rx, err_rx),
        )
    }

    /// Tie the lifetime of the producer task to this handle.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Producer side of a [`Subscription`].
#[derive(Debug, Clone)]
pub struct SubscriptionSender {
    pub data: mpsc::Sender<EventBatch>,
    pub errors: mpsc::Sender<SourceError>,
}

impl SubscriptionSender {
    /// Send a batch. Returns `false` once the consumer has gone away.
    pub async fn send_batch(&self, batch: EventBatch) -> bool {
        self.data.send(batch).await.is_ok()
    }

    /// Report an error. The producer should stop sending afterwards.
    pub async fn send_error(&self, error: SourceError) {
        // The consumer may already be gone; nothing left to notify then.
        let _ = self.errors.send(error).await;
    }
}
