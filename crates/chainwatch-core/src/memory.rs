//! In-memory scripted event source for tests and demos.
//!
//! Each `subscribe` call consumes the next scripted step. Batches are
//! delivered as scripted, without applying the request filter, which models
//! a source that treats the filter as a hint only.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{SourceError, SubscribeError};
use crate::request::SubscriptionRequest;
use crate::source::{EventSource, Subscription};
use crate::types::EventBatch;

enum Step {
    OpenError(SubscribeError),
    Session {
        batches: Vec<EventBatch>,
        error: Option<SourceError>,
        hold_open: bool,
    },
}

/// Scripted [`EventSource`].
pub struct MemorySource {
    name: String,
    latest_height: u64,
    steps: Mutex<VecDeque<Step>>,
    requested: Mutex<Vec<u64>>,
}

impl MemorySource {
    pub fn new(latest_height: u64) -> Self {
        Self {
            name: "memory".into(),
            latest_height,
            steps: Mutex::new(VecDeque::new()),
            requested: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, step: Step) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
    }

    /// Script a session that delivers `batches`, then `error` if given,
    /// then closes.
    pub fn push_session(&self, batches: Vec<EventBatch>, error: Option<SourceError>) {
        self.push(Step::Session {
            batches,
            error,
            hold_open: false,
        });
    }

    /// Script a session that delivers `batches` and then stays open until
    /// the subscription is dropped.
    pub fn push_open_session(&self, batches: Vec<EventBatch>) {
        self.push(Step::Session {
            batches,
            error: None,
            hold_open: true,
        });
    }

    /// Script a failed `subscribe` call.
    pub fn push_open_error(&self, error: SubscribeError) {
        self.push(Step::OpenError(error));
    }

    /// Start heights of every `subscribe` call so far.
    pub fn requested_heights(&self) -> Vec<u64> {
        self.requested
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_height(&self) -> Result<u64, SubscribeError> {
        Ok(self.latest_height)
    }

    async fn subscribe(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<Subscription, SubscribeError> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(request.start_height());
        }

        let step = self
            .steps
            .lock()
            .ok()
            .and_then(|mut steps| steps.pop_front())
            .ok_or_else(|| SubscribeError::Connect {
                endpoint: self.name.clone(),
                reason: "no scripted session left".into(),
            })?;

        let (batches, error, hold_open) = match step {
            Step::OpenError(e) => return Err(e),
            Step::Session {
                batches,
                error,
                hold_open,
            } => (batches, error, hold_open),
        };

        let (data_tx, data_rx) = mpsc::channel(batches.len().max(1));
        let (err_tx, err_rx) = mpsc::channel(1);
        for batch in batches {
            data_tx
                .try_send(batch)
                .map_err(|e| SubscribeError::Transport(e.to_string()))?;
        }
        if let Some(e) = error {
            err_tx
                .try_send(e)
                .map_err(|e| SubscribeError::Transport(e.to_string()))?;
        }

        let subscription = Subscription::new(data_rx, err_rx);
        if hold_open {
            let task = tokio::spawn(async move {
                let _senders = (data_tx, err_tx);
                std::future::pending::<()>().await;
            });
            return Ok(subscription.with_task(task));
        }
        Ok(subscription)
    }
}
