//! `Supervisor` — reopens sessions after disconnects and source errors.
//!
//! Each new session starts at the last processed height + 1 (or the original
//! start height if nothing was processed yet). Delays follow [`RetryPolicy`];
//! the attempt counter resets whenever a session processed at least one
//! batch. With `reconnect` disabled the supervisor runs exactly one session.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::consumer::{SessionOutcome, SubscriptionConsumer};
use crate::cursor::Cursor;
use crate::error::{SessionError, SubscribeError};
use crate::policy::{RetryConfig, RetryPolicy};
use crate::request::SubscriptionRequest;
use crate::source::EventSource;

/// Reconnect behaviour.
#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
    /// Reopen the subscription after a disconnect or source error.
    pub reconnect: bool,
    pub retry: RetryConfig,
}

/// How the supervisor ended.
#[derive(Debug)]
pub enum SupervisorOutcome {
    Cancelled,
    /// Last session closed unexpectedly and no retry remained.
    Disconnected,
    /// Last session failed and no retry remained (or it was not retryable).
    Failed(SessionError),
    /// The subscription could not be opened.
    InitFailed(SubscribeError),
}

impl SupervisorOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled => false,
            Self::Disconnected => true,
            Self::Failed(e) => e.is_retryable(),
            Self::InitFailed(e) => e.is_retryable(),
        }
    }
}

/// Result of [`Supervisor::run`].
#[derive(Debug)]
pub struct SupervisorReport {
    pub outcome: SupervisorOutcome,
    /// Sessions that were opened successfully.
    pub sessions: u32,
    /// Last fully processed batch across all sessions.
    pub cursor: Option<Cursor>,
}

/// Runs consumer sessions against one source under a retry policy.
pub struct Supervisor {
    source: Arc<dyn EventSource>,
    consumer: SubscriptionConsumer,
    reconnect: bool,
    policy: RetryPolicy,
}

impl Supervisor {
    pub fn new(
        source: Arc<dyn EventSource>,
        consumer: SubscriptionConsumer,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            source,
            consumer,
            reconnect: config.reconnect,
            policy: RetryPolicy::new(config.retry),
        }
    }

    /// Run sessions until cancellation or until the policy gives up.
    pub async fn run(
        &self,
        request: SubscriptionRequest,
        cancel: &CancellationToken,
    ) -> SupervisorReport {
        let telemetry = self.consumer.telemetry().clone();
        let mut request = request;
        let mut cursor: Option<Cursor> = None;
        let mut sessions = 0u32;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return SupervisorReport {
                    outcome: SupervisorOutcome::Cancelled,
                    sessions,
                    cursor,
                };
            }

            let outcome = match self.consumer.open(self.source.as_ref(), &request).await {
                Err(e) => SupervisorOutcome::InitFailed(e),
                Ok(session) => {
                    sessions += 1;
                    let report = self.consumer.run(session, cancel).await;
                    if report.batches > 0 {
                        attempt = 0;
                    }
                    if report.cursor.is_some() {
                        cursor = report.cursor;
                    }
                    match report.outcome {
                        SessionOutcome::Cancelled => SupervisorOutcome::Cancelled,
                        SessionOutcome::Disconnected => SupervisorOutcome::Disconnected,
                        SessionOutcome::Failed(e) => SupervisorOutcome::Failed(e),
                    }
                }
            };

            if !self.reconnect || !outcome.is_retryable() {
                return SupervisorReport {
                    outcome,
                    sessions,
                    cursor,
                };
            }

            attempt += 1;
            let Some(delay) = self.policy.next_delay(attempt) else {
                telemetry.gave_up(attempt - 1);
                return SupervisorReport {
                    outcome,
                    sessions,
                    cursor,
                };
            };

            if let Some(c) = &cursor {
                request = request.resume_from(c.next_height());
            }
            telemetry.reconnecting(attempt, delay, request.start_height());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return SupervisorReport {
                        outcome: SupervisorOutcome::Cancelled,
                        sessions,
                        cursor,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
