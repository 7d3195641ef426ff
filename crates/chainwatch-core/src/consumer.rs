//! `SubscriptionConsumer` — one session, one terminal outcome.
//!
//! # Loop
//! Each iteration waits for the next [`StreamSignal`] across cancellation,
//! the data channel and the error channel (cancellation first):
//!
//! - `Cancelled`    → return `Cancelled`; a batch already received is discarded
//! - `Batch`        → dispatch matching events in order, then continue
//! - `SourceClosed` → `Cancelled` if cancellation was requested, else `Disconnected`
//! - `SourceError`  → `Cancelled` if cancellation was requested, else `Failed`
//!
//! Handlers run inline, so handler latency bounds ingestion 1:1.
//! Batches are not deduplicated: a redelivered batch is dispatched again.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cursor::Cursor;
use crate::error::{SessionError, SourceError, SubscribeError};
use crate::handler::HandlerRegistry;
use crate::request::SubscriptionRequest;
use crate::source::{EventSource, Subscription};
use crate::telemetry::Telemetry;
use crate::types::{EventBatch, EventFilter};

/// The single input the consumer loop operates on.
#[derive(Debug)]
pub enum StreamSignal {
    Batch(EventBatch),
    SourceClosed,
    SourceError(SourceError),
    Cancelled,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Cancellation was requested. Never a failure.
    Cancelled,
    /// The source closed the stream without error or cancellation.
    Disconnected,
    /// The source reported an error, or a handler failed.
    Failed(SessionError),
}

impl SessionOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Result of [`SubscriptionConsumer::run`].
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    /// Last fully processed batch, if any.
    pub cursor: Option<Cursor>,
    /// Batches fully processed (heartbeats included).
    pub batches: u64,
    /// Events that passed the filter and reached at least one handler.
    pub events_dispatched: u64,
}

/// An open subscription together with the request that produced it.
#[derive(Debug)]
pub struct Session {
    request: SubscriptionRequest,
    subscription: Subscription,
}

impl Session {
    pub fn new(request: SubscriptionRequest, subscription: Subscription) -> Self {
        Self {
            request,
            subscription,
        }
    }

    pub fn request(&self) -> &SubscriptionRequest {
        &self.request
    }
}

#[derive(Default)]
struct Progress {
    cursor: Option<Cursor>,
    batches: u64,
    events_dispatched: u64,
}

impl Progress {
    fn finish(self, outcome: SessionOutcome) -> SessionReport {
        SessionReport {
            outcome,
            cursor: self.cursor,
            batches: self.batches,
            events_dispatched: self.events_dispatched,
        }
    }
}

/// Consumes one subscription session at a time.
#[derive(Clone)]
pub struct SubscriptionConsumer {
    handlers: Arc<HandlerRegistry>,
    telemetry: Arc<dyn Telemetry>,
}

impl SubscriptionConsumer {
    pub fn new(handlers: Arc<HandlerRegistry>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            handlers,
            telemetry,
        }
    }

    pub fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry
    }

    /// Open a subscription. Initialization errors are reported and returned
    /// immediately; no session exists in that case.
    pub async fn open(
        &self,
        source: &dyn EventSource,
        request: &SubscriptionRequest,
    ) -> Result<Session, SubscribeError> {
        match source.subscribe(request).await {
            Ok(subscription) => {
                self.telemetry.session_opened(source.name(), request);
                Ok(Session::new(request.clone(), subscription))
            }
            Err(e) => {
                self.telemetry.open_failed(source.name(), &e);
                Err(e)
            }
        }
    }

    /// Consume `session` until cancellation, closure or error.
    pub async fn run(&self, session: Session, cancel: &CancellationToken) -> SessionReport {
        let Session {
            request,
            mut subscription,
        } = session;
        let filter = request.filter();
        let mut progress = Progress::default();
        let mut errors_open = true;

        loop {
            match next_signal(&mut subscription, cancel, &mut errors_open).await {
                StreamSignal::Cancelled => {
                    self.telemetry.cancelled(progress.cursor.as_ref());
                    return progress.finish(SessionOutcome::Cancelled);
                }
                StreamSignal::Batch(batch) => {
                    if cancel.is_cancelled() {
                        self.telemetry.cancelled(progress.cursor.as_ref());
                        return progress.finish(SessionOutcome::Cancelled);
                    }
                    if let Err(e) = self.process_batch(filter, batch, &mut progress).await {
                        if cancel.is_cancelled() {
                            self.telemetry.shutdown_error(&e);
                            self.telemetry.cancelled(progress.cursor.as_ref());
                            return progress.finish(SessionOutcome::Cancelled);
                        }
                        self.telemetry.handler_failed(&e);
                        return progress.finish(SessionOutcome::Failed(e));
                    }
                }
                StreamSignal::SourceClosed => {
                    if cancel.is_cancelled() {
                        self.telemetry.cancelled(progress.cursor.as_ref());
                        return progress.finish(SessionOutcome::Cancelled);
                    }
                    self.telemetry.unexpected_closure(progress.cursor.as_ref());
                    return progress.finish(SessionOutcome::Disconnected);
                }
                StreamSignal::SourceError(e) => {
                    if cancel.is_cancelled() {
                        self.telemetry.shutdown_error(&SessionError::Source(e));
                        self.telemetry.cancelled(progress.cursor.as_ref());
                        return progress.finish(SessionOutcome::Cancelled);
                    }
                    self.telemetry.source_error(&e);
                    return progress.finish(SessionOutcome::Failed(e.into()));
                }
            }
        }
    }

    async fn process_batch(
        &self,
        filter: &EventFilter,
        batch: EventBatch,
        progress: &mut Progress,
    ) -> Result<(), SessionError> {
        self.telemetry
            .batch_received(batch.height, &batch.block_id, batch.events.len());

        let ctx = batch.context();
        let mut dispatched = 0usize;
        let mut filtered = 0usize;
        let mut result = Ok(());

        for event in &batch.events {
            // The source filters too, but that is only a request hint.
            if !filter.matches(&event.event_type) {
                filtered += 1;
                continue;
            }
            match self.handlers.dispatch_event(event, &ctx).await {
                Ok(0) => {}
                Ok(_) => dispatched += 1,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = self.handlers.dispatch_batch(&batch).await;
        }

        self.telemetry.events_dispatched(dispatched, filtered);
        progress.events_dispatched += dispatched as u64;
        result?;

        match progress.cursor.as_mut() {
            Some(cursor) => cursor.advance(batch.height, batch.block_id),
            None => progress.cursor = Some(Cursor::new(batch.height, batch.block_id)),
        }
        progress.batches += 1;
        Ok(())
    }
}

/// Wait for the next signal. Cancellation wins whenever it is ready.
///
/// A closed error channel is not terminal on its own; the data channel
/// decides. When the data channel closes, a pending error is preferred over
/// reporting a clean closure.
pub(crate) async fn next_signal(
    subscription: &mut Subscription,
    cancel: &CancellationToken,
    errors_open: &mut bool,
) -> StreamSignal {
    loop {
        if cancel.is_cancelled() {
            return StreamSignal::Cancelled;
        }
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return StreamSignal::Cancelled,

            batch = subscription.data.recv() => {
                return match batch {
                    Some(batch) => StreamSignal::Batch(batch),
                    None => match subscription.errors.try_recv() {
                        Ok(e) => StreamSignal::SourceError(e),
                        Err(_) => StreamSignal::SourceClosed,
                    },
                };
            }

            err = subscription.errors.recv(), if *errors_open => {
                match err {
                    Some(e) => return StreamSignal::SourceError(e),
                    None => *errors_open = false,
                }
            }
        }
    }
}
