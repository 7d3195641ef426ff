//! Observability handle passed explicitly into consumers and supervisors.
//!
//! [`TracingTelemetry`] forwards to `tracing` and keeps counters.
//! [`RecordingTelemetry`] keeps leveled entries in memory for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cursor::Cursor;
use crate::error::{SessionError, SourceError, SubscribeError};
use crate::request::SubscriptionRequest;
use crate::types::BlockId;

/// Sink for session lifecycle events.
pub trait Telemetry: Send + Sync {
    fn session_opened(&self, source: &str, request: &SubscriptionRequest);
    fn open_failed(&self, source: &str, error: &SubscribeError);
    /// One call per received batch, before its events are dispatched.
    fn batch_received(&self, height: u64, block_id: &BlockId, events: usize);
    fn events_dispatched(&self, dispatched: usize, filtered: usize);
    fn unexpected_closure(&self, cursor: Option<&Cursor>);
    fn source_error(&self, error: &SourceError);
    fn handler_failed(&self, error: &SessionError);
    /// A failure that arrived after cancellation was requested. The session
    /// still ends as cancelled; this only keeps the error visible.
    fn shutdown_error(&self, error: &SessionError);
    fn cancelled(&self, cursor: Option<&Cursor>);
    fn reconnecting(&self, attempt: u32, delay: Duration, from_height: u64);
    fn gave_up(&self, attempts: u32);
}

// ─── TracingTelemetry ─────────────────────────────────────────────────────────

/// Snapshot of consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerMetrics {
    pub batches: u64,
    pub heartbeats: u64,
    pub events_dispatched: u64,
    pub events_filtered: u64,
    pub source_errors: u64,
    pub disconnects: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    heartbeats: AtomicU64,
    events_dispatched: AtomicU64,
    events_filtered: AtomicU64,
    source_errors: AtomicU64,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
}

/// Structured-log telemetry.
#[derive(Default)]
pub struct TracingTelemetry {
    counters: Counters,
}

impl TracingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of current counters.
    pub fn metrics(&self) -> ConsumerMetrics {
        let c = &self.counters;
        ConsumerMetrics {
            batches: c.batches.load(Ordering::Relaxed),
            heartbeats: c.heartbeats.load(Ordering::Relaxed),
            events_dispatched: c.events_dispatched.load(Ordering::Relaxed),
            events_filtered: c.events_filtered.load(Ordering::Relaxed),
            source_errors: c.source_errors.load(Ordering::Relaxed),
            disconnects: c.disconnects.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Telemetry for TracingTelemetry {
    fn session_opened(&self, source: &str, request: &SubscriptionRequest) {
        info!(
            source,
            start_height = request.start_height(),
            event_types = request.filter().len(),
            heartbeat_interval = request.heartbeat_interval().get(),
            "Subscription opened"
        );
    }

    fn open_failed(&self, source: &str, error: &SubscribeError) {
        error!(source, error = %error, "Could not subscribe to events");
    }

    fn batch_received(&self, height: u64, block_id: &BlockId, events: usize) {
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        if events == 0 {
            self.counters.heartbeats.fetch_add(1, Ordering::Relaxed);
        }
        info!(height, block_id = %block_id, events, "Block received");
    }

    fn events_dispatched(&self, dispatched: usize, filtered: usize) {
        self.counters
            .events_dispatched
            .fetch_add(dispatched as u64, Ordering::Relaxed);
        self.counters
            .events_filtered
            .fetch_add(filtered as u64, Ordering::Relaxed);
        if filtered > 0 {
            debug!(dispatched, filtered, "Events outside the filter skipped");
        }
    }

    fn unexpected_closure(&self, cursor: Option<&Cursor>) {
        self.counters.disconnects.fetch_add(1, Ordering::Relaxed);
        error!(
            last_height = cursor.map(|c| c.height),
            "Subscription closed unexpectedly"
        );
    }

    fn source_error(&self, error: &SourceError) {
        self.counters.source_errors.fetch_add(1, Ordering::Relaxed);
        error!(error = %error, "Subscription error");
    }

    fn handler_failed(&self, error: &SessionError) {
        error!(error = %error, "Event handler failed");
    }

    fn shutdown_error(&self, error: &SessionError) {
        debug!(error = %error, "Error during shutdown");
    }

    fn cancelled(&self, cursor: Option<&Cursor>) {
        info!(last_height = cursor.map(|c| c.height), "Subscription cancelled");
    }

    fn reconnecting(&self, attempt: u32, delay: Duration, from_height: u64) {
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            from_height,
            "Reconnecting subscription"
        );
    }

    fn gave_up(&self, attempts: u32) {
        error!(attempts, "Max reconnect attempts exceeded");
    }
}

// ─── RecordingTelemetry ───────────────────────────────────────────────────────

/// Log level of a recorded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// In-memory telemetry for tests and embedding.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: Level, message: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message));
        }
    }

    /// All entries recorded so far.
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries at `level`.
    pub fn at(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn session_opened(&self, source: &str, request: &SubscriptionRequest) {
        self.push(
            Level::Info,
            format!("opened {source} at {}", request.start_height()),
        );
    }

    fn open_failed(&self, source: &str, error: &SubscribeError) {
        self.push(Level::Error, format!("open {source} failed: {error}"));
    }

    fn batch_received(&self, height: u64, block_id: &BlockId, events: usize) {
        self.push(
            Level::Info,
            format!("block height: {height}, hash: {block_id}, events: {events}"),
        );
    }

    fn events_dispatched(&self, _dispatched: usize, _filtered: usize) {}

    fn unexpected_closure(&self, cursor: Option<&Cursor>) {
        self.push(
            Level::Error,
            format!("closed unexpectedly after {:?}", cursor.map(|c| c.height)),
        );
    }

    fn source_error(&self, error: &SourceError) {
        self.push(Level::Error, format!("source error: {error}"));
    }

    fn handler_failed(&self, error: &SessionError) {
        self.push(Level::Error, format!("handler failed: {error}"));
    }

    fn shutdown_error(&self, error: &SessionError) {
        self.push(Level::Debug, format!("during shutdown: {error}"));
    }

    fn cancelled(&self, cursor: Option<&Cursor>) {
        self.push(
            Level::Info,
            format!("cancelled after {:?}", cursor.map(|c| c.height)),
        );
    }

    fn reconnecting(&self, attempt: u32, delay: Duration, from_height: u64) {
        self.push(
            Level::Warn,
            format!("reconnect #{attempt} in {delay:?} from {from_height}"),
        );
    }

    fn gave_up(&self, attempts: u32) {
        self.push(Level::Error, format!("gave up after {attempts} attempts"));
    }
}
