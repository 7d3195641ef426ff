//! End-to-end consumer and supervisor behaviour against a scripted source.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainwatch_core::telemetry::Level;
use chainwatch_core::{
    handler_fn, BatchHandler, BlockId, CancellationToken, Event, EventBatch, HandlerError,
    HandlerRegistry, MemorySource, RecordingTelemetry, RetryConfig, SessionError, SessionOutcome,
    SourceError, SubscribeError, SubscriptionConsumer, SubscriptionRequest, Supervisor,
    SupervisorConfig, SupervisorOutcome,
};

type Log = Arc<Mutex<Vec<(String, String)>>>;

fn batch(height: u64, events: &[(&str, &str)]) -> EventBatch {
    EventBatch::new(
        height,
        BlockId([height as u8; 32]),
        events.iter().map(|(t, v)| Event::new(*t, v.to_string())).collect(),
    )
}

fn request(start: u64, types: &[&str]) -> SubscriptionRequest {
    SubscriptionRequest::builder()
        .start_height(start)
        .event_types(types.iter().copied())
        .heartbeat_interval(20)
        .build()
        .unwrap()
}

fn recording_registry(types: &[&str], log: &Log) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for t in types {
        let log = log.clone();
        registry.on_event(handler_fn(*t, move |e: &Event, _| {
            log.lock().unwrap().push((
                e.event_type.clone(),
                String::from_utf8_lossy(&e.payload).into_owned(),
            ));
            Ok(())
        }));
    }
    registry
}

/// Cancels the token once a batch at `height` has been handled.
struct CancelAt {
    height: u64,
    token: CancellationToken,
}

#[async_trait]
impl BatchHandler for CancelAt {
    async fn handle_batch(&self, batch: &EventBatch) -> Result<(), HandlerError> {
        if batch.height == self.height {
            self.token.cancel();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "cancel-at"
    }
}

#[tokio::test]
async fn single_batch_then_clean_close() {
    let log: Log = Default::default();
    let telemetry = Arc::new(RecordingTelemetry::new());
    let consumer = SubscriptionConsumer::new(
        Arc::new(recording_registry(&["evm.TransactionExecuted"], &log)),
        telemetry.clone(),
    );

    let source = MemorySource::new(100);
    source.push_session(
        vec![batch(
            100,
            &[("evm.BlockExecuted", "v1"), ("evm.TransactionExecuted", "v2")],
        )],
        None,
    );

    let session = consumer
        .open(&source, &request(100, &["evm.TransactionExecuted"]))
        .await
        .unwrap();
    let report = consumer.run(session, &CancellationToken::new()).await;

    assert_eq!(report.outcome, SessionOutcome::Disconnected);
    assert_eq!(
        *log.lock().unwrap(),
        vec![("evm.TransactionExecuted".to_string(), "v2".to_string())]
    );
    let batch_lines: Vec<_> = telemetry
        .at(Level::Info)
        .into_iter()
        .filter(|m| m.starts_with("block height: 100"))
        .collect();
    assert_eq!(batch_lines.len(), 1);
}

#[tokio::test]
async fn dispatch_preserves_source_order() {
    let log: Log = Default::default();
    let consumer = SubscriptionConsumer::new(
        Arc::new(recording_registry(&["A", "B"], &log)),
        Arc::new(RecordingTelemetry::new()),
    );

    let mut expected = Vec::new();
    let mut batches = Vec::new();
    for h in 1..=50u64 {
        let events: Vec<(String, String)> = (0..(h % 4))
            .map(|i| {
                let t = if (h + i) % 2 == 0 { "A" } else { "B" };
                (t.to_string(), format!("{h}:{i}"))
            })
            .collect();
        expected.extend(events.iter().cloned());
        let refs: Vec<(&str, &str)> = events.iter().map(|(t, v)| (t.as_str(), v.as_str())).collect();
        batches.push(batch(h, &refs));
    }

    let source = MemorySource::new(1);
    source.push_session(batches, None);
    let session = consumer.open(&source, &request(1, &["A", "B"])).await.unwrap();
    let report = consumer.run(session, &CancellationToken::new()).await;

    assert_eq!(*log.lock().unwrap(), expected);
    assert_eq!(report.batches, 50);
    assert_eq!(report.cursor.map(|c| c.height), Some(50));
}

#[tokio::test]
async fn filter_drops_unrequested_types() {
    let log: Log = Default::default();
    let consumer = SubscriptionConsumer::new(
        Arc::new(recording_registry(&["A", "B", "C"], &log)),
        Arc::new(RecordingTelemetry::new()),
    );

    let source = MemorySource::new(1);
    source.push_session(
        vec![batch(1, &[("A", "1"), ("B", "2"), ("C", "3"), ("B", "4"), ("A", "5")])],
        None,
    );
    let session = consumer.open(&source, &request(1, &["A", "C"])).await.unwrap();
    consumer.run(session, &CancellationToken::new()).await;

    let seen: Vec<String> = log.lock().unwrap().iter().map(|(_, v)| v.clone()).collect();
    assert_eq!(seen, vec!["1", "3", "5"]);
}

#[tokio::test]
async fn source_error_logged_once_and_fails() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let consumer =
        SubscriptionConsumer::new(Arc::new(HandlerRegistry::new()), telemetry.clone());

    let source = MemorySource::new(1);
    source.push_session(
        vec![batch(1, &[])],
        Some(SourceError::Remote {
            code: 13,
            message: "stream lost".into(),
        }),
    );
    let session = consumer.open(&source, &request(1, &["A"])).await.unwrap();
    let report = consumer.run(session, &CancellationToken::new()).await;

    assert!(matches!(
        report.outcome,
        SessionOutcome::Failed(SessionError::Source(SourceError::Remote { code: 13, .. }))
    ));
    assert_eq!(telemetry.at(Level::Error).len(), 1);
}

#[tokio::test]
async fn cancellation_takes_priority_over_pending_batches() {
    let log: Log = Default::default();
    let cancel = CancellationToken::new();
    let mut registry = recording_registry(&["A"], &log);
    registry.on_batch(Arc::new(CancelAt {
        height: 1,
        token: cancel.clone(),
    }));
    let telemetry = Arc::new(RecordingTelemetry::new());
    let consumer = SubscriptionConsumer::new(Arc::new(registry), telemetry.clone());

    let source = MemorySource::new(1);
    source.push_open_session(vec![batch(1, &[("A", "1")]), batch(2, &[("A", "2")])]);
    let session = consumer.open(&source, &request(1, &["A"])).await.unwrap();
    let report = consumer.run(session, &cancel).await;

    assert_eq!(report.outcome, SessionOutcome::Cancelled);
    assert_eq!(log.lock().unwrap().len(), 1);
    assert_eq!(report.cursor.map(|c| c.height), Some(1));
    assert!(telemetry.at(Level::Error).is_empty());
}

#[tokio::test]
async fn cancellation_while_idle() {
    let consumer = SubscriptionConsumer::new(
        Arc::new(HandlerRegistry::new()),
        Arc::new(RecordingTelemetry::new()),
    );
    let source = MemorySource::new(1);
    source.push_open_session(vec![]);
    let session = consumer.open(&source, &request(1, &[])).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let report = consumer.run(session, &cancel).await;
    assert_eq!(report.outcome, SessionOutcome::Cancelled);
    assert!(report.cursor.is_none());
}

#[tokio::test]
async fn redelivered_batch_is_dispatched_again() {
    let log: Log = Default::default();
    let consumer = SubscriptionConsumer::new(
        Arc::new(recording_registry(&["A"], &log)),
        Arc::new(RecordingTelemetry::new()),
    );

    let b = batch(7, &[("A", "x")]);
    let source = MemorySource::new(7);
    source.push_session(vec![b.clone(), b], None);
    let session = consumer.open(&source, &request(7, &["A"])).await.unwrap();
    let report = consumer.run(session, &CancellationToken::new()).await;

    assert_eq!(log.lock().unwrap().len(), 2);
    assert_eq!(report.batches, 2);
}

#[tokio::test]
async fn open_error_is_reported_and_returned() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let consumer =
        SubscriptionConsumer::new(Arc::new(HandlerRegistry::new()), telemetry.clone());
    let source = MemorySource::new(1);
    source.push_open_error(SubscribeError::Rejected {
        status: 400,
        reason: "unknown event type".into(),
    });

    let err = consumer.open(&source, &request(1, &["A"])).await.unwrap_err();
    assert!(matches!(err, SubscribeError::Rejected { status: 400, .. }));
    assert_eq!(telemetry.at(Level::Error).len(), 1);
}

// ─── Supervisor ───────────────────────────────────────────────────────────────

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries: Some(max_retries),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        multiplier: 2.0,
    }
}

#[tokio::test]
async fn supervisor_resumes_after_last_processed_height() {
    let log: Log = Default::default();
    let cancel = CancellationToken::new();
    let mut registry = recording_registry(&["A"], &log);
    registry.on_batch(Arc::new(CancelAt {
        height: 13,
        token: cancel.clone(),
    }));
    let consumer = SubscriptionConsumer::new(
        Arc::new(registry),
        Arc::new(RecordingTelemetry::new()),
    );

    let source = Arc::new(MemorySource::new(10));
    source.push_session(vec![batch(10, &[("A", "10")]), batch(11, &[])], None);
    source.push_session(
        vec![batch(12, &[("A", "12")])],
        Some(SourceError::Transport("reset".into())),
    );
    source.push_open_session(vec![batch(13, &[("A", "13")])]);

    let supervisor = Supervisor::new(
        source.clone(),
        consumer,
        SupervisorConfig {
            reconnect: true,
            retry: fast_retry(3),
        },
    );
    let report = supervisor.run(request(10, &["A"]), &cancel).await;

    assert!(report.outcome.is_cancelled());
    assert_eq!(report.sessions, 3);
    assert_eq!(source.requested_heights(), vec![10, 12, 13]);
    assert_eq!(report.cursor.map(|c| c.height), Some(13));
    let values: Vec<String> = log.lock().unwrap().iter().map(|(_, v)| v.clone()).collect();
    assert_eq!(values, vec!["10", "12", "13"]);
}

#[tokio::test]
async fn supervisor_gives_up_after_max_retries() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let consumer =
        SubscriptionConsumer::new(Arc::new(HandlerRegistry::new()), telemetry.clone());
    // No scripted sessions: every open fails with a retryable connect error.
    let source = Arc::new(MemorySource::new(1));

    let supervisor = Supervisor::new(
        source.clone(),
        consumer,
        SupervisorConfig {
            reconnect: true,
            retry: fast_retry(2),
        },
    );
    let report = supervisor
        .run(request(5, &["A"]), &CancellationToken::new())
        .await;

    assert!(matches!(
        report.outcome,
        SupervisorOutcome::InitFailed(SubscribeError::Connect { .. })
    ));
    assert_eq!(source.requested_heights(), vec![5, 5, 5]);
    assert_eq!(telemetry.at(Level::Warn).len(), 2);
    assert!(telemetry
        .at(Level::Error)
        .iter()
        .any(|m| m == "gave up after 2 attempts"));
}

#[tokio::test]
async fn supervisor_does_not_retry_handler_failures() {
    let mut registry = HandlerRegistry::new();
    registry.on_event(handler_fn("A", |_, _| Err("cannot print".into())));
    let consumer = SubscriptionConsumer::new(
        Arc::new(registry),
        Arc::new(RecordingTelemetry::new()),
    );
    let source = Arc::new(MemorySource::new(1));
    source.push_session(vec![batch(1, &[("A", "x")])], None);

    let supervisor = Supervisor::new(
        source.clone(),
        consumer,
        SupervisorConfig {
            reconnect: true,
            retry: fast_retry(5),
        },
    );
    let report = supervisor
        .run(request(1, &["A"]), &CancellationToken::new())
        .await;

    assert!(matches!(
        report.outcome,
        SupervisorOutcome::Failed(SessionError::Handler { height: 1, .. })
    ));
    assert_eq!(report.sessions, 1);
}

#[tokio::test]
async fn supervisor_cancelled_during_backoff() {
    let consumer = SubscriptionConsumer::new(
        Arc::new(HandlerRegistry::new()),
        Arc::new(RecordingTelemetry::new()),
    );
    let source = Arc::new(MemorySource::new(1));
    let supervisor = Supervisor::new(
        source.clone(),
        consumer,
        SupervisorConfig {
            reconnect: true,
            retry: RetryConfig {
                max_retries: None,
                initial_backoff: Duration::from_secs(60),
                max_backoff: Duration::from_secs(60),
                multiplier: 1.0,
            },
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.run(request(1, &["A"]), &cancel),
    )
    .await
    .expect("supervisor did not observe cancellation");

    assert!(report.outcome.is_cancelled());
    assert_eq!(source.requested_heights(), vec![1]);
}
