//! `FlowAccessClient` — [`EventSource`] backed by the Flow Access REST API.
//!
//! The latest sealed height comes from `GET /v1/blocks?height=sealed`; event
//! streams come from the `subscribe_events` WebSocket endpoint. Each stream
//! is pumped by a background task that owns the socket and is aborted when
//! the [`Subscription`] is dropped. Reconnection is left to the caller.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info, warn};

use chainwatch_core::source::DEFAULT_CHANNEL_CAPACITY;
use chainwatch_core::{
    EventSource, SourceError, SubscribeError, Subscription, SubscriptionRequest,
    SubscriptionSender,
};

use crate::endpoints::{FlowEndpoints, FlowNetwork};
use crate::error::FlowError;
use crate::wire::{parse_block_height, parse_frame};

/// Configuration for `FlowAccessClient`.
#[derive(Debug, Clone)]
pub struct FlowClientConfig {
    /// Timeout for REST requests.
    pub request_timeout: Duration,
    /// Batches buffered between the socket task and the consumer.
    pub channel_capacity: usize,
}

impl Default for FlowClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Event source talking to one Flow access node.
pub struct FlowAccessClient {
    name: String,
    endpoints: FlowEndpoints,
    http: reqwest::Client,
    channel_capacity: usize,
}

impl FlowAccessClient {
    pub fn new(endpoints: FlowEndpoints, config: FlowClientConfig) -> Result<Self, FlowError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FlowError::Client(e.to_string()))?;

        Ok(Self {
            name: endpoints.ws().host_str().unwrap_or("flow").to_string(),
            endpoints,
            http,
            channel_capacity: config.channel_capacity.max(1),
        })
    }

    /// Client for a public network with default configuration.
    pub fn for_network(network: FlowNetwork) -> Result<Self, FlowError> {
        Self::new(network.endpoints()?, FlowClientConfig::default())
    }

    pub fn endpoints(&self) -> &FlowEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl EventSource for FlowAccessClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_height(&self) -> Result<u64, SubscribeError> {
        let url = self.endpoints.sealed_block_url();
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_http_error(url.as_str(), e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SubscribeError::Rejected {
                status,
                reason: body,
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| SubscribeError::Transport(e.to_string()))?;
        let height = parse_block_height(&body).map_err(SubscribeError::Transport)?;
        debug!(source = %self.name, height, "Fetched latest sealed height");
        Ok(height)
    }

    async fn subscribe(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<Subscription, SubscribeError> {
        let url = self.endpoints.subscribe_url(request);
        info!(url = %url, "Connecting event stream");

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| map_handshake_error(url.as_str(), e))?;

        let (sender, subscription) = Subscription::channel(self.channel_capacity);
        let source = self.name.clone();
        let task = tokio::spawn(async move {
            pump(ws, sender).await;
            debug!(source = %source, "Event stream task finished");
        });
        Ok(subscription.with_task(task))
    }
}

fn map_http_error(endpoint: &str, e: reqwest::Error) -> SubscribeError {
    if e.is_connect() || e.is_timeout() {
        SubscribeError::Connect {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }
    } else {
        SubscribeError::Transport(e.to_string())
    }
}

fn map_handshake_error(endpoint: &str, e: tungstenite::Error) -> SubscribeError {
    match e {
        tungstenite::Error::Http(resp) => {
            let status = resp.status();
            let reason = resp
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());
            SubscribeError::Rejected {
                status: status.as_u16(),
                reason,
            }
        }
        tungstenite::Error::Url(e) => SubscribeError::InvalidRequest(e.to_string()),
        other => SubscribeError::Connect {
            endpoint: endpoint.to_string(),
            reason: other.to_string(),
        },
    }
}

// ─── Socket pump ──────────────────────────────────────────────────────────────

/// Forward frames from the socket until it closes, errors, or the consumer
/// goes away. Dropping `sender` on return closes both channels.
async fn pump<S>(ws: WebSocketStream<S>, sender: SubscriptionSender)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();

    while let Some(msg) = read.next().await {
        match msg {
            Err(e) => {
                warn!(error = %e, "Event stream receive error");
                sender.send_error(SourceError::Transport(e.to_string())).await;
                return;
            }
            Ok(Message::Text(text)) => match parse_frame(&text) {
                Ok(batch) => {
                    if !sender.send_batch(batch).await {
                        debug!("Consumer dropped, closing event stream");
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    }
                }
                Err(e) => {
                    sender.send_error(e).await;
                    return;
                }
            },
            Ok(Message::Close(frame)) => {
                match frame {
                    Some(f) if !matches!(f.code, CloseCode::Normal | CloseCode::Away) => {
                        sender
                            .send_error(SourceError::Abnormal {
                                code: f.code.into(),
                                reason: f.reason.to_string(),
                            })
                            .await;
                    }
                    _ => info!("Event stream closed by server"),
                }
                return;
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Binary(data)) => {
                debug!(len = data.len(), "Ignoring binary frame");
            }
            Ok(other) => {
                debug!(frame = ?other, "Ignoring frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_core::{
        CancellationToken, HandlerRegistry, RecordingTelemetry, SessionError, SessionOutcome,
        SubscriptionConsumer,
    };
    use std::borrow::Cow;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    const ID: &str = "7aa74143741c1c3b837d389fcffa7a5e251b67b4ffef6d6887b40cd9c803f537";

    fn batch_text(height: u64) -> String {
        format!(
            r#"{{"BlockId": "{ID}", "Height": "{height}", "Events": [{{"type": "A", "payload": "eA=="}}]}}"#
        )
    }

    /// Serve one WebSocket connection that sends `frames` and then `close`.
    async fn serve(frames: Vec<Message>) -> FlowAccessClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            for frame in frames {
                ws.send(frame).await.unwrap();
            }
            // Drain until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let endpoints =
            FlowEndpoints::new(&format!("http://{addr}"), &format!("ws://{addr}")).unwrap();
        FlowAccessClient::new(endpoints, FlowClientConfig::default()).unwrap()
    }

    async fn run(client: &FlowAccessClient) -> (SessionOutcome, u64) {
        let consumer = SubscriptionConsumer::new(
            Arc::new(HandlerRegistry::new()),
            Arc::new(RecordingTelemetry::new()),
        );
        let request = SubscriptionRequest::builder()
            .start_height(1)
            .event_type("A")
            .build()
            .unwrap();
        let session = consumer.open(client, &request).await.unwrap();
        let report = consumer.run(session, &CancellationToken::new()).await;
        (report.outcome, report.batches)
    }

    #[tokio::test]
    async fn normal_close_is_disconnect() {
        let client = serve(vec![
            Message::Text(batch_text(1)),
            Message::Text(batch_text(2)),
            Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: Cow::Borrowed(""),
            })),
        ])
        .await;

        let (outcome, batches) = run(&client).await;
        assert_eq!(outcome, SessionOutcome::Disconnected);
        assert_eq!(batches, 2);
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let client = serve(vec![
            Message::Binary(vec![0xde, 0xad]),
            Message::Text(batch_text(1)),
            Message::Binary(vec![]),
            Message::Text(batch_text(2)),
            Message::Close(None),
        ])
        .await;

        let (outcome, batches) = run(&client).await;
        assert_eq!(outcome, SessionOutcome::Disconnected);
        assert_eq!(batches, 2);
    }

    #[tokio::test]
    async fn error_frame_fails_session() {
        let client = serve(vec![
            Message::Text(batch_text(1)),
            Message::Text(r#"{"code": 500, "message": "stream failed"}"#.into()),
        ])
        .await;

        let (outcome, batches) = run(&client).await;
        assert_eq!(batches, 1);
        assert!(matches!(
            outcome,
            SessionOutcome::Failed(SessionError::Source(SourceError::Remote { code: 500, .. }))
        ));
    }

    #[tokio::test]
    async fn abnormal_close_is_source_error() {
        let client = serve(vec![Message::Close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: Cow::Borrowed("internal"),
        }))])
        .await;

        let (outcome, _) = run(&client).await;
        assert!(matches!(
            outcome,
            SessionOutcome::Failed(SessionError::Source(SourceError::Abnormal { code: 1011, .. }))
        ));
    }

    #[tokio::test]
    async fn unreachable_node_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoints =
            FlowEndpoints::new(&format!("http://{addr}"), &format!("ws://{addr}")).unwrap();
        let client = FlowAccessClient::new(endpoints, FlowClientConfig::default()).unwrap();
        let request = SubscriptionRequest::builder().start_height(1).build().unwrap();

        let err = client.subscribe(&request).await.unwrap_err();
        assert!(matches!(err, SubscribeError::Connect { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn handshake_rejection_maps_status() {
        let resp = tungstenite::http::Response::builder()
            .status(400)
            .body(Some(b"invalid event type".to_vec()))
            .unwrap();
        let err = map_handshake_error("ws://node", tungstenite::Error::Http(resp));
        assert!(matches!(err, SubscribeError::Rejected { status: 400, ref reason } if reason == "invalid event type"));
        assert!(!err.is_retryable());
    }
}
