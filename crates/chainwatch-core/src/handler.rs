//! Event and batch handler traits + registry.
//!
//! Handlers run inline in the consumption loop. A slow handler stalls the
//! whole stream: there is no buffering in between.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HandlerError, SessionError};
use crate::types::{BatchContext, Event, EventBatch, EventFilter};

/// Trait for user-provided event handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for each dispatched event of [`event_type`](Self::event_type).
    async fn handle(&self, event: &Event, ctx: &BatchContext) -> Result<(), HandlerError>;

    /// The event type this handler processes (e.g. `"evm.TransactionExecuted"`).
    fn event_type(&self) -> &str;

    /// Name used when reporting failures.
    fn name(&self) -> &str {
        self.event_type()
    }
}

/// Trait for handlers called once per batch, heartbeats included.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, batch: &EventBatch) -> Result<(), HandlerError>;

    fn name(&self) -> &str;
}

/// Adapter turning a synchronous closure into an [`EventHandler`].
pub struct FnHandler<F> {
    event_type: String,
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event, &BatchContext) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: &Event, ctx: &BatchContext) -> Result<(), HandlerError> {
        (self.f)(event, ctx)
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// Wrap a closure as an event handler for `event_type`.
pub fn handler_fn<F>(event_type: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Event, &BatchContext) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        event_type: event_type.into(),
        f,
    })
}

/// Registry of event + batch handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    event_handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    /// Handlers called for every dispatched event, whatever its type.
    any_handlers: Vec<Arc<dyn EventHandler>>,
    batch_handlers: Vec<Arc<dyn BatchHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event handler for its event type.
    pub fn on_event(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handlers
            .entry(handler.event_type().to_string())
            .or_default()
            .push(handler);
    }

    /// Register a handler for every event type. It runs after the
    /// type-specific handlers of each event.
    pub fn on_any_event(&mut self, handler: Arc<dyn EventHandler>) {
        self.any_handlers.push(handler);
    }

    /// Register a batch handler (called for every batch).
    pub fn on_batch(&mut self, handler: Arc<dyn BatchHandler>) {
        self.batch_handlers.push(handler);
    }

    /// Returns `true` if at least one handler exists for `event_type`.
    pub fn handles(&self, event_type: &str) -> bool {
        !self.any_handlers.is_empty() || self.event_handlers.contains_key(event_type)
    }

    /// A filter covering every event type with a registered handler.
    /// Empty (matching everything) once a catch-all handler is registered.
    pub fn filter(&self) -> EventFilter {
        if !self.any_handlers.is_empty() {
            return EventFilter::default();
        }
        EventFilter::new(self.event_handlers.keys().cloned())
    }

    /// Dispatch an event to its handlers, in registration order. Returns
    /// how many handlers ran.
    pub async fn dispatch_event(
        &self,
        event: &Event,
        ctx: &BatchContext,
    ) -> Result<usize, SessionError> {
        let typed = self
            .event_handlers
            .get(&event.event_type)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for handler in typed.iter().chain(&self.any_handlers) {
            handler
                .handle(event, ctx)
                .await
                .map_err(|source| SessionError::Handler {
                    handler: handler.name().to_string(),
                    height: ctx.height,
                    source,
                })?;
        }
        Ok(typed.len() + self.any_handlers.len())
    }

    /// Dispatch a batch to all batch handlers.
    pub async fn dispatch_batch(&self, batch: &EventBatch) -> Result<(), SessionError> {
        for handler in &self.batch_handlers {
            handler
                .handle_batch(batch)
                .await
                .map_err(|source| SessionError::Handler {
                    handler: handler.name().to_string(),
                    height: batch.height,
                    source,
                })?;
        }
        Ok(())
    }
}
