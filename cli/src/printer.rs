//! Console output for matching events.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use chainwatch_core::{BatchContext, Event, EventHandler, HandlerError};

/// Prints `<type>: <payload>` for each event it is registered for.
///
/// Payloads are printed as text when they are valid UTF-8, hex otherwise.
pub struct Printer<W> {
    event_type: String,
    out: Mutex<W>,
}

impl<W: Write + Send> Printer<W> {
    pub fn new(event_type: impl Into<String>, out: W) -> Self {
        Self {
            event_type: event_type.into(),
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn render(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.trim_end().to_string(),
        Err(_) => format!("0x{}", hex::encode(payload)),
    }
}

#[async_trait]
impl<W: Write + Send> EventHandler for Printer<W> {
    async fn handle(&self, event: &Event, _ctx: &BatchContext) -> Result<(), HandlerError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| HandlerError::new("output lock poisoned"))?;
        writeln!(out, "{}: {}", event.event_type, render(&event.payload))
            .and_then(|_| out.flush())
            .map_err(HandlerError::new)
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn name(&self) -> &str {
        "printer"
    }
}
