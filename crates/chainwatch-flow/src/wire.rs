//! JSON shapes of the access node REST and streaming responses.
//!
//! The node encodes 64-bit integers as decimal strings; both strings and
//! plain numbers are accepted. Event payloads arrive base64 encoded and are
//! passed on as opaque bytes.

use chainwatch_core::{BlockId, Event, EventBatch, SourceError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_with::{base64::Base64, serde_as, DisplayFromStr, PickFirst};

// ─── Streaming frames ─────────────────────────────────────────────────────────

#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct BatchFrame {
    #[serde(rename = "BlockId")]
    block_id: String,
    #[serde(rename = "Height")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    height: u64,
    #[serde(rename = "BlockTimestamp", default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "Events", default)]
    events: Option<Vec<EventFrame>>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct EventFrame {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    transaction_index: Option<u32>,
    #[serde(default)]
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    event_index: Option<u32>,
    #[serde_as(as = "Base64")]
    payload: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorFrame {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Frame {
    Batch(BatchFrame),
    Error(ErrorFrame),
}

/// Decode one text frame into a batch, or the error it carries.
pub fn parse_frame(text: &str) -> Result<EventBatch, SourceError> {
    let frame: Frame = serde_json::from_str(text)
        .map_err(|e| SourceError::Decode(format!("unrecognised frame: {e}")))?;

    match frame {
        Frame::Error(ErrorFrame { code, message }) => Err(SourceError::Remote { code, message }),
        Frame::Batch(batch) => batch.into_batch(),
    }
}

impl BatchFrame {
    fn into_batch(self) -> Result<EventBatch, SourceError> {
        let block_id = BlockId::from_hex(&self.block_id)
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let events = self
            .events
            .unwrap_or_default()
            .into_iter()
            .map(|e| Event {
                event_type: e.event_type,
                payload: e.payload.into(),
                transaction_id: e.transaction_id,
                transaction_index: e.transaction_index,
                event_index: e.event_index,
            })
            .collect();

        let mut batch = EventBatch::new(self.height, block_id, events);
        batch.timestamp = self.timestamp;
        Ok(batch)
    }
}

// ─── REST ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct BlockResponse {
    header: BlockHeader,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct BlockHeader {
    #[allow(dead_code)]
    id: String,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    height: u64,
}

/// Height of the first block in a `/v1/blocks` response body.
pub fn parse_block_height(body: &str) -> Result<u64, String> {
    let blocks: Vec<BlockResponse> =
        serde_json::from_str(body).map_err(|e| format!("malformed block response: {e}"))?;
    blocks
        .first()
        .map(|b| b.header.height)
        .ok_or_else(|| "empty block response".to_string())
}
