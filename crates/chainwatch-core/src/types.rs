//! Shared types for subscription sessions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseBlockIdError;

// ─── BlockId ──────────────────────────────────────────────────────────────────

/// Opaque 32-byte block identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    pub const LEN: usize = 32;

    /// Parse a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, ParseBlockIdError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; Self::LEN];
        hex::decode_to_slice(digits, &mut out).map_err(|e| ParseBlockIdError {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}

impl FromStr for BlockId {
    type Err = ParseBlockIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── Event / EventBatch ───────────────────────────────────────────────────────

/// A single event as delivered by the source. The payload is never decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Fully qualified event type, e.g. `"evm.TransactionExecuted"`.
    pub event_type: String,
    /// Opaque payload bytes.
    pub payload: Bytes,
    pub transaction_id: Option<String>,
    pub transaction_index: Option<u32>,
    pub event_index: Option<u32>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            transaction_id: None,
            transaction_index: None,
            event_index: None,
        }
    }
}

/// All events of one block, delivered as a unit.
///
/// Heights strictly increase within one session. Gaps are not detected here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub height: u64,
    pub block_id: BlockId,
    pub timestamp: Option<DateTime<Utc>>,
    pub events: Vec<Event>,
}

impl EventBatch {
    pub fn new(height: u64, block_id: BlockId, events: Vec<Event>) -> Self {
        Self {
            height,
            block_id,
            timestamp: None,
            events,
        }
    }

    /// A batch with no events, sent by the source as a liveness signal.
    pub fn is_heartbeat(&self) -> bool {
        self.events.is_empty()
    }

    pub fn context(&self) -> BatchContext {
        BatchContext {
            height: self.height,
            block_id: self.block_id,
            timestamp: self.timestamp,
        }
    }
}

/// Block-level context handed to event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchContext {
    pub height: u64,
    pub block_id: BlockId,
    pub timestamp: Option<DateTime<Utc>>,
}

// ─── EventFilter ──────────────────────────────────────────────────────────────

/// Set of event type names to dispatch. Matching is exact and case-sensitive.
///
/// An empty filter matches every event type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFilter {
    event_types: BTreeSet<String>,
}

impl EventFilter {
    pub fn new<I, S>(event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: event_types.into_iter().map(Into::into).collect(),
        }
    }

    /// Add one event type.
    pub fn with(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.insert(event_type.into());
        self
    }

    /// Returns `true` if `event_type` should be dispatched.
    pub fn matches(&self, event_type: &str) -> bool {
        self.event_types.is_empty() || self.event_types.contains(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.event_types.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.event_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_types.is_empty()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
