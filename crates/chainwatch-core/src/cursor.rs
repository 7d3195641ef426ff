//! Session cursor: the last batch that was fully processed.

use serde::{Deserialize, Serialize};

use crate::types::BlockId;

/// Position of the consumer in the stream.
///
/// Kept in memory only; a reconnecting supervisor resumes from
/// [`Cursor::next_height`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Height of the last fully dispatched batch.
    pub height: u64,
    /// Block id of the last fully dispatched batch.
    pub block_id: BlockId,
}

impl Cursor {
    pub fn new(height: u64, block_id: BlockId) -> Self {
        Self { height, block_id }
    }

    /// Move the cursor to a newly processed batch.
    pub fn advance(&mut self, height: u64, block_id: BlockId) {
        self.height = height;
        self.block_id = block_id;
    }

    /// Height to start a new subscription at (cursor + 1).
    pub fn next_height(&self) -> u64 {
        self.height.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advance() {
        let mut cursor = Cursor::new(100, BlockId([1; 32]));
        cursor.advance(101, BlockId([2; 32]));
        assert_eq!(cursor.height, 101);
        assert_eq!(cursor.block_id, BlockId([2; 32]));
    }

    #[test]
    fn cursor_next_height() {
        assert_eq!(Cursor::new(500, BlockId::default()).next_height(), 501);
        assert_eq!(Cursor::new(u64::MAX, BlockId::default()).next_height(), u64::MAX);
    }
}
