use std::sync::Arc;
use std::time::Duration;

/// Timestamp in microseconds
pub type Tick = i64;

/// Convert a duration to ticks, saturating at `Tick::MAX`
pub fn ticks(duration: Duration) -> Tick {
    Tick::try_from(duration.as_micros()).unwrap_or(Tick::MAX)
}

/// A sequence of blocks handed over in one write
pub type BlockChain = Vec<Block>;

/// Per-block flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags {
    /// Data is not contiguous with the previous block of the same track
    pub discontinuity: bool,
    /// Block starts a random access point
    pub keyframe: bool,
    /// Block carries container or codec headers
    pub header: bool,
}

/// Owned, reference-counted byte buffer with timing information.
///
/// Passing a `Block` to any `send`/`write` operation moves it: the callee
/// either forwards it or drops it. [`Block::duplicate`] hands out another
/// owner of the same bytes, and the buffer is released when the last owner
/// goes away.
#[derive(Debug)]
pub struct Block {
    buffer: Arc<[u8]>,
    offset: usize,
    /// Presentation timestamp
    pub pts: Option<Tick>,
    /// Decoding timestamp
    pub dts: Option<Tick>,
    /// Duration of the block content
    pub length: Tick,
    /// Block flags
    pub flags: BlockFlags,
}

impl Block {
    /// Create a block taking ownership of `data`
    pub fn new(data: Vec<u8>) -> Self {
        Block {
            buffer: Arc::from(data),
            offset: 0,
            pts: None,
            dts: None,
            length: 0,
            flags: BlockFlags::default(),
        }
    }

    /// Create a block copying `data`
    pub fn from_slice(data: &[u8]) -> Self {
        Block::new(data.to_vec())
    }

    /// Set both timestamps
    pub fn with_timestamps(mut self, pts: Tick, dts: Tick) -> Self {
        self.pts = Some(pts);
        self.dts = Some(dts);
        self
    }

    /// Set the duration
    pub fn with_length(mut self, length: Tick) -> Self {
        self.length = length;
        self
    }

    /// Set the flags
    pub fn with_flags(mut self, flags: BlockFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Remaining payload
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.offset..]
    }

    /// Remaining payload size in bytes
    pub fn len(&self) -> usize {
        self.buffer.len() - self.offset
    }

    /// Check if no payload is left
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Skip `n` bytes of payload after a partial write
    pub fn advance(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.buffer.len());
    }

    /// Another owner of the same payload and metadata
    pub fn duplicate(&self) -> Block {
        Block {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
            pts: self.pts,
            dts: self.dts,
            length: self.length,
            flags: self.flags,
        }
    }

    /// Number of live blocks sharing this payload
    pub fn shared_count(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_advance() {
        let mut block = Block::from_slice(b"hello");
        block.advance(2);
        assert_eq!(block.as_slice(), b"llo");
        assert_eq!(block.len(), 3);

        block.advance(10);
        assert!(block.is_empty());
    }

    #[test]
    fn test_duplicate_shares_payload() {
        let block = Block::from_slice(b"abc").with_timestamps(10, 5);
        let copy = block.duplicate();
        assert_eq!(block.shared_count(), 2);
        assert_eq!(copy.pts, Some(10));
        assert_eq!(copy.dts, Some(5));

        drop(block);
        assert_eq!(copy.shared_count(), 1);
    }

    #[test]
    fn test_ticks() {
        assert_eq!(ticks(Duration::from_millis(1500)), 1_500_000);
    }
}
