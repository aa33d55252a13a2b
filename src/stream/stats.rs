use std::sync::Arc;

use log::info;

use super::{Downstream, Stream, StreamId, StreamQuery, StreamReply, Tracks};
use crate::config::ChainElement;
use crate::core::{Block, EsFormat};
use crate::error::SoutResult;

#[derive(Debug)]
struct TrackStats {
    down: StreamId,
    format: Arc<EsFormat>,
    packets: u64,
    bytes: u64,
}

/// Pass-through stage counting packets and bytes per track
#[derive(Debug)]
pub struct StatsStream {
    prefix: String,
    tracks: Tracks<TrackStats>,
}

impl StatsStream {
    /// Create the stage from its options
    pub fn open(element: &ChainElement) -> Self {
        StatsStream::new(element.get("prefix").unwrap_or("stats"))
    }

    /// Create the stage; `prefix` starts every report line
    pub fn new(prefix: &str) -> Self {
        StatsStream {
            prefix: prefix.to_string(),
            tracks: Tracks::new(),
        }
    }

    /// Packets and bytes seen so far on track `id`
    pub fn counters(&self, id: StreamId) -> SoutResult<(u64, u64)> {
        let track = self.tracks.get(id)?;
        Ok((track.packets, track.bytes))
    }
}

impl Stream for StatsStream {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn add(&mut self, mut next: Downstream<'_>, format: &Arc<EsFormat>) -> SoutResult<StreamId> {
        let down = next.add(format)?;
        info!(
            "{}: new {} track, codec {}, es id {}",
            self.prefix,
            format.category.name(),
            format.codec,
            format.id
        );
        Ok(self.tracks.insert(TrackStats {
            down,
            format: Arc::clone(format),
            packets: 0,
            bytes: 0,
        }))
    }

    fn del(&mut self, mut next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        let track = self.tracks.remove(id)?;
        info!(
            "{}: {} track {} ended after {} packets, {} bytes",
            self.prefix,
            track.format.category.name(),
            track.format.codec,
            track.packets,
            track.bytes
        );
        next.del(track.down)
    }

    fn send(&mut self, mut next: Downstream<'_>, id: StreamId, block: Block) -> SoutResult<()> {
        let track = self.tracks.get_mut(id)?;
        track.packets += 1;
        track.bytes += block.len() as u64;
        next.send(track.down, block)
    }

    fn flush(&mut self, mut next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        let down = self.tracks.get(id)?.down;
        next.flush(down)
    }

    fn control(&mut self, mut next: Downstream<'_>, query: StreamQuery) -> SoutResult<StreamReply> {
        next.control(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EsCategory, FourCC};
    use crate::stream::DummyStream;

    #[test]
    fn test_counts_per_track() {
        let mut stats = StatsStream::open(&ChainElement::parse("stats{prefix=in}").unwrap());
        let mut tail: Vec<Box<dyn Stream>> = vec![Box::new(DummyStream::new())];
        let format = Arc::new(EsFormat::new(EsCategory::Video, FourCC::new(b"h264")));

        let a = stats.add(Downstream::new(&mut tail, "test"), &format).unwrap();
        let b = stats.add(Downstream::new(&mut tail, "test"), &format).unwrap();
        for payload in [&b"abc"[..], b"de"] {
            stats
                .send(Downstream::new(&mut tail, "test"), a, Block::from_slice(payload))
                .unwrap();
        }

        assert_eq!(stats.counters(a).unwrap(), (2, 5));
        assert_eq!(stats.counters(b).unwrap(), (0, 0));
        stats.del(Downstream::new(&mut tail, "test"), a).unwrap();
        assert!(stats.counters(a).is_err());
    }
}
