use std::sync::Arc;
use std::time::Duration;

use log::debug;

use super::{Downstream, Stream, StreamId, StreamQuery, StreamReply, Tracks};
use crate::config::ChainElement;
use crate::core::block::ticks;
use crate::core::{Block, EsFormat, Tick};
use crate::error::{SoutError, SoutResult};

/// Shifts the timestamps of one elementary stream, `delay{id=N,delay=ms}`
#[derive(Debug)]
pub struct DelayStream {
    es_id: i32,
    delay: Tick,
    tracks: Tracks<(StreamId, Tick)>,
}

impl DelayStream {
    /// Create the stage from its options
    pub fn open(element: &ChainElement) -> SoutResult<Self> {
        let es_id = element.get_int("id")?.unwrap_or(0);
        let es_id = i32::try_from(es_id)
            .map_err(|_| SoutError::Config(format!("delay: es id {es_id} out of range")))?;
        let delay_ms = element.get_int("delay")?.unwrap_or(0);
        let delay = if delay_ms >= 0 {
            ticks(Duration::from_millis(delay_ms.unsigned_abs()))
        } else {
            -ticks(Duration::from_millis(delay_ms.unsigned_abs()))
        };
        Ok(DelayStream::new(es_id, delay))
    }

    /// Delay es `es_id` by `delay` ticks
    pub fn new(es_id: i32, delay: Tick) -> Self {
        DelayStream {
            es_id,
            delay,
            tracks: Tracks::new(),
        }
    }
}

impl Stream for DelayStream {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn add(&mut self, mut next: Downstream<'_>, format: &Arc<EsFormat>) -> SoutResult<StreamId> {
        let down = next.add(format)?;
        let shift = if format.id == self.es_id {
            debug!("delaying es {} by {} us", format.id, self.delay);
            self.delay
        } else {
            0
        };
        Ok(self.tracks.insert((down, shift)))
    }

    fn del(&mut self, mut next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        let (down, _) = self.tracks.remove(id)?;
        next.del(down)
    }

    fn send(&mut self, mut next: Downstream<'_>, id: StreamId, mut block: Block) -> SoutResult<()> {
        let (down, shift) = *self.tracks.get(id)?;
        if shift != 0 {
            block.pts = block.pts.map(|t| t + shift);
            block.dts = block.dts.map(|t| t + shift);
        }
        next.send(down, block)
    }

    fn flush(&mut self, mut next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        let (down, _) = *self.tracks.get(id)?;
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
    use crate::stream::StreamChain;
    use crate::stream::tests::RecordingStream;

    #[test]
    fn test_only_selected_es_is_shifted() {
        let (tail, log) = RecordingStream::new();
        let element = ChainElement::parse("delay{id=2,delay=-20}").unwrap();
        let mut chain =
            StreamChain::from_stages(vec![Box::new(DelayStream::open(&element).unwrap()), Box::new(tail)]);

        let audio = EsFormat::new(EsCategory::Audio, FourCC::new(b"araw"));
        let one = chain.add(&Arc::new(audio.clone().with_id(1))).unwrap();
        let two = chain.add(&Arc::new(audio.with_id(2))).unwrap();

        chain.send(one, Block::from_slice(b"a").with_timestamps(100_000, 100_000)).unwrap();
        chain.send(two, Block::from_slice(b"b").with_timestamps(100_000, 100_000)).unwrap();
        chain.send(two, Block::from_slice(b"c")).unwrap();

        let log = log.lock();
        assert_eq!(log[2], "send 1 a 100000");
        assert_eq!(log[3], "send 2 b 80000");
        assert_eq!(log[4], "send 2 c -1");
    }

    #[test]
    fn test_bad_options() {
        let element = ChainElement::parse("delay{delay=soon}").unwrap();
        assert!(DelayStream::open(&element).is_err());
    }
}
