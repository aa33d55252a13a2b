//! Stream output chains: ordered per-track processing stages
//!
//! Every stage implements the same [`Stream`] contract. A stage reaches the
//! rest of the chain through the [`Downstream`] view it is handed on each
//! call, so stages never hold pointers to each other.

pub mod delay;
pub mod dummy;
pub mod duplicate;
pub mod standard;
pub mod stats;

pub use delay::DelayStream;
pub use dummy::DummyStream;
pub use duplicate::DuplicateStream;
pub use standard::StandardStream;
pub use stats::StatsStream;

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use log::{debug, error};

use crate::config::{ChainElement, ConfigChain};
use crate::core::{Block, EsFormat};
use crate::error::{SoutError, SoutResult};
use crate::instance::SoutContext;

/// Stream output stage names and what they do
pub const MODULES: &[(&str, &str)] = &[
    ("std", "mux into an access output (aliases: standard, file, stream, fd)"),
    ("duplicate", "send every track to several sub-chains"),
    ("delay", "shift the timestamps of one elementary stream"),
    ("stats", "count packets and bytes per track"),
    ("dummy", "accept every track and drop every block"),
];

/// Per-stage track handle.
///
/// Only meaningful to the stage that returned it; a stage forwarding a
/// track keeps its own mapping to the id of the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

/// Queries a stage answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamQuery {
    /// Has every muxer down the chain drained its inputs
    IsEmpty,
    /// Is the output paced by its sink
    IsSynchronous,
    /// MIME type of the produced container
    GetMime,
}

/// Answer to a [`StreamQuery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamReply {
    /// Answer to a yes/no query
    Bool(bool),
    /// MIME type
    Mime(String),
}

impl StreamReply {
    /// Extract a yes/no answer
    pub fn into_bool(self) -> SoutResult<bool> {
        match self {
            StreamReply::Bool(b) => Ok(b),
            StreamReply::Mime(_) => Err(SoutError::Unsupported("boolean answer to a MIME query")),
        }
    }

    /// Extract a MIME type
    pub fn into_mime(self) -> SoutResult<String> {
        match self {
            StreamReply::Mime(m) => Ok(m),
            StreamReply::Bool(_) => Err(SoutError::Unsupported("MIME answer to a boolean query")),
        }
    }
}

/// One processing stage of a stream output chain
pub trait Stream: Send {
    /// Stage name
    fn name(&self) -> &'static str;

    /// Start a new track described by `format`
    fn add(&mut self, next: Downstream<'_>, format: &Arc<EsFormat>) -> SoutResult<StreamId>;

    /// End a track; called exactly once per successful [`Stream::add`]
    fn del(&mut self, next: Downstream<'_>, id: StreamId) -> SoutResult<()>;

    /// Hand a block of track `id` over to the stage
    fn send(&mut self, next: Downstream<'_>, id: StreamId, block: Block) -> SoutResult<()>;

    /// Discard whatever the stage buffers for the track
    fn flush(&mut self, _next: Downstream<'_>, _id: StreamId) -> SoutResult<()> {
        Ok(())
    }

    /// Answer a query
    fn control(&mut self, _next: Downstream<'_>, _query: StreamQuery) -> SoutResult<StreamReply> {
        Err(SoutError::Unsupported("query on this stream stage"))
    }

    /// Cooperative tick with no new data
    fn tick(&mut self, mut next: Downstream<'_>) -> SoutResult<()> {
        next.tick()
    }
}

/// The stages after the one being called
pub struct Downstream<'a> {
    stages: &'a mut [Box<dyn Stream>],
    upstream: &'static str,
}

impl<'a> Downstream<'a> {
    /// View over `stages`, called on behalf of `upstream`
    pub fn new(stages: &'a mut [Box<dyn Stream>], upstream: &'static str) -> Self {
        Downstream { stages, upstream }
    }

    /// Nothing follows the calling stage
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Name of the next stage
    pub fn name(&self) -> Option<&'static str> {
        self.stages.first().map(|stage| stage.name())
    }

    /// [`Stream::add`] on the next stage
    pub fn add(&mut self, format: &Arc<EsFormat>) -> SoutResult<StreamId> {
        let (head, next) = self.split()?;
        head.add(next, format)
    }

    /// [`Stream::del`] on the next stage
    pub fn del(&mut self, id: StreamId) -> SoutResult<()> {
        let (head, next) = self.split()?;
        head.del(next, id)
    }

    /// [`Stream::send`] on the next stage
    pub fn send(&mut self, id: StreamId, block: Block) -> SoutResult<()> {
        let (head, next) = self.split()?;
        head.send(next, id, block)
    }

    /// [`Stream::flush`] on the next stage
    pub fn flush(&mut self, id: StreamId) -> SoutResult<()> {
        let (head, next) = self.split()?;
        head.flush(next, id)
    }

    /// [`Stream::control`] on the next stage
    pub fn control(&mut self, query: StreamQuery) -> SoutResult<StreamReply> {
        let (head, next) = self.split()?;
        head.control(next, query)
    }

    /// [`Stream::tick`] on the next stage; the end of the chain is a no-op
    pub fn tick(&mut self) -> SoutResult<()> {
        if self.stages.is_empty() {
            return Ok(());
        }
        let (head, next) = self.split()?;
        head.tick(next)
    }

    fn split(&mut self) -> SoutResult<(&mut Box<dyn Stream>, Downstream<'_>)> {
        let upstream = self.upstream;
        let (head, rest) = self
            .stages
            .split_first_mut()
            .ok_or_else(|| SoutError::NoDownstream(upstream.to_string()))?;
        let name = head.name();
        Ok((head, Downstream::new(rest, name)))
    }
}

/// Track table mapping a stage's [`StreamId`]s to per-track state
#[derive(Debug)]
pub struct Tracks<T> {
    next: u32,
    items: Vec<(StreamId, T)>,
}

impl<T> Default for Tracks<T> {
    fn default() -> Self {
        Tracks {
            next: 0,
            items: Vec::new(),
        }
    }
}

impl<T> Tracks<T> {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the state of a new track and return its id
    pub fn insert(&mut self, value: T) -> StreamId {
        let id = StreamId(self.next);
        self.next += 1;
        self.items.push((id, value));
        id
    }

    /// State of track `id`
    pub fn get(&self, id: StreamId) -> SoutResult<&T> {
        self.items
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, v)| v)
            .ok_or(SoutError::UnknownStream(id.0))
    }

    /// Mutable state of track `id`
    pub fn get_mut(&mut self, id: StreamId) -> SoutResult<&mut T> {
        self.items
            .iter_mut()
            .find(|(i, _)| *i == id)
            .map(|(_, v)| v)
            .ok_or(SoutError::UnknownStream(id.0))
    }

    /// Forget track `id`
    pub fn remove(&mut self, id: StreamId) -> SoutResult<T> {
        let index = self
            .items
            .iter()
            .position(|(i, _)| *i == id)
            .ok_or(SoutError::UnknownStream(id.0))?;
        Ok(self.items.remove(index).1)
    }

    /// Number of live tracks
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// No live track
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Live tracks in creation order
    pub fn iter(&self) -> impl Iterator<Item = (StreamId, &T)> {
        self.items.iter().map(|(id, v)| (*id, v))
    }
}

/// An ordered chain of stages, head closest to the source
pub struct StreamChain {
    stages: Vec<Box<dyn Stream>>,
}

impl StreamChain {
    /// Build the chain described by `description` (`#a{..}:b{..}`).
    ///
    /// Either every stage opens or none is left running.
    pub fn new(ctx: &Arc<SoutContext>, description: &str) -> SoutResult<Self> {
        Self::with_next(ctx, description, StreamChain::from_stages(Vec::new()))
    }

    /// Build `description` in front of `next`; `next` is consumed either way
    pub fn with_next(
        ctx: &Arc<SoutContext>,
        description: &str,
        next: StreamChain,
    ) -> SoutResult<Self> {
        let chain = ConfigChain::parse(description)?;
        let mut stages = Vec::with_capacity(chain.elements().len() + next.len());
        for element in chain.elements() {
            match open_stage(ctx, element) {
                Ok(stage) => stages.push(stage),
                Err(e) => {
                    error!("stream chain failed for `{}': {}", element, e);
                    return Err(e);
                }
            }
        }
        stages.extend(next.stages);
        debug!("stream chain ready: {}", chain);
        Ok(StreamChain { stages })
    }

    /// Chain over already opened stages
    pub fn from_stages(stages: Vec<Box<dyn Stream>>) -> Self {
        StreamChain { stages }
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// No stage at all
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Name of the head stage
    pub fn first(&self) -> Option<&'static str> {
        self.stages.first().map(|stage| stage.name())
    }

    /// Name of the tail stage
    pub fn last(&self) -> Option<&'static str> {
        self.stages.last().map(|stage| stage.name())
    }

    /// Stage names, head first
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Tear down stages `range`, head first
    pub fn delete_range(&mut self, range: RangeInclusive<usize>) -> SoutResult<()> {
        if range.start() > range.end() || *range.end() >= self.stages.len() {
            return Err(SoutError::Config(format!(
                "cannot delete stages {}..={} of a {} stage chain",
                range.start(),
                range.end(),
                self.stages.len()
            )));
        }
        for stage in self.stages.drain(range) {
            debug!("destroying stream stage {}", stage.name());
        }
        Ok(())
    }

    /// Start a track at the head of the chain
    pub fn add(&mut self, format: &Arc<EsFormat>) -> SoutResult<StreamId> {
        self.downstream().add(format)
    }

    /// End a track
    pub fn del(&mut self, id: StreamId) -> SoutResult<()> {
        self.downstream().del(id)
    }

    /// Send a block of track `id`
    pub fn send(&mut self, id: StreamId, block: Block) -> SoutResult<()> {
        self.downstream().send(id, block)
    }

    /// Discard buffered data of track `id`
    pub fn flush(&mut self, id: StreamId) -> SoutResult<()> {
        self.downstream().flush(id)
    }

    /// Query the head stage
    pub fn control(&mut self, query: StreamQuery) -> SoutResult<StreamReply> {
        self.downstream().control(query)
    }

    /// Let time-driven stages make progress
    pub fn tick(&mut self) -> SoutResult<()> {
        self.downstream().tick()
    }

    fn downstream(&mut self) -> Downstream<'_> {
        Downstream::new(&mut self.stages, "chain")
    }
}

/// Open one stage from its chain element
pub fn open_stage(ctx: &Arc<SoutContext>, element: &ChainElement) -> SoutResult<Box<dyn Stream>> {
    debug!("opening stream stage {}", element);
    match element.name() {
        "std" | "standard" | "file" | "stream" | "fd" => {
            Ok(Box::new(StandardStream::open(ctx, element)?))
        }
        "duplicate" | "dup" => Ok(Box::new(DuplicateStream::open(ctx, element)?)),
        "delay" => Ok(Box::new(DelayStream::open(element)?)),
        "stats" => Ok(Box::new(StatsStream::open(element))),
        "dummy" => Ok(Box::new(DummyStream::new())),
        other => Err(SoutError::UnknownModule {
            kind: "stream",
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::SoutConfig;
    use crate::core::{EsCategory, FourCC};
    use parking_lot::Mutex;

    /// Terminal stage logging every call it receives
    pub(crate) struct RecordingStream {
        tracks: Tracks<i32>,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingStream {
        pub(crate) fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let stage = RecordingStream {
                tracks: Tracks::new(),
                log: Arc::clone(&log),
            };
            (stage, log)
        }
    }

    impl Stream for RecordingStream {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn add(&mut self, _next: Downstream<'_>, format: &Arc<EsFormat>) -> SoutResult<StreamId> {
            self.log.lock().push(format!("add {}", format.id));
            Ok(self.tracks.insert(format.id))
        }

        fn del(&mut self, _next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
            let es = self.tracks.remove(id)?;
            self.log.lock().push(format!("del {es}"));
            Ok(())
        }

        fn send(&mut self, _next: Downstream<'_>, id: StreamId, block: Block) -> SoutResult<()> {
            let es = self.tracks.get(id)?;
            let text = String::from_utf8_lossy(block.as_slice()).into_owned();
            self.log
                .lock()
                .push(format!("send {es} {text} {}", block.pts.unwrap_or(-1)));
            Ok(())
        }

        fn flush(&mut self, _next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
            let es = self.tracks.get(id)?;
            self.log.lock().push(format!("flush {es}"));
            Ok(())
        }
    }

    pub(crate) fn context() -> Arc<SoutContext> {
        Arc::new(SoutContext::new(SoutConfig::default()))
    }

    fn format(id: i32) -> Arc<EsFormat> {
        Arc::new(EsFormat::new(EsCategory::Audio, FourCC::new(b"araw")).with_id(id))
    }

    #[test]
    fn test_calls_reach_the_tail() {
        let (tail, log) = RecordingStream::new();
        let mut chain = StreamChain::from_stages(vec![
            Box::new(StatsStream::new("test")),
            Box::new(tail),
        ]);
        assert_eq!(chain.first(), Some("stats"));
        assert_eq!(chain.last(), Some("recording"));

        let id = chain.add(&format(3)).unwrap();
        chain.send(id, Block::from_slice(b"x").with_timestamps(5, 5)).unwrap();
        chain.flush(id).unwrap();
        chain.del(id).unwrap();

        assert_eq!(*log.lock(), vec!["add 3", "send 3 x 5", "flush 3", "del 3"]);
    }

    #[test]
    fn test_terminal_less_chain() {
        let mut chain = StreamChain::from_stages(vec![Box::new(StatsStream::new("lonely"))]);
        match chain.add(&format(0)) {
            Err(SoutError::NoDownstream(stage)) => assert_eq!(stage, "stats"),
            other => panic!("expected NoDownstream, got {other:?}"),
        }

        let mut empty = StreamChain::from_stages(Vec::new());
        assert!(empty.add(&format(0)).is_err());
        empty.tick().unwrap();
    }

    #[test]
    fn test_unknown_stage_fails_whole_chain() {
        let ctx = context();
        let err = StreamChain::new(&ctx, "#dummy:bogus").err().unwrap();
        assert!(matches!(err, SoutError::UnknownModule { kind: "stream", .. }));
        assert!(StreamChain::new(&ctx, "dummy{").is_err());
    }

    #[test]
    fn test_failed_chain_releases_opened_sinks() {
        let dir = tempfile::TempDir::new().unwrap();
        let dst = dir.path().join("a.wav");
        let ctx = context();

        let description = format!("stream{{dst=\"{}\"}}:bogus", dst.display());
        assert!(StreamChain::new(&ctx, &description).is_err());
        assert_eq!(ctx.pace_nocontrol(), 0);
    }

    #[test]
    fn test_with_next_and_delete_range() {
        let ctx = context();
        let (tail, log) = RecordingStream::new();
        let next = StreamChain::from_stages(vec![Box::new(tail)]);
        let mut chain = StreamChain::with_next(&ctx, "stats:delay{id=1,delay=10}", next).unwrap();
        assert_eq!(chain.names(), vec!["stats", "delay", "recording"]);

        let id = chain.add(&format(1)).unwrap();
        chain.send(id, Block::from_slice(b"y").with_timestamps(0, 0)).unwrap();
        assert_eq!(log.lock()[1], "send 1 y 10000");
        chain.del(id).unwrap();

        assert!(chain.delete_range(1..=5).is_err());
        chain.delete_range(0..=1).unwrap();
        assert_eq!(chain.names(), vec!["recording"]);
    }

    #[test]
    fn test_blocks_released_through_chain() {
        let mut chain = StreamChain::from_stages(vec![
            Box::new(StatsStream::new("own")),
            Box::new(DummyStream::new()),
        ]);
        let id = chain.add(&format(0)).unwrap();
        let block = Block::from_slice(b"payload");
        let probe = block.duplicate();
        chain.send(id, block).unwrap();
        assert_eq!(probe.shared_count(), 1);

        // failure path: unknown id
        let block = Block::from_slice(b"payload");
        let probe = block.duplicate();
        assert!(chain.send(StreamId(99), block).is_err());
        assert_eq!(probe.shared_count(), 1);
    }

    #[test]
    fn test_tracks_table() {
        let mut tracks = Tracks::new();
        let a = tracks.insert("a");
        let b = tracks.insert("b");
        assert_ne!(a, b);
        assert_eq!(*tracks.get(b).unwrap(), "b");
        assert_eq!(tracks.remove(a).unwrap(), "a");
        assert!(tracks.get(a).is_err());
        assert_eq!(tracks.len(), 1);
    }

    #[test]
    fn test_reply_accessors() {
        assert!(StreamReply::Bool(true).into_bool().unwrap());
        assert!(StreamReply::Bool(true).into_mime().is_err());
        assert_eq!(StreamReply::Mime("a/b".into()).into_mime().unwrap(), "a/b");
    }
}
