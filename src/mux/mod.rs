//! Muxers: interleave elementary streams into container bytes
//!
//! A [`Muxer`] owns its input slots and its access output. Format specifics
//! live in a [`MuxModule`]; the muxer itself only runs the first-stream grace
//! window and hands buffered blocks to the module.

pub mod dummy;
pub mod mpjpeg;
pub mod wav;

pub use dummy::DummyMux;
pub use mpjpeg::MpjpegMux;
pub use wav::WavMux;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};

use crate::access::AccessOut;
use crate::config::{ChainElement, DEFAULT_MUX_CACHING};
use crate::core::block::ticks;
use crate::core::{Block, Clock, EsCategory, EsFormat, SystemClock, Tick};
use crate::error::{SoutError, SoutResult};

/// Mux module names and what they produce
pub const MODULES: &[(&str, &str)] = &[
    ("dummy", "raw concatenation of all streams in decoding order"),
    ("wav", "RIFF/WAVE with a single PCM audio stream"),
    ("mpjpeg", "multipart JPEG for MJPEG video"),
];

/// Handle of one muxer input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputId(u32);

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input#{}", self.0)
    }
}

/// One elementary stream attached to a muxer
#[derive(Debug)]
pub struct InputSlot {
    id: InputId,
    format: Arc<EsFormat>,
    fifo: VecDeque<Block>,
}

impl InputSlot {
    fn new(id: InputId, format: Arc<EsFormat>) -> Self {
        InputSlot {
            id,
            format,
            fifo: VecDeque::new(),
        }
    }

    /// Slot handle
    pub fn id(&self) -> InputId {
        self.id
    }

    /// Stream format, fixed for the slot's lifetime
    pub fn format(&self) -> &EsFormat {
        &self.format
    }

    /// Number of pending blocks
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    /// Check if no block is pending
    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Oldest pending block
    pub fn peek(&self) -> Option<&Block> {
        self.fifo.front()
    }

    /// Take the oldest pending block
    pub fn pop(&mut self) -> Option<Block> {
        self.fifo.pop_front()
    }
}

/// Queries a mux module answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxQuery {
    /// Can streams be added once muxing has started
    CanAddStreamWhileMuxing,
    /// Does the module prefer to wait for all streams before muxing
    GetAddStreamWait,
    /// MIME type of the produced container
    GetMime,
}

/// Answer to a [`MuxQuery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxReply {
    /// Answer to a yes/no query
    Bool(bool),
    /// MIME type
    Mime(String),
}

impl MuxReply {
    /// Extract a yes/no answer
    pub fn into_bool(self) -> SoutResult<bool> {
        match self {
            MuxReply::Bool(b) => Ok(b),
            MuxReply::Mime(_) => Err(SoutError::Unsupported("boolean answer to a MIME query")),
        }
    }

    /// Extract a MIME type
    pub fn into_mime(self) -> SoutResult<String> {
        match self {
            MuxReply::Mime(m) => Ok(m),
            MuxReply::Bool(_) => Err(SoutError::Unsupported("MIME answer to a boolean query")),
        }
    }
}

/// What a mux module sees while muxing
pub struct MuxContext<'a> {
    /// All input slots, in creation order
    pub inputs: &'a mut [InputSlot],
    /// Where the container bytes go
    pub access: &'a mut dyn AccessOut,
    /// Whether streams may still appear once muxing started
    pub add_stream_any_time: bool,
}

impl MuxContext<'_> {
    /// Index of the input to mux next, see [`pick_input`]
    pub fn pick_input(&self, min_blocks: usize) -> Option<(usize, Tick)> {
        pick_input(self.inputs, min_blocks, self.add_stream_any_time)
    }
}

/// Pick the input whose oldest block has the smallest dts.
///
/// Inputs with fewer than `min_blocks` pending blocks are skipped, except
/// that when streams cannot be added at any time a starved non-subtitle
/// input stalls the whole muxer (returns `None`) so interleaving stays
/// correct. Blocks without dts sort first.
pub fn pick_input(
    inputs: &[InputSlot],
    min_blocks: usize,
    add_stream_any_time: bool,
) -> Option<(usize, Tick)> {
    let mut best: Option<(usize, Tick)> = None;
    for (index, input) in inputs.iter().enumerate() {
        let head = match input.peek() {
            Some(block) if input.len() >= min_blocks => block,
            _ => {
                if !add_stream_any_time && input.format().category != EsCategory::Spu {
                    return None;
                }
                continue;
            }
        };
        let dts = head.dts.or(head.pts).unwrap_or(Tick::MIN);
        if best.is_none_or(|(_, best_dts)| dts < best_dts) {
            best = Some((index, dts));
        }
    }
    best
}

/// Container format implementation driven by a [`Muxer`]
pub trait MuxModule: Send {
    /// Module name
    fn name(&self) -> &str;

    /// Answer a capability query
    fn control(&self, query: MuxQuery) -> SoutResult<MuxReply>;

    /// Accept or refuse a new input
    fn add_stream(&mut self, input: &InputSlot) -> SoutResult<()>;

    /// Forget an input; pending blocks have already been muxed or dropped
    fn del_stream(&mut self, _input: &InputSlot) {}

    /// Consume pending blocks and write container data
    fn mux(&mut self, ctx: &mut MuxContext<'_>) -> SoutResult<()>;

    /// Forget buffered state for one input after a seek or discontinuity
    fn flush(&mut self, _input: &InputSlot) {}

    /// Whether enough streams are present to stop waiting early
    fn has_enough_streams(&self, _inputs: &[InputSlot]) -> bool {
        false
    }

    /// Write trailers; called once before the access output goes away
    fn close(&mut self, _ctx: &mut MuxContext<'_>) -> SoutResult<()> {
        Ok(())
    }
}

/// Instantiate a mux module from its chain element
pub fn open_module(element: &ChainElement) -> SoutResult<Box<dyn MuxModule>> {
    match element.name() {
        "dummy" | "raw" => Ok(Box::new(DummyMux::new())),
        "wav" => Ok(Box::new(WavMux::new())),
        "mpjpeg" => Ok(Box::new(MpjpegMux::new(element))),
        other => Err(SoutError::UnknownModule {
            kind: "mux",
            name: other.to_string(),
        }),
    }
}

/// Settings a muxer is created with
#[derive(Clone)]
pub struct MuxerOptions {
    /// Grace window before muxing starts without all streams
    pub caching: Duration,
    /// At least one sink of the stream output does not control pace
    pub pace_nocontrol: bool,
    /// Time source for the grace window
    pub clock: Arc<dyn Clock>,
}

impl Default for MuxerOptions {
    fn default() -> Self {
        MuxerOptions {
            caching: DEFAULT_MUX_CACHING,
            pace_nocontrol: false,
            clock: Arc::new(SystemClock::new()),
        }
    }
}

/// Interleaves inputs through a mux module into an access output
pub struct Muxer {
    module: Box<dyn MuxModule>,
    inputs: Vec<InputSlot>,
    next_input: u32,
    add_stream_any_time: bool,
    waiting_stream: bool,
    add_stream_start: Option<Tick>,
    caching: Tick,
    clock: Arc<dyn Clock>,
    closed: bool,
    // dropped last, after the module has written its trailer
    access: Box<dyn AccessOut>,
}

impl Muxer {
    /// Load the mux module `name` (possibly with options, `ts{foo}`) on top of `access`
    pub fn new(name: &str, access: Box<dyn AccessOut>, options: MuxerOptions) -> SoutResult<Self> {
        let element = ChainElement::parse(name)?;
        let module = open_module(&element).inspect_err(|_| {
            error!("no suitable sout mux module for `{}/{}://{}'", name, access.name(), access.path());
        })?;
        Ok(Muxer::with_module(module, access, options))
    }

    /// Wrap an already constructed module
    pub fn with_module(
        module: Box<dyn MuxModule>,
        access: Box<dyn AccessOut>,
        options: MuxerOptions,
    ) -> Self {
        let mut add_stream_any_time = false;
        let mut waiting_stream = true;

        let can_add = module
            .control(MuxQuery::CanAddStreamWhileMuxing)
            .and_then(MuxReply::into_bool)
            .unwrap_or(false);
        if can_add {
            debug!("muxer {} supports adding streams at any time", module.name());
            add_stream_any_time = true;
            waiting_stream = false;

            // a paced output gives time to wait for every stream, which
            // yields better files
            let wait = !options.pace_nocontrol
                || module
                    .control(MuxQuery::GetAddStreamWait)
                    .and_then(MuxReply::into_bool)
                    .unwrap_or(false);
            if wait {
                debug!("muxer {} prefers to wait for all ES before starting to mux", module.name());
                waiting_stream = true;
            }
        }

        Muxer {
            module,
            inputs: Vec::new(),
            next_input: 0,
            add_stream_any_time,
            waiting_stream,
            add_stream_start: None,
            caching: ticks(options.caching),
            clock: options.clock,
            closed: false,
            access,
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        self.module.name()
    }

    /// Still in the first-stream grace period
    pub fn is_waiting(&self) -> bool {
        self.waiting_stream
    }

    /// Streams may be added after muxing started
    pub fn can_add_stream_any_time(&self) -> bool {
        self.add_stream_any_time
    }

    /// Number of attached inputs
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Attached inputs
    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    /// No input has pending blocks
    pub fn is_empty(&self) -> bool {
        self.inputs.iter().all(InputSlot::is_empty)
    }

    /// The access output written to
    pub fn access(&self) -> &dyn AccessOut {
        &*self.access
    }

    /// Attach a new input
    pub fn add_stream(&mut self, format: Arc<EsFormat>) -> SoutResult<InputId> {
        if !self.add_stream_any_time && !self.waiting_stream {
            error!(
                "cannot add a new stream (unsupported while muxing to this format). \
                 You can try increasing the mux caching value"
            );
            return Err(SoutError::CannotAddStream(format!(
                "{} does not accept new streams while muxing",
                self.module.name()
            )));
        }

        let slot = InputSlot::new(InputId(self.next_input), format);
        if let Err(e) = self.module.add_stream(&slot) {
            error!("cannot add this stream: {}", e);
            return Err(e);
        }
        self.next_input += 1;

        debug!(
            "adding a new input {} ({} {})",
            slot.id,
            slot.format.category.name(),
            slot.format.codec
        );
        let id = slot.id;
        self.inputs.push(slot);

        if self.waiting_stream && self.add_stream_start.is_none() {
            self.add_stream_start = Some(self.clock.now());
        }
        Ok(id)
    }

    /// Detach an input, muxing its pending data first if still waiting
    pub fn delete_stream(&mut self, id: InputId) -> SoutResult<()> {
        let index = self.index_of(id)?;
        let mut result = Ok(());
        if self.waiting_stream && !self.inputs[index].is_empty() {
            // stop waiting so the module takes care of this input's data
            self.waiting_stream = false;
            result = self.run_module();
        }

        let index = self.index_of(id)?;
        let slot = self.inputs.remove(index);
        self.module.del_stream(&slot);
        debug!("removing input {}", id);
        if self.inputs.is_empty() {
            warn!("no more input streams for this mux");
        }
        result
    }

    /// Queue `block` on input `id` and mux if the grace window is over
    pub fn send_buffer(&mut self, id: InputId, block: Block) -> SoutResult<()> {
        let index = self.index_of(id)?;
        self.inputs[index].fifo.push_back(block);
        self.mux()
    }

    /// Cooperative tick: leave the grace window when due, then mux
    pub fn mux(&mut self) -> SoutResult<()> {
        if self.waiting_stream && !self.grace_over() {
            return Ok(());
        }
        self.run_module()
    }

    /// Drop pending blocks of one input
    pub fn flush(&mut self, id: InputId) -> SoutResult<()> {
        let index = self.index_of(id)?;
        let slot = &mut self.inputs[index];
        slot.fifo.clear();
        self.module.flush(slot);
        Ok(())
    }

    /// Forward a query to the module
    pub fn control(&self, query: MuxQuery) -> SoutResult<MuxReply> {
        self.module.control(query)
    }

    /// MIME type of the output, if the module has a fixed one
    pub fn mime(&self) -> SoutResult<String> {
        self.control(MuxQuery::GetMime)?.into_mime()
    }

    /// Mux what is pending and let the module write its trailer
    pub fn close(&mut self) -> SoutResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.is_empty() {
            self.waiting_stream = false;
            self.run_module()?;
        }
        let mut ctx = MuxContext {
            inputs: &mut self.inputs,
            access: &mut *self.access,
            add_stream_any_time: self.add_stream_any_time,
        };
        self.module.close(&mut ctx)
    }

    fn grace_over(&mut self) -> bool {
        if self.inputs.is_empty() {
            return false;
        }
        let now = self.clock.now();
        let start = *self.add_stream_start.get_or_insert(now);

        if self.module.has_enough_streams(&self.inputs) {
            debug!("muxer {} has enough streams", self.module.name());
        } else if now.saturating_sub(start) < self.caching {
            return false;
        } else {
            debug!(
                "muxer {} waited {} ms for streams, starting with {}",
                self.module.name(),
                (now - start) / 1000,
                self.inputs.len()
            );
        }
        self.waiting_stream = false;
        true
    }

    fn run_module(&mut self) -> SoutResult<()> {
        let mut ctx = MuxContext {
            inputs: &mut self.inputs,
            access: &mut *self.access,
            add_stream_any_time: self.add_stream_any_time,
        };
        self.module.mux(&mut ctx)
    }

    fn index_of(&self, id: InputId) -> SoutResult<usize> {
        self.inputs
            .iter()
            .position(|slot| slot.id == id)
            .ok_or(SoutError::UnknownInput(id.0))
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("cannot close muxer {}: {}", self.module.name(), e);
        }
    }
}
