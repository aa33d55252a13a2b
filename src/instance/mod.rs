//! Stream output instance: the entry point producers talk to

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};
use parking_lot::Mutex;

use crate::config::SoutConfig;
use crate::core::{Block, Clock, EsFormat, SystemClock};
use crate::error::SoutResult;
use crate::stream::{StreamChain, StreamId, StreamQuery, StreamReply};

/// Overwrite confirmation callback, asked with the existing path
pub type ConfirmOverwrite = dyn Fn(&Path) -> bool + Send + Sync;

/// State shared by every stage of one stream output
pub struct SoutContext {
    /// Output settings
    pub config: SoutConfig,
    /// Time source for muxer grace windows
    pub clock: Arc<dyn Clock>,
    /// Asked before replacing an existing file when overwriting is off
    pub confirm_overwrite: Arc<ConfirmOverwrite>,
    pace_nocontrol: AtomicUsize,
}

impl SoutContext {
    /// Context with a system clock that declines every overwrite
    pub fn new(config: SoutConfig) -> Self {
        SoutContext {
            config,
            clock: Arc::new(SystemClock::new()),
            confirm_overwrite: Arc::new(|_: &Path| false),
            pace_nocontrol: AtomicUsize::new(0),
        }
    }

    /// Use `clock` for grace windows
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `confirm` to decide on existing files
    pub fn with_confirm_overwrite(
        mut self,
        confirm: impl Fn(&Path) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm_overwrite = Arc::new(confirm);
        self
    }

    /// Number of open sinks that do not control their pace
    pub fn pace_nocontrol(&self) -> usize {
        self.pace_nocontrol.load(Ordering::SeqCst)
    }

    pub(crate) fn enter_pace_nocontrol(&self) {
        self.pace_nocontrol.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn leave_pace_nocontrol(&self) {
        self.pace_nocontrol.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for SoutContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoutContext")
            .field("config", &self.config)
            .field("pace_nocontrol", &self.pace_nocontrol())
            .finish_non_exhaustive()
    }
}

/// A track registered with a [`SoutInstance`].
///
/// Deliberately not `Clone`: [`SoutInstance::del_input`] consumes it, so a
/// track is deleted exactly once and never used afterwards.
#[derive(Debug)]
pub struct SoutInput {
    id: StreamId,
    format: Arc<EsFormat>,
}

impl SoutInput {
    /// Format the track was added with
    pub fn format(&self) -> &EsFormat {
        &self.format
    }
}

/// A running stream output chain shared by any number of producers.
///
/// One lock guards the whole chain, every muxer and access output in it
/// included, so concurrent producers are serialized.
pub struct SoutInstance {
    description: String,
    ctx: Arc<SoutContext>,
    chain: Mutex<StreamChain>,
}

impl SoutInstance {
    /// Build the chain described by `description`
    pub fn new(description: &str, ctx: Arc<SoutContext>) -> SoutResult<Self> {
        info!("creating stream output chain `{}'", description);
        let chain = StreamChain::new(&ctx, description)?;
        Ok(SoutInstance {
            description: description.to_string(),
            ctx,
            chain: Mutex::new(chain),
        })
    }

    /// Chain description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Shared context
    pub fn context(&self) -> &Arc<SoutContext> {
        &self.ctx
    }

    /// Some sink of the chain does not control its pace
    pub fn pace_nocontrol(&self) -> bool {
        self.ctx.pace_nocontrol() > 0
    }

    /// Register a new track
    pub fn add_input(&self, format: EsFormat) -> SoutResult<SoutInput> {
        let format = Arc::new(format);
        let id = self.chain.lock().add(&format)?;
        debug!(
            "new {} input {} ({})",
            format.category.name(),
            id,
            format.codec
        );
        Ok(SoutInput { id, format })
    }

    /// Send a block of `input`
    pub fn send(&self, input: &SoutInput, block: Block) -> SoutResult<()> {
        self.chain.lock().send(input.id, block)
    }

    /// Discard buffered data of `input`
    pub fn flush(&self, input: &SoutInput) -> SoutResult<()> {
        self.chain.lock().flush(input.id)
    }

    /// End `input`
    pub fn del_input(&self, input: SoutInput) -> SoutResult<()> {
        debug!("removing input {}", input.id);
        self.chain.lock().del(input.id)
    }

    /// Query the chain
    pub fn control(&self, query: StreamQuery) -> SoutResult<StreamReply> {
        self.chain.lock().control(query)
    }

    /// Drive time-based progress when no data arrives
    pub fn tick(&self) -> SoutResult<()> {
        self.chain.lock().tick()
    }
}

impl fmt::Debug for SoutInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoutInstance")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
