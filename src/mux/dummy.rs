use std::collections::HashSet;

use super::{InputId, InputSlot, MuxContext, MuxModule, MuxQuery, MuxReply};
use crate::core::{Block, BlockFlags};
use crate::error::{SoutError, SoutResult};

/// Raw muxer: writes every block as-is, oldest dts first.
///
/// A stream's codec configuration (`extra`) goes out once, right before its
/// first block.
#[derive(Debug, Default)]
pub struct DummyMux {
    header_pending: HashSet<InputId>,
}

impl DummyMux {
    /// Create a raw muxer
    pub fn new() -> Self {
        Self::default()
    }
}

impl MuxModule for DummyMux {
    fn name(&self) -> &str {
        "dummy"
    }

    fn control(&self, query: MuxQuery) -> SoutResult<MuxReply> {
        match query {
            MuxQuery::CanAddStreamWhileMuxing => Ok(MuxReply::Bool(true)),
            MuxQuery::GetAddStreamWait => Ok(MuxReply::Bool(false)),
            MuxQuery::GetMime => Err(SoutError::Unsupported("MIME type of raw output")),
        }
    }

    fn add_stream(&mut self, input: &InputSlot) -> SoutResult<()> {
        if !input.format().extra.is_empty() {
            self.header_pending.insert(input.id());
        }
        Ok(())
    }

    fn del_stream(&mut self, input: &InputSlot) {
        self.header_pending.remove(&input.id());
    }

    fn mux(&mut self, ctx: &mut MuxContext<'_>) -> SoutResult<()> {
        let mut chain = Vec::new();
        while let Some((index, _)) = ctx.pick_input(1) {
            let input = &mut ctx.inputs[index];
            let Some(block) = input.pop() else {
                break;
            };
            if self.header_pending.remove(&input.id()) {
                let header = Block::from_slice(&input.format().extra).with_flags(BlockFlags {
                    header: true,
                    ..BlockFlags::default()
                });
                chain.push(header);
            }
            chain.push(block);
        }
        if !chain.is_empty() {
            ctx.access.write(chain)?;
        }
        Ok(())
    }
}
