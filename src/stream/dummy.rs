use std::sync::Arc;

use super::{Downstream, Stream, StreamId, StreamQuery, StreamReply, Tracks};
use crate::core::{Block, EsFormat};
use crate::error::{SoutError, SoutResult};

/// Terminal stage accepting every track and dropping every block
#[derive(Debug, Default)]
pub struct DummyStream {
    tracks: Tracks<()>,
}

impl DummyStream {
    /// Create the stage
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stream for DummyStream {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn add(&mut self, _next: Downstream<'_>, _format: &Arc<EsFormat>) -> SoutResult<StreamId> {
        Ok(self.tracks.insert(()))
    }

    fn del(&mut self, _next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        self.tracks.remove(id)
    }

    fn send(&mut self, _next: Downstream<'_>, id: StreamId, _block: Block) -> SoutResult<()> {
        self.tracks.get(id).map(|_| ())
    }

    fn control(&mut self, _next: Downstream<'_>, query: StreamQuery) -> SoutResult<StreamReply> {
        match query {
            StreamQuery::IsEmpty => Ok(StreamReply::Bool(true)),
            StreamQuery::IsSynchronous => Ok(StreamReply::Bool(false)),
            StreamQuery::GetMime => Err(SoutError::Unsupported("MIME type of a dummy stream")),
        }
    }
}
