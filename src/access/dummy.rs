use log::debug;

use super::{AccessOut, AccessQuery};
use crate::core::BlockChain;
use crate::error::{SoutError, SoutResult};

/// Access output that drops everything written to it
pub struct DummyAccess {
    path: String,
    written: u64,
}

impl DummyAccess {
    /// Create a discarding sink; `path` is only kept for diagnostics
    pub fn new(path: &str) -> Self {
        debug!("dummy access output opened ({})", path);
        DummyAccess {
            path: path.to_string(),
            written: 0,
        }
    }

    /// Total bytes discarded so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl AccessOut for DummyAccess {
    fn name(&self) -> &str {
        "dummy"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn write(&mut self, chain: BlockChain) -> SoutResult<usize> {
        let n: usize = chain.iter().map(|b| b.len()).sum();
        self.written += n as u64;
        Ok(n)
    }

    fn seek(&mut self, _offset: u64) -> SoutResult<()> {
        Err(SoutError::Unsupported("seek on dummy access output"))
    }

    fn control(&self, query: AccessQuery) -> SoutResult<bool> {
        match query {
            AccessQuery::ControlsPace => Ok(false),
            AccessQuery::CanSeek => Ok(false),
        }
    }
}
