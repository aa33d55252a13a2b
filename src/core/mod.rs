//! Core pipeline types: blocks, elementary stream formats, clocks

/// Reference-counted timestamped byte buffers
pub mod block;
/// Monotonic clock sources
pub mod clock;
/// Elementary stream descriptors
pub mod es;

pub use block::{Block, BlockChain, BlockFlags, Tick};
pub use clock::{Clock, ManualClock, SystemClock};
pub use es::{AudioFormat, EsCategory, EsFormat, FourCC, VideoFormat};
