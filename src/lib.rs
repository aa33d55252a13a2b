#![warn(missing_docs)]

//! # sout-rs: Stream Output Pipeline
//!
//! Takes timestamped elementary stream packets from producers and turns
//! them into container bytes written to a file, a descriptor or standard
//! output.
//!
//! ## Layers
//!
//! - **Stream chain** - ordered stages (`std`, `duplicate`, `delay`, `stats`, `dummy`)
//! - **Muxer** - interleaves tracks after a bounded first-stream grace window
//! - **Access output** - writes byte chains to their destination
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sout_rs::{Block, EsFormat, FourCC, SoutConfig, SoutContext, SoutInstance};
//!
//! let ctx = Arc::new(SoutContext::new(SoutConfig::default()));
//! let sout = SoutInstance::new("#std{access=file,mux=wav,dst=out.wav}", ctx)?;
//!
//! let input = sout.add_input(EsFormat::audio(FourCC::new(b"s16l"), 44100, 2, 16))?;
//! sout.send(&input, Block::new(vec![0; 4096]).with_timestamps(0, 0))?;
//! sout.del_input(input)?;
//! ```

/// Access outputs (file, stream, fd, dummy)
pub mod access;
/// Chain descriptions and output options
pub mod config;
/// Core pipeline types
pub mod core;
/// Error types for the stream output pipeline
pub mod error;
/// Stream output instance shared by producers
pub mod instance;
/// Muxers and their modules
pub mod mux;
/// Stream output chains and stages
pub mod stream;

// Export public types
pub use crate::config::{ConfigChain, SoutConfig};
pub use crate::core::{Block, Clock, EsCategory, EsFormat, FourCC, ManualClock, SystemClock, Tick};
pub use crate::error::{ErrorCategory, SoutError, SoutResult};
pub use crate::instance::{SoutContext, SoutInput, SoutInstance};
pub use crate::stream::{StreamQuery, StreamReply};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
