//! Chain descriptions and output options

pub mod chain;

pub use chain::{ChainElement, ChainOption, ConfigChain};

use std::time::Duration;

use crate::error::SoutResult;

/// Default wait before a muxer gives up on slow-starting streams
pub const DEFAULT_MUX_CACHING: Duration = Duration::from_millis(1500);

/// Options of the file-like access outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOptions {
    /// Truncate an existing destination without asking
    pub overwrite: bool,
    /// Keep existing content and write at the end
    pub append: bool,
    /// Expand strftime sequences in the destination path
    pub format: bool,
    /// Open for synchronous writes, where the platform supports it
    pub sync: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        FileOptions {
            overwrite: true,
            append: false,
            format: false,
            sync: false,
        }
    }
}

impl FileOptions {
    /// Apply options given on an access element such as `file{append}`
    pub fn merged(&self, element: &ChainElement) -> SoutResult<Self> {
        Ok(FileOptions {
            overwrite: element.get_bool("overwrite", self.overwrite)?,
            append: element.get_bool("append", self.append)?,
            format: element.get_bool("format", self.format)?,
            sync: element.get_bool("sync", self.sync)?,
        })
    }
}

/// Settings shared by every stage of a stream output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoutConfig {
    /// Defaults for file-like access outputs
    pub file: FileOptions,
    /// How long a muxer waits for more streams before it starts muxing
    pub mux_caching: Duration,
}

impl Default for SoutConfig {
    fn default() -> Self {
        SoutConfig {
            file: FileOptions::default(),
            mux_caching: DEFAULT_MUX_CACHING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_option_defaults() {
        let opts = FileOptions::default();
        assert!(opts.overwrite);
        assert!(!opts.append);
        assert!(!opts.format);
        assert!(!opts.sync);
    }

    #[test]
    fn test_file_options_merge() {
        let element = ChainElement::parse("file{append,no-overwrite}").unwrap();
        let opts = FileOptions::default().merged(&element).unwrap();
        assert!(opts.append);
        assert!(!opts.overwrite);
        assert!(!opts.format);
    }

    #[test]
    fn test_default_caching() {
        assert_eq!(SoutConfig::default().mux_caching, Duration::from_millis(1500));
    }
}
